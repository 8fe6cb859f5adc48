//! 确认汇合点（单槽）
//!
//! 循环在 PendingConfirmation::wait 上挂起，宿主随后调用 confirm / reject 解除挂起。
//! 同一时刻只允许一个待确认请求：open 在已有请求时返回 ConfirmationPending。

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::oneshot;

use crate::core::AgentError;

/// 确认针对的对象
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationKind {
    /// 意图级：整轮的高风险意图
    Intent,
    /// 工具级：单次危险工具调用
    Tool,
}

/// 待确认请求（发给宿主展示）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub id: String,
    pub kind: ConfirmationKind,
    /// 被拦截的工具名或意图类型
    pub tool_name: String,
    pub args: serde_json::Value,
    pub message: String,
}

impl ConfirmationRequest {
    pub fn new(
        kind: ConfirmationKind,
        tool_name: impl Into<String>,
        args: serde_json::Value,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("confirm_{}", uuid::Uuid::new_v4().simple()),
            kind,
            tool_name: tool_name.into(),
            args,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationDecision {
    Confirmed,
    Rejected(String),
}

/// 等待端：由循环持有
#[derive(Debug)]
pub struct PendingConfirmation {
    id: String,
    rx: oneshot::Receiver<ConfirmationDecision>,
}

impl PendingConfirmation {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 发送端被丢弃（clear / reset）视为 "abandoned" 拒绝
    pub async fn wait(self) -> ConfirmationDecision {
        self.rx
            .await
            .unwrap_or_else(|_| ConfirmationDecision::Rejected("abandoned".to_string()))
    }
}

struct Slot {
    request: ConfirmationRequest,
    tx: oneshot::Sender<ConfirmationDecision>,
}

/// 单槽汇合点：宿主侧 confirm / reject，循环侧 open + wait
#[derive(Default)]
pub struct ConfirmationSlot {
    slot: Mutex<Option<Slot>>,
}

impl ConfirmationSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, request: ConfirmationRequest) -> Result<PendingConfirmation, AgentError> {
        let mut slot = crate::lock(&self.slot);
        if let Some(existing) = slot.as_ref() {
            return Err(AgentError::ConfirmationPending(existing.request.id.clone()));
        }
        let (tx, rx) = oneshot::channel();
        let id = request.id.clone();
        *slot = Some(Slot { request, tx });
        Ok(PendingConfirmation { id, rx })
    }

    /// 返回是否确实有待确认请求被解决
    pub fn confirm(&self) -> bool {
        self.resolve(ConfirmationDecision::Confirmed)
    }

    pub fn reject(&self, reason: impl Into<String>) -> bool {
        self.resolve(ConfirmationDecision::Rejected(reason.into()))
    }

    fn resolve(&self, decision: ConfirmationDecision) -> bool {
        let taken = crate::lock(&self.slot).take();
        match taken {
            Some(Slot { request, tx }) => {
                tracing::info!(id = %request.id, tool = %request.tool_name, ?decision, "confirmation resolved");
                // 等待端已被取消时发送失败，无需处理
                let _ = tx.send(decision);
                true
            }
            None => {
                tracing::debug!("no pending confirmation to resolve");
                false
            }
        }
    }

    pub fn current(&self) -> Option<ConfirmationRequest> {
        crate::lock(&self.slot).as_ref().map(|s| s.request.clone())
    }

    pub fn is_pending(&self) -> bool {
        crate::lock(&self.slot).is_some()
    }

    /// 丢弃任何待确认请求
    pub fn clear(&self) {
        crate::lock(&self.slot).take();
    }

    /// 仅当槽内仍是 id 对应的请求时才清除
    pub fn release(&self, id: &str) {
        let mut slot = crate::lock(&self.slot);
        if slot.as_ref().is_some_and(|s| s.request.id == id) {
            slot.take();
        }
    }
}
