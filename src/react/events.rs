//! 宿主回调事件：状态变化、意图改写、确认请求、反思结果与通用步骤事件
//!
//! 事件通过可选的 mpsc::UnboundedSender 推送，序列化为 JSON 供前端展示。

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::core::{AgentState, ConfirmationRequest};
use crate::react::{ReflectionResult, RewrittenIntent};

/// 步骤事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Thinking,
    IntentRewriting,
    ToolCall,
    ToolResult,
    Confirmation,
    Reflection,
    Cancelled,
    StateChange,
}

/// 通用步骤事件：自由文本 + 可选工具名/参数/结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepEvent {
    pub kind: StepKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_args: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<String>,
}

impl StepEvent {
    pub fn new(kind: StepKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            tool_name: None,
            tool_args: None,
            tool_result: None,
        }
    }

    pub fn with_tool(mut self, name: impl Into<String>, args: Value) -> Self {
        self.tool_name = Some(name.into());
        self.tool_args = Some(args);
        self
    }

    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.tool_result = Some(result.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    StateChange { from: AgentState, to: AgentState },
    IntentRewritten { intent: RewrittenIntent },
    ConfirmationRequired { request: ConfirmationRequest },
    Reflection { result: ReflectionResult },
    Step(StepEvent),
}

pub type EventSender = mpsc::UnboundedSender<AgentEvent>;

/// 接收端已关闭时静默丢弃
pub(crate) fn send_event(tx: Option<&EventSender>, ev: AgentEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}
