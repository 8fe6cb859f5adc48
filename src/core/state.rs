//! 状态机：AgentState 与合法迁移
//!
//! 只负责校验并记录迁移、通知订阅者；非法迁移静默忽略（debug 日志），
//! 这样来自慢速 UI 层的冗余信号是无害的。订阅者通过 watch::Receiver 观察当前状态。
//! reset 会推进 epoch：被取代的旧一轮持有旧 epoch，其后续迁移一律被拒绝。

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::react::ExecutionPlan;

/// 编排器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    /// 刷新系统提示、裁剪上下文、意图改写
    Parsing,
    /// 等待宿主 confirm / reject
    AwaitingConfirmation,
    Executing,
    Reflecting,
    Summarizing,
    Completed,
    Cancelled,
    /// 终态，需要显式 reset 才能回到 Idle
    Error,
}

impl AgentState {
    /// 本轮是否已结束（不再推进）
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentState::Completed | AgentState::Cancelled | AgentState::Error)
    }

    /// from -> to 是否合法
    pub fn can_transition(from: AgentState, to: AgentState) -> bool {
        use AgentState::*;
        if from == to {
            return false;
        }
        if to == Cancelled {
            return from != Idle;
        }
        matches!(
            (from, to),
            (Idle, Parsing)
                | (Parsing, AwaitingConfirmation)
                | (Parsing, Executing)
                | (Parsing, Completed)
                | (Parsing, Error)
                | (AwaitingConfirmation, Executing)
                | (AwaitingConfirmation, Completed)
                | (AwaitingConfirmation, Error)
                | (Executing, AwaitingConfirmation)
                | (Executing, Reflecting)
                | (Executing, Summarizing)
                | (Executing, Error)
                | (Reflecting, Executing)
                | (Reflecting, Error)
                | (Summarizing, Completed)
                | (Completed, Idle)
                | (Cancelled, Idle)
        )
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentState::Idle => "idle",
            AgentState::Parsing => "parsing",
            AgentState::AwaitingConfirmation => "awaiting_confirmation",
            AgentState::Executing => "executing",
            AgentState::Reflecting => "reflecting",
            AgentState::Summarizing => "summarizing",
            AgentState::Completed => "completed",
            AgentState::Cancelled => "cancelled",
            AgentState::Error => "error",
        };
        f.write_str(s)
    }
}

/// 状态机：当前状态 + 当前计划
pub struct StateMachine {
    tx: watch::Sender<AgentState>,
    epoch: AtomicU64,
    plan: Mutex<Option<ExecutionPlan>>,
}

impl StateMachine {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(AgentState::Idle);
        Self {
            tx,
            epoch: AtomicU64::new(0),
            plan: Mutex::new(None),
        }
    }

    pub fn state(&self) -> AgentState {
        *self.tx.borrow()
    }

    pub fn can_transition(&self, to: AgentState) -> bool {
        AgentState::can_transition(self.state(), to)
    }

    /// 当前 epoch（每次 reset 加一）
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// 合法则迁移并返回原状态；非法则返回 None
    pub fn transition(&self, to: AgentState) -> Option<AgentState> {
        self.transition_at(self.epoch(), to)
    }

    /// 仅当 epoch 未被 reset 推进时迁移
    pub fn transition_at(&self, epoch: u64, to: AgentState) -> Option<AgentState> {
        let mut previous = None;
        self.tx.send_if_modified(|current| {
            if self.epoch.load(Ordering::SeqCst) == epoch
                && AgentState::can_transition(*current, to)
            {
                previous = Some(*current);
                *current = to;
                true
            } else {
                false
            }
        });
        match previous {
            Some(from) => tracing::debug!(%from, %to, "state transition"),
            None => tracing::debug!(current = %self.state(), %to, "illegal state transition ignored"),
        }
        previous
    }

    /// 强制回到 Idle 并清空计划
    pub fn reset(&self) {
        self.tx.send_modify(|current| {
            self.epoch.fetch_add(1, Ordering::SeqCst);
            *current = AgentState::Idle;
        });
        *crate::lock(&self.plan) = None;
    }

    pub fn subscribe(&self) -> watch::Receiver<AgentState> {
        self.tx.subscribe()
    }

    pub fn plan(&self) -> Option<ExecutionPlan> {
        crate::lock(&self.plan).clone()
    }

    pub fn set_plan(&self, plan: Option<ExecutionPlan>) {
        *crate::lock(&self.plan) = plan;
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
