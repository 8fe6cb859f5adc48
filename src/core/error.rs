//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 RetryWithPrompt / SummarizeAndPrune / Abort。
//! 只有取消、迭代耗尽、重复调用循环（以及空响应重试耗尽）允许以非成功状态结束一轮对话。

use thiserror::Error;

use crate::core::CancelReason;
use crate::llm::LlmError;

/// 编排过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    /// 取消：从不重试，总是短路到 Cancelled 终态
    #[error("Cancelled: {0}")]
    Cancelled(CancelReason),

    #[error("Timeout after {after_ms}ms: {message}")]
    Timeout { message: String, after_ms: u64 },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Permission denied for {tool}: {reason}")]
    PermissionDenied { tool: String, reason: String },

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    /// 模型既无文本也无工具调用
    #[error("Provider returned an empty response")]
    ProviderEmptyResponse,

    #[error("Max iterations exceeded ({0})")]
    MaxIterationsExceeded(usize),

    #[error("Repeated tool call loop detected: {tool} x{repeats}")]
    RepeatedCallLoop { tool: String, repeats: usize },

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// 已有一个待确认请求，不能再创建第二个
    #[error("A confirmation is already pending: {0}")]
    ConfirmationPending(String),

    /// 同一实例已有一轮对话在运行
    #[error("Orchestrator is busy with another turn")]
    Busy,

    #[error("Invalid state for this operation: {0}")]
    InvalidState(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl AgentError {
    /// 默认的可重试判定：超时与可重试的 LLM 错误
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::Timeout { .. } => true,
            AgentError::Llm(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AgentError::Cancelled(_))
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 将提示注入下一轮，让模型重试（如空响应）
    RetryWithPrompt(String),
    /// 压缩上下文后继续（如超长上下文）
    SummarizeAndPrune,
    /// 终止当前轮
    Abort,
}
