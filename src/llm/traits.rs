//! 模型客户端抽象
//!
//! 具体的模型提供方不在本 crate 内实现，只约定边界：invoke(messages) 返回一条 Ai 回复
//! （可选文本 + 有序工具调用 + 诊断用的 finish_reason），或显式的 Empty 结果。
//! 「既无内容也无动作」是类型化的结果而不是错误字符串，编排循环据此做空响应恢复。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::{Message, ToolCall};

/// 模型调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider timeout")]
    Timeout,

    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("Model overloaded")]
    Overloaded,

    #[error("Context length exceeded")]
    ContextLengthExceeded,

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// 瞬时错误可重试：限流、网络、超时、5xx、过载
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited { .. }
            | LlmError::Network(_)
            | LlmError::Timeout
            | LlmError::Overloaded => true,
            LlmError::ServerError { status, .. } => matches!(status, 500 | 502 | 503 | 504),
            _ => false,
        }
    }
}

/// 模型的一条 Ai 回复
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AiReply {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    /// 提供方元数据，仅用于诊断日志
    pub finish_reason: Option<String>,
}

impl AiReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn with_finish_reason(mut self, reason: impl Into<String>) -> Self {
        self.finish_reason = Some(reason.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.tool_calls.is_empty()
    }

    pub fn into_message(self) -> Message {
        Message::ai_with_tool_calls(self.content, self.tool_calls)
    }
}

/// 模型调用结果
#[derive(Debug, Clone, PartialEq)]
pub enum ModelResponse {
    Reply(AiReply),
    /// 提供方明确表示「无后续动作、无内容」
    Empty { finish_reason: Option<String> },
}

impl ModelResponse {
    /// 把空文本且无工具调用的 Reply 归一为 Empty
    pub fn normalize(self) -> Self {
        match self {
            ModelResponse::Reply(reply) if reply.is_empty() => ModelResponse::Empty {
                finish_reason: reply.finish_reason,
            },
            other => other,
        }
    }
}

/// 对话模型 trait
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn invoke(&self, messages: &[Message]) -> Result<ModelResponse, LlmError>;

    /// 模型名称（日志用）
    fn name(&self) -> &str {
        "chat-model"
    }
}
