//! 错误恢复引擎
//!
//! 重试之后仍失败的错误交给 RecoveryEngine，返回 RecoveryAction，供编排循环决定是注入提示重试、
//! 裁剪上下文还是终止本轮。局部恢复总是优先于把错误抛给宿主。

use crate::core::{AgentError, RecoveryAction};
use crate::llm::LlmError;

/// 模型返回空响应时注入的纠正提示
pub const EMPTY_RESPONSE_PROMPT: &str =
    "上一轮你没有输出任何内容，也没有调用工具。请继续完成用户的请求：需要操作数据时调用相应工具，\
     已经拿到结果时调用 render 工具向用户展示，或直接给出文字回复。";

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// 根据错误类型返回建议的恢复动作
    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::ProviderEmptyResponse => {
                RecoveryAction::RetryWithPrompt(EMPTY_RESPONSE_PROMPT.to_string())
            }
            AgentError::Llm(LlmError::ContextLengthExceeded) => RecoveryAction::SummarizeAndPrune,
            AgentError::Llm(LlmError::InvalidResponse(raw)) => RecoveryAction::RetryWithPrompt(
                format!(
                    "上一轮输出无法解析（{raw}）。调用工具时请严格使用提供的工具定义与 JSON 参数。"
                ),
            ),
            _ => RecoveryAction::Abort,
        }
    }
}
