//! Mock 模型客户端（用于测试，无需 API）
//!
//! 按脚本依次返回预设回复；脚本耗尽后返回固定文本。记录调用次数与最近一次收到的消息列表。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{AiReply, ChatModel, LlmError, ModelResponse};
use crate::memory::{Message, ToolCall};

/// 一条脚本回复
#[derive(Debug, Clone)]
pub enum Scripted {
    Respond(Result<ModelResponse, LlmError>),
    /// 延迟后再回复（用于超时与取消测试）
    Delayed(Duration, Result<ModelResponse, LlmError>),
}

/// Mock 客户端：按脚本回复
#[derive(Debug, Default)]
pub struct MockChatModel {
    script: Mutex<VecDeque<Scripted>>,
    calls: AtomicUsize,
    last_messages: Mutex<Vec<Message>>,
    fallback: Option<String>,
}

impl MockChatModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// 脚本耗尽后的回复（默认 "done"）
    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(text.into());
        self
    }

    pub fn push(self, item: Scripted) -> Self {
        crate::lock(&self.script).push_back(item);
        self
    }

    pub fn text(self, content: impl Into<String>) -> Self {
        self.push(Scripted::Respond(Ok(ModelResponse::Reply(AiReply::text(content)))))
    }

    pub fn tool_call(self, name: &str, args: serde_json::Value) -> Self {
        self.tool_calls(vec![ToolCall::new(name, args)])
    }

    pub fn tool_calls(self, calls: Vec<ToolCall>) -> Self {
        self.push(Scripted::Respond(Ok(ModelResponse::Reply(
            AiReply::default().with_tool_calls(calls),
        ))))
    }

    pub fn empty(self) -> Self {
        self.push(Scripted::Respond(Ok(ModelResponse::Empty {
            finish_reason: Some("stop".into()),
        })))
    }

    pub fn error(self, err: LlmError) -> Self {
        self.push(Scripted::Respond(Err(err)))
    }

    pub fn delayed(self, delay: Duration, content: impl Into<String>) -> Self {
        self.push(Scripted::Delayed(
            delay,
            Ok(ModelResponse::Reply(AiReply::text(content))),
        ))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_messages(&self) -> Vec<Message> {
        crate::lock(&self.last_messages).clone()
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn invoke(&self, messages: &[Message]) -> Result<ModelResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *crate::lock(&self.last_messages) = messages.to_vec();

        let next = crate::lock(&self.script).pop_front();
        match next {
            Some(Scripted::Respond(result)) => result,
            Some(Scripted::Delayed(delay, result)) => {
                tokio::time::sleep(delay).await;
                result
            }
            None => Ok(ModelResponse::Reply(AiReply::text(
                self.fallback.clone().unwrap_or_else(|| "done".to_string()),
            ))),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_fallback() {
        let model = MockChatModel::new()
            .tool_call("category", serde_json::json!({"action": "list"}))
            .empty()
            .with_fallback("好的");

        let first = model.invoke(&[Message::human("列出分类")]).await.unwrap();
        assert!(matches!(first, ModelResponse::Reply(r) if r.tool_calls[0].name == "category"));
        let second = model.invoke(&[]).await.unwrap();
        assert!(matches!(second, ModelResponse::Empty { .. }));
        let third = model.invoke(&[]).await.unwrap();
        assert_eq!(third, ModelResponse::Reply(AiReply::text("好的")));
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn test_records_last_messages() {
        let model = MockChatModel::new();
        model.invoke(&[Message::system("s"), Message::human("hi")]).await.unwrap();
        assert_eq!(model.last_messages().len(), 2);
    }
}
