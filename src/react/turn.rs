//! 当前轮：一次「用户消息 -> 最终助手输出」执行的全部可变状态
//!
//! 循环按引用传递 Turn，消息列表与观察列表在一轮内由循环独占。

use crate::memory::{Message, MessageContent, Role};
use crate::react::completion::CompletionFacts;
use crate::react::{ExecutionPlan, ObservationLog, RewrittenIntent};

#[derive(Debug)]
pub struct Turn {
    pub id: String,
    pub messages: Vec<Message>,
    pub observations: ObservationLog,
    pub intent: Option<RewrittenIntent>,
    pub plan: Option<ExecutionPlan>,
    /// 意图级确认已通过：本轮危险工具无需再确认
    pub pre_approved: bool,
    pub iterations: usize,
    /// 连续空响应次数（非空回复后清零）
    pub empty_responses: usize,
    pub repeat_interceptions: usize,
    pub render_demands: usize,
    /// 开启本轮的用户消息；之后注入的纠正提示同为 human 角色，不能再按位置推断
    request: Option<MessageContent>,
    /// 纠正提示：本批工具结果之后才写入，保证 Tool 消息紧跟其 Ai 消息
    pending_prompts: Vec<String>,
}

impl Turn {
    pub fn new(messages: Vec<Message>) -> Self {
        let request = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Human)
            .map(|m| m.content.clone());
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            messages,
            request,
            observations: ObservationLog::new(),
            intent: None,
            plan: None,
            pre_approved: false,
            iterations: 0,
            empty_responses: 0,
            repeat_interceptions: 0,
            render_demands: 0,
            pending_prompts: Vec::new(),
        }
    }

    /// 本轮的用户输入
    pub fn user_content(&self) -> Option<&MessageContent> {
        self.request.as_ref()
    }

    pub fn user_request(&self) -> String {
        self.user_content().map(MessageContent::text).unwrap_or_default()
    }

    /// 本轮输入之前的历史
    ///
    /// 用户消息被裁剪截断后内容不再相等，此时退回最后一条 human 消息。
    pub fn history(&self) -> &[Message] {
        let at = self
            .messages
            .iter()
            .rposition(|m| m.role == Role::Human && Some(&m.content) == self.request.as_ref())
            .or_else(|| self.messages.iter().rposition(|m| m.role == Role::Human));
        match at {
            Some(i) => &self.messages[..i],
            None => &self.messages,
        }
    }

    /// 用户消息含图片时使用多模态超时
    pub fn is_multimodal(&self) -> bool {
        self.user_content().is_some_and(MessageContent::has_image)
    }

    pub fn is_task_turn(&self) -> bool {
        self.intent.as_ref().map_or(true, |i| i.intent_type.is_task())
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn queue_prompt(&mut self, prompt: impl Into<String>) {
        self.pending_prompts.push(prompt.into());
    }

    /// 将排队的纠正提示以 human 消息写入
    pub fn flush_prompts(&mut self) {
        for prompt in std::mem::take(&mut self.pending_prompts) {
            self.messages.push(Message::human(prompt));
        }
    }

    /// 最后一条 Ai 消息里尚无 Tool 回复的调用 id
    pub fn unanswered_tool_calls(&self) -> Vec<String> {
        let Some(ai_idx) = self
            .messages
            .iter()
            .rposition(|m| m.role == Role::Ai && !m.tool_calls.is_empty())
        else {
            return Vec::new();
        };
        let answered: Vec<&str> = self.messages[ai_idx + 1..]
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        self.messages[ai_idx]
            .tool_calls
            .iter()
            .filter(|c| !answered.contains(&c.id.as_str()))
            .map(|c| c.id.clone())
            .collect()
    }

    /// 为未回复的调用补 Tool 消息，保持消息列表可继续对话；返回补写数量
    pub fn answer_unanswered(&mut self, content: &str) -> usize {
        let ids = self.unanswered_tool_calls();
        for id in &ids {
            self.messages.push(Message::tool(id.clone(), content));
        }
        ids.len()
    }

    pub fn completion_facts(&self, render_available: bool) -> CompletionFacts {
        CompletionFacts {
            rendered: self.observations.has_render(),
            has_unrendered_result: self.observations.has_unrendered_result(),
            task_turn: self.is_task_turn(),
            render_available,
        }
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}
