//! 记忆层：对话消息模型与上下文 token 预算

pub mod conversation;
pub mod token_budget;

pub use conversation::{ContentPart, Message, MessageContent, Role, ToolCall};
pub use token_budget::{ContextTrimmer, TokenEstimator, TRIM_NOTE_PREFIX};
