//! 模型层：客户端抽象与 Mock 实现（具体提供方由宿主接入）

pub mod mock;
pub mod traits;

pub use mock::{MockChatModel, Scripted};
pub use traits::{AiReply, ChatModel, LlmError, ModelResponse};
