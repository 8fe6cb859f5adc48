//! 对话消息模型
//!
//! 四种角色（System / Human / Ai / Tool）；内容可以是纯文本或多段（文本 / 图片 / 音频）；
//! Ai 消息可携带零或多个 ToolCall，Tool 消息通过 tool_call_id 与之对应。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    Human,
    Ai,
    Tool,
}

/// 多模态内容片段
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { url: String, mime_type: Option<String> },
    Audio { data: String, mime_type: Option<String> },
}

/// 消息内容：纯文本或多段
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// 拼接所有文本片段（图片 / 音频忽略）
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn has_image(&self) -> bool {
        matches!(self, MessageContent::Parts(parts) if parts.iter().any(|p| matches!(p, ContentPart::Image { .. })))
    }

    pub fn has_media(&self) -> bool {
        matches!(self, MessageContent::Parts(parts) if parts.iter().any(|p| !matches!(p, ContentPart::Text { .. })))
    }

    /// 是否有可供意图改写的内容（非空文本或任意媒体）
    pub fn is_meaningful(&self) -> bool {
        self.has_media() || !self.text().trim().is_empty()
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        MessageContent::Text(s)
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        MessageContent::Text(s.to_string())
    }
}

/// 模型请求的一次工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            args,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn with_role(role: Role, content: MessageContent) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, MessageContent::Text(content.into()))
    }

    pub fn human(content: impl Into<MessageContent>) -> Self {
        Self::with_role(Role::Human, content.into())
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::with_role(Role::Ai, MessageContent::Text(content.into()))
    }

    pub fn ai_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::ai(content)
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::with_role(Role::Tool, MessageContent::Text(content.into()))
        }
    }

    pub fn text(&self) -> String {
        self.content.text()
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }

    pub fn has_image(&self) -> bool {
        self.content.has_image()
    }

    pub fn has_media(&self) -> bool {
        self.content.has_media()
    }
}
