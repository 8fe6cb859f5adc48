//! Token 预算控制：上下文裁剪
//!
//! 每轮对话首次调用模型前执行一次：估算消息列表的 token 开销，始终保留全部 System 消息，
//! 从最新一条往前保留能放进预算的对话消息，丢弃最旧的部分，并注入一条裁剪说明。

use crate::memory::{Message, MessageContent, Role};

/// 每条消息的固定开销（角色、分隔符等）
const MESSAGE_OVERHEAD: usize = 4;
/// 单张图片的估算开销
const IMAGE_TOKENS: usize = 85;
/// 裁剪说明的前缀，用于识别并替换上一轮注入的说明
pub const TRIM_NOTE_PREFIX: &str = "[上下文已裁剪]";
const TRUNCATED_MARKER: &str = "…[内容过长已截断]";

/// Token 估算器（简单的字符计数近似）
pub struct TokenEstimator;

impl TokenEstimator {
    /// 估算文本的 token 数量
    /// 使用简单的启发式规则：英文约 4 字符/token，中文约 1.5 字符/token
    pub fn estimate(text: &str) -> usize {
        let mut ascii_chars = 0;
        let mut non_ascii_chars = 0;

        for c in text.chars() {
            if c.is_ascii() {
                ascii_chars += 1;
            } else {
                non_ascii_chars += 1;
            }
        }

        let tokens = ascii_chars / 4 + (non_ascii_chars as f64 / 1.5).ceil() as usize;
        tokens.max(1)
    }

    /// 估算整条消息：固定开销 + 文本 + 媒体 + 工具调用参数
    pub fn estimate_message(message: &Message) -> usize {
        let media = match &message.content {
            MessageContent::Parts(parts) => {
                parts
                    .iter()
                    .filter(|p| !matches!(p, crate::memory::ContentPart::Text { .. }))
                    .count()
                    * IMAGE_TOKENS
            }
            MessageContent::Text(_) => 0,
        };
        let calls: usize = message
            .tool_calls
            .iter()
            .map(|c| Self::estimate(&format!("{}{}", c.name, c.args)))
            .sum();
        MESSAGE_OVERHEAD + Self::estimate(&message.text()) + media + calls
    }

    pub fn estimate_all(messages: &[Message]) -> usize {
        messages.iter().map(Self::estimate_message).sum()
    }
}

fn trim_note(dropped: usize) -> Message {
    Message::system(format!(
        "{TRIM_NOTE_PREFIX} 为控制上下文长度，已省略较早的 {dropped} 条对话消息。"
    ))
}

fn is_trim_note(message: &Message) -> bool {
    message.is_system() && message.text().starts_with(TRIM_NOTE_PREFIX)
}

/// 上下文裁剪器：按 token 预算丢弃最旧的对话消息
#[derive(Debug, Clone)]
pub struct ContextTrimmer {
    budget: usize,
}

impl ContextTrimmer {
    pub fn new(budget: usize) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// 原地裁剪，返回被省略的对话消息条数
    pub fn trim(&self, messages: &mut Vec<Message>) -> usize {
        Self::trim_to(messages, self.budget)
    }

    /// 按指定预算裁剪（上下文超限恢复时会以更小的预算再裁一次）
    pub fn trim_to(messages: &mut Vec<Message>, budget: usize) -> usize {
        messages.retain(|m| !is_trim_note(m));
        if TokenEstimator::estimate_all(messages) <= budget {
            return 0;
        }

        let system_cost: usize = messages
            .iter()
            .filter(|m| m.is_system())
            .map(TokenEstimator::estimate_message)
            .sum();
        let conversational: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| !m.is_system())
            .map(|(i, _)| i)
            .collect();
        let note_reserve = TokenEstimator::estimate_message(&trim_note(conversational.len()));
        if system_cost + note_reserve > budget {
            tracing::warn!(
                system_cost,
                budget,
                "system messages alone exceed the context budget"
            );
        }
        let mut remaining = budget.saturating_sub(system_cost + note_reserve);

        let mut keep = vec![false; messages.len()];
        let mut kept = 0usize;
        for &i in conversational.iter().rev() {
            let cost = TokenEstimator::estimate_message(&messages[i]);
            if cost <= remaining {
                remaining -= cost;
                keep[i] = true;
                kept += 1;
                continue;
            }
            // 连最新一条都放不下：截断其文本
            if kept == 0 {
                if let Some(truncated) = truncate_to_fit(&messages[i], remaining) {
                    messages[i] = truncated;
                    keep[i] = true;
                    kept += 1;
                }
            }
            break;
        }

        // 保留段开头若是 Tool 消息，其对应的 Ai 调用已被丢弃，一并丢弃
        for &i in &conversational {
            if !keep[i] {
                continue;
            }
            if messages[i].role == Role::Tool {
                keep[i] = false;
                kept -= 1;
            } else {
                break;
            }
        }

        let dropped = conversational.len() - kept;
        let mut result = Vec::with_capacity(messages.len() + 1);
        for (i, m) in messages.drain(..).enumerate() {
            if m.is_system() || keep[i] {
                result.push(m);
            }
        }
        if dropped > 0 {
            let at = result.iter().take_while(|m| m.is_system()).count();
            result.insert(at, trim_note(dropped));
            tracing::info!(dropped, budget, "context trimmed");
        }
        *messages = result;
        dropped
    }
}

/// 截断单条消息使其估算开销不超过 `limit`；放不下则返回 None
fn truncate_to_fit(message: &Message, limit: usize) -> Option<Message> {
    let fixed = TokenEstimator::estimate_message(&Message {
        content: MessageContent::Text(String::new()),
        ..message.clone()
    }) - TokenEstimator::estimate("");
    let chars: Vec<char> = message.text().chars().collect();
    let cost = |n: usize| {
        let prefix: String = chars[..n].iter().collect();
        fixed + TokenEstimator::estimate(&format!("{prefix}{TRUNCATED_MARKER}"))
    };
    if cost(0) > limit {
        return None;
    }
    // 估算值随前缀长度单调不减，二分查找最长可容纳前缀
    let (mut lo, mut hi) = (0usize, chars.len());
    while lo < hi {
        let mid = (lo + hi + 1) / 2;
        if cost(mid) <= limit {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    let prefix: String = chars[..lo].iter().collect();
    Some(Message {
        content: MessageContent::Text(format!("{prefix}{TRUNCATED_MARKER}")),
        ..message.clone()
    })
}
