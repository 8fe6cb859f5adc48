//! 意图改写
//!
//! 编排循环只消费 IntentRewriter 的输入输出契约：把用户原话（+历史）改写为结构化意图，
//! 带风险等级、置信度、抽取字段，必要时附带澄清问题或确认要求。
//! RuleIntentRewriter 是无需模型的关键词实现，用于离线运行与测试。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::LlmError;
use crate::memory::{Message, MessageContent};

/// 意图类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    Create,
    Update,
    Delete,
    Query,
    Statistics,
    Batch,
    /// 信息不足，需要向用户提问
    Clarify,
    /// 闲聊，无任务
    Chat,
}

impl IntentType {
    /// 是否是需要执行工具的业务任务
    pub fn is_task(&self) -> bool {
        !matches!(self, IntentType::Clarify | IntentType::Chat)
    }

    /// 该类意图的产出是否需要呈现给用户（渲染）
    pub fn produces_result(&self) -> bool {
        self.is_task()
    }

    pub fn label(&self) -> &'static str {
        match self {
            IntentType::Create => "记账",
            IntentType::Update => "修改",
            IntentType::Delete => "删除",
            IntentType::Query => "查询",
            IntentType::Statistics => "统计",
            IntentType::Batch => "批量操作",
            IntentType::Clarify => "澄清",
            IntentType::Chat => "闲聊",
        }
    }
}

impl fmt::Display for IntentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// 改写后的结构化意图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewrittenIntent {
    pub intent_type: IntentType,
    /// 改写后的指令（不替换用户原话，只附加到系统提示）
    pub rewritten: String,
    /// [0, 1]
    pub confidence: f32,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    #[serde(default)]
    pub clarifying_question: Option<String>,
    #[serde(default)]
    pub requires_confirmation: bool,
    #[serde(default)]
    pub confirmation_reason: Option<String>,
}

impl RewrittenIntent {
    pub fn new(intent_type: IntentType, rewritten: impl Into<String>, confidence: f32) -> Self {
        let risk_level = match intent_type {
            IntentType::Delete | IntentType::Batch => RiskLevel::High,
            IntentType::Create | IntentType::Update => RiskLevel::Medium,
            _ => RiskLevel::Low,
        };
        Self {
            intent_type,
            rewritten: rewritten.into(),
            confidence: confidence.clamp(0.0, 1.0),
            risk_level,
            fields: BTreeMap::new(),
            clarifying_question: None,
            requires_confirmation: false,
            confirmation_reason: None,
        }
    }

    pub fn chat(text: &str) -> Self {
        Self::new(IntentType::Chat, text, 0.9)
    }

    pub fn clarify(question: impl Into<String>) -> Self {
        let mut intent = Self::new(IntentType::Clarify, "", 0.9);
        intent.clarifying_question = Some(question.into());
        intent
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn with_confirmation(mut self, reason: impl Into<String>) -> Self {
        self.requires_confirmation = true;
        self.confirmation_reason = Some(reason.into());
        self
    }

    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk_level = risk;
        self
    }

    pub fn is_clarify(&self) -> bool {
        self.intent_type == IntentType::Clarify
    }
}

/// 意图改写能力（外部协作者）
#[async_trait]
pub trait IntentRewriter: Send + Sync {
    /// 注入凭据（如独立的小模型 API key）；默认无需初始化
    async fn initialize(&self, _credential: &str) -> Result<(), LlmError> {
        Ok(())
    }

    fn is_enabled(&self) -> bool;

    /// content 为本轮用户输入，history 不含本轮消息
    async fn rewrite(
        &self,
        content: &MessageContent,
        history: &[Message],
    ) -> Result<RewrittenIntent, LlmError>;
}

const BATCH_KEYWORDS: &[&str] = &["批量", "全部删除", "清空", "所有交易", "batch", "bulk"];
const DELETE_KEYWORDS: &[&str] = &["删除", "删掉", "去掉", "delete", "remove"];
const UPDATE_KEYWORDS: &[&str] = &["修改", "改成", "改为", "更新", "update", "edit", "change"];
const STATISTICS_KEYWORDS: &[&str] = &["统计", "汇总", "总共", "一共", "占比", "stats", "statistics", "summary", "total"];
const QUERY_KEYWORDS: &[&str] = &["查询", "查看", "查一下", "列出", "看看", "多少", "show", "list", "find", "search", "query"];
const CREATE_KEYWORDS: &[&str] = &["记一笔", "记账", "花了", "买了", "收入", "支出", "工资", "add", "record", "spent", "paid", "bought"];
const GREETINGS: &[&str] = &["你好", "您好", "谢谢", "早上好", "晚上好", "hello", "hi", "hey", "thanks", "thank"];

/// 基于关键词的意图改写（不调用模型）
pub struct RuleIntentRewriter {
    enabled: bool,
}

impl RuleIntentRewriter {
    pub fn new() -> Self {
        Self { enabled: true }
    }

    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    /// 快速规则匹配
    pub fn classify(&self, input: &str) -> RewrittenIntent {
        let trimmed = input.trim();
        if trimmed.chars().count() < 2 {
            return RewrittenIntent::clarify("能再具体说说你想做什么吗？比如记一笔账、查询或统计。");
        }

        let lower = trimmed.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let hit = |keywords: &[&str]| {
            keywords.iter().any(|k| {
                if k.is_ascii() {
                    words.contains(k)
                } else {
                    lower.contains(k)
                }
            })
        };

        let intent_type = if hit(BATCH_KEYWORDS) {
            IntentType::Batch
        } else if hit(DELETE_KEYWORDS) {
            IntentType::Delete
        } else if hit(UPDATE_KEYWORDS) {
            IntentType::Update
        } else if hit(STATISTICS_KEYWORDS) {
            IntentType::Statistics
        } else if hit(QUERY_KEYWORDS) {
            IntentType::Query
        } else if hit(CREATE_KEYWORDS) {
            IntentType::Create
        } else if hit(GREETINGS) {
            return RewrittenIntent::chat(trimmed);
        } else if trimmed.chars().all(|c| c.is_ascii_digit() || c == '.' || c.is_whitespace()) {
            return RewrittenIntent::clarify(format!(
                "你想对 {trimmed} 做什么？记一笔账、查询还是删除？"
            ));
        } else {
            return RewrittenIntent::new(IntentType::Chat, trimmed, 0.5);
        };

        let mut intent = RewrittenIntent::new(
            intent_type,
            format!("{}：{}", intent_type.label(), trimmed),
            0.85,
        );
        if let Some(id) = extract_id(&lower) {
            intent = intent.with_field("id", Value::from(id));
        }
        if let Some(amount) = extract_amount(&lower) {
            intent = intent.with_field("amount", Value::from(amount));
        }
        if !intent.fields.is_empty() {
            intent.confidence = 0.9;
        }

        match intent_type {
            IntentType::Delete => {
                let target = intent
                    .fields
                    .get("id")
                    .map(|id| format!("交易 {id}"))
                    .unwrap_or_else(|| "匹配的记录".to_string());
                intent.with_confirmation(format!("即将删除{target}，此操作不可恢复，确认执行吗？"))
            }
            IntentType::Batch => {
                intent.with_confirmation("批量操作会影响多条记录，确认执行吗？")
            }
            _ => intent,
        }
    }
}

impl Default for RuleIntentRewriter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IntentRewriter for RuleIntentRewriter {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn rewrite(
        &self,
        content: &MessageContent,
        _history: &[Message],
    ) -> Result<RewrittenIntent, LlmError> {
        let text = content.text();
        if text.trim().is_empty() && content.has_image() {
            return Ok(RewrittenIntent::new(
                IntentType::Create,
                "识别图片中的票据并记一笔账",
                0.6,
            ));
        }
        Ok(self.classify(&text))
    }
}

static ID_RE: OnceLock<Option<Regex>> = OnceLock::new();
static AMOUNT_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// "transaction 42" / "交易 42" / "#42" / "id 42"
fn extract_id(text: &str) -> Option<i64> {
    let re = ID_RE
        .get_or_init(|| Regex::new(r"(?:transaction|交易|记录|id|#)\s*[:：#]?\s*(\d+)").ok())
        .as_ref()?;
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

/// "¥35.5" / "35 元" / "$12" / "花了 20"
fn extract_amount(text: &str) -> Option<f64> {
    let re = AMOUNT_RE
        .get_or_init(|| {
            Regex::new(r"(?:[¥$￥]\s*(\d+(?:\.\d+)?))|(?:(\d+(?:\.\d+)?)\s*(?:元|块|rmb|yuan|dollars?))|(?:(?:花了|spent|paid)\s*(\d+(?:\.\d+)?))").ok()
        })
        .as_ref()?;
    let caps = re.captures(text)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))?
        .as_str()
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_is_high_risk_with_confirmation() {
        let intent = RuleIntentRewriter::new().classify("delete transaction 42");
        assert_eq!(intent.intent_type, IntentType::Delete);
        assert_eq!(intent.risk_level, RiskLevel::High);
        assert!(intent.requires_confirmation);
        assert_eq!(intent.fields.get("id"), Some(&Value::from(42)));
        assert!(intent.confirmation_reason.unwrap().contains("42"));
    }

    #[test]
    fn test_create_extracts_amount() {
        let intent = RuleIntentRewriter::new().classify("午饭花了 35.5 元");
        assert_eq!(intent.intent_type, IntentType::Create);
        assert_eq!(intent.risk_level, RiskLevel::Medium);
        assert!(!intent.requires_confirmation);
        assert_eq!(intent.fields.get("amount"), Some(&Value::from(35.5)));
        assert!(intent.confidence >= 0.9);
    }

    #[test]
    fn test_query_and_statistics_are_low_risk() {
        let r = RuleIntentRewriter::new();
        assert_eq!(r.classify("查看上周的交易").intent_type, IntentType::Query);
        let stats = r.classify("统计本月餐饮支出");
        assert_eq!(stats.intent_type, IntentType::Statistics);
        assert_eq!(stats.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_batch_beats_delete() {
        let intent = RuleIntentRewriter::new().classify("批量删除上个月的交易");
        assert_eq!(intent.intent_type, IntentType::Batch);
        assert!(intent.requires_confirmation);
    }

    #[test]
    fn test_greeting_and_clarify() {
        let r = RuleIntentRewriter::new();
        assert_eq!(r.classify("你好呀").intent_type, IntentType::Chat);
        let short = r.classify("嗯");
        assert!(short.is_clarify());
        assert!(short.clarifying_question.is_some());
        let number = r.classify("42");
        assert!(number.is_clarify());
        assert!(number.clarifying_question.unwrap().contains("42"));
    }

    #[test]
    fn test_ascii_keywords_match_whole_words() {
        let intent = RuleIntentRewriter::new().classify("my address book");
        assert_eq!(intent.intent_type, IntentType::Chat);
    }

    #[tokio::test]
    async fn test_image_only_turn_is_create() {
        let content = MessageContent::Parts(vec![crate::memory::ContentPart::Image {
            url: "data:image/png;base64,AAAA".into(),
            mime_type: Some("image/png".into()),
        }]);
        let intent = RuleIntentRewriter::new().rewrite(&content, &[]).await.unwrap();
        assert_eq!(intent.intent_type, IntentType::Create);
    }
}
