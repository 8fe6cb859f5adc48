//! 系统提示
//!
//! 每轮开始时刷新：写入当前时间与可用工具，替换上一轮生成的系统提示，
//! 宿主自带的系统消息作为「附加说明」保留。意图置信度足够时再追加「当前任务」块，
//! 用户原话保持不变。

use chrono::{DateTime, Local};

use crate::memory::{Message, TRIM_NOTE_PREFIX};
use crate::react::{IntentType, RewrittenIntent};

pub const PROMPT_HEADER: &str = "# 记账助手";
const HOST_NOTES_HEADER: &str = "## 附加说明";
const TASK_HEADER: &str = "## 当前任务";

pub const DEFAULT_BASE_PROMPT: &str = "你是一个记账助手，帮助用户记录、查询、统计和管理账本中的交易。\
需要读写数据时调用工具，不要编造数据；金额、日期、分类不明确时先向用户确认。";

#[derive(Debug, Clone)]
pub struct SystemPrompt {
    base: String,
    tools: Vec<(String, String)>,
    render_tools: Vec<String>,
}

impl SystemPrompt {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            tools: Vec::new(),
            render_tools: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<(String, String)>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_render_tools(mut self, names: Vec<String>) -> Self {
        self.render_tools = names;
        self
    }

    pub fn render(&self, now: DateTime<Local>) -> String {
        let mut out = format!(
            "{PROMPT_HEADER}\n{}\n\n当前时间：{}（{}）",
            self.base,
            now.format("%Y-%m-%d %H:%M"),
            weekday_cn(now)
        );
        if !self.tools.is_empty() {
            out.push_str("\n\n可用工具：");
            for (name, description) in &self.tools {
                out.push_str(&format!("\n- {name}: {description}"));
            }
        }
        if !self.render_tools.is_empty() {
            out.push_str(&format!(
                "\n\n完成业务操作后，必须调用渲染工具（{}）向用户展示结果。",
                self.render_tools.join(", ")
            ));
        }
        out
    }

    /// 刷新系统提示：替换上一轮生成的提示，合并宿主的系统消息
    pub fn refresh(&self, messages: &mut Vec<Message>, now: DateTime<Local>) {
        let fresh = self.render(now);
        let idx = messages
            .iter()
            .position(|m| m.is_system() && !m.text().starts_with(TRIM_NOTE_PREFIX));
        match idx {
            Some(i) => {
                let existing = messages[i].text();
                let host_notes = if existing.starts_with(PROMPT_HEADER) {
                    extract_host_notes(&existing)
                } else {
                    Some(existing.trim().to_string()).filter(|s| !s.is_empty())
                };
                let merged = match host_notes {
                    Some(notes) => format!("{fresh}\n\n{HOST_NOTES_HEADER}\n{notes}"),
                    None => fresh,
                };
                messages[i] = Message::system(merged);
            }
            None => messages.insert(0, Message::system(fresh)),
        }
    }

    /// 在系统提示末尾追加任务块（改写指令 + 抽取字段 + 执行指引）
    pub fn append_task_block(messages: &mut [Message], intent: &RewrittenIntent) {
        let Some(system) = messages
            .iter_mut()
            .find(|m| m.is_system() && m.text().starts_with(PROMPT_HEADER))
        else {
            return;
        };
        let mut block = format!(
            "{TASK_HEADER}\n类型：{}\n改写指令：{}",
            intent.intent_type, intent.rewritten
        );
        if !intent.fields.is_empty() {
            let fields = serde_json::to_string(&intent.fields).unwrap_or_default();
            block.push_str(&format!("\n已识别字段：{fields}"));
        }
        let guidance = guidance(intent.intent_type);
        if !guidance.is_empty() {
            block.push_str(&format!("\n执行指引：{guidance}"));
        }
        *system = Message::system(format!("{}\n\n{block}", system.text()));
    }
}

impl Default for SystemPrompt {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_PROMPT)
    }
}

fn extract_host_notes(text: &str) -> Option<String> {
    let start = text.find(HOST_NOTES_HEADER)? + HOST_NOTES_HEADER.len();
    let rest = &text[start..];
    let end = rest.find(TASK_HEADER).unwrap_or(rest.len());
    Some(rest[..end].trim().to_string()).filter(|s| !s.is_empty())
}

fn guidance(intent_type: IntentType) -> &'static str {
    match intent_type {
        IntentType::Create => "先确认分类与账本，再调用 transaction 创建记录，最后渲染记账结果。",
        IntentType::Update => "先查询定位目标交易并确认 id，再更新字段，最后渲染修改后的记录。",
        IntentType::Delete => "只删除用户明确指定的记录，删除前核对 id。",
        IntentType::Query => "调用 transaction 查询，然后用渲染工具展示列表。",
        IntentType::Statistics => "调用统计操作，并用渲染工具展示汇总或图表。",
        IntentType::Batch => "先列出受影响的记录，逐条执行，最后汇总执行结果。",
        IntentType::Clarify | IntentType::Chat => "",
    }
}

fn weekday_cn(now: DateTime<Local>) -> &'static str {
    use chrono::Datelike;
    match now.weekday() {
        chrono::Weekday::Mon => "星期一",
        chrono::Weekday::Tue => "星期二",
        chrono::Weekday::Wed => "星期三",
        chrono::Weekday::Thu => "星期四",
        chrono::Weekday::Fri => "星期五",
        chrono::Weekday::Sat => "星期六",
        chrono::Weekday::Sun => "星期日",
    }
}
