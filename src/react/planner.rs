//! 执行计划：意图的轻量注释
//!
//! 计划不被机械地逐步执行，主要作为反思上下文的一部分；工具观察到达时顺带标记对应步骤。

use serde::{Deserialize, Serialize};

use crate::react::{IntentType, RewrittenIntent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: usize,
    pub description: String,
    /// 预期使用的工具（可选）
    pub tool: Option<String>,
    pub status: StepStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub description: String,
    pub steps: Vec<PlanStep>,
}

impl ExecutionPlan {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            steps: Vec::new(),
        }
    }

    pub fn with_step(mut self, description: impl Into<String>, tool: Option<&str>) -> Self {
        self.push_step(description, tool);
        self
    }

    pub fn push_step(&mut self, description: impl Into<String>, tool: Option<&str>) {
        let id = self.steps.len() + 1;
        self.steps.push(PlanStep {
            id,
            description: description.into(),
            tool: tool.map(str::to_string),
            status: StepStatus::Pending,
        });
    }

    /// 按意图类型生成默认计划
    pub fn from_intent(intent: &RewrittenIntent) -> Self {
        let plan = Self::new(intent.rewritten.clone());
        match intent.intent_type {
            IntentType::Create => plan
                .with_step("确认账本与分类", Some("category"))
                .with_step("创建交易记录", Some("transaction"))
                .with_step("渲染记账结果", None),
            IntentType::Update => plan
                .with_step("定位要修改的交易", Some("transaction"))
                .with_step("更新交易字段", Some("transaction"))
                .with_step("渲染修改后的记录", None),
            IntentType::Delete => plan
                .with_step("定位要删除的交易", Some("transaction"))
                .with_step("删除交易", Some("transaction")),
            IntentType::Query => plan
                .with_step("按条件查询交易", Some("transaction"))
                .with_step("渲染查询结果", None),
            IntentType::Statistics => plan
                .with_step("计算统计数据", Some("transaction"))
                .with_step("渲染统计图表", None),
            IntentType::Batch => plan
                .with_step("列出受影响的记录", Some("transaction"))
                .with_step("逐条执行批量操作", Some("transaction"))
                .with_step("汇总执行结果", None),
            IntentType::Clarify | IntentType::Chat => plan,
        }
    }

    /// 标记第一个匹配工具（或渲染步骤）的待办步骤
    pub fn mark(&mut self, tool: &str, success: bool, is_render: bool) {
        let status = if success {
            StepStatus::Done
        } else {
            StepStatus::Failed
        };
        let step = self.steps.iter_mut().find(|s| {
            s.status == StepStatus::Pending
                && match &s.tool {
                    Some(t) => t == tool,
                    None => is_render,
                }
        });
        if let Some(step) = step {
            step.status = status;
        }
    }

    pub fn pending(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Pending)
            .count()
    }

    /// 文本摘要（反思提示用）
    pub fn summary(&self) -> String {
        let mut out = self.description.clone();
        for step in &self.steps {
            let mark = match step.status {
                StepStatus::Pending => " ",
                StepStatus::Done => "x",
                StepStatus::Failed => "!",
            };
            out.push_str(&format!("\n[{mark}] {}. {}", step.id, step.description));
        }
        out
    }
}
