//! 反思（ReAct Reflect）
//!
//! 每次工具观察后询问 Reflector 是否需要反思；需要时把用户请求、累计观察与当前观察交给它，
//! 得到 continue / adjust_strategy / complete / abort 之一及可选的纠正指令。
//!
//! ModelReflector 通过任意 ChatModel 反思：
//! - 失败的观察、本轮最后一个调用、每 N 步各触发一次
//! - 提示模板支持 {goal} / {observations} / {current}
//! - 输出无法解析时退化为 Continue，不影响主循环

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::llm::{ChatModel, LlmError, ModelResponse};
use crate::memory::Message;
use crate::react::{ExecutionPlan, StepObservation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionVerdict {
    Continue,
    AdjustStrategy,
    /// 仅当本轮已渲染过才会被采纳
    Complete,
    /// 仅记录，执行继续
    Abort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionResult {
    pub verdict: ReflectionVerdict,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub instruction: Option<String>,
}

impl ReflectionResult {
    pub fn new(verdict: ReflectionVerdict, reasoning: impl Into<String>) -> Self {
        Self {
            verdict,
            reasoning: reasoning.into(),
            instruction: None,
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }
}

/// 反思上下文
#[derive(Debug, Clone)]
pub struct ReflectionContext {
    pub user_request: String,
    pub plan: Option<ExecutionPlan>,
    /// 当前观察之前的全部观察
    pub observations: Vec<StepObservation>,
    pub current: StepObservation,
}

/// 反思能力（外部协作者）
#[async_trait]
pub trait Reflector: Send + Sync {
    async fn initialize(&self, _credential: &str) -> Result<(), LlmError> {
        Ok(())
    }

    fn is_enabled(&self) -> bool;

    /// remaining_calls_in_turn：本次模型回复中当前调用之后还剩几个工具调用
    fn should_reflect(&self, observation: &StepObservation, remaining_calls_in_turn: usize) -> bool;

    async fn reflect(&self, context: &ReflectionContext) -> Result<ReflectionResult, LlmError>;

    /// 每轮开始时调用；按步数触发的计数只在一轮内累积
    fn begin_turn(&self) {}

    /// 清空内部计数等跨步状态
    fn reset(&self) {}
}

pub const DEFAULT_REFLECTION_PROMPT: &str = r#"你是记账助手的执行审查员。请根据用户目标与已执行的步骤，判断下一步该怎么做。

用户目标：
{goal}

已完成的步骤：
{observations}

最新一步：
{current}

只输出一个 JSON 对象：
{"verdict": "continue" | "adjust_strategy" | "complete" | "abort", "reasoning": "简短理由", "instruction": "当 verdict 为 adjust_strategy 时给出的纠正指令"}"#;

pub struct ModelReflector {
    model: Arc<dyn ChatModel>,
    prompt_template: String,
    every_n_steps: usize,
    steps_seen: AtomicUsize,
    enabled: AtomicBool,
}

impl ModelReflector {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            prompt_template: DEFAULT_REFLECTION_PROMPT.to_string(),
            every_n_steps: 3,
            steps_seen: AtomicUsize::new(0),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn with_prompt_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = template.into();
        self
    }

    /// 0 表示不按步数触发
    pub fn with_every_n_steps(mut self, n: usize) -> Self {
        self.every_n_steps = n;
        self
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn render_prompt(&self, context: &ReflectionContext) -> String {
        let goal = match &context.plan {
            Some(plan) => format!("{}\n计划：{}", context.user_request, plan.summary()),
            None => context.user_request.clone(),
        };
        let observations = if context.observations.is_empty() {
            "（无）".to_string()
        } else {
            context
                .observations
                .iter()
                .map(StepObservation::brief)
                .collect::<Vec<_>>()
                .join("\n")
        };
        self.prompt_template
            .replace("{goal}", &goal)
            .replace("{observations}", &observations)
            .replace("{current}", &context.current.brief())
    }
}

#[async_trait]
impl Reflector for ModelReflector {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn should_reflect(&self, observation: &StepObservation, remaining_calls_in_turn: usize) -> bool {
        let seen = self.steps_seen.fetch_add(1, Ordering::SeqCst) + 1;
        !observation.success
            || remaining_calls_in_turn == 0
            || (self.every_n_steps > 0 && seen % self.every_n_steps == 0)
    }

    async fn reflect(&self, context: &ReflectionContext) -> Result<ReflectionResult, LlmError> {
        let prompt = self.render_prompt(context);
        let response = self.model.invoke(&[Message::human(prompt)]).await?;
        let text = match response.normalize() {
            ModelResponse::Reply(reply) => reply.content,
            ModelResponse::Empty { .. } => String::new(),
        };
        Ok(parse_reflection(&text))
    }

    fn begin_turn(&self) {
        self.steps_seen.store(0, Ordering::SeqCst);
    }

    fn reset(&self) {
        self.steps_seen.store(0, Ordering::SeqCst);
    }
}

/// 从模型输出中提取 JSON（```json 块或首个 {...}）；失败时返回 Continue
pub fn parse_reflection(output: &str) -> ReflectionResult {
    let trimmed = output.trim();
    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim())
    } else if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            &trimmed[start..=end]
        } else {
            trimmed
        }
    } else {
        trimmed
    };

    match serde_json::from_str::<ReflectionResult>(json_str) {
        Ok(mut result) => {
            if result.instruction.as_deref().is_some_and(|s| s.trim().is_empty()) {
                result.instruction = None;
            }
            result
        }
        Err(e) => {
            tracing::debug!(error = %e, output = %trimmed, "unparsable reflection output, continuing");
            ReflectionResult::new(ReflectionVerdict::Continue, trimmed)
        }
    }
}
