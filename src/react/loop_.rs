//! 编排主循环
//!
//! 每轮：Parsing（刷新系统提示、裁剪上下文、意图改写、可选确认）-> Executing
//! -> 模型调用（重试 + 超时）-> 工具调用（逐个纠正名称、检测重复、权限闸门、执行、观察、可选反思）
//! -> 完成判定 -> Summarizing -> Completed -> Idle。
//!
//! 每个挂起点（模型、工具、退避等待、确认）都经过 CancelToken::run，取消触发后立即以 Cancelled 结束，
//! 本轮不会再推进到下一步。失败时追加解释性的助手消息，消息列表总是可以继续对话。

use std::time::{Duration, Instant};

use chrono::Local;
use tokio::sync::mpsc;

use crate::core::retry::{with_retry, with_timeout, RetryConfig};
use crate::core::{
    AgentError, AgentState, CancelToken, ConfirmationDecision, ConfirmationKind,
    ConfirmationRequest, ConfirmationSlot, RecoveryAction, RecoveryEngine, StateMachine,
};
use crate::llm::{ChatModel, ModelResponse};
use crate::memory::{ContextTrimmer, Message, ToolCall};
use crate::react::completion::{self, CompletionDecision};
use crate::react::events::{send_event, EventSender};
use crate::react::{
    AgentEvent, ExecutionPlan, IntentRewriter, ReflectionContext, ReflectionResult,
    ReflectionVerdict, Reflector, StepEvent, StepKind, StepObservation, SystemPrompt, Turn,
};
use crate::tools::{PermissionDecision, PermissionGate, ToolExecutor, ToolNameCorrector};

/// 工具结果在事件中的预览长度
const RESULT_PREVIEW_CHARS: usize = 200;

const REPEAT_PROMPT: &str =
    "[系统提示] 不要重复完全相同的工具调用。请基于已有结果继续，或调用渲染工具展示结果。";
const FINAL_ANSWER_PROMPT: &str = "[系统提示] 任务已完成，请直接给出最终答复。";

/// 循环参数
#[derive(Debug, Clone, PartialEq)]
pub struct LoopSettings {
    pub max_iterations: usize,
    /// 连续空响应超过该值则本轮失败
    pub max_empty_responses: usize,
    /// 重复调用被拦截到该次数时本轮失败
    pub max_repeated_calls: usize,
    pub intent_confidence_threshold: f32,
    pub model_timeout: Duration,
    /// 最新用户消息含图片时使用
    pub multimodal_timeout: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_empty_responses: 3,
            max_repeated_calls: 3,
            intent_confidence_threshold: 0.6,
            model_timeout: Duration::from_secs(60),
            multimodal_timeout: Duration::from_secs(120),
        }
    }
}

/// 推给宿主的一次快照；最后一次为终态
#[derive(Debug, Clone, PartialEq)]
pub struct TurnUpdate {
    pub messages: Vec<Message>,
    pub state: AgentState,
    pub error: Option<String>,
}

pub type UpdateSender = mpsc::UnboundedSender<TurnUpdate>;

/// 一批工具调用的结果
enum RoundOutcome {
    Continue,
    /// 本轮结束（重复渲染、反思判定完成、工具级确认被拒绝）
    Complete,
}

/// 观察之后的去向
enum FollowUp {
    Proceed,
    /// 跳过本批剩余调用，让模型重新决策
    Replan,
    Finish,
}

/// 单轮会话：持有所有协作者的引用、本轮的取消令牌与输出通道
pub struct TurnSession<'a> {
    pub model: &'a dyn ChatModel,
    pub executor: &'a ToolExecutor,
    pub gate: &'a PermissionGate,
    pub recovery: &'a RecoveryEngine,
    pub state: &'a StateMachine,
    pub confirmations: &'a ConfirmationSlot,
    pub trimmer: &'a ContextTrimmer,
    pub prompt: &'a SystemPrompt,
    pub retry: &'a RetryConfig,
    pub settings: &'a LoopSettings,
    pub cancel: CancelToken,
    /// 本轮开始时的状态机 epoch；reset 之后旧一轮不再改动状态
    pub epoch: u64,
    pub intent_rewriter: Option<&'a dyn IntentRewriter>,
    pub reflector: Option<&'a dyn Reflector>,
    pub event_tx: Option<&'a EventSender>,
    pub update_tx: Option<&'a UpdateSender>,
}

impl<'a> TurnSession<'a> {
    /// 执行一轮并返回终态快照
    ///
    /// 中间快照推送到 update_tx；终态快照只作为返回值，由调用方在释放本轮占用之后推送。
    pub async fn run(&self, messages: Vec<Message>) -> TurnUpdate {
        let mut turn = Turn::new(messages);
        tracing::info!(turn = %turn.id, messages = turn.messages.len(), "turn started");
        let result = self.drive(&mut turn).await;
        self.finish(turn, result)
    }

    async fn drive(&self, turn: &mut Turn) -> Result<(), AgentError> {
        self.cancel.check()?;
        if !self.transition(AgentState::Parsing) {
            return Err(AgentError::InvalidState(format!(
                "cannot start a turn from {}",
                self.state.state()
            )));
        }

        if let Some(reflector) = self.reflector {
            reflector.begin_turn();
        }
        self.prompt.refresh(&mut turn.messages, Local::now());
        let elided = self.trimmer.trim(&mut turn.messages);
        if elided > 0 {
            tracing::info!(elided, budget = self.trimmer.budget(), "context trimmed");
        }
        self.publish(turn);

        if self.rewrite_intent(turn).await? {
            return Ok(());
        }

        self.transition(AgentState::Executing);
        if let Some(intent) = &turn.intent {
            if intent.intent_type.is_task()
                && intent.confidence >= self.settings.intent_confidence_threshold
            {
                SystemPrompt::append_task_block(&mut turn.messages, intent);
            }
        }

        let render_available = self.executor.registry().has_render_tool();
        while turn.iterations < self.settings.max_iterations {
            self.cancel.check()?;
            turn.iterations += 1;
            self.step(StepEvent::new(
                StepKind::Thinking,
                format!("第 {} 轮推理", turn.iterations),
            ));

            let reply = match self.call_model(turn).await? {
                ModelResponse::Empty { finish_reason } => {
                    turn.empty_responses += 1;
                    tracing::warn!(
                        consecutive = turn.empty_responses,
                        finish_reason = ?finish_reason,
                        "provider returned an empty response"
                    );
                    if turn.observations.has_render() {
                        return Ok(());
                    }
                    if turn.empty_responses > self.settings.max_empty_responses {
                        return Err(AgentError::ProviderEmptyResponse);
                    }
                    if let RecoveryAction::RetryWithPrompt(prompt) =
                        self.recovery.handle(&AgentError::ProviderEmptyResponse)
                    {
                        turn.push(Message::human(prompt));
                    }
                    continue;
                }
                ModelResponse::Reply(reply) => reply,
            };
            turn.empty_responses = 0;

            if !reply.content.trim().is_empty() {
                self.step(StepEvent::new(StepKind::Thinking, reply.content.clone()));
            }

            if reply.tool_calls.is_empty() {
                turn.push(reply.into_message());
                self.publish(turn);
                match completion::decide(&turn.completion_facts(render_available)) {
                    CompletionDecision::Complete => return Ok(()),
                    CompletionDecision::NeedsRender => {
                        turn.render_demands += 1;
                        tracing::info!(demands = turn.render_demands, "result not rendered yet, demanding render");
                        let names = self.executor.registry().render_tool_names();
                        turn.push(Message::human(completion::render_demand(&names)));
                        continue;
                    }
                }
            }

            let calls = reply.tool_calls.clone();
            turn.push(reply.into_message());
            let outcome = self.run_tool_calls(turn, &calls, render_available).await?;
            turn.flush_prompts();
            self.publish(turn);
            if let RoundOutcome::Complete = outcome {
                return Ok(());
            }
        }

        Err(AgentError::MaxIterationsExceeded(self.settings.max_iterations))
    }

    /// 返回 true 表示本轮已在解析阶段结束（澄清或意图被拒绝）
    async fn rewrite_intent(&self, turn: &mut Turn) -> Result<bool, AgentError> {
        let Some(rewriter) = self.intent_rewriter.filter(|r| r.is_enabled()) else {
            return Ok(false);
        };
        let Some(content) = turn.user_content().filter(|c| c.is_meaningful()).cloned() else {
            return Ok(false);
        };

        self.step(StepEvent::new(StepKind::IntentRewriting, "正在理解你的请求"));
        let history = turn.history().to_vec();
        let rewrite = async {
            rewriter
                .rewrite(&content, &history)
                .await
                .map_err(AgentError::from)
        };
        let intent = match self
            .cancel
            .run(with_timeout(rewrite, self.settings.model_timeout, "意图改写超时"))
            .await?
        {
            Ok(intent) => intent,
            Err(e) => {
                tracing::warn!(error = %e, "intent rewrite failed, continuing without intent");
                return Ok(false);
            }
        };

        tracing::info!(
            intent = ?intent.intent_type,
            confidence = intent.confidence,
            risk = ?intent.risk_level,
            "intent rewritten"
        );
        send_event(
            self.event_tx,
            AgentEvent::IntentRewritten {
                intent: intent.clone(),
            },
        );

        if intent.is_clarify() {
            let question = intent
                .clarifying_question
                .clone()
                .unwrap_or_else(|| "能再具体说说你想做什么吗？".to_string());
            turn.push(Message::ai(question));
            turn.intent = Some(intent);
            return Ok(true);
        }

        if intent.intent_type.is_task() {
            let plan = ExecutionPlan::from_intent(&intent);
            self.state.set_plan(Some(plan.clone()));
            turn.plan = Some(plan);
        }

        if intent.requires_confirmation && self.gate.confirmation_enabled() {
            let message = intent
                .confirmation_reason
                .clone()
                .unwrap_or_else(|| format!("即将执行「{}」，确认继续吗？", intent.rewritten));
            let args = serde_json::to_value(&intent.fields).unwrap_or_default();
            let request = ConfirmationRequest::new(
                ConfirmationKind::Intent,
                intent.intent_type.label(),
                args,
                message,
            );
            turn.intent = Some(intent);
            match self.confirm(request).await? {
                ConfirmationDecision::Confirmed => turn.pre_approved = true,
                ConfirmationDecision::Rejected(reason) => {
                    turn.push(Message::ai(format!("好的，本次操作已取消：{reason}")));
                    return Ok(true);
                }
            }
        } else {
            turn.intent = Some(intent);
        }
        Ok(false)
    }

    /// 模型调用：超时 + 有界重试；超长上下文时按半预算再裁剪一次，无法解析时带提示重试一次
    async fn call_model(&self, turn: &mut Turn) -> Result<ModelResponse, AgentError> {
        let timeout = if turn.is_multimodal() {
            self.settings.multimodal_timeout
        } else {
            self.settings.model_timeout
        };
        let mut pruned = false;
        let mut reprompted = false;

        loop {
            let result = {
                let messages = turn.messages.as_slice();
                let op = move || async move {
                    let invoke = async move {
                        self.model.invoke(messages).await.map_err(AgentError::from)
                    };
                    self.cancel
                        .run(with_timeout(invoke, timeout, "模型响应超时"))
                        .await?
                };
                let retried = with_retry(op, self.retry, AgentError::is_retryable, |attempt, err, delay| {
                    self.cancel.check()?;
                    tracing::warn!(
                        model = self.model.name(),
                        attempt,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "model call failed, retrying"
                    );
                    Ok(())
                });
                // 退避等待也要能被取消打断
                self.cancel.run(retried).await?
            };

            let err = match result {
                Ok(response) => return Ok(response.normalize()),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => e,
            };
            match self.recovery.handle(&err) {
                RecoveryAction::SummarizeAndPrune if !pruned => {
                    pruned = true;
                    let budget = self.trimmer.budget() / 2;
                    let elided = ContextTrimmer::trim_to(&mut turn.messages, budget);
                    tracing::warn!(elided, budget, "context length exceeded, trimmed harder");
                }
                RecoveryAction::RetryWithPrompt(prompt) if !reprompted => {
                    reprompted = true;
                    tracing::warn!(error = %err, "invalid model output, retrying with prompt");
                    turn.push(Message::human(prompt));
                }
                _ => {
                    tracing::error!(model = self.model.name(), error = %err, "model call failed");
                    return Err(err);
                }
            }
        }
    }

    async fn run_tool_calls(
        &self,
        turn: &mut Turn,
        calls: &[ToolCall],
        render_available: bool,
    ) -> Result<RoundOutcome, AgentError> {
        let registry = self.executor.registry();

        for (idx, call) in calls.iter().enumerate() {
            self.cancel.check()?;
            let remaining = calls.len() - idx - 1;

            let (name, args) = if registry.contains(&call.name) {
                (call.name.clone(), call.args.clone())
            } else if let Some(fix) =
                ToolNameCorrector::correct(&call.name, call.args.clone(), registry)
            {
                tracing::info!(from = %call.name, to = %fix.tool, args = %fix.args, "tool name corrected");
                self.step(
                    StepEvent::new(StepKind::ToolCall, fix.describe())
                        .with_tool(fix.tool.clone(), fix.args.clone()),
                );
                (fix.tool, fix.args)
            } else {
                let err = AgentError::ToolNotFound(call.name.clone());
                tracing::warn!(tool = %call.name, args = %call.args, "tool not found");
                let text = format!(
                    "错误：{err}。可用工具：{}",
                    registry.tool_names().join(", ")
                );
                turn.push(Message::tool(call.id.clone(), text.clone()));
                let observation = turn
                    .observations
                    .record(&call.name, call.args.clone(), Err(err.to_string()), Duration::ZERO, false)
                    .clone();
                self.step(
                    StepEvent::new(StepKind::ToolResult, text)
                        .with_tool(call.name.clone(), call.args.clone()),
                );
                match self.after_observation(turn, &observation, remaining, render_available).await? {
                    FollowUp::Proceed => continue,
                    FollowUp::Replan => return Ok(RoundOutcome::Continue),
                    FollowUp::Finish => return Ok(RoundOutcome::Complete),
                }
            };

            if let Some(previous) = turn.observations.find_repeat(&name, &args).cloned() {
                if previous.is_render && previous.success {
                    tracing::info!(tool = %name, "repeated render call, treating turn as complete");
                    turn.push(Message::tool(call.id.clone(), previous.result));
                    turn.answer_unanswered("已跳过：结果已展示");
                    return Ok(RoundOutcome::Complete);
                }
                turn.repeat_interceptions += 1;
                tracing::warn!(
                    tool = %name,
                    args = %args,
                    repeats = turn.repeat_interceptions,
                    "repeated tool call intercepted"
                );
                if turn.repeat_interceptions >= self.settings.max_repeated_calls {
                    turn.push(Message::tool(call.id.clone(), "已拦截：重复调用次数过多"));
                    turn.answer_unanswered("已跳过：检测到重复调用循环");
                    return Err(AgentError::RepeatedCallLoop {
                        tool: name,
                        repeats: turn.repeat_interceptions,
                    });
                }
                let quoted = previous.error.unwrap_or(previous.result);
                turn.push(Message::tool(
                    call.id.clone(),
                    format!(
                        "该调用与第 {} 步完全相同，未重复执行。上次结果：{quoted}",
                        previous.step_id
                    ),
                ));
                turn.queue_prompt(REPEAT_PROMPT);
                continue;
            }

            let Some(tool) = registry.get(&name) else {
                turn.push(Message::tool(call.id.clone(), format!("错误：Tool not found: {name}")));
                continue;
            };
            let risk = turn.intent.as_ref().map(|i| i.risk_level);
            match self.gate.check(&name, tool.tier(), risk, turn.pre_approved) {
                PermissionDecision::Allow => {}
                PermissionDecision::RateLimited { retry_after } => {
                    let err = AgentError::PermissionDenied {
                        tool: name.clone(),
                        reason: format!("调用过于频繁，请 {} 秒后再试", retry_after.as_secs().max(1)),
                    };
                    turn.push(Message::tool(call.id.clone(), format!("错误：{err}")));
                    let observation = turn
                        .observations
                        .record(&name, args.clone(), Err(err.to_string()), Duration::ZERO, tool.is_render())
                        .clone();
                    match self.after_observation(turn, &observation, remaining, render_available).await? {
                        FollowUp::Proceed => continue,
                        FollowUp::Replan => return Ok(RoundOutcome::Continue),
                        FollowUp::Finish => return Ok(RoundOutcome::Complete),
                    }
                }
                PermissionDecision::RequireConfirmation { tier, reason } => {
                    tracing::info!(tool = %name, ?tier, "tool requires confirmation");
                    let request =
                        ConfirmationRequest::new(ConfirmationKind::Tool, name.clone(), args.clone(), reason);
                    match self.confirm(request).await? {
                        ConfirmationDecision::Confirmed => {
                            self.transition(AgentState::Executing);
                        }
                        ConfirmationDecision::Rejected(reason) => {
                            turn.push(Message::tool(call.id.clone(), format!("用户拒绝执行：{reason}")));
                            turn.answer_unanswered("已跳过：用户拒绝了前序操作");
                            turn.push(Message::ai(format!("好的，已取消 {name} 操作：{reason}")));
                            return Ok(RoundOutcome::Complete);
                        }
                    }
                }
            }

            self.gate.record(&name);
            self.step(
                StepEvent::new(StepKind::ToolCall, format!("调用 {name}"))
                    .with_tool(name.clone(), args.clone()),
            );
            let started = Instant::now();
            let result = self.cancel.run(self.executor.execute(&name, args.clone())).await?;
            let elapsed = started.elapsed();

            let (text, outcome) = match result {
                Ok(text) => (text.clone(), Ok(text)),
                Err(e) => {
                    tracing::warn!(tool = %name, args = %args, error = %e, "tool call failed");
                    (format!("工具执行失败：{e}"), Err(e.to_string()))
                }
            };
            turn.push(Message::tool(call.id.clone(), text.clone()));
            self.step(
                StepEvent::new(StepKind::ToolResult, format!("{name} 完成"))
                    .with_tool(name.clone(), args.clone())
                    .with_result(preview(&text)),
            );

            let is_render = tool.is_render();
            let success = outcome.is_ok();
            if let Some(plan) = turn.plan.as_mut() {
                plan.mark(&name, success, is_render);
                self.state.set_plan(Some(plan.clone()));
            }
            let observation = turn
                .observations
                .record(&name, args, outcome, elapsed, is_render)
                .clone();
            match self.after_observation(turn, &observation, remaining, render_available).await? {
                FollowUp::Proceed => {}
                FollowUp::Replan => return Ok(RoundOutcome::Continue),
                FollowUp::Finish => return Ok(RoundOutcome::Complete),
            }
        }
        Ok(RoundOutcome::Continue)
    }

    /// 反思闸门
    async fn after_observation(
        &self,
        turn: &mut Turn,
        observation: &StepObservation,
        remaining: usize,
        render_available: bool,
    ) -> Result<FollowUp, AgentError> {
        let Some(result) = self.reflect(turn, observation, remaining).await? else {
            return Ok(FollowUp::Proceed);
        };
        match result.verdict {
            ReflectionVerdict::Continue => Ok(FollowUp::Proceed),
            ReflectionVerdict::AdjustStrategy => {
                let instruction = result
                    .instruction
                    .unwrap_or_else(|| format!("请调整策略：{}", result.reasoning));
                tracing::info!(instruction = %instruction, "reflection adjusted strategy");
                turn.queue_prompt(format!("[反思] {instruction}"));
                turn.answer_unanswered("已跳过：策略已调整，请重新决策");
                Ok(FollowUp::Replan)
            }
            ReflectionVerdict::Complete if turn.observations.has_render() => {
                tracing::info!("reflection judged the turn complete");
                turn.answer_unanswered("已跳过：任务已完成");
                Ok(FollowUp::Finish)
            }
            ReflectionVerdict::Complete => {
                if render_available {
                    let names = self.executor.registry().render_tool_names();
                    turn.queue_prompt(completion::render_demand(&names));
                } else {
                    turn.queue_prompt(FINAL_ANSWER_PROMPT);
                }
                Ok(FollowUp::Proceed)
            }
            ReflectionVerdict::Abort => {
                tracing::warn!(reasoning = %result.reasoning, "reflector advised abort, continuing");
                Ok(FollowUp::Proceed)
            }
        }
    }

    async fn reflect(
        &self,
        turn: &Turn,
        observation: &StepObservation,
        remaining: usize,
    ) -> Result<Option<ReflectionResult>, AgentError> {
        let Some(reflector) = self.reflector.filter(|r| r.is_enabled()) else {
            return Ok(None);
        };
        if !reflector.should_reflect(observation, remaining) {
            return Ok(None);
        }

        self.transition(AgentState::Reflecting);
        self.step(StepEvent::new(StepKind::Reflection, "正在反思执行进展"));
        let items = turn.observations.items();
        let context = ReflectionContext {
            user_request: turn.user_request(),
            plan: turn.plan.clone(),
            observations: items[..items.len().saturating_sub(1)].to_vec(),
            current: observation.clone(),
        };
        let reflect = async { reflector.reflect(&context).await.map_err(AgentError::from) };
        let result = self
            .cancel
            .run(with_timeout(reflect, self.settings.model_timeout, "反思超时"))
            .await?;
        self.transition(AgentState::Executing);

        match result {
            Ok(result) => {
                tracing::info!(verdict = ?result.verdict, reasoning = %result.reasoning, "reflection");
                send_event(self.event_tx, AgentEvent::Reflection { result: result.clone() });
                self.step(StepEvent::new(StepKind::Reflection, result.reasoning.clone()));
                Ok(Some(result))
            }
            Err(e) => {
                tracing::warn!(error = %e, "reflection failed, continuing");
                Ok(None)
            }
        }
    }

    /// 打开确认汇合点并等待宿主决定；取消时释放槽位
    async fn confirm(&self, request: ConfirmationRequest) -> Result<ConfirmationDecision, AgentError> {
        self.transition(AgentState::AwaitingConfirmation);
        let pending = self.confirmations.open(request.clone())?;
        tracing::info!(id = %request.id, tool = %request.tool_name, "awaiting confirmation");
        send_event(
            self.event_tx,
            AgentEvent::ConfirmationRequired {
                request: request.clone(),
            },
        );
        self.step(
            StepEvent::new(StepKind::Confirmation, request.message.clone())
                .with_tool(request.tool_name.clone(), request.args.clone()),
        );
        match self.cancel.run(pending.wait()).await {
            Ok(decision) => {
                self.step(StepEvent::new(
                    StepKind::Confirmation,
                    match &decision {
                        ConfirmationDecision::Confirmed => "已确认".to_string(),
                        ConfirmationDecision::Rejected(reason) => format!("已拒绝：{reason}"),
                    },
                ));
                Ok(decision)
            }
            Err(e) => {
                self.confirmations.release(&request.id);
                Err(e)
            }
        }
    }

    fn finish(&self, mut turn: Turn, result: Result<(), AgentError>) -> TurnUpdate {
        let update = match result {
            Ok(()) => {
                if self.state.state() == AgentState::Executing {
                    self.transition(AgentState::Summarizing);
                }
                self.transition(AgentState::Completed);
                tracing::info!(turn = %turn.id, iterations = turn.iterations, "turn completed");
                TurnUpdate {
                    messages: turn.into_messages(),
                    state: AgentState::Completed,
                    error: None,
                }
            }
            Err(AgentError::Cancelled(reason)) => {
                turn.answer_unanswered("已取消");
                self.transition(AgentState::Cancelled);
                tracing::info!(turn = %turn.id, %reason, "turn cancelled");
                self.step(StepEvent::new(StepKind::Cancelled, format!("已取消（{reason}）")));
                TurnUpdate {
                    messages: turn.into_messages(),
                    state: AgentState::Cancelled,
                    error: None,
                }
            }
            Err(err) => {
                tracing::error!(turn = %turn.id, error = %err, iterations = turn.iterations, "turn failed");
                turn.answer_unanswered("已中止");
                turn.push(Message::ai(explain(&err)));
                self.transition(AgentState::Error);
                TurnUpdate {
                    messages: turn.into_messages(),
                    state: AgentState::Error,
                    error: Some(err.to_string()),
                }
            }
        };

        if matches!(update.state, AgentState::Completed | AgentState::Cancelled) {
            self.transition(AgentState::Idle);
        }
        update
    }

    fn transition(&self, to: AgentState) -> bool {
        match self.state.transition_at(self.epoch, to) {
            Some(from) => {
                send_event(self.event_tx, AgentEvent::StateChange { from, to });
                true
            }
            None => false,
        }
    }

    fn is_stale(&self) -> bool {
        self.state.epoch() != self.epoch
    }

    fn step(&self, event: StepEvent) {
        send_event(self.event_tx, AgentEvent::Step(event));
    }

    /// 中间快照
    fn publish(&self, turn: &Turn) {
        if self.is_stale() {
            return;
        }
        if let Some(tx) = self.update_tx {
            let _ = tx.send(TurnUpdate {
                messages: turn.messages.clone(),
                state: self.state.state(),
                error: None,
            });
        }
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > RESULT_PREVIEW_CHARS {
        format!("{}...", text.chars().take(RESULT_PREVIEW_CHARS).collect::<String>())
    } else {
        text.to_string()
    }
}

/// 失败时追加给用户的说明
fn explain(err: &AgentError) -> String {
    match err {
        AgentError::MaxIterationsExceeded(n) => format!(
            "抱歉，这个请求在 {n} 轮推理后仍未完成，我先停下来了。可以换个说法或拆成更小的步骤再试。"
        ),
        AgentError::RepeatedCallLoop { tool, repeats } => format!(
            "抱歉，我在反复以相同参数调用 {tool}（已拦截 {repeats} 次）却没有进展，已停止本次执行。"
        ),
        AgentError::ProviderEmptyResponse => {
            "抱歉，模型连续没有返回任何内容，本次请求未能完成，请稍后重试。".to_string()
        }
        other => format!("抱歉，处理请求时出错：{other}"),
    }
}
