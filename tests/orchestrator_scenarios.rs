//! 编排器端到端场景：Mock 模型 + 测试内工具，经公开 API 驱动

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};

use ledger_agent::core::{
    AgentError, AgentState, CancelReason, ConfirmationKind, Orchestrator, OrchestratorBuilder,
    RetryConfig, TurnUpdate,
};
use ledger_agent::llm::{LlmError, MockChatModel};
use ledger_agent::memory::{ContentPart, Message, MessageContent, Role, ToolCall};
use ledger_agent::react::{
    AgentEvent, LoopSettings, ReflectionContext, ReflectionResult, ReflectionVerdict, Reflector,
    RuleIntentRewriter, StepKind, StepObservation,
};
use ledger_agent::tools::{Tool, ToolRegistry};

/// 记录调用次数与参数的业务工具
struct RecordingTool {
    name: &'static str,
    reply: Value,
    calls: Arc<Mutex<Vec<Value>>>,
}

impl RecordingTool {
    fn new(name: &'static str, reply: Value) -> (Self, Arc<Mutex<Vec<Value>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                name,
                reply,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "test tool"
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        self.calls.lock().unwrap().push(args);
        Ok(self.reply.clone())
    }
}

/// 开始执行时通知测试，然后长时间挂起
struct SlowTool {
    started: Arc<Notify>,
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "transaction"
    }

    fn description(&self) -> &str {
        "slow"
    }

    async fn execute(&self, _args: Value) -> Result<Value, String> {
        self.started.notify_one();
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(json!("late"))
    }
}

/// 按脚本给出判定的反思器
struct ScriptedReflector {
    verdicts: Mutex<Vec<ReflectionResult>>,
    requests: Mutex<Vec<String>>,
    resets: AtomicUsize,
}

impl ScriptedReflector {
    fn new(verdicts: Vec<ReflectionResult>) -> Self {
        Self {
            verdicts: Mutex::new(verdicts),
            requests: Mutex::new(Vec::new()),
            resets: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Reflector for ScriptedReflector {
    fn is_enabled(&self) -> bool {
        true
    }

    fn should_reflect(&self, _observation: &StepObservation, _remaining: usize) -> bool {
        true
    }

    async fn reflect(&self, context: &ReflectionContext) -> Result<ReflectionResult, LlmError> {
        self.requests.lock().unwrap().push(context.user_request.clone());
        let mut verdicts = self.verdicts.lock().unwrap();
        if verdicts.is_empty() {
            Ok(ReflectionResult::new(ReflectionVerdict::Continue, "ok"))
        } else {
            Ok(verdicts.remove(0))
        }
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 1,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        jitter: Duration::ZERO,
    }
}

fn builder(model: Arc<MockChatModel>, registry: ToolRegistry) -> OrchestratorBuilder {
    OrchestratorBuilder::new(model, registry).with_retry(fast_retry())
}

async fn wait_for_state(orch: &Orchestrator, state: AgentState) {
    let mut rx = orch.subscribe_state();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
        .await
        .expect("state not reached in time")
        .unwrap();
}

async fn collect(orch: &Orchestrator, messages: Vec<Message>) -> Vec<TurnUpdate> {
    let stream = orch.stream(messages).unwrap();
    tokio::time::timeout(Duration::from_secs(5), stream.collect::<Vec<_>>())
        .await
        .expect("stream did not finish")
}

fn drain(rx: &mut mpsc::UnboundedReceiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    events
}

#[tokio::test]
async fn delete_intent_rejected_ends_completed_without_tool_call() {
    let model = Arc::new(MockChatModel::new().tool_call("delete_transaction", json!({"id": 42})));
    let (tool, calls) = RecordingTool::new("delete_transaction", json!({"deleted": 42}));
    let mut registry = ToolRegistry::new();
    registry.register(tool);
    let orch = builder(model.clone(), registry)
        .with_intent_rewriter(Arc::new(RuleIntentRewriter::new()))
        .build();

    let stream = orch.stream(vec![Message::human("delete transaction 42")]).unwrap();
    wait_for_state(&orch, AgentState::AwaitingConfirmation).await;

    let pending = orch.pending_confirmation().unwrap();
    assert_eq!(pending.kind, ConfirmationKind::Intent);
    assert!(orch.is_awaiting_confirmation());
    assert!(orch.reject("wrong one"));

    let updates: Vec<TurnUpdate> = stream.collect().await;
    let last = updates.last().unwrap();
    assert_eq!(last.state, AgentState::Completed);
    let reply = last.messages.last().unwrap();
    assert_eq!(reply.role, Role::Ai);
    assert!(reply.text().contains("wrong one"));
    assert!(calls.lock().unwrap().is_empty());
    assert_eq!(model.call_count(), 0);
    assert_eq!(orch.state(), AgentState::Idle);
}

#[tokio::test]
async fn unknown_list_tool_is_corrected_to_category() {
    let model = Arc::new(
        MockChatModel::new()
            .tool_call("list", json!({}))
            .text("你有餐饮、交通两个分类"),
    );
    let (tool, calls) = RecordingTool::new("category", json!(["餐饮", "交通"]));
    let mut registry = ToolRegistry::new();
    registry.register(tool);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let orch = builder(model, registry).with_events(tx).build();

    let update = orch.invoke(vec![Message::human("我有哪些分类")]).await.unwrap();
    assert_eq!(update.state, AgentState::Completed);
    assert_eq!(calls.lock().unwrap().as_slice(), &[json!({"action": "list"})]);

    let corrected = drain(&mut rx).into_iter().any(|ev| match ev {
        AgentEvent::Step(step) => {
            step.kind == StepKind::ToolCall
                && step.content.contains("list")
                && step.tool_name.as_deref() == Some("category")
        }
        _ => false,
    });
    assert!(corrected, "substitution step event missing");
}

#[tokio::test]
async fn consecutive_empty_responses_end_in_error() {
    let mut script = MockChatModel::new();
    for _ in 0..10 {
        script = script.empty();
    }
    let model = Arc::new(script);
    let orch = builder(model.clone(), ToolRegistry::new()).build();

    let update = orch.invoke(vec![Message::human("记一笔午饭 30")]).await.unwrap();
    assert_eq!(update.state, AgentState::Error);
    assert!(update.error.is_some());
    assert_eq!(update.messages.last().unwrap().role, Role::Ai);
    assert_eq!(model.call_count(), LoopSettings::default().max_empty_responses + 1);
    assert_eq!(orch.state(), AgentState::Error);

    assert!(matches!(
        orch.invoke(vec![Message::human("再试一次")]).await,
        Err(AgentError::InvalidState(_))
    ));
}

#[tokio::test]
async fn repeated_render_call_completes_turn() {
    let args = json!({"id": 42, "amount": 30});
    let model = Arc::new(
        MockChatModel::new()
            .tool_call("render_transaction_detail", args.clone())
            .tool_call("render_transaction_detail", args),
    );
    let (render, calls) = RecordingTool::new("render_transaction_detail", json!({"card": "ok"}));
    let mut registry = ToolRegistry::new();
    registry.register(render);
    let orch = builder(model.clone(), registry).build();

    let update = orch.invoke(vec![Message::human("看看交易 42")]).await.unwrap();
    assert_eq!(update.state, AgentState::Completed);
    assert_eq!(calls.lock().unwrap().len(), 1);
    assert_eq!(model.call_count(), 2);
}

#[tokio::test]
async fn repeated_business_call_hits_loop_limit() {
    let args = json!({"action": "query", "range": "this_week"});
    let mut script = MockChatModel::new();
    for _ in 0..6 {
        script = script.tool_call("transaction", args.clone());
    }
    let model = Arc::new(script);
    let (tool, calls) = RecordingTool::new("transaction", json!([]));
    let mut registry = ToolRegistry::new();
    registry.register(tool);
    let orch = builder(model.clone(), registry).build();

    let update = orch.invoke(vec![Message::human("本周花了多少")]).await.unwrap();
    assert_eq!(update.state, AgentState::Error);
    assert!(update.error.unwrap().contains("transaction"));
    assert_eq!(calls.lock().unwrap().len(), 1);
    assert_eq!(model.call_count(), 4);
    let intercepted = update
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool && m.text().contains("未重复执行"))
        .count();
    assert_eq!(intercepted, 2);
}

#[tokio::test]
async fn cancel_while_model_is_thinking() {
    let model = Arc::new(MockChatModel::new().delayed(Duration::from_secs(30), "too late"));
    let orch = builder(model.clone(), ToolRegistry::new()).build();

    let stream = orch.stream(vec![Message::human("统计本月支出")]).unwrap();
    wait_for_state(&orch, AgentState::Executing).await;
    assert!(orch.cancel(CancelReason::User));
    assert!(!orch.cancel(CancelReason::User));

    let updates: Vec<TurnUpdate> = tokio::time::timeout(Duration::from_secs(5), stream.collect())
        .await
        .unwrap();
    assert_eq!(updates.last().unwrap().state, AgentState::Cancelled);
    assert_eq!(orch.state(), AgentState::Idle);
    assert_eq!(model.call_count(), 1);
}

#[tokio::test]
async fn cancel_during_tool_answers_pending_call() {
    let started = Arc::new(Notify::new());
    let model = Arc::new(MockChatModel::new().tool_calls(vec![
        ToolCall::new("transaction", json!({"action": "create", "amount": 30})).with_id("c1"),
    ]));
    let mut registry = ToolRegistry::new();
    registry.register(SlowTool {
        started: started.clone(),
    });
    let orch = builder(model.clone(), registry).build();

    let stream = orch.stream(vec![Message::human("午饭 30")]).unwrap();
    tokio::time::timeout(Duration::from_secs(5), started.notified())
        .await
        .unwrap();
    orch.cancel(CancelReason::ComponentUnmounted);

    let updates: Vec<TurnUpdate> = tokio::time::timeout(Duration::from_secs(5), stream.collect())
        .await
        .unwrap();
    let last = updates.last().unwrap();
    assert_eq!(last.state, AgentState::Cancelled);
    let reply = last.messages.last().unwrap();
    assert_eq!(reply.role, Role::Tool);
    assert_eq!(reply.tool_call_id.as_deref(), Some("c1"));
    assert_eq!(reply.text(), "已取消");
    assert_eq!(model.call_count(), 1);
}

fn transcript(update: &TurnUpdate) -> Vec<(Role, String)> {
    update
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| (m.role, m.text()))
        .collect()
}

#[tokio::test]
async fn reset_behaves_like_fresh_instance() {
    let mut script = MockChatModel::new();
    for _ in 0..4 {
        script = script.empty();
    }
    let reused = builder(Arc::new(script.text("好的")), ToolRegistry::new()).build();
    let failed = reused.invoke(vec![Message::human("hi")]).await.unwrap();
    assert_eq!(failed.state, AgentState::Error);

    reused.reset();
    assert_eq!(reused.state(), AgentState::Idle);
    assert!(!reused.is_awaiting_confirmation());
    assert!(reused.plan().is_none());
    let after_reset = reused.invoke(vec![Message::human("你好")]).await.unwrap();

    let fresh = builder(Arc::new(MockChatModel::new().text("好的")), ToolRegistry::new()).build();
    let from_fresh = fresh.invoke(vec![Message::human("你好")]).await.unwrap();

    assert_eq!(after_reset.state, from_fresh.state);
    assert_eq!(after_reset.error, from_fresh.error);
    assert_eq!(transcript(&after_reset), transcript(&from_fresh));
    assert_eq!(reused.state(), fresh.state());
}

#[tokio::test]
async fn reset_supersedes_turn_waiting_for_confirmation() {
    let model = Arc::new(MockChatModel::new().tool_call("delete_transaction", json!({"id": 7})));
    let (tool, calls) = RecordingTool::new("delete_transaction", json!("ok"));
    let mut registry = ToolRegistry::new();
    registry.register(tool);
    let orch = builder(model, registry).build();

    let stream = orch.stream(vec![Message::human("删除交易 7")]).unwrap();
    wait_for_state(&orch, AgentState::AwaitingConfirmation).await;
    orch.reset();

    let updates: Vec<TurnUpdate> = tokio::time::timeout(Duration::from_secs(5), stream.collect())
        .await
        .unwrap();
    assert!(updates.iter().all(|u| u.state != AgentState::Cancelled));
    assert!(!orch.confirm());
    assert!(calls.lock().unwrap().is_empty());
    assert_eq!(orch.state(), AgentState::Idle);
}

#[tokio::test]
async fn dangerous_tool_runs_only_after_confirm() {
    let model = Arc::new(
        MockChatModel::new()
            .tool_call("delete_transaction", json!({"id": 42}))
            .text("已删除交易 42"),
    );
    let (tool, calls) = RecordingTool::new("delete_transaction", json!({"deleted": 42}));
    let mut registry = ToolRegistry::new();
    registry.register(tool);
    let orch = builder(model, registry).build();

    let stream = orch.stream(vec![Message::human("删掉 42 那笔")]).unwrap();
    wait_for_state(&orch, AgentState::AwaitingConfirmation).await;

    let pending = orch.pending_confirmation().unwrap();
    assert_eq!(pending.kind, ConfirmationKind::Tool);
    assert_eq!(pending.tool_name, "delete_transaction");
    assert!(calls.lock().unwrap().is_empty());
    assert!(orch.confirm());

    let updates: Vec<TurnUpdate> = stream.collect().await;
    let last = updates.last().unwrap();
    assert_eq!(last.state, AgentState::Completed);
    assert_eq!(calls.lock().unwrap().len(), 1);
    assert_eq!(last.messages.last().unwrap().text(), "已删除交易 42");
}

#[tokio::test]
async fn dangerous_tool_rejected_is_never_invoked() {
    let model = Arc::new(MockChatModel::new().tool_call("delete_transaction", json!({"id": 42})));
    let (tool, calls) = RecordingTool::new("delete_transaction", json!({"deleted": 42}));
    let mut registry = ToolRegistry::new();
    registry.register(tool);
    let orch = builder(model.clone(), registry).build();

    let stream = orch.stream(vec![Message::human("删掉 42 那笔")]).unwrap();
    wait_for_state(&orch, AgentState::AwaitingConfirmation).await;
    assert!(orch.reject("不是这笔"));

    let updates: Vec<TurnUpdate> = stream.collect().await;
    let last = updates.last().unwrap();
    assert_eq!(last.state, AgentState::Completed);
    assert!(last.messages.last().unwrap().text().contains("不是这笔"));
    assert!(calls.lock().unwrap().is_empty());
    assert_eq!(model.call_count(), 1);
}

#[tokio::test]
async fn reflection_adjust_strategy_skips_remaining_calls() {
    let model = Arc::new(
        MockChatModel::new()
            .tool_calls(vec![
                ToolCall::new("transaction", json!({"action": "query", "page": 1})).with_id("a"),
                ToolCall::new("transaction", json!({"action": "query", "page": 2})).with_id("b"),
            ])
            .text("本周共 3 笔支出"),
    );
    let (tool, calls) = RecordingTool::new("transaction", json!([]));
    let mut registry = ToolRegistry::new();
    registry.register(tool);
    let reflector = Arc::new(ScriptedReflector::new(vec![ReflectionResult::new(
        ReflectionVerdict::AdjustStrategy,
        "分页查询没有必要",
    )
    .with_instruction("改用按周统计")]));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let orch = builder(model, registry)
        .with_reflector(reflector.clone())
        .with_events(tx)
        .build();

    let update = orch.invoke(vec![Message::human("本周的支出")]).await.unwrap();
    assert_eq!(update.state, AgentState::Completed);
    assert_eq!(calls.lock().unwrap().len(), 1);

    let skipped = update
        .messages
        .iter()
        .find(|m| m.tool_call_id.as_deref() == Some("b"))
        .unwrap();
    assert!(skipped.text().contains("策略已调整"));
    assert!(update
        .messages
        .iter()
        .any(|m| m.role == Role::Human && m.text().contains("改用按周统计")));
    assert!(drain(&mut rx)
        .iter()
        .any(|ev| matches!(ev, AgentEvent::Reflection { result } if result.verdict == ReflectionVerdict::AdjustStrategy)));

    orch.reset();
    assert_eq!(reflector.resets.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn iteration_cap_ends_in_error() {
    let mut script = MockChatModel::new();
    for page in 0..5 {
        script = script.tool_call("transaction", json!({"action": "query", "page": page}));
    }
    let (tool, calls) = RecordingTool::new("transaction", json!([]));
    let mut registry = ToolRegistry::new();
    registry.register(tool);
    let orch = builder(Arc::new(script), registry)
        .with_settings(LoopSettings {
            max_iterations: 3,
            ..LoopSettings::default()
        })
        .build();

    let update = orch.invoke(vec![Message::human("翻完所有交易")]).await.unwrap();
    assert_eq!(update.state, AgentState::Error);
    assert_eq!(calls.lock().unwrap().len(), 3);
    assert!(update.messages.last().unwrap().text().contains('3'));
}

#[tokio::test]
async fn unknown_tool_is_reported_back_to_model() {
    let model = Arc::new(
        MockChatModel::new()
            .tool_call("teleport", json!({}))
            .text("抱歉，我没有这个能力"),
    );
    let (tool, _calls) = RecordingTool::new("category", json!([]));
    let mut registry = ToolRegistry::new();
    registry.register(tool);
    let orch = builder(model, registry).build();

    let update = orch.invoke(vec![Message::human("teleport me")]).await.unwrap();
    assert_eq!(update.state, AgentState::Completed);
    let tool_reply = update.messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_reply.text().contains("category"));
}

#[tokio::test]
async fn clarify_intent_asks_without_calling_model() {
    let model = Arc::new(MockChatModel::new());
    let orch = builder(model.clone(), ToolRegistry::new())
        .with_intent_rewriter(Arc::new(RuleIntentRewriter::new()))
        .build();

    let update = orch.invoke(vec![Message::human("?")]).await.unwrap();
    assert_eq!(update.state, AgentState::Completed);
    assert_eq!(update.messages.last().unwrap().role, Role::Ai);
    assert_eq!(model.call_count(), 0);
}

#[tokio::test]
async fn model_timeout_is_retried() {
    let model = Arc::new(
        MockChatModel::new()
            .delayed(Duration::from_secs(5), "slow")
            .text("好的"),
    );
    let orch = builder(model.clone(), ToolRegistry::new())
        .with_settings(LoopSettings {
            model_timeout: Duration::from_millis(50),
            ..LoopSettings::default()
        })
        .build();

    let update = orch.invoke(vec![Message::human("你好")]).await.unwrap();
    assert_eq!(update.state, AgentState::Completed);
    assert_eq!(update.messages.last().unwrap().text(), "好的");
    assert_eq!(model.call_count(), 2);
}

#[tokio::test]
async fn stream_reports_progress_before_terminal_update() {
    let model = Arc::new(
        MockChatModel::new()
            .tool_call("category", json!({"action": "list"}))
            .text("共两个分类"),
    );
    let (tool, _calls) = RecordingTool::new("category", json!(["餐饮", "交通"]));
    let mut registry = ToolRegistry::new();
    registry.register(tool);
    let orch = builder(model, registry).build();

    let updates = collect(&orch, vec![Message::human("分类有哪些")]).await;
    let (last, progress) = updates.split_last().unwrap();
    assert_eq!(last.state, AgentState::Completed);
    assert!(!progress.is_empty());
    assert!(progress.iter().all(|u| !u.state.is_terminal()));
    assert!(progress
        .windows(2)
        .all(|w| w[0].messages.len() <= w[1].messages.len()));
}

#[tokio::test]
async fn cancel_interrupts_retry_backoff() {
    let model = Arc::new(MockChatModel::new().error(LlmError::Overloaded).text("好的"));
    let orch = OrchestratorBuilder::new(model.clone(), ToolRegistry::new())
        .with_retry(RetryConfig {
            max_retries: 1,
            initial_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(3),
            backoff_multiplier: 2.0,
            jitter: Duration::ZERO,
        })
        .build();

    let stream = orch.stream(vec![Message::human("统计本月支出")]).unwrap();
    wait_for_state(&orch, AgentState::Executing).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let cancelled_at = Instant::now();
    assert!(orch.cancel(CancelReason::User));

    let updates: Vec<TurnUpdate> = tokio::time::timeout(Duration::from_secs(5), stream.collect())
        .await
        .unwrap();
    assert!(cancelled_at.elapsed() < Duration::from_millis(500));
    assert_eq!(updates.last().unwrap().state, AgentState::Cancelled);
    assert_eq!(model.call_count(), 1);
}

#[tokio::test]
async fn reflection_sees_user_request_after_corrective_prompt() {
    let model = Arc::new(
        MockChatModel::new()
            .empty()
            .tool_call("transaction", json!({"action": "query"}))
            .text("本月共 3 笔"),
    );
    let (tool, calls) = RecordingTool::new("transaction", json!([]));
    let mut registry = ToolRegistry::new();
    registry.register(tool);
    let reflector = Arc::new(ScriptedReflector::new(vec![]));
    let orch = builder(model.clone(), registry)
        .with_reflector(reflector.clone())
        .build();

    let update = orch.invoke(vec![Message::human("查询本月的交易")]).await.unwrap();
    assert_eq!(update.state, AgentState::Completed);
    assert_eq!(calls.lock().unwrap().len(), 1);
    assert_eq!(
        reflector.requests.lock().unwrap().as_slice(),
        &["查询本月的交易".to_string()]
    );
    let humans = update.messages.iter().filter(|m| m.role == Role::Human).count();
    assert_eq!(humans, 2);
}

#[tokio::test]
async fn reflection_complete_before_render_demands_render() {
    let model = Arc::new(
        MockChatModel::new()
            .tool_call("transaction", json!({"action": "query"}))
            .tool_call("render_transaction_list", json!({"items": []}))
            .text("已为你展示本周交易"),
    );
    let (tool, calls) = RecordingTool::new("transaction", json!([{"id": 1}]));
    let (render, rendered) = RecordingTool::new("render_transaction_list", json!({"card": "ok"}));
    let mut registry = ToolRegistry::new();
    registry.register(tool);
    registry.register(render);
    let reflector = Arc::new(ScriptedReflector::new(vec![ReflectionResult::new(
        ReflectionVerdict::Complete,
        "已拿到结果",
    )]));
    let orch = builder(model.clone(), registry)
        .with_reflector(reflector)
        .build();

    let update = orch.invoke(vec![Message::human("本周交易")]).await.unwrap();
    assert_eq!(update.state, AgentState::Completed);
    assert_eq!(model.call_count(), 3);
    assert_eq!(calls.lock().unwrap().len(), 1);
    assert_eq!(rendered.lock().unwrap().len(), 1);

    let tool_reply = update
        .messages
        .iter()
        .position(|m| m.role == Role::Tool)
        .unwrap();
    let demand = &update.messages[tool_reply + 1];
    assert_eq!(demand.role, Role::Human);
    assert!(demand.text().contains("render_transaction_list"));
}

#[tokio::test]
async fn reflection_abort_is_advisory() {
    let model = Arc::new(
        MockChatModel::new()
            .tool_calls(vec![
                ToolCall::new("transaction", json!({"action": "query", "page": 1})).with_id("a"),
                ToolCall::new("transaction", json!({"action": "query", "page": 2})).with_id("b"),
            ])
            .text("两页都查完了"),
    );
    let (tool, calls) = RecordingTool::new("transaction", json!([]));
    let mut registry = ToolRegistry::new();
    registry.register(tool);
    let reflector = Arc::new(ScriptedReflector::new(vec![ReflectionResult::new(
        ReflectionVerdict::Abort,
        "看起来没有意义",
    )]));
    let orch = builder(model.clone(), registry)
        .with_reflector(reflector)
        .build();

    let update = orch.invoke(vec![Message::human("翻两页交易")]).await.unwrap();
    assert_eq!(update.state, AgentState::Completed);
    assert_eq!(calls.lock().unwrap().len(), 2);
    assert_eq!(model.call_count(), 2);
    assert_eq!(update.messages.last().unwrap().text(), "两页都查完了");
}

#[tokio::test]
async fn image_turn_uses_multimodal_timeout() {
    let model = Arc::new(
        MockChatModel::new()
            .empty()
            .delayed(Duration::from_millis(200), "已按小票记账"),
    );
    let orch = builder(model.clone(), ToolRegistry::new())
        .with_settings(LoopSettings {
            model_timeout: Duration::from_millis(50),
            multimodal_timeout: Duration::from_secs(5),
            ..LoopSettings::default()
        })
        .build();

    let receipt = MessageContent::Parts(vec![
        ContentPart::Text { text: "记一下这张小票".into() },
        ContentPart::Image {
            url: "data:image/png;base64,AAA".into(),
            mime_type: Some("image/png".into()),
        },
    ]);
    let update = orch.invoke(vec![Message::human(receipt)]).await.unwrap();
    assert_eq!(update.state, AgentState::Completed);
    assert_eq!(update.messages.last().unwrap().text(), "已按小票记账");
    assert_eq!(model.call_count(), 2);
}
