//! 编排器：宿主控制面
//!
//! 一个 Orchestrator 对应一段对话。同一时刻最多一轮在执行：进行中再次调用返回 Busy，
//! 处于 Error 时必须先 reset。stream() 在 tokio 上派生任务并返回快照流；invoke() 在调用方任务上执行。
//! 所有日志都挂在实例自己的 span 下（orchestrator{id=...}）。

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::Stream;
use tokio::sync::{mpsc, watch};
use tracing::Instrument;

use crate::core::{
    AgentError, AgentState, CancelReason, CancelToken, CancellationController, ConfirmationRequest,
    ConfirmationSlot, RecoveryEngine, RetryConfig, StateMachine,
};
use crate::llm::ChatModel;
use crate::memory::{ContextTrimmer, Message};
use crate::react::{
    EventSender, ExecutionPlan, IntentRewriter, LoopSettings, Reflector, SystemPrompt,
    TurnSession, TurnUpdate, UpdateSender,
};
use crate::tools::{PermissionGate, ToolExecutor};

/// 一轮的快照流；最后一项为终态
pub type TurnStream = Pin<Box<dyn Stream<Item = TurnUpdate> + Send>>;

/// 编排器持有的协作者（由 OrchestratorBuilder 组装）
pub(crate) struct Components {
    pub(crate) model: Arc<dyn ChatModel>,
    pub(crate) executor: ToolExecutor,
    pub(crate) gate: PermissionGate,
    pub(crate) recovery: RecoveryEngine,
    pub(crate) trimmer: ContextTrimmer,
    pub(crate) prompt: SystemPrompt,
    pub(crate) retry: RetryConfig,
    pub(crate) settings: LoopSettings,
    pub(crate) intent_rewriter: Option<Arc<dyn IntentRewriter>>,
    pub(crate) reflector: Option<Arc<dyn Reflector>>,
    pub(crate) event_tx: Option<EventSender>,
}

struct Inner {
    parts: Components,
    state: StateMachine,
    confirmations: Arc<ConfirmationSlot>,
    cancellation: CancellationController,
    /// 正在执行的轮次 id
    active: Mutex<Option<u64>>,
    next_turn: AtomicU64,
    span: tracing::Span,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub(crate) fn from_components(parts: Components) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let span = tracing::info_span!("orchestrator", id = %id);
        span.in_scope(|| {
            tracing::info!(
                model = parts.model.name(),
                tools = parts.executor.registry().tool_names().len(),
                max_iterations = parts.settings.max_iterations,
                "orchestrator created"
            )
        });
        Self {
            inner: Arc::new(Inner {
                parts,
                state: StateMachine::new(),
                confirmations: Arc::new(ConfirmationSlot::new()),
                cancellation: CancellationController::new(),
                active: Mutex::new(None),
                next_turn: AtomicU64::new(0),
                span,
            }),
        }
    }

    /// 派生一轮并返回其快照流
    pub fn stream(&self, messages: Vec<Message>) -> Result<TurnStream, AgentError> {
        let ticket = self.begin()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let span = self.inner.span.clone();
        tokio::spawn(
            async move {
                ticket.run(messages, Some(tx)).await;
            }
            .instrument(span),
        );
        Ok(Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|update| (update, rx))
        })))
    }

    /// 在当前任务上执行一轮，返回终态快照
    pub async fn invoke(&self, messages: Vec<Message>) -> Result<TurnUpdate, AgentError> {
        let ticket = self.begin()?;
        let span = self.inner.span.clone();
        Ok(ticket.run(messages, None).instrument(span).await)
    }

    /// 确认挂起的请求；没有挂起请求时返回 false
    pub fn confirm(&self) -> bool {
        let _enter = self.inner.span.enter();
        let resolved = self.inner.confirmations.confirm();
        if !resolved {
            tracing::debug!("confirm called with nothing pending");
        }
        resolved
    }

    pub fn reject(&self, reason: impl Into<String>) -> bool {
        let _enter = self.inner.span.enter();
        let resolved = self.inner.confirmations.reject(reason);
        if !resolved {
            tracing::debug!("reject called with nothing pending");
        }
        resolved
    }

    /// 取消进行中的一轮；没有进行中的轮次或已取消时返回 false
    pub fn cancel(&self, reason: CancelReason) -> bool {
        let _enter = self.inner.span.enter();
        if crate::lock(&self.inner.active).is_none() {
            tracing::debug!(%reason, "cancel called with no active turn");
            return false;
        }
        self.inner.cancellation.cancel(reason)
    }

    /// 回到全新实例的状态：取代进行中的一轮、清空确认槽与限流历史、重置反思器
    pub fn reset(&self) {
        let inner = &self.inner;
        let _enter = inner.span.enter();
        let had_turn = crate::lock(&inner.active).take().is_some();
        inner.state.reset();
        if had_turn {
            inner.cancellation.cancel(CancelReason::Superseded);
        }
        inner.cancellation.reset();
        inner.confirmations.clear();
        inner.parts.gate.clear_history();
        if let Some(reflector) = &inner.parts.reflector {
            reflector.reset();
        }
        tracing::info!(superseded = had_turn, "orchestrator reset");
    }

    pub fn state(&self) -> AgentState {
        self.inner.state.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<AgentState> {
        self.inner.state.subscribe()
    }

    pub fn plan(&self) -> Option<ExecutionPlan> {
        self.inner.state.plan()
    }

    pub fn is_awaiting_confirmation(&self) -> bool {
        self.inner.confirmations.is_pending()
    }

    pub fn pending_confirmation(&self) -> Option<ConfirmationRequest> {
        self.inner.confirmations.current()
    }

    /// 占用本轮：检查忙碌与 Error 状态，签发新的取消 token
    fn begin(&self) -> Result<TurnTicket, AgentError> {
        let inner = &self.inner;
        let id = {
            let mut active = crate::lock(&inner.active);
            if active.is_some() {
                return Err(AgentError::Busy);
            }
            match inner.state.state() {
                AgentState::Idle => {}
                AgentState::Error => {
                    return Err(AgentError::InvalidState(
                        "previous turn failed, call reset() first".to_string(),
                    ))
                }
                other => {
                    return Err(AgentError::InvalidState(format!(
                        "cannot start a turn while {other}"
                    )))
                }
            }
            let id = inner.next_turn.fetch_add(1, Ordering::SeqCst) + 1;
            *active = Some(id);
            id
        };

        let token = inner.cancellation.begin_turn();
        let span = inner.span.clone();
        inner.cancellation.subscribe(move |reason| {
            span.in_scope(|| tracing::info!(turn = id, %reason, "turn cancellation requested"));
        });
        let slot = Arc::clone(&inner.confirmations);
        inner.cancellation.on_teardown(move || slot.clear());

        Ok(TurnTicket {
            inner: Arc::clone(inner),
            id,
            token,
            epoch: inner.state.epoch(),
        })
    }
}

/// 一轮的占用凭据；drop 时释放（reset 之后的旧凭据不会清掉新一轮的占用）
struct TurnTicket {
    inner: Arc<Inner>,
    id: u64,
    token: CancelToken,
    epoch: u64,
}

impl TurnTicket {
    async fn run(self, messages: Vec<Message>, update_tx: Option<UpdateSender>) -> TurnUpdate {
        let update = {
            let inner = &self.inner;
            let parts = &inner.parts;
            let session = TurnSession {
                model: parts.model.as_ref(),
                executor: &parts.executor,
                gate: &parts.gate,
                recovery: &parts.recovery,
                state: &inner.state,
                confirmations: inner.confirmations.as_ref(),
                trimmer: &parts.trimmer,
                prompt: &parts.prompt,
                retry: &parts.retry,
                settings: &parts.settings,
                cancel: self.token.clone(),
                epoch: self.epoch,
                intent_rewriter: parts.intent_rewriter.as_deref(),
                reflector: parts.reflector.as_deref(),
                event_tx: parts.event_tx.as_ref(),
                update_tx: update_tx.as_ref(),
            };
            session.run(messages).await
        };

        let stale = self.inner.state.epoch() != self.epoch;
        drop(self);
        if !stale {
            if let Some(tx) = &update_tx {
                let _ = tx.send(update.clone());
            }
        }
        update
    }
}

impl Drop for TurnTicket {
    fn drop(&mut self) {
        let mut active = crate::lock(&self.inner.active);
        if *active == Some(self.id) {
            *active = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::OrchestratorBuilder;
    use crate::llm::MockChatModel;
    use crate::tools::ToolRegistry;
    use futures_util::StreamExt;
    use std::time::Duration;

    fn orchestrator(model: MockChatModel) -> Orchestrator {
        OrchestratorBuilder::new(Arc::new(model), ToolRegistry::new()).build()
    }

    #[tokio::test]
    async fn test_invoke_plain_reply() {
        let orch = orchestrator(MockChatModel::new().text("你好，有什么可以帮你？"));
        let update = orch.invoke(vec![Message::human("你好")]).await.unwrap();
        assert_eq!(update.state, AgentState::Completed);
        assert!(update.error.is_none());
        assert_eq!(update.messages.last().unwrap().text(), "你好，有什么可以帮你？");
        assert_eq!(orch.state(), AgentState::Idle);
    }

    #[tokio::test]
    async fn test_stream_ends_with_terminal_update() {
        let orch = orchestrator(MockChatModel::new().text("ok"));
        let updates: Vec<TurnUpdate> = orch
            .stream(vec![Message::human("hi")])
            .unwrap()
            .collect()
            .await;
        assert!(updates.len() >= 2);
        assert_eq!(updates.last().unwrap().state, AgentState::Completed);
    }

    #[tokio::test]
    async fn test_second_turn_while_running_is_busy() {
        let orch = orchestrator(MockChatModel::new().delayed(Duration::from_secs(5), "slow"));
        let _stream = orch.stream(vec![Message::human("hi")]).unwrap();
        assert!(matches!(
            orch.invoke(vec![Message::human("again")]).await,
            Err(AgentError::Busy)
        ));
        orch.reset();
    }

    #[tokio::test]
    async fn test_cancel_without_turn_is_noop() {
        let orch = orchestrator(MockChatModel::new());
        assert!(!orch.cancel(CancelReason::User));
        assert!(!orch.confirm());
        assert!(!orch.reject("no"));
    }
}
