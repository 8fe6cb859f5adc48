//! 取消控制：协作式中止
//!
//! CancellationController 持有当前轮的 CancelToken；cancel(reason) 幂等，同步触发订阅回调与清理闭包；
//! reset() 丢弃旧 token 与订阅并签发新 token，同一控制器可服务下一轮。
//! CancelToken::run 让任意挂起点在取消触发的瞬间以 Cancelled 失败，即使底层操作尚未完成。

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;

/// 取消原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// 用户点击停止
    User,
    Timeout,
    /// 宿主界面卸载
    ComponentUnmounted,
    /// 被新一轮或 reset 取代
    Superseded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CancelReason::User => "user",
            CancelReason::Timeout => "timeout",
            CancelReason::ComponentUnmounted => "component_unmounted",
            CancelReason::Superseded => "superseded",
        };
        f.write_str(s)
    }
}

/// 单轮取消令牌：触发后不可逆，原因只写一次
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    pub fn reason(&self) -> Option<CancelReason> {
        self.reason.get().copied()
    }

    /// 挂起点前后调用：已取消则返回 Cancelled
    pub fn check(&self) -> Result<(), AgentError> {
        if self.is_cancelled() {
            Err(self.cancelled_error())
        } else {
            Ok(())
        }
    }

    pub async fn cancelled(&self) {
        self.inner.cancelled().await
    }

    /// 让 fut 与取消竞争：取消先到则丢弃 fut 的结果
    pub async fn run<F, T>(&self, fut: F) -> Result<T, AgentError>
    where
        F: Future<Output = T>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.inner.cancelled() => Err(self.cancelled_error()),
            out = fut => Ok(out),
        }
    }

    fn cancelled_error(&self) -> AgentError {
        AgentError::Cancelled(self.reason().unwrap_or(CancelReason::User))
    }

    /// 返回 true 表示本次调用真正触发了取消
    fn fire(&self, reason: CancelReason) -> bool {
        if self.reason.set(reason).is_err() {
            return false;
        }
        self.inner.cancel();
        true
    }
}

type CancelCallback = Box<dyn FnOnce(CancelReason) + Send>;
type Teardown = Box<dyn FnOnce() + Send>;

struct ControllerState {
    token: CancelToken,
    subscribers: Vec<CancelCallback>,
    teardowns: Vec<Teardown>,
}

impl ControllerState {
    fn fresh() -> Self {
        Self {
            token: CancelToken::new(),
            subscribers: Vec::new(),
            teardowns: Vec::new(),
        }
    }
}

/// 取消控制器：一个编排器实例一个，跨轮复用
pub struct CancellationController {
    state: Mutex<ControllerState>,
}

impl CancellationController {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ControllerState::fresh()),
        }
    }

    /// 当前 token 的克隆
    pub fn token(&self) -> CancelToken {
        crate::lock(&self.state).token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        crate::lock(&self.state).token.is_cancelled()
    }

    /// 订阅取消：触发时立即同步回调；已取消则立刻回调
    pub fn subscribe(&self, callback: impl FnOnce(CancelReason) + Send + 'static) {
        let mut state = crate::lock(&self.state);
        if let Some(reason) = state.token.reason() {
            drop(state);
            callback(reason);
            return;
        }
        state.subscribers.push(Box::new(callback));
    }

    /// 注册取消后执行的清理闭包（在订阅回调之后运行）
    pub fn on_teardown(&self, teardown: impl FnOnce() + Send + 'static) {
        crate::lock(&self.state).teardowns.push(Box::new(teardown));
    }

    /// 触发取消；重复调用为 no-op 并告警。返回是否真正触发
    pub fn cancel(&self, reason: CancelReason) -> bool {
        let (subscribers, teardowns) = {
            let mut state = crate::lock(&self.state);
            if !state.token.fire(reason) {
                tracing::warn!(
                    requested = %reason,
                    original = ?state.token.reason(),
                    "cancel called on an already cancelled token"
                );
                return false;
            }
            (
                std::mem::take(&mut state.subscribers),
                std::mem::take(&mut state.teardowns),
            )
        };
        tracing::info!(%reason, "cancellation fired");
        for callback in subscribers {
            callback(reason);
        }
        for teardown in teardowns {
            teardown();
        }
        true
    }

    /// 丢弃旧 token 与订阅，签发新 token
    pub fn reset(&self) {
        *crate::lock(&self.state) = ControllerState::fresh();
    }

    /// 新一轮开始：签发新 token，上一轮的订阅与清理闭包一并丢弃
    pub fn begin_turn(&self) -> CancelToken {
        let mut state = crate::lock(&self.state);
        *state = ControllerState::fresh();
        state.token.clone()
    }
}

impl Default for CancellationController {
    fn default() -> Self {
        Self::new()
    }
}
