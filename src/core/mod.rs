//! 核心编排层：状态机、取消、重试与超时、确认汇合点、错误与恢复、编排器

pub mod builder;
pub mod cancellation;
pub mod confirmation;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod retry;
pub mod state;

pub use builder::OrchestratorBuilder;
pub use cancellation::{CancelReason, CancelToken, CancellationController};
pub use confirmation::{
    ConfirmationDecision, ConfirmationKind, ConfirmationRequest, ConfirmationSlot,
    PendingConfirmation,
};
pub use error::{AgentError, RecoveryAction};
pub use orchestrator::{Orchestrator, TurnStream};
pub use recovery::RecoveryEngine;
pub use retry::{with_retry, with_timeout, RetryConfig};
pub use state::{AgentState, StateMachine};

pub use crate::react::TurnUpdate;
