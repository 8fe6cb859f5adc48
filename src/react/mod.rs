//! 认知层：意图改写、计划、观察、反思、完成判定与编排主循环

pub mod completion;
pub mod events;
pub mod intent;
pub mod loop_;
pub mod observation;
pub mod planner;
pub mod prompt;
pub mod reflector;
pub mod turn;

pub use completion::{CompletionDecision, CompletionFacts};
pub use events::{AgentEvent, EventSender, StepEvent, StepKind};
pub use intent::{IntentRewriter, IntentType, RewrittenIntent, RiskLevel, RuleIntentRewriter};
pub use loop_::{LoopSettings, TurnSession, TurnUpdate, UpdateSender};
pub use observation::{ObservationLog, StepObservation};
pub use planner::{ExecutionPlan, PlanStep, StepStatus};
pub use prompt::SystemPrompt;
pub use reflector::{
    parse_reflection, ModelReflector, ReflectionContext, ReflectionResult, ReflectionVerdict,
    Reflector,
};
pub use turn::Turn;
