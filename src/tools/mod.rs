//! 工具边界：注册表、执行器、权限闸门、工具名纠正

pub mod corrector;
pub mod executor;
pub mod permission;
pub mod registry;

pub use corrector::{ArgTransform, Correction, ToolAlias, ToolNameCorrector};
pub use executor::ToolExecutor;
pub use permission::{PermissionDecision, PermissionGate, PermissionTier, RateLimit};
pub use registry::{Tool, ToolRegistry};
