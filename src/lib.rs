//! ledger-agent - 记账智能体编排核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 状态机、取消、重试与超时、确认汇合点、错误恢复、编排器与构建器
//! - **llm**: 模型抽象与 Mock 实现
//! - **memory**: 消息模型与上下文裁剪
//! - **observability**: tracing 订阅者初始化
//! - **react**: 意图改写、计划、观察、反思、完成判定与主循环
//! - **tools**: 工具注册表、执行器、权限闸门、工具名纠正

use std::sync::{Mutex, MutexGuard};

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use crate::config::{load_config, AppConfig};
pub use crate::core::{
    AgentError, AgentState, CancelReason, ConfirmationRequest, Orchestrator, OrchestratorBuilder,
    TurnStream, TurnUpdate,
};
pub use crate::llm::{ChatModel, MockChatModel};
pub use crate::memory::{Message, ToolCall};
pub use crate::react::{AgentEvent, IntentRewriter, Reflector};
pub use crate::tools::{Tool, ToolRegistry};

/// 加锁；持锁线程 panic 后仍取回数据
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
