//! 编排器构建器：配置 -> 组件
//!
//! 宿主提供模型与工具注册表，其余组件（循环参数、重试、超时、权限闸门、上下文裁剪、系统提示）
//! 由 AppConfig 推导；意图改写器、反思器与事件通道按需挂上。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::core::orchestrator::Components;
use crate::core::{Orchestrator, RecoveryEngine, RetryConfig};
use crate::llm::ChatModel;
use crate::memory::ContextTrimmer;
use crate::react::{EventSender, IntentRewriter, LoopSettings, Reflector, SystemPrompt};
use crate::tools::{PermissionGate, PermissionTier, RateLimit, ToolExecutor, ToolRegistry};

pub struct OrchestratorBuilder {
    model: Arc<dyn ChatModel>,
    registry: ToolRegistry,
    settings: LoopSettings,
    retry: RetryConfig,
    tool_timeout: Duration,
    token_budget: usize,
    confirmation_enabled: bool,
    tier_overrides: HashMap<String, PermissionTier>,
    rate_limit: RateLimit,
    base_prompt: Option<String>,
    intent_rewriter: Option<Arc<dyn IntentRewriter>>,
    reflector: Option<Arc<dyn Reflector>>,
    event_tx: Option<EventSender>,
}

impl OrchestratorBuilder {
    /// 使用默认配置创建
    pub fn new(model: Arc<dyn ChatModel>, registry: ToolRegistry) -> Self {
        Self {
            model,
            registry,
            settings: LoopSettings::default(),
            retry: RetryConfig::default(),
            tool_timeout: Duration::from_secs(30),
            token_budget: 8000,
            confirmation_enabled: true,
            tier_overrides: HashMap::new(),
            rate_limit: RateLimit::default(),
            base_prompt: None,
            intent_rewriter: None,
            reflector: None,
            event_tx: None,
        }
    }

    /// 从配置推导循环参数、重试、超时、闸门与裁剪预算
    pub fn with_config(mut self, cfg: &AppConfig) -> Self {
        let orch = &cfg.orchestrator;
        self.settings = LoopSettings {
            max_iterations: orch.max_iterations,
            max_empty_responses: orch.max_empty_responses,
            max_repeated_calls: orch.max_repeated_calls,
            intent_confidence_threshold: orch.intent_confidence_threshold,
            model_timeout: Duration::from_secs(cfg.llm.timeouts.request_secs),
            multimodal_timeout: Duration::from_secs(cfg.llm.timeouts.multimodal_secs),
        };
        let retry = &cfg.llm.retry;
        self.retry = RetryConfig {
            max_retries: retry.max_retries,
            initial_delay: Duration::from_millis(retry.initial_delay_ms),
            max_delay: Duration::from_millis(retry.max_delay_ms),
            backoff_multiplier: retry.backoff_multiplier,
            jitter: Duration::from_millis(retry.jitter_ms),
        };
        self.tool_timeout = Duration::from_secs(cfg.tools.tool_timeout_secs);
        self.token_budget = cfg.context.token_budget;
        self.confirmation_enabled = orch.confirmation_enabled;
        self.tier_overrides = cfg.tools.tiers.clone();
        self.rate_limit = RateLimit {
            max_calls: cfg.tools.rate_limit.max_calls,
            window: Duration::from_secs(cfg.tools.rate_limit.window_secs),
        };
        if let Some(prompt) = &orch.system_prompt {
            self.base_prompt = Some(prompt.clone());
        }
        self
    }

    pub fn with_settings(mut self, settings: LoopSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_token_budget(mut self, budget: usize) -> Self {
        self.token_budget = budget;
        self
    }

    pub fn with_confirmation(mut self, enabled: bool) -> Self {
        self.confirmation_enabled = enabled;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_system_prompt(mut self, base: impl Into<String>) -> Self {
        self.base_prompt = Some(base.into());
        self
    }

    pub fn with_intent_rewriter(mut self, rewriter: Arc<dyn IntentRewriter>) -> Self {
        self.intent_rewriter = Some(rewriter);
        self
    }

    pub fn with_reflector(mut self, reflector: Arc<dyn Reflector>) -> Self {
        self.reflector = Some(reflector);
        self
    }

    pub fn with_events(mut self, tx: EventSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn build(self) -> Orchestrator {
        let prompt = match self.base_prompt {
            Some(base) => SystemPrompt::new(base),
            None => SystemPrompt::default(),
        }
        .with_tools(self.registry.tool_descriptions())
        .with_render_tools(self.registry.render_tool_names());

        let gate = PermissionGate::new(self.confirmation_enabled)
            .with_overrides(self.tier_overrides)
            .with_rate_limit(self.rate_limit);

        Orchestrator::from_components(Components {
            model: self.model,
            executor: ToolExecutor::new(Arc::new(self.registry), self.tool_timeout),
            gate,
            recovery: RecoveryEngine::new(),
            trimmer: ContextTrimmer::new(self.token_budget),
            prompt,
            retry: self.retry,
            settings: self.settings,
            intent_rewriter: self.intent_rewriter,
            reflector: self.reflector,
            event_tx: self.event_tx,
        })
    }
}
