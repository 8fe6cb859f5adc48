//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `LEDGER_AGENT__*` 覆盖
//! （双下划线表示嵌套，如 `LEDGER_AGENT__ORCHESTRATOR__MAX_ITERATIONS=5`）。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::tools::PermissionTier;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub orchestrator: OrchestratorSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub context: ContextSection,
    pub observability: ObservabilitySection,
}

/// [orchestrator] 段：循环上限与确认开关
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub max_iterations: usize,
    /// 连续空响应的容忍次数
    pub max_empty_responses: usize,
    /// 相同（名称, 参数）调用被拦截的次数上限
    pub max_repeated_calls: usize,
    /// 意图置信度达到该值才追加任务块
    pub intent_confidence_threshold: f32,
    /// 关闭后 Dangerous 工具也直接执行
    pub confirmation_enabled: bool,
    /// 覆盖默认的系统提示正文
    pub system_prompt: Option<String>,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_empty_responses: 3,
            max_repeated_calls: 3,
            intent_confidence_threshold: 0.6,
            confirmation_enabled: true,
            system_prompt: None,
        }
    }
}

/// [llm] 段：超时与重试
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub timeouts: LlmTimeoutsSection,
    pub retry: LlmRetrySection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub request_secs: u64,
    /// 最新用户消息含图片时的超时
    pub multimodal_secs: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request_secs: 60,
            multimodal_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmRetrySection {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_ms: u64,
}

impl Default for LlmRetrySection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 8000,
            backoff_multiplier: 2.0,
            jitter_ms: 250,
        }
    }
}

/// [tools] 段：工具超时、分级覆盖、限流
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    /// 工具名 -> read / write / dangerous，优先于工具自声明与名称推断
    pub tiers: HashMap<String, PermissionTier>,
    pub rate_limit: RateLimitSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            tiers: HashMap::new(),
            rate_limit: RateLimitSection::default(),
        }
    }
}

/// [tools.rate_limit] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub max_calls: usize,
    pub window_secs: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            max_calls: 20,
            window_secs: 60,
        }
    }
}

/// [context] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextSection {
    /// 发送给模型前的估算 token 上限
    pub token_budget: usize,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self { token_budget: 8000 }
    }
}

/// [observability] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilitySection {
    /// 最低日志级别：trace / debug / info / warn / error
    pub level: String,
}

impl Default for ObservabilitySection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 LEDGER_AGENT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 LEDGER_AGENT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, skipped");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("LEDGER_AGENT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
