//! 权限闸门：工具分级、确认要求与简单限流
//!
//! 分级来源优先级：配置覆盖 > 工具自声明 > 名称推断。
//! Dangerous 工具（或意图风险为 High 的整轮）在确认模式开启且未预先批准时需要宿主确认。
//! 限流按工具名统计窗口内的调用次数，与循环里的重复调用检测相互独立。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::react::RiskLevel;

/// 权限等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionTier {
    Read,
    Write,
    Dangerous,
}

const DANGEROUS_PREFIXES: &[&str] = &["delete_", "remove_", "batch_", "clear_", "drop_", "purge_"];
const READ_PREFIXES: &[&str] = &["render_", "get_", "list_", "query_", "search_", "stat"];

impl PermissionTier {
    /// 按名称推断
    pub fn infer(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        if DANGEROUS_PREFIXES.iter().any(|p| name.starts_with(p)) {
            PermissionTier::Dangerous
        } else if READ_PREFIXES.iter().any(|p| name.starts_with(p)) {
            PermissionTier::Read
        } else {
            PermissionTier::Write
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PermissionDecision {
    Allow,
    RequireConfirmation { tier: PermissionTier, reason: String },
    RateLimited { retry_after: Duration },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimit {
    pub max_calls: usize,
    pub window: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            max_calls: 20,
            window: Duration::from_secs(60),
        }
    }
}

pub struct PermissionGate {
    confirmation_enabled: bool,
    overrides: HashMap<String, PermissionTier>,
    rate_limit: RateLimit,
    history: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl PermissionGate {
    pub fn new(confirmation_enabled: bool) -> Self {
        Self {
            confirmation_enabled,
            overrides: HashMap::new(),
            rate_limit: RateLimit::default(),
            history: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_overrides(mut self, overrides: HashMap<String, PermissionTier>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn confirmation_enabled(&self) -> bool {
        self.confirmation_enabled
    }

    pub fn classify(&self, name: &str, declared: Option<PermissionTier>) -> PermissionTier {
        self.overrides
            .get(name)
            .copied()
            .or(declared)
            .unwrap_or_else(|| PermissionTier::infer(name))
    }

    /// 决定本次调用能否立即执行
    pub fn check(
        &self,
        name: &str,
        declared: Option<PermissionTier>,
        intent_risk: Option<RiskLevel>,
        pre_approved: bool,
    ) -> PermissionDecision {
        if let Some(retry_after) = self.rate_limited(name) {
            tracing::warn!(tool = %name, retry_after_ms = retry_after.as_millis() as u64, "tool rate limited");
            return PermissionDecision::RateLimited { retry_after };
        }

        let tier = self.classify(name, declared);
        if !self.confirmation_enabled || pre_approved {
            return PermissionDecision::Allow;
        }
        if tier == PermissionTier::Dangerous {
            return PermissionDecision::RequireConfirmation {
                tier,
                reason: format!("{name} 属于高危操作，执行前需要确认"),
            };
        }
        if intent_risk == Some(RiskLevel::High) {
            return PermissionDecision::RequireConfirmation {
                tier,
                reason: format!("当前请求风险较高，执行 {name} 前需要确认"),
            };
        }
        PermissionDecision::Allow
    }

    /// 记录一次调用
    pub fn record(&self, name: &str) {
        let now = Instant::now();
        let mut history = crate::lock(&self.history);
        let stamps = history.entry(name.to_string()).or_default();
        prune(stamps, now, self.rate_limit.window);
        stamps.push_back(now);
    }

    pub fn clear_history(&self) {
        crate::lock(&self.history).clear();
    }

    fn rate_limited(&self, name: &str) -> Option<Duration> {
        if self.rate_limit.max_calls == 0 {
            return None;
        }
        let now = Instant::now();
        let mut history = crate::lock(&self.history);
        let stamps = history.get_mut(name)?;
        prune(stamps, now, self.rate_limit.window);
        if stamps.len() < self.rate_limit.max_calls {
            return None;
        }
        let oldest = *stamps.front()?;
        Some(self.rate_limit.window.saturating_sub(now.duration_since(oldest)))
    }
}

fn prune(stamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while stamps
        .front()
        .is_some_and(|t| now.duration_since(*t) >= window)
    {
        stamps.pop_front();
    }
}
