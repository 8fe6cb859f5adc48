//! 重试与超时
//!
//! with_timeout：让操作与计时器竞争，超时返回 AgentError::Timeout（底层操作被丢弃而非强制中止）。
//! with_retry：有界指数退避，delay = min(initial * multiplier^attempt + jitter, max)；
//! 不可重试的错误或预算耗尽时原样返回错误。on_retry 在等待前调用，可借此检查取消。

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::core::AgentError;

/// 退避配置
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// 抖动上限（均匀分布 [0, jitter]）
    pub jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(8000),
            backoff_multiplier: 2.0,
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryConfig {
    /// 第 attempt 次重试（从 0 开始）的等待时长
    pub fn delay_for_attempt(&self, attempt: u32, jitter: Duration) -> Duration {
        let base = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32);
        let total = base + jitter.as_millis() as f64;
        let capped = total.min(self.max_delay.as_millis() as f64).max(0.0);
        Duration::from_millis(capped.round() as u64)
    }

    fn sample_jitter(&self) -> Duration {
        let max = self.jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }
}

/// 超时保护：超时后丢弃 fut 的结果
pub async fn with_timeout<F, T>(fut: F, duration: Duration, message: &str) -> Result<T, AgentError>
where
    F: Future<Output = Result<T, AgentError>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(AgentError::Timeout {
            message: message.to_string(),
            after_ms: duration.as_millis() as u64,
        }),
    }
}

/// 有界指数退避重试
///
/// `on_retry(attempt, &error, next_delay)` 在每次等待前调用；返回 Err 则立即停止并返回该错误。
pub async fn with_retry<Op, Fut, T, P, R>(
    mut op: Op,
    config: &RetryConfig,
    is_retryable: P,
    mut on_retry: R,
) -> Result<T, AgentError>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AgentError>>,
    P: Fn(&AgentError) -> bool,
    R: FnMut(u32, &AgentError, Duration) -> Result<(), AgentError>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if err.is_cancelled() || !is_retryable(&err) || attempt >= config.max_retries {
                    return Err(err);
                }
                let delay = config.delay_for_attempt(attempt, config.sample_jitter());
                attempt += 1;
                on_retry(attempt, &err, delay)?;
                tokio::time::sleep(delay).await;
            }
        }
    }
}
