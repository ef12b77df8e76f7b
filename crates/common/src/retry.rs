//! 重试与退避
//!
//! 基础设施连接和失效订阅者重启共用同一套指数退避配置

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use twinguard_errors::{AppError, AppResult};

/// 重试配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// 最大尝试次数（0 表示不限次数，仅用于长期运行的订阅者）
    pub max_attempts: u32,
    /// 初始延迟（毫秒）
    pub initial_delay_ms: u64,
    /// 最大延迟（毫秒）
    pub max_delay_ms: u64,
    /// 退避乘数
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: initial_delay.as_millis() as u64,
            max_delay_ms: max_delay.as_millis() as u64,
            multiplier: 2.0,
        }
    }

    /// 不限次数的退避，用于需要一直重连的后台任务
    pub fn unbounded(initial_delay: Duration, max_delay: Duration) -> Self {
        Self::new(0, initial_delay, max_delay)
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// 第 n 次失败后的等待时间（n 从 0 开始），不超过 `max_delay`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(63) as i32;
        let delay_ms = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = if delay_ms.is_finite() {
            (delay_ms as u64).min(self.max_delay_ms)
        } else {
            self.max_delay_ms
        };
        Duration::from_millis(capped)
    }

    /// 是否还允许下一次尝试
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt < self.max_attempts
    }
}

/// 退避状态
///
/// 订阅者每次失败调用 `next_delay`，成功订阅后调用 `reset`
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        Self { config, attempt: 0 }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// 返回下一次等待时间；超过最大次数时返回 None
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.config.allows_attempt(self.attempt + 1) {
            return None;
        }
        let delay = self.config.delay_for_attempt(self.attempt);
        self.attempt += 1;
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// 带重试执行异步操作，只重试 `AppError::is_retryable` 的错误
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut backoff = Backoff::new(config.clone());

    loop {
        let attempt = backoff.attempt() + 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        operation = operation_name,
                        attempt, "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if !e.is_retryable() => {
                warn!(
                    operation = operation_name,
                    attempt,
                    error = %e,
                    "Operation failed with non-retryable error"
                );
                return Err(e);
            }
            Err(e) => match backoff.next_delay() {
                Some(delay) => {
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts = config.max_attempts,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(
                        operation = operation_name,
                        attempt,
                        error = %e,
                        "Operation failed, no more retries"
                    );
                    return Err(e);
                }
            },
        }
    }
}

/// 把任意错误映射成可重试的外部服务错误，供连接建立时使用
pub fn external<E: std::fmt::Display>(service: &str) -> impl Fn(E) -> AppError + '_ {
    move |e| AppError::external_service(format!("{}: {}", service, e))
}
