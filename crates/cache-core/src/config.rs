//! 缓存配置

use std::time::Duration;

use twinguard_errors::{AppError, AppResult};

/// 缓存配置
///
/// TTL 必填：失效消息丢失时，过期是陈旧数据的唯一上界
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// 缓存名称，用于日志和指标标签
    pub name: String,
    pub max_capacity: u64,
    pub time_to_live: Duration,
    pub time_to_idle: Option<Duration>,
    /// `get` 的默认加载超时
    pub load_timeout: Duration,
}

impl CacheConfig {
    pub fn new(name: impl Into<String>, time_to_live: Duration) -> Self {
        Self {
            name: name.into(),
            max_capacity: 10_000,
            time_to_live,
            time_to_idle: None,
            load_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_max_capacity(mut self, max_capacity: u64) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    pub fn with_time_to_idle(mut self, time_to_idle: Duration) -> Self {
        self.time_to_idle = Some(time_to_idle);
        self
    }

    pub fn with_load_timeout(mut self, load_timeout: Duration) -> Self {
        self.load_timeout = load_timeout;
        self
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.name.is_empty() {
            return Err(AppError::validation("Cache name must not be empty"));
        }
        if self.time_to_live.is_zero() {
            return Err(AppError::validation(format!(
                "Cache '{}' requires a non-zero time_to_live",
                self.name
            )));
        }
        if self.load_timeout.is_zero() {
            return Err(AppError::validation(format!(
                "Cache '{}' requires a non-zero load_timeout",
                self.name
            )));
        }
        Ok(())
    }
}
