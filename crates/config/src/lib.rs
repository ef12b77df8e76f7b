//! twinguard-config - 配置加载库

pub mod resolver;

use std::collections::HashMap;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use secrecy::Secret;
use serde::Deserialize;
use thiserror::Error;
use twinguard_common::RetryConfig;

pub use resolver::{ConfigKey, ConfigResolver, StaticConfigResolver};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] figment::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// 数据库配置
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// 取连接的最长等待
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout_ms() -> u64 {
    5000
}

/// Redis 配置
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: Secret<String>,
}

/// 事件分发总线
#[derive(Debug, Clone, Deserialize)]
pub struct FabricConfig {
    /// `memory` 或 `redis`
    #[serde(default = "default_fabric_kind")]
    pub kind: String,
    #[serde(default = "default_policy_topic")]
    pub policy_topic: String,
    /// XREADGROUP 的 BLOCK 毫秒数
    #[serde(default = "default_block_ms")]
    pub block_ms: u64,
    /// 订阅者断开后的重订阅退避
    #[serde(default = "default_resubscribe")]
    pub resubscribe: RetryConfig,
}

fn default_fabric_kind() -> String {
    "memory".to_string()
}

fn default_policy_topic() -> String {
    "policy-events".to_string()
}

fn default_block_ms() -> u64 {
    5_000
}

fn default_resubscribe() -> RetryConfig {
    RetryConfig::unbounded(Duration::from_millis(200), Duration::from_secs(30))
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            kind: default_fabric_kind(),
            policy_topic: default_policy_topic(),
            block_ms: default_block_ms(),
            resubscribe: default_resubscribe(),
        }
    }
}

/// 单个缓存的配置
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,
    /// 必填且不能为 0
    pub ttl_secs: u64,
    pub tti_secs: Option<u64>,
    #[serde(default = "default_load_timeout_ms")]
    pub load_timeout_ms: u64,
}

fn default_max_capacity() -> u64 {
    10_000
}

fn default_load_timeout_ms() -> u64 {
    5_000
}

impl CacheSettings {
    pub fn time_to_live(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn time_to_idle(&self) -> Option<Duration> {
        self.tti_secs.map(Duration::from_secs)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_capacity: default_max_capacity(),
            ttl_secs: 300,
            tti_secs: None,
            load_timeout_ms: default_load_timeout_ms(),
        }
    }
}

/// 快照配置
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotConfig {
    /// 距离上次快照多少个事件后再写快照
    #[serde(default = "default_snapshot_interval")]
    pub interval: u64,
}

fn default_snapshot_interval() -> u64 {
    10
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            interval: default_snapshot_interval(),
        }
    }
}

/// 遥测配置
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Prometheus 导出端口，未配置时不启动导出
    pub metrics_port: Option<u16>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            metrics_port: None,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_name: String,
    #[serde(default = "default_app_env")]
    pub app_env: String,
    /// 集群内实例序号，决定失效订阅者的消费组
    #[serde(default)]
    pub instance_index: u32,
    pub database: Option<DatabaseConfig>,
    pub redis: Option<RedisConfig>,
    #[serde(default)]
    pub fabric: FabricConfig,
    /// 按缓存名称（`policy`、`enforcer`）分组
    #[serde(default)]
    pub caches: HashMap<String, CacheSettings>,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_app_env() -> String {
    "development".to_string()
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 覆盖顺序：`default.toml` < `<env>.toml` < `TWINGUARD_*` 环境变量（`__` 分隔层级，可来自 `.env`）
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        // .env 中的 TWINGUARD_* 变量与进程环境变量同等对待
        dotenvy::dotenv().ok();
        let env = std::env::var("TWINGUARD_APP_ENV").unwrap_or_else(|_| default_app_env());
        Self::from_figment(
            Figment::new()
                .merge(Toml::file(format!("{}/default.toml", config_dir)))
                .merge(Toml::file(format!("{}/{}.toml", config_dir, env)))
                .merge(Env::prefixed("TWINGUARD_").split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, cache) in &self.caches {
            if cache.ttl_secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "cache '{}' must have a non-zero ttl_secs",
                    name
                )));
            }
        }
        if self.snapshot.interval == 0 {
            return Err(ConfigError::Invalid(
                "snapshot.interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// 缓存配置，未配置时使用默认值
    pub fn cache(&self, name: &str) -> CacheSettings {
        self.caches.get(name).cloned().unwrap_or_default()
    }

    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }

    pub fn is_development(&self) -> bool {
        self.app_env == "development"
    }
}
