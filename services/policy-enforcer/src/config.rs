//! 服务配置

use twinguard_cache_core::CacheConfig;
use twinguard_common::RetryConfig;
use twinguard_config::{AppConfig, CacheSettings};

use crate::infrastructure::cache::{ENFORCER_CACHE, POLICY_CACHE};

/// Policy Enforcer 服务配置，从 `AppConfig` 派生
#[derive(Debug, Clone)]
pub struct EnforcerServiceConfig {
    pub policy_cache: CacheConfig,
    pub enforcer_cache: CacheConfig,
    pub policy_topic: String,
    pub instance_index: u32,
    pub snapshot_interval: u64,
    pub resubscribe: RetryConfig,
}

impl EnforcerServiceConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            policy_cache: cache_config(POLICY_CACHE, &config.cache(POLICY_CACHE)),
            enforcer_cache: cache_config(ENFORCER_CACHE, &config.cache(ENFORCER_CACHE)),
            policy_topic: config.fabric.policy_topic.clone(),
            instance_index: config.instance_index,
            snapshot_interval: config.snapshot.interval,
            resubscribe: config.fabric.resubscribe.clone(),
        }
    }
}

pub fn cache_config(name: &str, settings: &CacheSettings) -> CacheConfig {
    let config = CacheConfig::new(name, settings.time_to_live())
        .with_max_capacity(settings.max_capacity)
        .with_load_timeout(settings.load_timeout());
    match settings.time_to_idle() {
        Some(tti) => config.with_time_to_idle(tti),
        None => config,
    }
}
