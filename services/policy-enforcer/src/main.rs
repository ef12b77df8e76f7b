//! Policy Enforcer Service - 策略执行服务入口
//!
//! 装配聚合存储、派生缓存和失效订阅者，运行到收到关闭信号

use std::sync::Arc;

use policy_enforcer::config::EnforcerServiceConfig;
use policy_enforcer::infrastructure::cache::PolicyCaches;
use policy_enforcer::infrastructure::events::PolicyCacheUpdater;
use policy_enforcer::infrastructure::persistence::PolicyAggregateStore;
use tracing::info;
use twinguard_bootstrap::{
    Infrastructure, RuntimeConfig, ShutdownController, init_runtime, shutdown_signal,
};
use twinguard_config::AppConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let runtime = RuntimeConfig::default();
    let config = AppConfig::load(&runtime.config_dir)?;
    init_runtime(&config)?;

    let settings = EnforcerServiceConfig::from_app_config(&config);
    let infra = Infrastructure::from_config(config).await?;

    let store = Arc::new(PolicyAggregateStore::new(
        infra.event_store(),
        infra.document_store(),
        settings.snapshot_interval,
    ));
    let caches = PolicyCaches::new(
        store,
        settings.policy_cache.clone(),
        settings.enforcer_cache.clone(),
    )?;
    let shutdown = ShutdownController::new();
    let updater = Arc::new(PolicyCacheUpdater::new(
        caches,
        infra.subscriber(),
        settings.policy_topic.clone(),
        settings.instance_index,
    ));
    let handle = updater.spawn_supervised(shutdown.clone(), settings.resubscribe.clone());

    info!(
        instance_index = settings.instance_index,
        topic = %settings.policy_topic,
        "Policy enforcer started"
    );

    shutdown_signal().await;
    shutdown.shutdown();
    handle.await?;

    info!("Policy enforcer stopped");
    Ok(())
}
