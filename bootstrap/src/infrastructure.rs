//! 基础设施资源管理
//!
//! 按配置选择事件日志、快照存储与事件总线的实现：
//! 配置了 `database` 使用 PostgreSQL，否则使用内存实现；
//! `fabric.kind = "redis"` 使用 Redis Streams，否则使用内存总线

use std::sync::Arc;

use secrecy::ExposeSecret;
use tracing::info;
use twinguard_adapter_memory::{InMemoryDocumentStore, InMemoryEventStore, InMemoryFabric};
use twinguard_adapter_postgres::{
    EventLogPoolSettings, PostgresDocumentStore, PostgresEventStore, open_event_log,
};
use twinguard_adapter_redis::{RedisStreamFabric, open_client};
use twinguard_common::{RetryConfig, with_retry};
use twinguard_config::AppConfig;
use twinguard_errors::{AppError, AppResult};
use twinguard_event_core::EventStore;
use twinguard_ports::{DocumentStore, EventPublisher, EventSubscriber};

/// 基础设施资源容器
pub struct Infrastructure {
    config: AppConfig,
    event_store: Arc<dyn EventStore>,
    document_store: Arc<dyn DocumentStore>,
    publisher: Arc<dyn EventPublisher>,
    subscriber: Arc<dyn EventSubscriber>,
}

impl Infrastructure {
    /// 从配置创建基础设施资源（连接带重试）
    pub async fn from_config(config: AppConfig) -> AppResult<Self> {
        let retry_config = RetryConfig::default();

        let (event_store, document_store): (Arc<dyn EventStore>, Arc<dyn DocumentStore>) =
            match &config.database {
                Some(database) => {
                    let settings = EventLogPoolSettings::new(database.url.clone())
                        .with_max_connections(database.max_connections)
                        .with_acquire_timeout(database.acquire_timeout());
                    let pool = with_retry(&retry_config, "PostgreSQL connection", || {
                        let settings = settings.clone();
                        async move { open_event_log(&settings).await }
                    })
                    .await?;
                    (
                        Arc::new(PostgresEventStore::new(pool.clone())),
                        Arc::new(PostgresDocumentStore::new(pool)),
                    )
                }
                None => {
                    info!("Database not configured, using in-memory event store");
                    (
                        Arc::new(InMemoryEventStore::new()),
                        Arc::new(InMemoryDocumentStore::new()),
                    )
                }
            };

        let (publisher, subscriber): (Arc<dyn EventPublisher>, Arc<dyn EventSubscriber>) =
            match config.fabric.kind.as_str() {
                "redis" => {
                    let redis = config.redis.as_ref().ok_or_else(|| {
                        AppError::validation("fabric.kind = \"redis\" requires a [redis] section")
                    })?;
                    let client = open_client(redis.url.expose_secret())?;
                    let fabric = with_retry(&retry_config, "Redis connection", || {
                        let client = client.clone();
                        async move { RedisStreamFabric::new(client).await }
                    })
                    .await?
                    .with_key_prefix(config.app_name.clone())
                    .with_block_ms(config.fabric.block_ms);
                    info!("Redis Streams fabric connected");
                    (Arc::new(fabric.clone()), Arc::new(fabric))
                }
                "memory" => {
                    info!("Using in-memory fabric");
                    let fabric = InMemoryFabric::new();
                    (Arc::new(fabric.clone()), Arc::new(fabric))
                }
                other => {
                    return Err(AppError::validation(format!(
                        "Unknown fabric kind '{}'",
                        other
                    )));
                }
            };

        Ok(Self {
            config,
            event_store,
            document_store,
            publisher,
            subscriber,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn event_store(&self) -> Arc<dyn EventStore> {
        self.event_store.clone()
    }

    pub fn document_store(&self) -> Arc<dyn DocumentStore> {
        self.document_store.clone()
    }

    pub fn publisher(&self) -> Arc<dyn EventPublisher> {
        self.publisher.clone()
    }

    pub fn subscriber(&self) -> Arc<dyn EventSubscriber> {
        self.subscriber.clone()
    }
}
