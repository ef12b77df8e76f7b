//! Event Store trait 定义

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use twinguard_errors::{AppError, AppResult};

/// 存储的事件记录
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub id: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub version: u64,
    pub payload: String,
    pub metadata: String,
    pub occurred_at: chrono::DateTime<chrono::Utc>,
}

/// Event Store trait
#[async_trait]
pub trait EventStore: Send + Sync {
    /// 追加事件
    ///
    /// 当前版本必须等于 `event.version - 1`，检查与写入是原子的；
    /// 不一致时返回 `AppError::ConcurrentModification`，成功时返回新版本
    async fn append(&self, event: StoredEvent) -> AppResult<u64>;

    /// 获取聚合从指定版本（含）开始的事件，按版本升序
    async fn get_events_from_version(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
        from_version: u64,
    ) -> AppResult<Vec<StoredEvent>>;

    /// 获取聚合的所有事件
    async fn get_events(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> AppResult<Vec<StoredEvent>> {
        self.get_events_from_version(aggregate_type, aggregate_id, 1)
            .await
    }

    /// 获取聚合的当前版本，从未写入时为 0
    async fn get_current_version(&self, aggregate_type: &str, aggregate_id: &str)
    -> AppResult<u64>;
}

/// 从存储的事件反序列化
pub fn deserialize_event<E: DeserializeOwned>(stored: &StoredEvent) -> AppResult<E> {
    serde_json::from_str(&stored.payload).map_err(|e| {
        AppError::internal(format!(
            "Failed to deserialize event {}@{}: {}",
            stored.aggregate_id, stored.version, e
        ))
    })
}
