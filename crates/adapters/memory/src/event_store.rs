//! 内存事件日志

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use twinguard_errors::{AppError, AppResult};
use twinguard_event_core::{EventStore, StoredEvent};

type StreamKey = (String, String);

/// 内存事件日志
///
/// 追加在写锁内完成版本检查，与 PostgreSQL 唯一约束的语义一致
#[derive(Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<StreamKey, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 所有聚合的事件总数（用于测试）
    pub async fn len(&self) -> usize {
        self.streams.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: StoredEvent) -> AppResult<u64> {
        let mut streams = self.streams.write().await;
        let stream = streams
            .entry((event.aggregate_type.clone(), event.aggregate_id.clone()))
            .or_default();

        let actual = stream.last().map(|e| e.version).unwrap_or(0);
        let expected = event.version.saturating_sub(1);
        if event.version == 0 || actual != expected {
            return Err(AppError::concurrent_modification(
                format!("{}:{}", event.aggregate_type, event.aggregate_id),
                expected,
                actual,
            ));
        }

        let version = event.version;
        tracing::debug!(
            aggregate_type = %event.aggregate_type,
            aggregate_id = %event.aggregate_id,
            version,
            "Event appended"
        );
        stream.push(event);
        Ok(version)
    }

    async fn get_events_from_version(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
        from_version: u64,
    ) -> AppResult<Vec<StoredEvent>> {
        let streams = self.streams.read().await;
        Ok(streams
            .get(&(aggregate_type.to_string(), aggregate_id.to_string()))
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.version >= from_version)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_current_version(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> AppResult<u64> {
        let streams = self.streams.read().await;
        Ok(streams
            .get(&(aggregate_type.to_string(), aggregate_id.to_string()))
            .and_then(|events| events.last())
            .map(|e| e.version)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn event(id: &str, version: u64) -> StoredEvent {
        StoredEvent {
            id: format!("evt-{}", version),
            aggregate_type: "policy".to_string(),
            aggregate_id: id.to_string(),
            event_type: "PolicyModified".to_string(),
            version,
            payload: "{}".to_string(),
            metadata: String::new(),
            occurred_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_append_checks_expected_version() {
        let store = InMemoryEventStore::new();
        assert_eq!(store.append(event("p1", 1)).await.unwrap(), 1);
        assert_eq!(store.append(event("p1", 2)).await.unwrap(), 2);

        let err = store.append(event("p1", 2)).await.unwrap_err();
        assert_eq!(err, AppError::concurrent_modification("policy:p1", 1, 2));

        let err = store.append(event("p2", 3)).await.unwrap_err();
        assert!(err.is_concurrent_modification());

        assert_eq!(store.get_current_version("policy", "p1").await.unwrap(), 2);
        assert_eq!(store.get_current_version("policy", "p2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_appends_with_same_expected_version() {
        let store = Arc::new(InMemoryEventStore::new());
        store.append(event("p1", 1)).await.unwrap();

        let a = tokio::spawn({
            let store = store.clone();
            async move { store.append(event("p1", 2)).await }
        });
        let b = tokio::spawn({
            let store = store.clone();
            async move { store.append(event("p1", 2)).await }
        });
        let results = [a.await.unwrap(), b.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(e) if e.is_concurrent_modification()))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_get_events_from_version() {
        let store = InMemoryEventStore::new();
        for v in 1..=4 {
            store.append(event("p1", v)).await.unwrap();
        }

        let tail = store
            .get_events_from_version("policy", "p1", 3)
            .await
            .unwrap();
        assert_eq!(tail.iter().map(|e| e.version).collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(store.get_events("policy", "p1").await.unwrap().len(), 4);
        assert_eq!(store.len().await, 4);
    }
}
