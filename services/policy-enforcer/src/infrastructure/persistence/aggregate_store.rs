//! 策略聚合存储
//!
//! 事件日志是唯一的事实来源；快照只是加速恢复的缓存，损坏时退回全量重放

use std::sync::Arc;

use tracing::{debug, info, warn};
use twinguard_common::Revision;
use twinguard_domain_core::{AggregateRoot, Entity};
use twinguard_errors::AppResult;
use twinguard_event_core::EventStore;
use twinguard_ports::DocumentStore;

use crate::domain::policy::{
    POLICY_RESOURCE_TYPE, Policy, PolicyEvent, PolicyId, PolicySnapshotAdapter,
};

pub struct PolicyAggregateStore {
    events: Arc<dyn EventStore>,
    snapshots: Arc<dyn DocumentStore>,
    codec: PolicySnapshotAdapter,
    /// 距上次快照多少个事件后写新快照，0 表示不写快照
    snapshot_interval: u64,
}

impl PolicyAggregateStore {
    pub fn new(
        events: Arc<dyn EventStore>,
        snapshots: Arc<dyn DocumentStore>,
        snapshot_interval: u64,
    ) -> Self {
        Self {
            events,
            snapshots,
            codec: PolicySnapshotAdapter::new(),
            snapshot_interval,
        }
    }

    fn snapshot_key(id: &PolicyId) -> String {
        id.entity_id().to_string()
    }

    /// 追加事件，返回新的修订号
    ///
    /// 期望修订号是 `event.version - 1`，不一致时返回 `ConcurrentModification`
    pub async fn append(&self, event: &PolicyEvent) -> AppResult<Revision> {
        let stored = event.to_stored()?;
        let version = self.events.append(stored).await?;

        debug!(
            policy_id = %event.aggregate_id,
            event_type = %event.event_type,
            revision = version,
            "Policy event committed"
        );
        Ok(Revision::new(version))
    }

    /// 当前策略，已删除或从未创建时为 None
    pub async fn load_current(&self, id: &PolicyId) -> AppResult<Option<Policy>> {
        Ok(self.recover(id).await?.filter(Policy::is_active))
    }

    /// 最新快照加上之后的事件，已删除的策略也会返回
    pub async fn recover(&self, id: &PolicyId) -> AppResult<Option<Policy>> {
        let snapshot = self.load_snapshot(id).await?;
        let from_version = snapshot
            .as_ref()
            .map(|p| p.revision().next().value())
            .unwrap_or(1);

        let stored = self
            .events
            .get_events_from_version(POLICY_RESOURCE_TYPE, id.as_str(), from_version)
            .await?;
        let events = stored
            .iter()
            .map(PolicyEvent::from_stored)
            .collect::<AppResult<Vec<_>>>()?;

        debug!(
            policy_id = %id,
            from_version,
            replayed = events.len(),
            "Recovering policy"
        );
        Policy::replay(snapshot, id, events.iter())
    }

    pub async fn current_revision(&self, id: &PolicyId) -> AppResult<Revision> {
        let version = self
            .events
            .get_current_version(POLICY_RESOURCE_TYPE, id.as_str())
            .await?;
        Ok(Revision::new(version))
    }

    /// 距上次快照足够多事件时写入快照，失败只记录日志
    pub async fn snapshot_if_due(&self, id: &PolicyId) -> AppResult<bool> {
        match self.try_snapshot(id).await {
            Ok(written) => Ok(written),
            Err(e) => {
                warn!(policy_id = %id, error = %e, "Failed to write policy snapshot");
                Ok(false)
            }
        }
    }

    async fn try_snapshot(&self, id: &PolicyId) -> AppResult<bool> {
        if self.snapshot_interval == 0 {
            return Ok(false);
        }

        let last = self
            .load_snapshot(id)
            .await?
            .map(|p| p.revision())
            .unwrap_or(Revision::ZERO);
        let Some(policy) = self.recover(id).await? else {
            return Ok(false);
        };
        if policy.revision().value() < last.value() + self.snapshot_interval {
            return Ok(false);
        }

        self.snapshots
            .save(&Self::snapshot_key(id), self.codec.serialize(&policy))
            .await?;
        info!(policy_id = %id, revision = %policy.revision(), "Policy snapshot written");
        Ok(true)
    }

    /// 读取并解码快照，损坏的快照视为不存在
    async fn load_snapshot(&self, id: &PolicyId) -> AppResult<Option<Policy>> {
        let Some(document) = self.snapshots.load(&Self::snapshot_key(id)).await? else {
            return Ok(None);
        };

        match self.codec.deserialize(&document) {
            Ok(policy) if policy.id() == id => Ok(Some(policy)),
            Ok(policy) => {
                warn!(
                    policy_id = %id,
                    snapshot_policy_id = %policy.id(),
                    "Snapshot belongs to another policy, replaying full log"
                );
                Ok(None)
            }
            Err(e) => {
                warn!(policy_id = %id, error = %e, "Malformed snapshot, replaying full log");
                Ok(None)
            }
        }
    }
}
