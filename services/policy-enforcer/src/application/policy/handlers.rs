//! 策略命令处理器
//!
//! 恢复当前状态，校验，构造事件，追加到事件日志，按需写快照，发布到总线，
//! 最后把新值放入本地缓存。追加之前取得缓存凭证，提交期间本地有过失效就不写入

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, warn};
use twinguard_common::Revision;
use twinguard_domain_core::AggregateRoot;
use twinguard_errors::{AppError, AppResult};
use twinguard_event_core::EventMetadata;
use twinguard_ports::{EventPublisher, publish_json};

use super::commands::*;
use crate::domain::policy::{Policy, PolicyEntry, PolicyEvent, PolicyEventKind, PolicyId};
use crate::error::PolicyError;
use crate::infrastructure::cache::PolicyCaches;
use crate::infrastructure::persistence::PolicyAggregateStore;

/// 策略命令处理器
pub struct PolicyCommandHandler {
    store: Arc<PolicyAggregateStore>,
    caches: PolicyCaches,
    publisher: Arc<dyn EventPublisher>,
    topic: String,
}

impl PolicyCommandHandler {
    pub fn new(
        store: Arc<PolicyAggregateStore>,
        caches: PolicyCaches,
        publisher: Arc<dyn EventPublisher>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            store,
            caches,
            publisher,
            topic: topic.into(),
        }
    }

    /// 创建策略
    pub async fn handle_create(&self, cmd: CreatePolicyCommand) -> AppResult<Policy> {
        let entries = cmd.entries;
        self.execute(
            &cmd.policy_id,
            cmd.expected_revision,
            cmd.metadata,
            |id, current| {
                if current.is_some_and(Policy::is_active) {
                    return Err(PolicyError::PolicyAlreadyExists(id.clone()));
                }
                validate_entries(&entries)?;
                Ok(PolicyEventKind::Created { entries })
            },
        )
        .await
    }

    /// 整体替换条目
    pub async fn handle_modify(&self, cmd: ModifyPolicyCommand) -> AppResult<Policy> {
        let entries = cmd.entries;
        self.execute(
            &cmd.policy_id,
            cmd.expected_revision,
            cmd.metadata,
            |id, current| {
                require_active(id, current)?;
                validate_entries(&entries)?;
                Ok(PolicyEventKind::Modified { entries })
            },
        )
        .await
    }

    /// 新增或替换单个条目
    pub async fn handle_modify_entry(&self, cmd: ModifyPolicyEntryCommand) -> AppResult<Policy> {
        let entry = cmd.entry;
        self.execute(
            &cmd.policy_id,
            cmd.expected_revision,
            cmd.metadata,
            |id, current| {
                require_active(id, current)?;
                entry.validate()?;
                Ok(PolicyEventKind::EntryModified { entry })
            },
        )
        .await
    }

    /// 删除条目
    pub async fn handle_delete_entry(&self, cmd: DeletePolicyEntryCommand) -> AppResult<Policy> {
        let label = cmd.label;
        self.execute(
            &cmd.policy_id,
            cmd.expected_revision,
            cmd.metadata,
            |id, current| {
                require_entry(id, require_active(id, current)?, &label)?;
                Ok(PolicyEventKind::EntryDeleted { label })
            },
        )
        .await
    }

    /// 修改条目主体
    pub async fn handle_modify_subjects(&self, cmd: ModifySubjectsCommand) -> AppResult<Policy> {
        let label = cmd.label;
        let subjects = cmd.subjects;
        self.execute(
            &cmd.policy_id,
            cmd.expected_revision,
            cmd.metadata,
            |id, current| {
                let entry = require_entry(id, require_active(id, current)?, &label)?;
                let candidate = PolicyEntry {
                    subjects: subjects.clone(),
                    ..entry.clone()
                };
                candidate.validate()?;
                Ok(PolicyEventKind::SubjectsModified { label, subjects })
            },
        )
        .await
    }

    /// 删除策略
    pub async fn handle_delete(&self, cmd: DeletePolicyCommand) -> AppResult<Policy> {
        self.execute(
            &cmd.policy_id,
            cmd.expected_revision,
            cmd.metadata,
            |id, current| {
                require_active(id, current)?;
                Ok(PolicyEventKind::Deleted)
            },
        )
        .await
    }

    async fn execute<F>(
        &self,
        policy_id: &str,
        expected_revision: Option<Revision>,
        metadata: EventMetadata,
        decide: F,
    ) -> AppResult<Policy>
    where
        F: FnOnce(&PolicyId, Option<&Policy>) -> Result<PolicyEventKind, PolicyError>,
    {
        let id = PolicyId::new(policy_id)?;
        let current = self.store.recover(&id).await?;
        let current_revision = current
            .as_ref()
            .map(|p| p.revision())
            .unwrap_or(Revision::ZERO);

        if let Some(expected) = expected_revision {
            if expected != current_revision {
                return Err(AppError::concurrent_modification(
                    id.entity_id().to_string(),
                    expected.value(),
                    current_revision.value(),
                ));
            }
        }

        let kind = decide(&id, current.as_ref())?;
        let event = PolicyEvent::new(id.as_str(), kind, current_revision.next().value(), metadata);
        let policy = Policy::apply(current, &id, &event)?;

        let ticket = self.caches.ticket();
        let revision = self.store.append(&event).await?;
        self.store.snapshot_if_due(&id).await?;

        if let Err(e) = publish_json(self.publisher.as_ref(), &self.topic, &event).await {
            // 事件已提交，其他实例依靠 TTL 收敛
            warn!(
                policy_id = %id,
                revision = %revision,
                error = %e,
                "Failed to publish policy event"
            );
        }

        let cached = self.caches.put_policy(ticket, &policy);
        info!(
            policy_id = %id,
            event_type = %event.event_type,
            revision = %revision,
            cached,
            "Policy command applied"
        );
        Ok(policy)
    }
}

fn require_active<'a>(id: &PolicyId, current: Option<&'a Policy>) -> Result<&'a Policy, PolicyError> {
    current
        .filter(|p| p.is_active())
        .ok_or_else(|| PolicyError::PolicyNotFound(id.clone()))
}

fn require_entry<'a>(
    id: &PolicyId,
    policy: &'a Policy,
    label: &str,
) -> Result<&'a PolicyEntry, PolicyError> {
    policy.entry(label).ok_or_else(|| PolicyError::EntryNotFound {
        policy_id: id.clone(),
        label: label.to_string(),
    })
}

fn validate_entries(entries: &[PolicyEntry]) -> Result<(), PolicyError> {
    let mut labels = BTreeSet::new();
    for entry in entries {
        entry.validate()?;
        if !labels.insert(entry.label.as_str()) {
            return Err(PolicyError::InvalidEntry(format!(
                "duplicate entry label '{}'",
                entry.label
            )));
        }
    }
    Ok(())
}
