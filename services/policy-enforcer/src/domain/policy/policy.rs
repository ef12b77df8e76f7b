//! 策略聚合

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use twinguard_common::{EntityId, Revision};
use twinguard_domain_core::{AggregateRoot, Entity};
use twinguard_errors::AppResult;
use twinguard_event_core::EventEnvelope;

use super::events::PolicyEventKind;
use crate::error::PolicyError;

/// 策略在 EntityId 中的资源类型
pub const POLICY_RESOURCE_TYPE: &str = "policy";

/// 策略 ID（`namespace:name`）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PolicyId(EntityId);

impl PolicyId {
    pub fn new(id: impl Into<String>) -> Result<Self, PolicyError> {
        let id = id.into();
        if id.chars().any(char::is_whitespace) {
            return Err(PolicyError::InvalidPolicyId(id));
        }
        EntityId::new(POLICY_RESOURCE_TYPE, id.clone())
            .map(Self)
            .map_err(|_| PolicyError::InvalidPolicyId(id))
    }

    /// 从缓存键还原，资源类型必须是 `policy`
    pub fn from_entity_id(entity_id: &EntityId) -> Result<Self, PolicyError> {
        if entity_id.resource_type() != POLICY_RESOURCE_TYPE {
            return Err(PolicyError::InvalidPolicyId(entity_id.to_string()));
        }
        Ok(Self(entity_id.clone()))
    }

    pub fn as_str(&self) -> &str {
        self.0.identifier()
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.0
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for PolicyId {
    type Error = PolicyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PolicyId> for String {
    fn from(id: PolicyId) -> Self {
        id.as_str().to_string()
    }
}

/// 生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Lifecycle {
    Active,
    Deleted,
}

/// 某个资源上授予与撤销的权限
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePermissions {
    #[serde(default)]
    pub grant: BTreeSet<String>,
    #[serde(default)]
    pub revoke: BTreeSet<String>,
}

impl ResourcePermissions {
    pub fn grant<I, S>(permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            grant: permissions.into_iter().map(Into::into).collect(),
            revoke: BTreeSet::new(),
        }
    }

    pub fn revoke<I, S>(permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            grant: BTreeSet::new(),
            revoke: permissions.into_iter().map(Into::into).collect(),
        }
    }
}

/// 策略条目
///
/// 主体模式如 `user:alice`、`role:admin`、`user:*`；
/// 资源为 `thing:/features` 这样的路径，覆盖其下所有子路径
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEntry {
    pub label: String,
    pub subjects: BTreeSet<String>,
    pub resources: BTreeMap<String, ResourcePermissions>,
}

impl PolicyEntry {
    pub fn new<I, S>(label: impl Into<String>, subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            label: label.into(),
            subjects: subjects.into_iter().map(Into::into).collect(),
            resources: BTreeMap::new(),
        }
    }

    pub fn with_resource(
        mut self,
        resource: impl Into<String>,
        permissions: ResourcePermissions,
    ) -> Self {
        self.resources.insert(resource.into(), permissions);
        self
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.label.trim().is_empty() {
            return Err(PolicyError::InvalidEntry("label must not be empty".to_string()));
        }
        if self.subjects.iter().any(|s| s.trim().is_empty()) {
            return Err(PolicyError::InvalidEntry(format!(
                "entry '{}' contains an empty subject",
                self.label
            )));
        }
        if self.resources.keys().any(|r| r.trim().is_empty()) {
            return Err(PolicyError::InvalidEntry(format!(
                "entry '{}' contains an empty resource",
                self.label
            )));
        }
        Ok(())
    }

    /// 检查主体是否匹配
    pub fn matches_subject(&self, subject: &str) -> bool {
        self.subjects
            .iter()
            .any(|s| s == subject || s == "*" || wildcard_match(s, subject))
    }
}

/// 通配符匹配 (支持 * 作为后缀)
pub(crate) fn wildcard_match(pattern: &str, value: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix('*') {
        value.starts_with(prefix)
    } else {
        pattern == value
    }
}

/// 策略
///
/// 不可变值：任何修改都通过事件产生新的修订号。删除后保留最后的修订号，
/// 负缓存条目因此能记录检查时的修订号
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    id: PolicyId,
    revision: Revision,
    lifecycle: Lifecycle,
    entries: BTreeMap<String, PolicyEntry>,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
}

impl Policy {
    pub fn new(
        id: PolicyId,
        revision: Revision,
        lifecycle: Lifecycle,
        entries: impl IntoIterator<Item = PolicyEntry>,
        created: DateTime<Utc>,
        modified: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            revision,
            lifecycle,
            entries: entries.into_iter().map(|e| (e.label.clone(), e)).collect(),
            created,
            modified,
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle == Lifecycle::Active
    }

    pub fn entries(&self) -> impl Iterator<Item = &PolicyEntry> {
        self.entries.values()
    }

    pub fn entry(&self, label: &str) -> Option<&PolicyEntry> {
        self.entries.get(label)
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    fn invalid_transition(
        id: &PolicyId,
        event: &EventEnvelope<PolicyEventKind>,
        revision: Revision,
    ) -> PolicyError {
        PolicyError::InvalidTransition {
            policy_id: id.clone(),
            event_type: event.event_type.clone(),
            revision,
        }
    }
}

impl Entity for Policy {
    type Id = PolicyId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl AggregateRoot for Policy {
    type Event = PolicyEventKind;

    const AGGREGATE_TYPE: &'static str = POLICY_RESOURCE_TYPE;

    fn revision(&self) -> Revision {
        self.revision
    }

    fn apply(
        state: Option<Self>,
        id: &PolicyId,
        event: &EventEnvelope<PolicyEventKind>,
    ) -> AppResult<Self> {
        let revision = Revision::new(event.version);
        let at = event.occurred_at;

        let policy = match (state, &event.data) {
            // 删除后允许重新创建
            (None, PolicyEventKind::Created { entries }) => {
                Policy::new(id.clone(), revision, Lifecycle::Active, entries.clone(), at, at)
            }
            (Some(previous), PolicyEventKind::Created { entries }) if !previous.is_active() => {
                Policy::new(id.clone(), revision, Lifecycle::Active, entries.clone(), at, at)
            }
            (Some(mut policy), kind) if policy.is_active() => {
                match kind {
                    PolicyEventKind::Created { .. } => {
                        return Err(Self::invalid_transition(id, event, policy.revision).into());
                    }
                    PolicyEventKind::Modified { entries } => {
                        policy.entries =
                            entries.iter().map(|e| (e.label.clone(), e.clone())).collect();
                    }
                    PolicyEventKind::EntryModified { entry } => {
                        policy.entries.insert(entry.label.clone(), entry.clone());
                    }
                    PolicyEventKind::EntryDeleted { label } => {
                        policy.entries.remove(label);
                    }
                    PolicyEventKind::SubjectsModified { label, subjects } => {
                        let current = policy.revision;
                        let entry = policy
                            .entries
                            .get_mut(label)
                            .ok_or_else(|| Self::invalid_transition(id, event, current))?;
                        entry.subjects = subjects.clone();
                    }
                    PolicyEventKind::Deleted => {
                        policy.lifecycle = Lifecycle::Deleted;
                    }
                }
                policy.revision = revision;
                policy.modified = at;
                policy
            }
            (state, _) => {
                let current = state.map(|p| p.revision).unwrap_or(Revision::ZERO);
                return Err(Self::invalid_transition(id, event, current).into());
            }
        };

        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twinguard_event_core::EventMetadata;

    fn policy_id() -> PolicyId {
        PolicyId::new("org.acme:lamp").unwrap()
    }

    fn owner_entry() -> PolicyEntry {
        PolicyEntry::new("owner", ["user:alice"])
            .with_resource("thing:/", ResourcePermissions::grant(["READ", "WRITE"]))
    }

    fn event(kind: PolicyEventKind, version: u64) -> EventEnvelope<PolicyEventKind> {
        EventEnvelope::new(policy_id().as_str(), kind, version, EventMetadata::new())
    }

    #[test]
    fn test_policy_id() {
        let id = policy_id();
        assert_eq!(id.as_str(), "org.acme:lamp");
        assert_eq!(id.entity_id().to_string(), "policy:org.acme:lamp");
        assert_eq!(PolicyId::from_entity_id(id.entity_id()).unwrap(), id);

        assert!(PolicyId::new("").is_err());
        assert!(PolicyId::new("org acme").is_err());
        let thing = EntityId::new("thing", "org.acme:lamp").unwrap();
        assert!(PolicyId::from_entity_id(&thing).is_err());
    }

    #[test]
    fn test_policy_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&policy_id()).unwrap();
        assert_eq!(json, "\"org.acme:lamp\"");
        let back: PolicyId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, policy_id());
    }

    #[test]
    fn test_wildcard_subjects() {
        let entry = PolicyEntry::new("all-users", ["user:*"]);
        assert!(entry.matches_subject("user:123"));
        assert!(!entry.matches_subject("role:admin"));
    }

    #[test]
    fn test_apply_lifecycle() {
        let id = policy_id();
        let created = Policy::apply(
            None,
            &id,
            &event(
                PolicyEventKind::Created {
                    entries: vec![owner_entry()],
                },
                1,
            ),
        )
        .unwrap();
        assert_eq!(created.revision(), Revision(1));
        assert!(created.is_active());

        let modified = Policy::apply(
            Some(created),
            &id,
            &event(
                PolicyEventKind::SubjectsModified {
                    label: "owner".to_string(),
                    subjects: ["user:bob".to_string()].into(),
                },
                2,
            ),
        )
        .unwrap();
        assert!(modified.entry("owner").unwrap().matches_subject("user:bob"));
        assert!(!modified.entry("owner").unwrap().matches_subject("user:alice"));

        let deleted = Policy::apply(Some(modified), &id, &event(PolicyEventKind::Deleted, 3)).unwrap();
        assert_eq!(deleted.lifecycle(), Lifecycle::Deleted);
        assert_eq!(deleted.revision(), Revision(3));

        // 删除后的修改不合法，重新创建合法
        assert!(
            Policy::apply(
                Some(deleted.clone()),
                &id,
                &event(
                    PolicyEventKind::EntryDeleted {
                        label: "owner".to_string()
                    },
                    4
                )
            )
            .is_err()
        );
        let recreated = Policy::apply(
            Some(deleted),
            &id,
            &event(
                PolicyEventKind::Created {
                    entries: vec![owner_entry()],
                },
                4,
            ),
        )
        .unwrap();
        assert!(recreated.is_active());
        assert_eq!(recreated.revision(), Revision(4));
    }

    #[test]
    fn test_create_on_active_policy_is_rejected() {
        let id = policy_id();
        let created = Policy::apply(
            None,
            &id,
            &event(
                PolicyEventKind::Created {
                    entries: vec![owner_entry()],
                },
                1,
            ),
        )
        .unwrap();

        let err = Policy::apply(
            Some(created),
            &id,
            &event(PolicyEventKind::Created { entries: vec![] }, 2),
        )
        .unwrap_err();
        assert!(matches!(err, twinguard_errors::AppError::Internal(_)));
    }

    #[test]
    fn test_entry_validation() {
        assert!(owner_entry().validate().is_ok());
        assert!(PolicyEntry::new("", ["user:alice"]).validate().is_err());
        assert!(PolicyEntry::new("owner", [" "]).validate().is_err());
    }
}
