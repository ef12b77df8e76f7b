//! 策略快照编解码
//!
//! 文档结构：
//! `{ policyId, revision, lifecycle, created, modified, entries: { <label>: { subjects, resources } } }`

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use twinguard_common::Revision;
use twinguard_domain_core::{AggregateRoot, Entity};
use twinguard_errors::{AppError, AppResult};
use twinguard_ports::Document;

use super::policy::{Lifecycle, Policy, PolicyEntry, PolicyId, ResourcePermissions};

const REQUIRED_FIELDS: [&str; 4] = ["policyId", "revision", "lifecycle", "entries"];

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotDocument {
    policy_id: String,
    revision: u64,
    lifecycle: Lifecycle,
    #[serde(default)]
    created: Option<DateTime<Utc>>,
    #[serde(default)]
    modified: Option<DateTime<Utc>>,
    entries: BTreeMap<String, SnapshotEntry>,
}

#[derive(Deserialize)]
struct SnapshotEntry {
    #[serde(default)]
    subjects: BTreeSet<String>,
    #[serde(default)]
    resources: BTreeMap<String, ResourcePermissions>,
}

/// 无状态编解码器，只由聚合存储调用
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicySnapshotAdapter;

impl PolicySnapshotAdapter {
    pub fn new() -> Self {
        Self
    }

    pub fn serialize(&self, policy: &Policy) -> Document {
        let entries: Map<String, Value> = policy
            .entries()
            .map(|entry| {
                (
                    entry.label.clone(),
                    json!({
                        "subjects": entry.subjects,
                        "resources": entry.resources,
                    }),
                )
            })
            .collect();

        Document::new(json!({
            "policyId": policy.id().as_str(),
            "revision": policy.revision().value(),
            "lifecycle": policy.lifecycle(),
            "created": policy.created(),
            "modified": policy.modified(),
            "entries": entries,
        }))
    }

    pub fn deserialize(&self, document: &Document) -> AppResult<Policy> {
        let object = document
            .as_value()
            .as_object()
            .ok_or_else(|| AppError::malformed_snapshot("snapshot document is not an object"))?;

        if let Some(missing) = REQUIRED_FIELDS.iter().find(|f| !object.contains_key(**f)) {
            return Err(AppError::malformed_snapshot(format!(
                "snapshot is missing field '{}'",
                missing
            )));
        }

        let decoded: SnapshotDocument = serde_json::from_value(document.as_value().clone())
            .map_err(|e| AppError::malformed_snapshot(e.to_string()))?;

        let id = PolicyId::new(decoded.policy_id)
            .map_err(|e| AppError::malformed_snapshot(e.to_string()))?;
        let created = decoded.created.unwrap_or_default();
        let modified = decoded.modified.unwrap_or(created);
        let entries = decoded.entries.into_iter().map(|(label, entry)| PolicyEntry {
            label,
            subjects: entry.subjects,
            resources: entry.resources,
        });

        Ok(Policy::new(
            id,
            Revision::new(decoded.revision),
            decoded.lifecycle,
            entries,
            created,
            modified,
        ))
    }
}
