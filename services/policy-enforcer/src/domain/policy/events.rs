//! Policy 领域事件

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use twinguard_errors::AppResult;
use twinguard_event_core::{DomainEvent, EventEnvelope};

use super::policy::{POLICY_RESOURCE_TYPE, PolicyEntry, PolicyId};

/// 策略事件负载
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyEventKind {
    Created { entries: Vec<PolicyEntry> },
    Modified { entries: Vec<PolicyEntry> },
    EntryModified { entry: PolicyEntry },
    EntryDeleted { label: String },
    SubjectsModified { label: String, subjects: BTreeSet<String> },
    Deleted,
}

impl DomainEvent for PolicyEventKind {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Created { .. } => "PolicyCreated",
            Self::Modified { .. } => "PolicyModified",
            Self::EntryModified { .. } => "PolicyEntryModified",
            Self::EntryDeleted { .. } => "PolicyEntryDeleted",
            Self::SubjectsModified { .. } => "SubjectsModified",
            Self::Deleted => "PolicyDeleted",
        }
    }

    fn aggregate_type(&self) -> &'static str {
        POLICY_RESOURCE_TYPE
    }
}

/// 策略事件：`version` 是事件提交后策略的修订号
pub type PolicyEvent = EventEnvelope<PolicyEventKind>;

pub trait PolicyEventExt {
    fn policy_id(&self) -> AppResult<PolicyId>;
}

impl PolicyEventExt for PolicyEvent {
    fn policy_id(&self) -> AppResult<PolicyId> {
        Ok(PolicyId::new(self.aggregate_id.clone())?)
    }
}
