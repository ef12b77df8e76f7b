//! 策略相关命令定义
//!
//! `expected_revision` 为 Some 时，当前修订号不一致的命令以
//! `ConcurrentModification` 失败

use std::collections::BTreeSet;

use twinguard_common::Revision;
use twinguard_event_core::EventMetadata;

use crate::domain::policy::PolicyEntry;

/// 创建策略命令（已删除的策略可以重新创建）
#[derive(Debug, Clone)]
pub struct CreatePolicyCommand {
    pub policy_id: String,
    pub entries: Vec<PolicyEntry>,
    pub expected_revision: Option<Revision>,
    pub metadata: EventMetadata,
}

/// 整体替换策略条目命令
#[derive(Debug, Clone)]
pub struct ModifyPolicyCommand {
    pub policy_id: String,
    pub entries: Vec<PolicyEntry>,
    pub expected_revision: Option<Revision>,
    pub metadata: EventMetadata,
}

/// 新增或替换单个条目命令
#[derive(Debug, Clone)]
pub struct ModifyPolicyEntryCommand {
    pub policy_id: String,
    pub entry: PolicyEntry,
    pub expected_revision: Option<Revision>,
    pub metadata: EventMetadata,
}

/// 删除条目命令
#[derive(Debug, Clone)]
pub struct DeletePolicyEntryCommand {
    pub policy_id: String,
    pub label: String,
    pub expected_revision: Option<Revision>,
    pub metadata: EventMetadata,
}

/// 修改条目主体命令
#[derive(Debug, Clone)]
pub struct ModifySubjectsCommand {
    pub policy_id: String,
    pub label: String,
    pub subjects: BTreeSet<String>,
    pub expected_revision: Option<Revision>,
    pub metadata: EventMetadata,
}

/// 删除策略命令
#[derive(Debug, Clone)]
pub struct DeletePolicyCommand {
    pub policy_id: String,
    pub expected_revision: Option<Revision>,
    pub metadata: EventMetadata,
}
