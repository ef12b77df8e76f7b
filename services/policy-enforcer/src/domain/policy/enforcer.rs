//! 策略执行器
//!
//! 由 `Policy` 编译而来，只读、无副作用，从不持久化

use std::collections::BTreeSet;

use twinguard_common::Revision;
use twinguard_domain_core::{AggregateRoot, Entity};

use super::policy::{Policy, PolicyId, wildcard_match};

/// 权限检查请求
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    /// 主体标识 (e.g., "user:123")
    pub subject: String,
    /// 主体拥有的角色 (e.g., ["admin"])
    pub roles: Vec<String>,
    /// 资源路径 (e.g., "thing:/features/lamp")
    pub resource: String,
    /// 权限 (e.g., "READ")
    pub permission: String,
}

impl EvaluationRequest {
    pub fn new(
        subject: impl Into<String>,
        resource: impl Into<String>,
        permission: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            roles: Vec::new(),
            resource: resource.into(),
            permission: permission.into(),
        }
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }

    /// 获取所有可能匹配的主体
    fn subject_patterns(&self) -> Vec<String> {
        let mut patterns = vec![self.subject.clone()];
        for role in &self.roles {
            patterns.push(format!("role:{}", role));
        }
        patterns
    }
}

/// 权限检查结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationResult {
    pub allowed: bool,
    pub denied_reason: Option<String>,
    /// 决定结果的条目
    pub matched_entry: Option<String>,
}

impl EvaluationResult {
    fn allow(label: &str) -> Self {
        Self {
            allowed: true,
            denied_reason: None,
            matched_entry: Some(label.to_string()),
        }
    }

    fn deny(reason: String, label: Option<&str>) -> Self {
        Self {
            allowed: false,
            denied_reason: Some(reason),
            matched_entry: label.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    label: String,
    subjects: Vec<String>,
    resource: String,
    grant: BTreeSet<String>,
    revoke: BTreeSet<String>,
}

impl CompiledRule {
    fn matches_subject(&self, subject: &str) -> bool {
        self.subjects
            .iter()
            .any(|s| s == "*" || wildcard_match(s, subject))
    }

    /// 精确匹配、`*` 后缀，或层级前缀（`thing:/features` 覆盖 `thing:/features/x`）
    fn matches_resource(&self, resource: &str) -> bool {
        if self.resource == "*" || wildcard_match(&self.resource, resource) {
            return true;
        }
        let prefix = self.resource.trim_end_matches('/');
        resource
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/') || prefix.ends_with(':'))
    }
}

fn permission_matches(set: &BTreeSet<String>, permission: &str) -> bool {
    set.contains("*") || set.contains(permission)
}

/// 编译后的策略执行器
///
/// 使用 Revoke-Override：任何撤销规则匹配即拒绝，其次是授予，默认拒绝
#[derive(Debug, Clone)]
pub struct PolicyEnforcer {
    policy_id: PolicyId,
    revision: Revision,
    rules: Vec<CompiledRule>,
}

impl PolicyEnforcer {
    pub fn compile(policy: &Policy) -> Self {
        let rules = policy
            .entries()
            .flat_map(|entry| {
                entry.resources.iter().map(move |(resource, permissions)| CompiledRule {
                    label: entry.label.clone(),
                    subjects: entry.subjects.iter().cloned().collect(),
                    resource: resource.clone(),
                    grant: permissions.grant.clone(),
                    revoke: permissions.revoke.clone(),
                })
            })
            .collect();

        Self {
            policy_id: policy.id().clone(),
            revision: policy.revision(),
            rules,
        }
    }

    pub fn policy_id(&self) -> &PolicyId {
        &self.policy_id
    }

    /// 编译时策略的修订号
    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub fn evaluate(&self, request: &EvaluationRequest) -> EvaluationResult {
        let patterns = request.subject_patterns();

        let matching: Vec<&CompiledRule> = self
            .rules
            .iter()
            .filter(|rule| {
                patterns.iter().any(|s| rule.matches_subject(s))
                    && rule.matches_resource(&request.resource)
            })
            .collect();

        if let Some(rule) = matching
            .iter()
            .find(|rule| permission_matches(&rule.revoke, &request.permission))
        {
            return EvaluationResult::deny(
                format!("Revoked by entry: {}", rule.label),
                Some(&rule.label),
            );
        }

        if let Some(rule) = matching
            .iter()
            .find(|rule| permission_matches(&rule.grant, &request.permission))
        {
            return EvaluationResult::allow(&rule.label);
        }

        EvaluationResult::deny("No matching entry found (deny by default)".to_string(), None)
    }

    pub fn has_permission(&self, subject: &str, resource: &str, permission: &str) -> bool {
        self.evaluate(&EvaluationRequest::new(subject, resource, permission))
            .allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::policy::{Lifecycle, PolicyEntry, ResourcePermissions};
    use chrono::Utc;

    fn setup_policy() -> Policy {
        let now = Utc::now();
        Policy::new(
            PolicyId::new("org.acme:lamp").unwrap(),
            Revision(3),
            Lifecycle::Active,
            vec![
                PolicyEntry::new("owner", ["user:alice"])
                    .with_resource("thing:/", ResourcePermissions::grant(["READ", "WRITE"])),
                PolicyEntry::new("admins", ["role:admin"])
                    .with_resource("thing:/", ResourcePermissions::grant(["*"])),
                PolicyEntry::new("readers", ["user:*"])
                    .with_resource("thing:/features", ResourcePermissions::grant(["READ"])),
                PolicyEntry::new("no-secrets", ["*"])
                    .with_resource("thing:/features/secret", ResourcePermissions::revoke(["READ"])),
            ],
            now,
            now,
        )
    }

    #[test]
    fn test_owner_allow() {
        let enforcer = PolicyEnforcer::compile(&setup_policy());
        assert_eq!(enforcer.revision(), Revision(3));
        assert!(enforcer.has_permission("user:alice", "thing:/attributes/color", "WRITE"));
    }

    #[test]
    fn test_hierarchical_resource() {
        let enforcer = PolicyEnforcer::compile(&setup_policy());
        assert!(enforcer.has_permission("user:bob", "thing:/features/lamp", "READ"));
        assert!(!enforcer.has_permission("user:bob", "thing:/featuresx", "READ"));
        assert!(!enforcer.has_permission("user:bob", "thing:/attributes", "READ"));
    }

    #[test]
    fn test_revoke_overrides_grant() {
        let enforcer = PolicyEnforcer::compile(&setup_policy());
        let result = enforcer.evaluate(&EvaluationRequest::new(
            "user:alice",
            "thing:/features/secret/key",
            "READ",
        ));
        assert!(!result.allowed);
        assert_eq!(result.matched_entry.as_deref(), Some("no-secrets"));
    }

    #[test]
    fn test_role_match() {
        let enforcer = PolicyEnforcer::compile(&setup_policy());
        let request = EvaluationRequest::new("user:carol", "thing:/attributes", "WRITE")
            .with_roles(vec!["admin".to_string()]);
        assert!(enforcer.evaluate(&request).allowed);
    }

    #[test]
    fn test_default_deny() {
        let enforcer = PolicyEnforcer::compile(&setup_policy());
        let result = enforcer.evaluate(&EvaluationRequest::new("user:bob", "thing:/", "WRITE"));
        assert!(!result.allowed);
        assert!(result.matched_entry.is_none());
    }
}
