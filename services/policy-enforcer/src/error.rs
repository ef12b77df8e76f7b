//! 策略领域错误

use thiserror::Error;
use twinguard_common::Revision;
use twinguard_errors::AppError;

use crate::domain::policy::PolicyId;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Policy '{0}' not found")]
    PolicyNotFound(PolicyId),
    #[error("Policy '{0}' already exists")]
    PolicyAlreadyExists(PolicyId),
    #[error("Policy entry '{label}' not found in policy '{policy_id}'")]
    EntryNotFound { policy_id: PolicyId, label: String },
    #[error("Invalid policy id '{0}'")]
    InvalidPolicyId(String),
    #[error("Invalid policy entry: {0}")]
    InvalidEntry(String),
    #[error("Event {event_type} cannot be applied to policy '{policy_id}' at revision {revision}")]
    InvalidTransition {
        policy_id: PolicyId,
        event_type: String,
        revision: Revision,
    },
}

impl From<PolicyError> for AppError {
    fn from(error: PolicyError) -> Self {
        match error {
            PolicyError::PolicyNotFound(_) | PolicyError::EntryNotFound { .. } => {
                AppError::NotFound(error.to_string())
            }
            PolicyError::PolicyAlreadyExists(_)
            | PolicyError::InvalidPolicyId(_)
            | PolicyError::InvalidEntry(_) => AppError::Validation(error.to_string()),
            // 事件日志与状态不一致
            PolicyError::InvalidTransition { .. } => AppError::Internal(error.to_string()),
        }
    }
}
