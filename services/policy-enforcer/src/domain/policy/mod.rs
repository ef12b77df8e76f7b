//! Policy 策略领域模块

#![allow(clippy::module_inception)]

pub mod enforcer;
pub mod events;
pub mod policy;
pub mod snapshot;

pub use enforcer::{EvaluationRequest, EvaluationResult, PolicyEnforcer};
pub use events::{PolicyEvent, PolicyEventExt, PolicyEventKind};
pub use policy::{
    Lifecycle, POLICY_RESOURCE_TYPE, Policy, PolicyEntry, PolicyId, ResourcePermissions,
};
pub use snapshot::PolicySnapshotAdapter;
