//! 内联创建策略信号
//!
//! Thing 执行层在创建 Thing 时顺带创建了它的策略，此时本地可能缓存着该策略的
//! 负条目，收到信号后要让它失效

use serde::{Deserialize, Serialize};
use twinguard_common::EntityId;
use twinguard_event_core::EventMetadata;

use crate::domain::policy::PolicyId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThingPolicyCreated {
    thing_id: EntityId,
    policy_id: PolicyId,
    #[serde(default)]
    headers: EventMetadata,
}

impl ThingPolicyCreated {
    pub fn new(thing_id: EntityId, policy_id: PolicyId, headers: EventMetadata) -> Self {
        Self {
            thing_id,
            policy_id,
            headers,
        }
    }

    pub fn thing_id(&self) -> &EntityId {
        &self.thing_id
    }

    pub fn policy_id(&self) -> &PolicyId {
        &self.policy_id
    }

    pub fn headers(&self) -> &EventMetadata {
        &self.headers
    }
}
