//! Thing 相关信号

pub mod thing_policy_created;

pub use thing_policy_created::ThingPolicyCreated;
