//! domain-core - 跨 context 的领域核心 trait
//!
//! 实体与事件溯源聚合根

mod entity;

pub use entity::*;

pub use twinguard_common::{EntityId, Revision};
