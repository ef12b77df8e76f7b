//! twinguard-event-core - 事件核心库
//!
//! DomainEvent trait、事件信封、Event Store

mod domain_event;
mod event_store;

pub use domain_event::*;
pub use event_store::*;
