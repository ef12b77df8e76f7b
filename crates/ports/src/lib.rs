//! ports - 抽象 trait 层
//!
//! 定义事件分发总线与快照文档存储的抽象接口

mod document_store;
mod event_publisher;

pub use document_store::*;
pub use event_publisher::*;
