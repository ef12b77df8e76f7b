//! twinguard-adapter-memory - 内存适配器
//!
//! 单进程部署和测试使用的事件日志、快照文档存储与事件总线

mod document_store;
mod event_store;
mod fabric;

pub use document_store::InMemoryDocumentStore;
pub use event_store::InMemoryEventStore;
pub use fabric::InMemoryFabric;
