//! twinguard-adapter-postgres - PostgreSQL 适配器

mod connection;
mod document_store;
mod event_store;

pub use connection::*;
pub use document_store::*;
pub use event_store::*;
