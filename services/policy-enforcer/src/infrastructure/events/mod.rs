//! 事件订阅

pub mod cache_update;

pub use cache_update::{PolicyCacheUpdater, UpdaterState};
