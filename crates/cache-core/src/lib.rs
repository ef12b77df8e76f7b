//! twinguard-cache-core - 异步缓存
//!
//! 在 moka 之上提供：
//! - 按 key 的 single-flight 加载（并发未命中只调用一次 loader）
//! - 负缓存（`Entry::Absent`），“不存在”本身也是可缓存、可失效的事实
//! - 失效时分离正在进行的加载，保证旧加载结果不会在失效之后写回

mod async_cache;
mod config;
mod entry;

pub use async_cache::*;
pub use config::*;
pub use entry::*;

#[cfg(test)]
mod tests;
