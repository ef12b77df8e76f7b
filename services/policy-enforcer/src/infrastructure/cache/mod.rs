//! 本地派生缓存

pub mod policy_caches;

pub use policy_caches::{ENFORCER_CACHE, POLICY_CACHE, PolicyCacheTicket, PolicyCaches};
