//! twinguard-adapter-redis - Redis 适配器
//!
//! 基于 Redis Streams 消费组的事件总线

mod connection;
mod stream;

pub use connection::*;
pub use stream::*;
