//! 持久化

pub mod aggregate_store;

pub use aggregate_store::PolicyAggregateStore;
