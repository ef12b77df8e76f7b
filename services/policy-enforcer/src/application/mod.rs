//! 应用层

pub mod policy;
