//! 领域层

pub mod policy;
pub mod thing;
