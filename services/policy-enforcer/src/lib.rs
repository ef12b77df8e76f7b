//! Policy Enforcer Service Library
//!
//! 模块化架构：
//! - `domain`: 策略聚合、事件、编译后的权限评估器、快照编解码
//! - `application`: 策略写入命令
//! - `infrastructure`: 聚合存储、派生缓存、跨实例失效订阅

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
