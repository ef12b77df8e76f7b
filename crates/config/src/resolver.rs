//! 按连接或按请求解析配置
//!
//! 默认实现对所有键返回同一份静态配置，不支持变更订阅

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use twinguard_common::EntityId;

/// 解析键：实体 id 或请求头
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigKey {
    Entity(EntityId),
    Headers(HashMap<String, String>),
}

impl From<EntityId> for ConfigKey {
    fn from(id: EntityId) -> Self {
        Self::Entity(id)
    }
}

impl From<HashMap<String, String>> for ConfigKey {
    fn from(headers: HashMap<String, String>) -> Self {
        Self::Headers(headers)
    }
}

#[async_trait]
pub trait ConfigResolver: Send + Sync {
    type Config: Clone + Send + Sync + 'static;

    fn resolve(&self, key: &ConfigKey) -> Arc<Self::Config>;

    async fn resolve_async(&self, key: &ConfigKey) -> Arc<Self::Config> {
        self.resolve(key)
    }

    /// 订阅某个实体的配置变更
    ///
    /// 返回 `false` 表示实现不支持变更通知，`subscriber` 不会收到任何消息
    fn register_for_changes(
        &self,
        entity_id: &EntityId,
        subscriber: mpsc::Sender<Arc<Self::Config>>,
    ) -> bool;
}

/// 静态配置解析器
#[derive(Debug)]
pub struct StaticConfigResolver<C> {
    config: Arc<C>,
}

impl<C> Clone for StaticConfigResolver<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
        }
    }
}

impl<C> StaticConfigResolver<C> {
    pub fn new(config: C) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl<C> ConfigResolver for StaticConfigResolver<C>
where
    C: Clone + Send + Sync + 'static,
{
    type Config = C;

    fn resolve(&self, _key: &ConfigKey) -> Arc<C> {
        self.config.clone()
    }

    fn register_for_changes(&self, _entity_id: &EntityId, _subscriber: mpsc::Sender<Arc<C>>) -> bool {
        false
    }
}
