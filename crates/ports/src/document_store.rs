//! 快照文档存储 trait 定义

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use twinguard_errors::AppResult;

/// 持久化的 JSON 文档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(pub serde_json::Value);

impl Document {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

impl From<serde_json::Value> for Document {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// 按聚合 id 保存最新文档（后写覆盖先写）
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn save(&self, aggregate_id: &str, document: Document) -> AppResult<()>;

    async fn load(&self, aggregate_id: &str) -> AppResult<Option<Document>>;
}
