//! Domain Event 定义

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use twinguard_errors::{AppError, AppResult};
use uuid::Uuid;

use crate::StoredEvent;

/// Domain Event trait
pub trait DomainEvent: Send + Sync + Serialize {
    /// 事件类型名称
    fn event_type(&self) -> &'static str;

    /// 聚合类型
    fn aggregate_type(&self) -> &'static str;
}

/// 事件信封（包含元数据）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    /// 事件 ID
    pub id: Uuid,
    /// 事件类型
    pub event_type: String,
    /// 聚合类型
    pub aggregate_type: String,
    /// 聚合 ID
    pub aggregate_id: String,
    /// 事件提交后聚合的版本
    pub version: u64,
    /// 事件数据
    pub data: E,
    /// 元数据
    pub metadata: EventMetadata,
    /// 发生时间
    pub occurred_at: DateTime<Utc>,
}

impl<E: DomainEvent> EventEnvelope<E> {
    pub fn new(
        aggregate_id: impl Into<String>,
        event: E,
        version: u64,
        metadata: EventMetadata,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            event_type: event.event_type().to_string(),
            aggregate_type: event.aggregate_type().to_string(),
            aggregate_id: aggregate_id.into(),
            version,
            data: event,
            metadata,
            occurred_at: Utc::now(),
        }
    }

    /// 提交前期望的存储版本
    pub fn expected_version(&self) -> u64 {
        self.version.saturating_sub(1)
    }

    /// 转换为事件日志记录
    pub fn to_stored(&self) -> AppResult<StoredEvent> {
        let payload = serde_json::to_string(&self.data)
            .map_err(|e| AppError::internal(format!("Failed to serialize event: {}", e)))?;
        let metadata = serde_json::to_string(&self.metadata)
            .map_err(|e| AppError::internal(format!("Failed to serialize metadata: {}", e)))?;

        Ok(StoredEvent {
            id: self.id.to_string(),
            aggregate_type: self.aggregate_type.clone(),
            aggregate_id: self.aggregate_id.clone(),
            event_type: self.event_type.clone(),
            version: self.version,
            payload,
            metadata,
            occurred_at: self.occurred_at,
        })
    }
}

impl<E: DeserializeOwned> EventEnvelope<E> {
    /// 从事件日志记录还原
    pub fn from_stored(stored: &StoredEvent) -> AppResult<Self> {
        let id = Uuid::parse_str(&stored.id)
            .map_err(|e| AppError::internal(format!("Invalid event id '{}': {}", stored.id, e)))?;
        let metadata = if stored.metadata.is_empty() {
            EventMetadata::default()
        } else {
            serde_json::from_str(&stored.metadata).map_err(|e| {
                AppError::internal(format!("Failed to deserialize event metadata: {}", e))
            })?
        };

        Ok(Self {
            id,
            event_type: stored.event_type.clone(),
            aggregate_type: stored.aggregate_type.clone(),
            aggregate_id: stored.aggregate_id.clone(),
            version: stored.version,
            data: crate::deserialize_event(stored)?,
            metadata,
            occurred_at: stored.occurred_at,
        })
    }
}

/// 事件元数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// 触发用户 ID
    pub user_id: Option<String>,
    /// 租户 ID
    pub tenant_id: Option<String>,
    /// 关联 ID（用于追踪）
    pub correlation_id: Option<String>,
    /// 因果 ID
    pub causation_id: Option<String>,
    /// 其他请求头
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl EventMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}
