//! 事件分发总线 trait 定义
//!
//! 至少一次、尽力而为的广播：同一个 subscriber id 在集群内是一个消费组，
//! 不同 subscriber id 各自收到全部消息

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use twinguard_errors::{AppError, AppResult};

/// 总线上收到的一条消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FabricMessage {
    pub topic: String,
    /// 总线分配的消息 id（Redis Stream entry id 或内存序号）
    pub id: String,
    pub payload: String,
}

/// 事件发布者 trait
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// 发布原始 JSON 字符串
    async fn publish_raw(&self, topic: &str, payload: &str) -> AppResult<()>;
}

/// 序列化后发布
pub async fn publish_json<P, E>(publisher: &P, topic: &str, event: &E) -> AppResult<()>
where
    P: EventPublisher + ?Sized,
    E: Serialize + Sync,
{
    let payload = serde_json::to_string(event)
        .map_err(|e| AppError::internal(format!("Failed to serialize event: {}", e)))?;
    publisher.publish_raw(topic, &payload).await
}

/// 事件订阅者 trait
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// 以 `subscriber_id` 为消费组订阅 `topic`
    ///
    /// 流结束表示订阅已断开，调用方负责重新订阅
    async fn subscribe(
        &self,
        topic: &str,
        subscriber_id: &str,
    ) -> AppResult<BoxStream<'static, FabricMessage>>;
}
