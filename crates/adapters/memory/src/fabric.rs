//! 内存事件总线
//!
//! 每个 topic 一个 broadcast 通道；同一个 subscriber id 共享一个接收端，
//! 相当于一个消费组。消费组在首次订阅时创建，只接收之后发布的消息，
//! 订阅断开后消费组保留，重新订阅从断开处继续。
//! 只有 [`InMemoryFabric::recording`] 创建的总线会保留已发布消息。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast, watch};
use tracing::{debug, warn};
use twinguard_errors::{AppError, AppResult};
use twinguard_ports::{EventPublisher, EventSubscriber, FabricMessage};

const DEFAULT_CAPACITY: usize = 1024;

type GroupReceiver = Arc<Mutex<broadcast::Receiver<FabricMessage>>>;

struct Inner {
    capacity: usize,
    topics: Mutex<HashMap<String, broadcast::Sender<FabricMessage>>>,
    groups: Mutex<HashMap<(String, String), GroupReceiver>>,
    sequence: AtomicU64,
    available: AtomicBool,
    disconnect: watch::Sender<u64>,
    /// `None` 表示不记录
    published: Option<Mutex<Vec<FabricMessage>>>,
}

/// 内存事件总线，克隆共享同一条总线
#[derive(Clone)]
pub struct InMemoryFabric {
    inner: Arc<Inner>,
}

impl InMemoryFabric {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// `capacity` 为每个 topic 的缓冲条数，落后超过该值的消费组会丢消息
    pub fn with_capacity(capacity: usize) -> Self {
        Self::build(capacity, false)
    }

    /// 保留所有已发布消息的总线，供测试检查发布内容
    pub fn recording() -> Self {
        Self::build(DEFAULT_CAPACITY, true)
    }

    fn build(capacity: usize, record: bool) -> Self {
        let (disconnect, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                capacity,
                topics: Mutex::new(HashMap::new()),
                groups: Mutex::new(HashMap::new()),
                sequence: AtomicU64::new(0),
                available: AtomicBool::new(true),
                disconnect,
                published: record.then(|| Mutex::new(Vec::new())),
            }),
        }
    }

    /// 模拟总线不可用：发布和订阅都返回错误
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// 断开所有现有订阅（流结束），消费组保留
    pub fn disconnect_all(&self) {
        self.inner.disconnect.send_modify(|generation| *generation += 1);
    }

    /// 已发布的消息，未开启记录时为空
    pub async fn published(&self, topic: &str) -> Vec<FabricMessage> {
        let Some(published) = &self.inner.published else {
            return Vec::new();
        };
        published
            .lock()
            .await
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    fn ensure_available(&self) -> AppResult<()> {
        if self.inner.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::external_service("In-memory fabric unavailable"))
        }
    }

    async fn sender(&self, topic: &str) -> broadcast::Sender<FabricMessage> {
        let mut topics = self.inner.topics.lock().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .clone()
    }
}

impl Default for InMemoryFabric {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for InMemoryFabric {
    async fn publish_raw(&self, topic: &str, payload: &str) -> AppResult<()> {
        self.ensure_available()?;

        let sequence = self.inner.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let message = FabricMessage {
            topic: topic.to_string(),
            id: sequence.to_string(),
            payload: payload.to_string(),
        };

        let receivers = self.sender(topic).await.send(message.clone()).unwrap_or(0);
        debug!(topic, id = %message.id, receivers, "Message published");
        if let Some(published) = &self.inner.published {
            published.lock().await.push(message);
        }
        Ok(())
    }
}

#[async_trait]
impl EventSubscriber for InMemoryFabric {
    async fn subscribe(
        &self,
        topic: &str,
        subscriber_id: &str,
    ) -> AppResult<BoxStream<'static, FabricMessage>> {
        self.ensure_available()?;

        let sender = self.sender(topic).await;
        let group = {
            let mut groups = self.inner.groups.lock().await;
            groups
                .entry((topic.to_string(), subscriber_id.to_string()))
                .or_insert_with(|| Arc::new(Mutex::new(sender.subscribe())))
                .clone()
        };
        debug!(topic, subscriber_id, "Subscribed");

        let disconnect = self.inner.disconnect.subscribe();
        let topic = topic.to_string();
        let stream = futures::stream::unfold(
            (group, disconnect, topic),
            |(group, mut disconnect, topic)| async move {
                loop {
                    let next = {
                        let mut receiver = group.lock().await;
                        tokio::select! {
                            _ = disconnect.changed() => None,
                            message = receiver.recv() => Some(message),
                        }
                    };
                    match next {
                        Some(Ok(message)) => return Some((message, (group, disconnect, topic))),
                        Some(Err(RecvError::Lagged(skipped))) => {
                            warn!(topic = %topic, skipped, "Subscriber lagged, messages lost");
                        }
                        Some(Err(RecvError::Closed)) | None => return None,
                    }
                }
            },
        );

        Ok(stream.boxed())
    }
}
