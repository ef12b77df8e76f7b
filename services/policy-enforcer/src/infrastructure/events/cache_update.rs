//! 策略缓存失效订阅者
//!
//! 每个实例一个任务，按顺序消费策略事件流并失效本地缓存，从不主动重新加载。
//! 失效是幂等且可交换的，重复或丢失的消息都只影响命中率

use std::sync::Arc;

use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use twinguard_bootstrap::ShutdownController;
use twinguard_common::{Backoff, RetryConfig};
use twinguard_errors::AppResult;
use twinguard_ports::{EventSubscriber, FabricMessage};

use crate::domain::policy::{POLICY_RESOURCE_TYPE, PolicyId};
use crate::infrastructure::cache::PolicyCaches;

/// 订阅状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdaterState {
    Unsubscribed,
    Subscribed,
}

/// 只解析路由需要的字段，负载本身不关心
#[derive(Debug, Deserialize)]
struct RoutedEvent {
    aggregate_type: String,
    aggregate_id: String,
    #[serde(default)]
    version: u64,
    #[serde(default)]
    event_type: String,
}

pub struct PolicyCacheUpdater {
    caches: PolicyCaches,
    subscriber: Arc<dyn EventSubscriber>,
    topic: String,
    instance_index: u32,
    state: watch::Sender<UpdaterState>,
}

impl PolicyCacheUpdater {
    pub fn new(
        caches: PolicyCaches,
        subscriber: Arc<dyn EventSubscriber>,
        topic: impl Into<String>,
        instance_index: u32,
    ) -> Self {
        let (state, _) = watch::channel(UpdaterState::Unsubscribed);
        Self {
            caches,
            subscriber,
            topic: topic.into(),
            instance_index,
            state,
        }
    }

    /// 每个实例稳定的订阅者 id，总线把它当作消费组
    pub fn subscriber_id(&self) -> String {
        format!("policy-cache-updater-{}", self.instance_index)
    }

    pub fn state(&self) -> watch::Receiver<UpdaterState> {
        self.state.subscribe()
    }

    /// 订阅一次，处理消息直到流结束或关闭
    pub async fn run_once(&self, shutdown: &ShutdownController) -> AppResult<()> {
        let subscriber_id = self.subscriber_id();
        let mut stream = self.subscriber.subscribe(&self.topic, &subscriber_id).await?;
        self.state.send_replace(UpdaterState::Subscribed);
        info!(topic = %self.topic, subscriber_id = %subscriber_id, "Policy cache updater subscribed");

        let stopped = shutdown.wait();
        tokio::pin!(stopped);
        loop {
            tokio::select! {
                message = stream.next() => match message {
                    Some(message) => {
                        self.handle_message(&message);
                    }
                    None => {
                        warn!(topic = %self.topic, "Policy event stream ended");
                        break;
                    }
                },
                _ = &mut stopped => break,
            }
        }

        self.state.send_replace(UpdaterState::Unsubscribed);
        Ok(())
    }

    /// 处理一条消息，返回是否执行了失效
    pub fn handle_message(&self, message: &FabricMessage) -> bool {
        let event: RoutedEvent = match serde_json::from_str(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "Skipping undecodable policy event");
                return false;
            }
        };

        if event.aggregate_type != POLICY_RESOURCE_TYPE {
            debug!(
                message_id = %message.id,
                aggregate_type = %event.aggregate_type,
                "Ignoring non-policy event"
            );
            return false;
        }

        let policy_id = match PolicyId::new(event.aggregate_id) {
            Ok(id) => id,
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "Skipping policy event with invalid id");
                return false;
            }
        };

        metrics::counter!("policy_events_received_total").increment(1);
        self.caches.invalidate(policy_id.entity_id());
        debug!(
            policy_id = %policy_id,
            event_type = %event.event_type,
            revision = event.version,
            "Policy caches invalidated"
        );
        true
    }

    /// 后台运行，流结束或订阅失败时按退避重新订阅，关闭时退出
    pub fn spawn_supervised(
        self: Arc<Self>,
        shutdown: ShutdownController,
        retry: RetryConfig,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut backoff = Backoff::new(retry);

            while !shutdown.is_shutdown() {
                let delay = match self.run_once(&shutdown).await {
                    Ok(()) => {
                        backoff.reset();
                        backoff.next_delay()
                    }
                    Err(e) => {
                        self.state.send_replace(UpdaterState::Unsubscribed);
                        warn!(
                            topic = %self.topic,
                            attempt = backoff.attempt() + 1,
                            error = %e,
                            "Policy event subscription failed"
                        );
                        backoff.next_delay()
                    }
                };
                if shutdown.is_shutdown() {
                    break;
                }

                let Some(delay) = delay else {
                    error!(topic = %self.topic, "Giving up re-subscribing to policy events");
                    break;
                };
                debug!(delay_ms = delay.as_millis() as u64, "Re-subscribing to policy events");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.wait() => break,
                }
            }

            info!(topic = %self.topic, "Policy cache updater stopped");
        })
    }
}
