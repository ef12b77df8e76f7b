//! Redis Stream 事件总线
//!
//! 每个 topic 一个 stream，subscriber id 即消费组名（也是组内唯一的消费者名）。
//! 订阅时先补读本消费者未确认的消息，再读新消息；消息转交给订阅流后才 XACK。

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{Client, RedisResult, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use twinguard_errors::{AppError, AppResult};
use twinguard_ports::{EventPublisher, EventSubscriber, FabricMessage};

use crate::create_connection_manager;

const PAYLOAD_FIELD: &str = "payload";
const READ_COUNT: usize = 64;

/// Stream 消息
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
    pub id: String,
    pub stream: String,
    pub fields: HashMap<String, String>,
}

/// Redis Streams 事件总线
#[derive(Clone)]
pub struct RedisStreamFabric {
    client: Client,
    conn: ConnectionManager,
    key_prefix: Option<String>,
    block_ms: u64,
    max_len: Option<usize>,
}

impl RedisStreamFabric {
    pub async fn new(client: Client) -> AppResult<Self> {
        let conn = create_connection_manager(client.clone()).await?;
        Ok(Self {
            client,
            conn,
            key_prefix: None,
            block_ms: 5_000,
            max_len: Some(100_000),
        })
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// XREADGROUP 的阻塞时间（毫秒）
    pub fn with_block_ms(mut self, block_ms: u64) -> Self {
        self.block_ms = block_ms;
        self
    }

    /// stream 近似最大长度，None 表示不裁剪
    pub fn with_max_len(mut self, max_len: Option<usize>) -> Self {
        self.max_len = max_len;
        self
    }

    fn stream_key(&self, topic: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{}:{}", prefix, topic),
            None => topic.to_string(),
        }
    }
}

#[async_trait]
impl EventPublisher for RedisStreamFabric {
    async fn publish_raw(&self, topic: &str, payload: &str) -> AppResult<()> {
        let stream = self.stream_key(topic);

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&stream);
        if let Some(max_len) = self.max_len {
            cmd.arg("MAXLEN").arg("~").arg(max_len);
        }
        cmd.arg("*").arg(PAYLOAD_FIELD).arg(payload);

        let mut conn = self.conn.clone();
        let id: String = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::external_service(format!("Failed to XADD: {}", e)))?;

        debug!(stream = %stream, id = %id, "Message added to stream");
        Ok(())
    }
}

#[async_trait]
impl EventSubscriber for RedisStreamFabric {
    async fn subscribe(
        &self,
        topic: &str,
        subscriber_id: &str,
    ) -> AppResult<BoxStream<'static, FabricMessage>> {
        // 阻塞读取独占一条连接，避免拖慢发布
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::external_service(format!("Failed to connect: {}", e)))?;

        let mut consumer = StreamConsumer {
            conn,
            stream: self.stream_key(topic),
            topic: topic.to_string(),
            group: subscriber_id.to_string(),
            block_ms: self.block_ms,
        };
        consumer.create_group().await?;

        let (tx, rx) = mpsc::channel(READ_COUNT);
        tokio::spawn(consumer.run(tx));

        Ok(ReceiverStream::new(rx).boxed())
    }
}

struct StreamConsumer {
    conn: MultiplexedConnection,
    stream: String,
    topic: String,
    group: String,
    block_ms: u64,
}

impl StreamConsumer {
    /// 创建消费组（已存在则忽略），从当前末尾开始
    async fn create_group(&mut self) -> AppResult<()> {
        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut self.conn)
            .await;

        match result {
            Ok(()) => {
                info!(stream = %self.stream, group = %self.group, "Consumer group created");
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(stream = %self.stream, group = %self.group, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(AppError::external_service(format!(
                "Failed to create group: {}",
                e
            ))),
        }
    }

    /// 读取循环；出错或订阅方丢弃流时退出，流随之结束
    async fn run(mut self, tx: mpsc::Sender<FabricMessage>) {
        // "0" 读取本消费者未确认的消息，读空后切换到 ">" 只读新消息
        let mut cursor = "0";

        loop {
            let messages = match self.read(cursor).await {
                Ok(messages) => messages,
                Err(e) => {
                    warn!(stream = %self.stream, group = %self.group, error = %e, "Stream read failed");
                    return;
                }
            };

            if messages.is_empty() {
                cursor = ">";
                continue;
            }

            for message in messages {
                let Some(payload) = message.fields.get(PAYLOAD_FIELD).cloned() else {
                    warn!(stream = %self.stream, id = %message.id, "Message without payload skipped");
                    let _ = self.ack(&message.id).await;
                    continue;
                };

                let fabric_message = FabricMessage {
                    topic: self.topic.clone(),
                    id: message.id.clone(),
                    payload,
                };
                if tx.send(fabric_message).await.is_err() {
                    debug!(stream = %self.stream, group = %self.group, "Subscription dropped");
                    return;
                }
                if let Err(e) = self.ack(&message.id).await {
                    warn!(stream = %self.stream, id = %message.id, error = %e, "XACK failed");
                    return;
                }
            }
        }
    }

    async fn read(&mut self, cursor: &str) -> AppResult<Vec<StreamMessage>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group)
            .arg(&self.group)
            .arg("COUNT")
            .arg(READ_COUNT);
        if cursor == ">" {
            cmd.arg("BLOCK").arg(self.block_ms);
        }
        cmd.arg("STREAMS").arg(&self.stream).arg(cursor);

        let result: Value = cmd
            .query_async(&mut self.conn)
            .await
            .map_err(|e| AppError::external_service(format!("Failed to XREADGROUP: {}", e)))?;

        Ok(parse_xread_response(result))
    }

    async fn ack(&mut self, id: &str) -> AppResult<()> {
        let _: usize = redis::cmd("XACK")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(id)
            .query_async(&mut self.conn)
            .await
            .map_err(|e| AppError::external_service(format!("Failed to XACK: {}", e)))?;
        Ok(())
    }
}

fn bulk_to_string(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).to_string()),
        Value::SimpleString(s) => Some(s.clone()),
        _ => None,
    }
}

/// 解析 XREAD/XREADGROUP 响应
///
/// 超时返回 Nil，按空结果处理
fn parse_xread_response(value: Value) -> Vec<StreamMessage> {
    let mut messages = Vec::new();

    let Value::Array(streams) = value else {
        return messages;
    };

    for stream_data in streams {
        let Value::Array(parts) = stream_data else {
            continue;
        };
        if parts.len() < 2 {
            continue;
        }
        let Some(stream_name) = bulk_to_string(&parts[0]) else {
            continue;
        };
        let Value::Array(entries) = &parts[1] else {
            continue;
        };

        for entry in entries {
            let Value::Array(entry_parts) = entry else {
                continue;
            };
            if entry_parts.len() < 2 {
                continue;
            }
            let Some(id) = bulk_to_string(&entry_parts[0]) else {
                continue;
            };

            let mut fields = HashMap::new();
            if let Value::Array(field_values) = &entry_parts[1] {
                for pair in field_values.chunks(2) {
                    if let [key, value] = pair {
                        if let (Some(k), Some(v)) = (bulk_to_string(key), bulk_to_string(value)) {
                            fields.insert(k, v);
                        }
                    }
                }
            }

            messages.push(StreamMessage {
                id,
                stream: stream_name.clone(),
                fields,
            });
        }
    }

    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> Value {
        Value::BulkString(s.as_bytes().to_vec())
    }

    #[test]
    fn test_parse_xread_response() {
        let response = Value::Array(vec![Value::Array(vec![
            bulk("policy-events"),
            Value::Array(vec![
                Value::Array(vec![
                    bulk("1700000000000-0"),
                    Value::Array(vec![bulk("payload"), bulk(r#"{"version":4}"#)]),
                ]),
                Value::Array(vec![
                    bulk("1700000000000-1"),
                    // 已删除的条目没有字段
                    Value::Nil,
                ]),
            ]),
        ])]);

        let messages = parse_xread_response(response);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].stream, "policy-events");
        assert_eq!(messages[0].id, "1700000000000-0");
        assert_eq!(
            messages[0].fields.get("payload").map(String::as_str),
            Some(r#"{"version":4}"#)
        );
        assert!(messages[1].fields.is_empty());
    }

    #[test]
    fn test_parse_timeout_response() {
        assert!(parse_xread_response(Value::Nil).is_empty());
    }

    #[tokio::test]
    #[ignore] // 需要 Redis 实例
    async fn test_publish_and_consume() {
        let client = crate::open_client("redis://127.0.0.1:6379").unwrap();
        let fabric = RedisStreamFabric::new(client)
            .await
            .unwrap()
            .with_key_prefix("twinguard-test")
            .with_block_ms(500);

        let mut stream = fabric.subscribe("policy-events", "test-group").await.unwrap();
        fabric.publish_raw("policy-events", "hello").await.unwrap();

        let message = stream.next().await.unwrap();
        assert_eq!(message.payload, "hello");
    }
}
