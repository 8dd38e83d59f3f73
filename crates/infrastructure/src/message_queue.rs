use std::time::Duration;

use async_trait::async_trait;
use lapin::{
    options::*,
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use smart_queue_core::{
    config::MessageQueueConfig,
    traits::{Delivery, MessageQueue, QueueOptions},
    Message, SchedulerError, SchedulerResult,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// RabbitMQ消息队列实现
///
/// 连接与通道在 `connect` 时建立，通道开启发布确认；
/// 所有消费都使用手动确认，投递标签只在当前通道内有效。
pub struct RabbitMQMessageQueue {
    config: MessageQueueConfig,
    session: RwLock<Option<Session>>,
}

struct Session {
    connection: Connection,
    channel: Channel,
}

/// 隐藏连接串中的密码部分
pub fn mask_amqp_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    match rest.rsplit_once('@') {
        Some((credentials, host)) => {
            let user = credentials.split(':').next().unwrap_or_default();
            format!("{scheme}://{user}:***@{host}")
        }
        None => url.to_string(),
    }
}

impl RabbitMQMessageQueue {
    /// 创建实例，尚未建立连接
    pub fn new(config: MessageQueueConfig) -> Self {
        Self {
            config,
            session: RwLock::new(None),
        }
    }

    /// 创建实例并立即连接
    pub async fn connect_new(config: MessageQueueConfig) -> SchedulerResult<Self> {
        let queue = Self::new(config);
        queue.connect().await?;
        Ok(queue)
    }

    async fn open_session(&self) -> SchedulerResult<Session> {
        let timeout = Duration::from_secs(self.config.connection_timeout_seconds);
        let connection = tokio::time::timeout(
            timeout,
            Connection::connect(&self.config.url, ConnectionProperties::default()),
        )
        .await
        .map_err(|_| SchedulerError::MessageQueue("连接RabbitMQ超时".to_string()))?
        .map_err(|e| SchedulerError::MessageQueue(format!("连接RabbitMQ失败: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("创建通道失败: {e}")))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("开启发布确认失败: {e}")))?;

        Ok(Session {
            connection,
            channel,
        })
    }

    async fn channel(&self) -> SchedulerResult<Channel> {
        let session = self.session.read().await;
        match session.as_ref() {
            Some(session) if session.channel.status().connected() => {
                Ok(session.channel.clone())
            }
            _ => Err(SchedulerError::MessageQueue(
                "RabbitMQ连接不可用".to_string(),
            )),
        }
    }
}

#[async_trait]
impl MessageQueue for RabbitMQMessageQueue {
    async fn connect(&self) -> SchedulerResult<()> {
        if self.is_connected().await {
            return Ok(());
        }

        let masked = mask_amqp_url(&self.config.url);
        let mut last_error = None;
        for attempt in 1..=self.config.max_retries.max(1) {
            match self.open_session().await {
                Ok(session) => {
                    *self.session.write().await = Some(session);
                    info!("成功连接到RabbitMQ: {}", masked);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "连接RabbitMQ失败 (第{}次尝试) {}: {}",
                        attempt, masked, e
                    );
                    last_error = Some(e);
                    if attempt < self.config.max_retries {
                        tokio::time::sleep(Duration::from_secs(self.config.retry_delay_seconds))
                            .await;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| SchedulerError::MessageQueue("连接RabbitMQ失败".to_string())))
    }

    async fn is_connected(&self) -> bool {
        self.session
            .read()
            .await
            .as_ref()
            .is_some_and(|s| s.connection.status().connected() && s.channel.status().connected())
    }

    async fn close(&self) -> SchedulerResult<()> {
        let Some(session) = self.session.write().await.take() else {
            return Ok(());
        };

        // 未确认的消息由broker在通道关闭后重新投递
        let _ = session.channel.close(200, "正常关闭").await;
        session
            .connection
            .close(200, "正常关闭")
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("关闭连接失败: {e}")))?;

        info!("RabbitMQ连接已关闭");
        Ok(())
    }

    async fn declare_exchange(&self, exchange: &str) -> SchedulerResult<()> {
        let channel = self.channel().await?;
        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                SchedulerError::MessageQueue(format!("声明交换机 {exchange} 失败: {e}"))
            })?;

        debug!("交换机 {} 声明成功", exchange);
        Ok(())
    }

    async fn declare_queue(&self, queue: &str, options: &QueueOptions) -> SchedulerResult<()> {
        let channel = self.channel().await?;
        let mut arguments = FieldTable::default();
        if let Some(max_priority) = options.max_priority {
            arguments.insert(
                "x-max-priority".into(),
                AMQPValue::LongInt(i32::from(max_priority)),
            );
        }

        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: options.durable,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                arguments,
            )
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("声明队列 {queue} 失败: {e}")))?;

        debug!("队列 {} 声明成功", queue);
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        binding_key: &str,
    ) -> SchedulerResult<()> {
        let channel = self.channel().await?;
        channel
            .queue_bind(
                queue,
                exchange,
                binding_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                SchedulerError::MessageQueue(format!(
                    "绑定队列 {queue} 到 {exchange} ({binding_key}) 失败: {e}"
                ))
            })?;

        debug!("队列 {} 已绑定到 {} ({})", queue, exchange, binding_key);
        Ok(())
    }

    async fn publish_message(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &Message,
        priority: Option<u8>,
    ) -> SchedulerResult<()> {
        let channel = self.channel().await?;
        let payload = message
            .serialize_bytes()
            .map_err(|e| SchedulerError::Serialization(format!("序列化消息失败: {e}")))?;

        let mut properties = BasicProperties::default()
            .with_delivery_mode(2)
            .with_content_type("application/json".into())
            .with_message_id(message.id.as_str().into());
        if let Some(priority) = priority {
            properties = properties.with_priority(priority);
        }

        let confirm = channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await
            .map_err(|e| {
                SchedulerError::MessageQueue(format!("发布消息到 {exchange} 失败: {e}"))
            })?;

        let confirmation = confirm
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("消息发布确认失败: {e}")))?;
        if confirmation.is_nack() {
            return Err(SchedulerError::MessageQueue(format!(
                "broker拒绝了消息: {exchange} -> {routing_key}"
            )));
        }

        debug!("消息已发布: {} -> {}", exchange, routing_key);
        Ok(())
    }

    async fn consume_messages(
        &self,
        queue: &str,
        max_messages: usize,
    ) -> SchedulerResult<Vec<Delivery>> {
        let channel = self.channel().await?;
        let mut deliveries = Vec::new();

        while deliveries.len() < max_messages {
            let message = channel
                .basic_get(queue, BasicGetOptions { no_ack: false })
                .await
                .map_err(|e| {
                    SchedulerError::MessageQueue(format!("从队列 {queue} 获取消息失败: {e}"))
                })?;

            let Some(message) = message else {
                break;
            };
            deliveries.push(Delivery {
                delivery_tag: message.delivery.delivery_tag,
                payload: message.delivery.data.clone(),
                redelivered: message.delivery.redelivered,
            });
        }

        Ok(deliveries)
    }

    async fn ack_message(&self, delivery_tag: u64) -> SchedulerResult<()> {
        let channel = self.channel().await?;
        channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("确认消息失败: {e}")))
    }

    async fn nack_message(&self, delivery_tag: u64, requeue: bool) -> SchedulerResult<()> {
        let channel = self.channel().await?;
        channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("拒绝消息失败: {e}")))
    }

    async fn get_queue_size(&self, queue: &str) -> SchedulerResult<u32> {
        let channel = self.channel().await?;
        let info = channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("获取队列 {queue} 信息失败: {e}")))?;

        Ok(info.message_count())
    }
}
