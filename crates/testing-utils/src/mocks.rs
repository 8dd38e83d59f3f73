//! Message queue test double
//!
//! 在内存队列之上记录所有发布，并可注入发布失败或挂起。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use smart_queue_core::{
    traits::{Delivery, MessageQueue, QueueOptions},
    JobDispatchMessage, Message, MessageType, SchedulerError, SchedulerResult,
};
use smart_queue_infrastructure::InMemoryMessageQueue;

/// 一次发布调用的记录
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub message: Message,
    pub priority: Option<u8>,
}

pub struct MockMessageQueue {
    inner: InMemoryMessageQueue,
    published: Mutex<Vec<PublishedMessage>>,
    fail_publish: AtomicBool,
    publish_delay: Mutex<Option<Duration>>,
}

impl MockMessageQueue {
    pub fn new() -> Self {
        Self {
            inner: InMemoryMessageQueue::new(),
            published: Mutex::new(Vec::new()),
            fail_publish: AtomicBool::new(false),
            publish_delay: Mutex::new(None),
        }
    }

    /// 之后的发布全部返回错误
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// 发布前等待，用于触发发布超时
    pub fn set_publish_delay(&self, delay: Option<Duration>) {
        *self.publish_delay.lock().unwrap() = delay;
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().unwrap().clone()
    }

    /// 已成功发布的派发消息
    pub fn dispatched(&self) -> Vec<JobDispatchMessage> {
        self.published()
            .into_iter()
            .filter_map(|p| match p.message.message_type {
                MessageType::JobDispatch(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }

    pub fn clear_published(&self) {
        self.published.lock().unwrap().clear();
    }
}

impl Default for MockMessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageQueue for MockMessageQueue {
    async fn connect(&self) -> SchedulerResult<()> {
        self.inner.connect().await
    }

    async fn is_connected(&self) -> bool {
        self.inner.is_connected().await
    }

    async fn close(&self) -> SchedulerResult<()> {
        self.inner.close().await
    }

    async fn declare_exchange(&self, exchange: &str) -> SchedulerResult<()> {
        self.inner.declare_exchange(exchange).await
    }

    async fn declare_queue(&self, queue: &str, options: &QueueOptions) -> SchedulerResult<()> {
        self.inner.declare_queue(queue, options).await
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        binding_key: &str,
    ) -> SchedulerResult<()> {
        self.inner.bind_queue(queue, exchange, binding_key).await
    }

    async fn publish_message(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &Message,
        priority: Option<u8>,
    ) -> SchedulerResult<()> {
        let delay = *self.publish_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(SchedulerError::MessageQueue("模拟发布失败".to_string()));
        }

        self.inner
            .publish_message(exchange, routing_key, message, priority)
            .await?;
        self.published.lock().unwrap().push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            message: message.clone(),
            priority,
        });
        Ok(())
    }

    async fn consume_messages(
        &self,
        queue: &str,
        max_messages: usize,
    ) -> SchedulerResult<Vec<Delivery>> {
        self.inner.consume_messages(queue, max_messages).await
    }

    async fn ack_message(&self, delivery_tag: u64) -> SchedulerResult<()> {
        self.inner.ack_message(delivery_tag).await
    }

    async fn nack_message(&self, delivery_tag: u64, requeue: bool) -> SchedulerResult<()> {
        self.inner.nack_message(delivery_tag, requeue).await
    }

    async fn get_queue_size(&self, queue: &str) -> SchedulerResult<u32> {
        self.inner.get_queue_size(queue).await
    }
}
