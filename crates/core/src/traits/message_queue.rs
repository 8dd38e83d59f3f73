use async_trait::async_trait;

use crate::errors::{SchedulerError, SchedulerResult};
use crate::models::Message;

/// 队列声明参数
#[derive(Debug, Clone, Default)]
pub struct QueueOptions {
    pub durable: bool,
    /// 开启优先级队列时的最大优先级
    pub max_priority: Option<u8>,
}

/// 消费到的一条待确认消息
#[derive(Debug, Clone)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub payload: Vec<u8>,
    pub redelivered: bool,
}

impl Delivery {
    pub fn decode(&self) -> SchedulerResult<Message> {
        Message::deserialize_bytes(&self.payload)
            .map_err(|e| SchedulerError::Serialization(format!("反序列化消息失败: {e}")))
    }
}

/// 消息队列接口
///
/// 连接句柄由各组件显式持有；`connect` 可重复调用，已连接时为空操作。
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn connect(&self) -> SchedulerResult<()>;

    async fn is_connected(&self) -> bool;

    async fn close(&self) -> SchedulerResult<()>;

    /// 声明主题交换机
    async fn declare_exchange(&self, exchange: &str) -> SchedulerResult<()>;

    async fn declare_queue(&self, queue: &str, options: &QueueOptions) -> SchedulerResult<()>;

    async fn bind_queue(&self, queue: &str, exchange: &str, binding_key: &str)
        -> SchedulerResult<()>;

    /// 发布持久化消息，返回前等待broker确认
    async fn publish_message(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &Message,
        priority: Option<u8>,
    ) -> SchedulerResult<()>;

    /// 拉取最多 `max_messages` 条消息，需显式确认
    async fn consume_messages(&self, queue: &str, max_messages: usize)
        -> SchedulerResult<Vec<Delivery>>;

    async fn ack_message(&self, delivery_tag: u64) -> SchedulerResult<()>;

    async fn nack_message(&self, delivery_tag: u64, requeue: bool) -> SchedulerResult<()>;

    async fn get_queue_size(&self, queue: &str) -> SchedulerResult<u32>;
}
