//! Integration test helpers

use std::sync::Arc;

use smart_queue_core::{
    config::{DispatcherConfig, MessageQueueConfig, MessageQueueType},
    AttemptEventMessage, JobDispatchMessage, JobStore, Message, MessageQueue, MessageType,
    SchedulerResult,
};
use smart_queue_infrastructure::{declare_job_topology, InMemoryJobStore};

use crate::mocks::MockMessageQueue;

/// 内存存储 + 可注入故障的消息队列，拓扑已声明
pub struct TestHarness {
    pub store: Arc<InMemoryJobStore>,
    pub queue: Arc<MockMessageQueue>,
    pub queue_config: MessageQueueConfig,
    pub dispatcher_config: DispatcherConfig,
}

impl TestHarness {
    pub async fn new() -> Self {
        let queue_config = MessageQueueConfig {
            r#type: MessageQueueType::InMemory,
            publish_timeout_seconds: 1,
            ..Default::default()
        };
        let queue = Arc::new(MockMessageQueue::new());
        declare_job_topology(queue.as_ref(), &queue_config)
            .await
            .expect("declare topology");

        Self {
            store: Arc::new(InMemoryJobStore::new()),
            queue,
            queue_config,
            dispatcher_config: DispatcherConfig::default(),
        }
    }

    pub fn job_store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    pub fn message_queue(&self) -> Arc<dyn MessageQueue> {
        self.queue.clone()
    }

    /// 按优先级顺序取出派发队列中的全部消息并确认
    pub async fn drain_dispatch_queue(&self) -> SchedulerResult<Vec<JobDispatchMessage>> {
        let deliveries = self
            .queue
            .consume_messages(&self.queue_config.dispatch_queue, usize::MAX)
            .await?;
        let mut messages = Vec::with_capacity(deliveries.len());
        for delivery in deliveries {
            if let MessageType::JobDispatch(msg) = delivery.decode()?.message_type {
                messages.push(msg);
            }
            self.queue.ack_message(delivery.delivery_tag).await?;
        }
        Ok(messages)
    }

    /// 以执行端身份发布尝试事件
    pub async fn publish_event(&self, event: AttemptEventMessage) -> SchedulerResult<()> {
        let message = Message::attempt_event(event);
        self.queue
            .publish_message(
                &self.queue_config.outcome_exchange,
                &message.routing_key(&self.queue_config.outcome_routing_prefix),
                &message,
                None,
            )
            .await
    }

    pub async fn outcome_queue_size(&self) -> u32 {
        self.queue
            .get_queue_size(&self.queue_config.outcome_queue)
            .await
            .unwrap_or_default()
    }
}
