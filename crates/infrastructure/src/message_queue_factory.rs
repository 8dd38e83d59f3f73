use std::sync::Arc;

use smart_queue_core::{
    config::{MessageQueueConfig, MessageQueueType},
    traits::{MessageQueue, QueueOptions},
    SchedulerError, SchedulerResult,
};
use tracing::{debug, info};

use crate::{InMemoryMessageQueue, RabbitMQMessageQueue};

pub struct MessageQueueFactory;

impl MessageQueueFactory {
    /// 按配置创建并连接消息队列
    pub async fn create(config: &MessageQueueConfig) -> SchedulerResult<Arc<dyn MessageQueue>> {
        Self::validate_config(config)?;
        debug!("Creating message queue with type: {:?}", config.r#type);

        match config.r#type {
            MessageQueueType::Rabbitmq => {
                info!("初始化RabbitMQ消息队列");
                let rabbitmq = RabbitMQMessageQueue::connect_new(config.clone()).await?;
                Ok(Arc::new(rabbitmq))
            }
            MessageQueueType::InMemory => {
                info!("初始化内存消息队列");
                Ok(Arc::new(InMemoryMessageQueue::new()))
            }
        }
    }

    pub fn validate_config(config: &MessageQueueConfig) -> SchedulerResult<()> {
        if config.r#type == MessageQueueType::Rabbitmq
            && !config.url.starts_with("amqp://")
            && !config.url.starts_with("amqps://")
        {
            return Err(SchedulerError::Configuration(
                "RabbitMQ URL必须以amqp://或amqps://开头".to_string(),
            ));
        }
        Ok(())
    }
}

/// 声明派发与执行事件两套主题拓扑，可重复调用
pub async fn declare_job_topology(
    queue: &dyn MessageQueue,
    config: &MessageQueueConfig,
) -> SchedulerResult<()> {
    queue.declare_exchange(&config.dispatch_exchange).await?;
    queue
        .declare_queue(
            &config.dispatch_queue,
            &QueueOptions {
                durable: true,
                max_priority: Some(config.max_priority),
            },
        )
        .await?;
    queue
        .bind_queue(
            &config.dispatch_queue,
            &config.dispatch_exchange,
            &config.dispatch_binding_key(),
        )
        .await?;

    queue.declare_exchange(&config.outcome_exchange).await?;
    queue
        .declare_queue(
            &config.outcome_queue,
            &QueueOptions {
                durable: true,
                max_priority: None,
            },
        )
        .await?;
    queue
        .bind_queue(
            &config.outcome_queue,
            &config.outcome_exchange,
            &config.outcome_binding_key(),
        )
        .await?;

    info!(
        "消息拓扑已就绪: {} -> {}, {} -> {}",
        config.dispatch_exchange,
        config.dispatch_queue,
        config.outcome_exchange,
        config.outcome_queue
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use smart_queue_core::{AttemptEventKind, AttemptEventMessage, Message, ResourceRequirements};
    use uuid::Uuid;

    fn in_memory_config() -> MessageQueueConfig {
        MessageQueueConfig {
            r#type: MessageQueueType::InMemory,
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_rejects_non_amqp_url() {
        let config = MessageQueueConfig {
            url: "redis://localhost".to_string(),
            ..Default::default()
        };
        assert!(MessageQueueFactory::validate_config(&config).is_err());
        assert!(MessageQueueFactory::validate_config(&in_memory_config()).is_ok());
    }

    #[tokio::test]
    async fn test_topology_routes_outcome_events() {
        let config = in_memory_config();
        let queue = MessageQueueFactory::create(&config).await.unwrap();
        declare_job_topology(queue.as_ref(), &config).await.unwrap();
        // 重复声明不报错
        declare_job_topology(queue.as_ref(), &config).await.unwrap();

        let message = Message::attempt_event(AttemptEventMessage {
            job_id: Uuid::new_v4(),
            attempt_number: 1,
            kind: AttemptEventKind::Started,
            started_at: None,
            finished_at: None,
            result: None,
            message: String::new(),
            worker_id: None,
            resource_usage: ResourceRequirements::default(),
        });
        queue
            .publish_message(
                &config.outcome_exchange,
                &message.routing_key(&config.outcome_routing_prefix),
                &message,
                None,
            )
            .await
            .unwrap();

        assert_eq!(queue.get_queue_size(&config.outcome_queue).await.unwrap(), 1);
        assert_eq!(queue.get_queue_size(&config.dispatch_queue).await.unwrap(), 0);
    }
}
