//! 基础设施层：作业存储、消息队列和可观测性实现

pub mod database;
pub mod in_memory_queue;
pub mod message_queue;
pub mod message_queue_factory;
pub mod observability;

pub use database::{DatabaseManager, DatabasePool, InMemoryJobStore, PostgresJobStore};
pub use in_memory_queue::InMemoryMessageQueue;
pub use message_queue::{mask_amqp_url, RabbitMQMessageQueue};
pub use message_queue_factory::{declare_job_topology, MessageQueueFactory};
pub use observability::{MetricsCollector, StructuredLogger};
