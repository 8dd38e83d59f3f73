pub mod app_config;
pub mod database;
pub mod dispatcher;
pub mod message_queue;
pub mod observability;

// Re-export main types for easier imports
pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use dispatcher::{DispatcherConfig, PriorityMapConfig, MAX_BACKOFF_LIMIT_SECONDS};
pub use message_queue::{MessageQueueConfig, MessageQueueType};
pub use observability::ObservabilityConfig;
