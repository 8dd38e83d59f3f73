pub mod job_store;
pub mod message_queue;

pub use job_store::JobStore;
pub use message_queue::{Delivery, MessageQueue, QueueOptions};
