pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use errors::{CancelError, SchedulerError, SchedulerResult};
pub use models::{
    AttemptDecision, AttemptEventKind, AttemptEventMessage, AttemptTransition, ExecutionLog, Job,
    JobDependency, JobDetails, JobDispatchMessage, JobFilter, JobPriority, JobStatus,
    JobSubmission, LinkedJob, Message, MessageType, NewExecutionLog, NewJob, RecordOutcome,
    ResourceRequirements, RetryConfig, ScanCursor,
};
pub use traits::{Delivery, JobStore, MessageQueue, QueueOptions};
