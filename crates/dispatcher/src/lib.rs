//! 作业调度与派发引擎
//!
//! 就绪扫描、认领派发、重试退避、取消守卫、执行日志消费和对账任务。

pub mod cancellation;
pub mod coordinator;
pub mod dependency_resolver;
pub mod ingestor;
pub mod priority;
pub mod reconciliation;
pub mod retry_policy;
pub mod scanner;
pub mod scheduler;
pub mod submission;

pub use cancellation::CancellationGuard;
pub use coordinator::ClaimAndPublishCoordinator;
pub use dependency_resolver::{DependencyCheck, DependencyResolver};
pub use ingestor::{ExecutionLogIngestor, IngestOutcome};
pub use priority::PriorityMapper;
pub use reconciliation::{ReconcileReport, ReconciliationSweep};
pub use retry_policy::RetryPolicy;
pub use scanner::ReadinessScanner;
pub use scheduler::{
    run_ingestor_loop, run_reconciliation_loop, run_scheduler_loop, DispatchScheduler,
    DispatcherComponents, TickReport,
};
pub use submission::{topological_order, JobService};
