use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use smart_queue_core::{
    config::{DispatcherConfig, MessageQueueConfig},
    JobStore, MessageQueue, SchedulerError, SchedulerResult,
};
use smart_queue_infrastructure::MetricsCollector;

use crate::coordinator::ClaimAndPublishCoordinator;
use crate::dependency_resolver::DependencyResolver;
use crate::ingestor::ExecutionLogIngestor;
use crate::priority::PriorityMapper;
use crate::reconciliation::ReconciliationSweep;
use crate::retry_policy::RetryPolicy;
use crate::scanner::ReadinessScanner;

/// 单次调度周期的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub ready: usize,
    pub dispatched: Vec<uuid::Uuid>,
    pub conflicts: usize,
    pub faults: usize,
}

/// 调度循环：扫描就绪作业并逐个认领派发
///
/// 单个作业的错误被隔离，不会中断本周期内其余作业。
pub struct DispatchScheduler {
    scanner: ReadinessScanner,
    coordinator: ClaimAndPublishCoordinator,
    metrics: MetricsCollector,
}

impl DispatchScheduler {
    pub fn new(scanner: ReadinessScanner, coordinator: ClaimAndPublishCoordinator) -> Self {
        Self {
            scanner,
            coordinator,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn instance_id(&self) -> &str {
        self.coordinator.instance_id()
    }

    #[instrument(skip(self), fields(instance = %self.instance_id()))]
    pub async fn tick(&self, now: DateTime<Utc>) -> SchedulerResult<TickReport> {
        let started = Instant::now();
        let ready = self.scanner.scan(now).await?;
        self.metrics.update_ready_jobs(ready.len());

        let mut report = TickReport {
            ready: ready.len(),
            ..Default::default()
        };

        for job in &ready {
            match self.coordinator.claim_and_dispatch(job).await {
                Ok(claimed) => report.dispatched.push(claimed.job_id),
                Err(SchedulerError::ClaimConflict { job_id }) => {
                    debug!("作业 {} 已被其他实例认领，跳过", job_id);
                    report.conflicts += 1;
                }
                Err(e @ SchedulerError::DispatchFault(_)) => {
                    warn!("{}", e);
                    report.faults += 1;
                }
                Err(e) => {
                    error!("派发作业 {} 失败: {}", job.job_id, e);
                    report.faults += 1;
                }
            }
        }

        self.metrics
            .record_tick_duration(started.elapsed().as_secs_f64());
        if !report.dispatched.is_empty() || report.faults > 0 {
            info!(
                "调度周期完成: 就绪 {}, 派发 {}, 冲突 {}, 故障 {}",
                report.ready,
                report.dispatched.len(),
                report.conflicts,
                report.faults
            );
        }
        Ok(report)
    }
}

/// 调度引擎各组件的组装
pub struct DispatcherComponents {
    pub scheduler: Arc<DispatchScheduler>,
    pub ingestor: Arc<ExecutionLogIngestor>,
    pub reconciliation: Arc<ReconciliationSweep>,
}

impl DispatcherComponents {
    pub fn build(
        job_store: Arc<dyn JobStore>,
        message_queue: Arc<dyn MessageQueue>,
        dispatcher_config: &DispatcherConfig,
        queue_config: &MessageQueueConfig,
        instance_id: &str,
    ) -> SchedulerResult<Self> {
        let mapper = PriorityMapper::new(
            dispatcher_config.priority_map.clone(),
            queue_config.max_priority,
        )?;
        let resolver = Arc::new(DependencyResolver::new(job_store.clone()));
        let scanner = ReadinessScanner::new(
            job_store.clone(),
            resolver,
            dispatcher_config.scan_batch_size,
            dispatcher_config.max_scan_pages,
        );
        let coordinator = ClaimAndPublishCoordinator::new(
            job_store.clone(),
            message_queue,
            mapper,
            instance_id,
            queue_config,
        );
        let ingestor = Arc::new(ExecutionLogIngestor::new(
            job_store.clone(),
            RetryPolicy::new(dispatcher_config.max_backoff_seconds),
        ));
        let reconciliation = Arc::new(ReconciliationSweep::new(
            job_store,
            ingestor.clone(),
            dispatcher_config.dispatch_timeout_seconds,
            dispatcher_config.default_attempt_timeout_seconds,
            dispatcher_config.scan_batch_size,
        ));

        Ok(Self {
            scheduler: Arc::new(DispatchScheduler::new(scanner, coordinator)),
            ingestor,
            reconciliation,
        })
    }
}

/// 定时运行调度周期直到收到关闭信号
pub async fn run_scheduler_loop(
    scheduler: Arc<DispatchScheduler>,
    interval_seconds: u64,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = scheduler.tick(Utc::now()).await {
                    error!("调度周期失败，下个周期重试: {}", e);
                }
            }
            _ = shutdown_rx.recv() => {
                info!("调度器循环收到关闭信号");
                break;
            }
        }
    }
}

/// 持续消费执行事件队列，队列为空时等待一个轮询间隔
pub async fn run_ingestor_loop(
    ingestor: Arc<ExecutionLogIngestor>,
    message_queue: Arc<dyn MessageQueue>,
    queue_config: MessageQueueConfig,
    poll_interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        if !matches!(
            shutdown_rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ) {
            info!("执行事件消费循环收到关闭信号");
            break;
        }

        let processed = match ingestor
            .poll_once(
                message_queue.as_ref(),
                &queue_config.outcome_queue,
                queue_config.consumer_batch_size,
            )
            .await
        {
            Ok(count) => count,
            Err(e) => {
                error!("消费执行事件失败: {}", e);
                if !message_queue.is_connected().await {
                    if let Err(e) = message_queue.connect().await {
                        error!("重新连接消息队列失败: {}", e);
                    }
                }
                0
            }
        };

        if processed > 0 {
            continue;
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = shutdown_rx.recv() => {
                info!("执行事件消费循环收到关闭信号");
                break;
            }
        }
    }
}

/// 定时运行对账任务
pub async fn run_reconciliation_loop(
    reconciliation: Arc<ReconciliationSweep>,
    interval_seconds: u64,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = reconciliation.sweep(Utc::now()).await {
                    error!("对账失败: {}", e);
                }
            }
            _ = shutdown_rx.recv() => {
                info!("对账循环收到关闭信号");
                break;
            }
        }
    }
}
