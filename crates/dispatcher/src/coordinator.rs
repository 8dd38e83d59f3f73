use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use smart_queue_core::{
    config::MessageQueueConfig, Job, JobDispatchMessage, JobStore, Message, MessageQueue,
    SchedulerError, SchedulerResult,
};
use smart_queue_infrastructure::{MetricsCollector, StructuredLogger};

use crate::priority::PriorityMapper;

/// 认领并派发
///
/// 认领是存储上的条件更新（`waiting -> queued`），多个调度实例竞争同一作业时只有一个成功。
/// 认领成功后发布失败或超时，作业保持 `queued`，由对账任务在派发超时后重置。
pub struct ClaimAndPublishCoordinator {
    job_store: Arc<dyn JobStore>,
    message_queue: Arc<dyn MessageQueue>,
    priority_mapper: PriorityMapper,
    instance_id: String,
    dispatch_exchange: String,
    routing_prefix: String,
    publish_timeout: Duration,
    metrics: MetricsCollector,
}

impl ClaimAndPublishCoordinator {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        message_queue: Arc<dyn MessageQueue>,
        priority_mapper: PriorityMapper,
        instance_id: impl Into<String>,
        queue_config: &MessageQueueConfig,
    ) -> Self {
        Self {
            job_store,
            message_queue,
            priority_mapper,
            instance_id: instance_id.into(),
            dispatch_exchange: queue_config.dispatch_exchange.clone(),
            routing_prefix: queue_config.dispatch_routing_prefix.clone(),
            publish_timeout: Duration::from_secs(queue_config.publish_timeout_seconds),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// 返回认领后的作业；被其他实例抢先时返回 `ClaimConflict`
    #[instrument(skip(self, job), fields(job_id = %job.job_id))]
    pub async fn claim_and_dispatch(&self, job: &Job) -> SchedulerResult<Job> {
        let claimed = self
            .job_store
            .claim_job(job.job_id, &self.instance_id)
            .await?
            .ok_or_else(|| {
                self.metrics.record_claim_conflict();
                SchedulerError::ClaimConflict { job_id: job.job_id }
            })?;

        let dispatch_priority = self.priority_mapper.map(claimed.priority);
        let message = Message::job_dispatch(JobDispatchMessage::from_claimed(
            &claimed,
            dispatch_priority,
        ));
        let routing_key = message.routing_key(&self.routing_prefix);

        let publish = self.message_queue.publish_message(
            &self.dispatch_exchange,
            &routing_key,
            &message,
            Some(dispatch_priority),
        );

        match tokio::time::timeout(self.publish_timeout, publish).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("作业 {} 已认领但发布失败，等待对账: {}", claimed.job_id, e);
                self.metrics.record_dispatch_fault();
                return Err(SchedulerError::DispatchFault(format!(
                    "发布作业 {} 失败: {e}",
                    claimed.job_id
                )));
            }
            Err(_) => {
                warn!("作业 {} 已认领但发布超时，等待对账", claimed.job_id);
                self.metrics.record_dispatch_fault();
                return Err(SchedulerError::DispatchFault(format!(
                    "发布作业 {} 超时 ({:?})",
                    claimed.job_id, self.publish_timeout
                )));
            }
        }

        StructuredLogger::log_job_dispatched(
            claimed.job_id,
            claimed.next_attempt_number(),
            dispatch_priority,
            &self.instance_id,
        );
        self.metrics
            .record_job_dispatched(&claimed.priority.to_string());
        debug!("作业 {} 派发到 {}", claimed.job_id, routing_key);
        Ok(claimed)
    }
}
