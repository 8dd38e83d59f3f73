use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, instrument, warn};

use smart_queue_core::{
    AttemptDecision, AttemptEventKind, AttemptEventMessage, Delivery, JobStatus, JobStore,
    MessageQueue, MessageType, NewExecutionLog, RecordOutcome, SchedulerError, SchedulerResult,
};
use smart_queue_infrastructure::{MetricsCollector, StructuredLogger};

use crate::retry_policy::RetryPolicy;

/// 并发修改导致条件更新失败时的重读次数
const MAX_CONFLICT_RETRIES: usize = 3;

/// 单个尝试事件的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// `queued -> running`
    Started,
    /// 过期或重复的开始事件
    StartIgnored,
    /// 日志已写入且作业进入新状态
    Applied(JobStatus),
    /// 日志已写入，作业状态不变（过期尝试或作业已结束）
    LoggedOnly,
    /// 该尝试已入库，重复投递被吸收
    Duplicate,
    /// 被对账重置的派发迟到的结果，不写日志，留给重新派发的同一尝试
    Abandoned,
    UnknownJob,
}

fn execution_log(event: &AttemptEventMessage) -> NewExecutionLog {
    NewExecutionLog {
        job_uuid: event.job_id,
        attempt_number: event.attempt_number,
        message: event.message.clone(),
        is_successful: event.kind == AttemptEventKind::Succeeded,
        results: event.result.clone(),
        resource_usage: event.resource_usage.clone(),
        execution_start_time: event.started_at,
        execution_end_time: event.finished_at,
        worker_id: event.worker_id.clone(),
    }
}

/// 执行日志消费者
///
/// 每条事件的日志写入与状态转换在同一事务中完成，成功入库后才确认消息。
pub struct ExecutionLogIngestor {
    job_store: Arc<dyn JobStore>,
    retry_policy: RetryPolicy,
    metrics: MetricsCollector,
}

impl ExecutionLogIngestor {
    pub fn new(job_store: Arc<dyn JobStore>, retry_policy: RetryPolicy) -> Self {
        Self {
            job_store,
            retry_policy,
            metrics: MetricsCollector::new(),
        }
    }

    #[instrument(skip(self, event), fields(job_id = %event.job_id, attempt = event.attempt_number))]
    pub async fn handle_event(
        &self,
        event: &AttemptEventMessage,
        now: DateTime<Utc>,
    ) -> SchedulerResult<IngestOutcome> {
        if event.attempt_number < 1 {
            return Err(SchedulerError::InvalidJobParams(format!(
                "无效的尝试编号: {}",
                event.attempt_number
            )));
        }

        match event.kind {
            AttemptEventKind::Started => self.handle_started(event).await,
            AttemptEventKind::Succeeded | AttemptEventKind::Failed => {
                self.handle_outcome(event, now).await
            }
        }
    }

    async fn handle_started(&self, event: &AttemptEventMessage) -> SchedulerResult<IngestOutcome> {
        match self
            .job_store
            .mark_running(event.job_id, event.attempt_number)
            .await?
        {
            Some(job) => {
                StructuredLogger::log_job_transition(
                    job.job_id,
                    JobStatus::Queued,
                    JobStatus::Running,
                    job.times_attempted,
                );
                Ok(IngestOutcome::Started)
            }
            None => {
                debug!("忽略过期的开始事件");
                Ok(IngestOutcome::StartIgnored)
            }
        }
    }

    async fn handle_outcome(
        &self,
        event: &AttemptEventMessage,
        now: DateTime<Utc>,
    ) -> SchedulerResult<IngestOutcome> {
        let log = execution_log(event);
        let succeeded = log.is_successful;

        for _ in 0..MAX_CONFLICT_RETRIES {
            let Some(job) = self.job_store.get_job(event.job_id).await? else {
                warn!("收到未知作业的执行事件: {}", event.job_id);
                return Ok(IngestOutcome::UnknownJob);
            };

            if job.status == JobStatus::Waiting && event.attempt_number == job.next_attempt_number()
            {
                // 派发超时后作业回到 waiting，重新派发仍使用该尝试编号
                StructuredLogger::log_stale_event(
                    job.job_id,
                    event.attempt_number,
                    job.status,
                    "派发已被对账重置，丢弃旧派发的执行结果",
                );
                self.metrics.record_attempt_outcome("abandoned");
                return Ok(IngestOutcome::Abandoned);
            }

            let current_attempt =
                job.status.accepts_outcome() && event.attempt_number == job.next_attempt_number();
            let transition = if current_attempt {
                let transition = self.retry_policy.on_attempt_outcome(
                    &job,
                    succeeded,
                    event.result.clone(),
                    now,
                );
                job.status
                    .ensure_transition(transition.decision.target_status())?;
                Some(transition)
            } else {
                None
            };

            match self
                .job_store
                .record_attempt(&log, transition.as_ref())
                .await?
            {
                RecordOutcome::Applied(updated) => {
                    StructuredLogger::log_job_transition(
                        updated.job_id,
                        job.status,
                        updated.status,
                        updated.times_attempted,
                    );
                    if let Some(AttemptDecision::Retry {
                        run_at,
                        delay_seconds,
                        ..
                    }) = transition.as_ref().map(|t| &t.decision)
                    {
                        StructuredLogger::log_retry_scheduled(
                            updated.job_id,
                            event.attempt_number,
                            *delay_seconds,
                            *run_at,
                        );
                    }
                    if let Some(duration) = log.duration_seconds() {
                        self.metrics.record_attempt_duration(duration);
                    }
                    let label = match updated.status {
                        JobStatus::Waiting => "retry",
                        other => other.as_str(),
                    };
                    self.metrics.record_attempt_outcome(label);
                    return Ok(IngestOutcome::Applied(updated.status));
                }
                RecordOutcome::LoggedOnly => {
                    StructuredLogger::log_stale_event(
                        job.job_id,
                        event.attempt_number,
                        job.status,
                        "尝试编号不是当前尝试或作业不接受执行结果",
                    );
                    self.metrics.record_attempt_outcome("logged_only");
                    return Ok(IngestOutcome::LoggedOnly);
                }
                RecordOutcome::Duplicate => {
                    debug!("重复投递的执行事件已吸收");
                    self.metrics.record_attempt_outcome("duplicate");
                    return Ok(IngestOutcome::Duplicate);
                }
                RecordOutcome::Conflict => {
                    debug!("作业 {} 状态被并发修改，重新读取", job.job_id);
                }
            }
        }

        Err(SchedulerError::DatabaseOperation(format!(
            "作业 {} 的执行事件多次遇到并发冲突",
            event.job_id
        )))
    }

    /// 处理一条投递并确认：解析失败的消息直接丢弃，瞬时错误重新入队
    pub async fn process_delivery(
        &self,
        message_queue: &dyn MessageQueue,
        delivery: &Delivery,
    ) -> SchedulerResult<Option<IngestOutcome>> {
        let event = match delivery.decode().map(|m| m.message_type) {
            Ok(MessageType::AttemptEvent(event)) => event,
            Ok(other) => {
                warn!("执行事件队列收到非预期消息: {:?}", other);
                message_queue
                    .nack_message(delivery.delivery_tag, false)
                    .await?;
                return Ok(None);
            }
            Err(e) => {
                warn!("无法解析执行事件，已丢弃: {}", e);
                message_queue
                    .nack_message(delivery.delivery_tag, false)
                    .await?;
                return Ok(None);
            }
        };

        match self.handle_event(&event, Utc::now()).await {
            Ok(outcome) => {
                message_queue.ack_message(delivery.delivery_tag).await?;
                Ok(Some(outcome))
            }
            Err(e) if e.is_transient() => {
                warn!("处理执行事件失败，重新入队: {}", e);
                message_queue
                    .nack_message(delivery.delivery_tag, true)
                    .await?;
                Ok(None)
            }
            Err(e) => {
                error!("执行事件无法处理，已丢弃: {}", e);
                message_queue
                    .nack_message(delivery.delivery_tag, false)
                    .await?;
                Ok(None)
            }
        }
    }

    /// 拉取并处理一批执行事件，返回处理的消息数
    pub async fn poll_once(
        &self,
        message_queue: &dyn MessageQueue,
        queue: &str,
        batch_size: usize,
    ) -> SchedulerResult<usize> {
        let deliveries = message_queue.consume_messages(queue, batch_size).await?;
        let count = deliveries.len();
        for delivery in &deliveries {
            self.process_delivery(message_queue, delivery).await?;
        }
        Ok(count)
    }
}
