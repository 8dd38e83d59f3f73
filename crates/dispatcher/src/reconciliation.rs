use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use smart_queue_core::{
    AttemptEventKind, AttemptEventMessage, Job, JobStore, ResourceRequirements, SchedulerResult,
};
use smart_queue_infrastructure::MetricsCollector;

use crate::ingestor::{ExecutionLogIngestor, IngestOutcome};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// 派发超时后重置为 `waiting` 的作业
    pub requeued: usize,
    /// 执行超时并按失败处理的作业
    pub timed_out: usize,
}

/// 对账任务：回收派发后失联的作业，以及执行超时未上报结果的尝试
pub struct ReconciliationSweep {
    job_store: Arc<dyn JobStore>,
    ingestor: Arc<ExecutionLogIngestor>,
    dispatch_timeout: Duration,
    default_attempt_timeout_seconds: i64,
    batch_limit: i64,
    metrics: MetricsCollector,
}

impl ReconciliationSweep {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        ingestor: Arc<ExecutionLogIngestor>,
        dispatch_timeout_seconds: i64,
        default_attempt_timeout_seconds: i64,
        batch_limit: i64,
    ) -> Self {
        Self {
            job_store,
            ingestor,
            dispatch_timeout: Duration::seconds(dispatch_timeout_seconds),
            default_attempt_timeout_seconds,
            batch_limit: batch_limit.max(1),
            metrics: MetricsCollector::new(),
        }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> SchedulerResult<ReconcileReport> {
        let requeued = self
            .job_store
            .requeue_stale_dispatches(now - self.dispatch_timeout, self.batch_limit)
            .await?;
        for job in &requeued {
            warn!(
                "作业 {} 派发后超过 {} 秒未开始执行，已重置为等待",
                job.job_id,
                self.dispatch_timeout.num_seconds()
            );
        }

        let stuck = self
            .job_store
            .find_timed_out_attempts(now, self.default_attempt_timeout_seconds, self.batch_limit)
            .await?;
        let mut timed_out = 0;
        for job in &stuck {
            match self.ingestor.handle_event(&timeout_event(job, now), now).await {
                Ok(IngestOutcome::Applied(status)) => {
                    warn!("作业 {} 执行超时，按失败处理，新状态: {}", job.job_id, status);
                    timed_out += 1;
                }
                Ok(outcome) => {
                    info!("作业 {} 超时处理被跳过: {:?}", job.job_id, outcome);
                }
                Err(e) => {
                    warn!("处理作业 {} 执行超时失败: {}", job.job_id, e);
                }
            }
        }

        let report = ReconcileReport {
            requeued: requeued.len(),
            timed_out,
        };
        if report != ReconcileReport::default() {
            self.metrics.record_reconciled("stale_dispatch", report.requeued);
            self.metrics.record_reconciled("attempt_timeout", report.timed_out);
            info!(
                "对账完成: 重置 {} 个派发, {} 个执行超时",
                report.requeued, report.timed_out
            );
        }
        Ok(report)
    }
}

fn timeout_event(job: &Job, now: DateTime<Utc>) -> AttemptEventMessage {
    AttemptEventMessage {
        job_id: job.job_id,
        attempt_number: job.next_attempt_number(),
        kind: AttemptEventKind::Failed,
        started_at: job.started_at,
        finished_at: Some(now),
        result: Some(serde_json::json!({ "error": "attempt timed out" })),
        message: "执行超时".to_string(),
        worker_id: None,
        resource_usage: ResourceRequirements::default(),
    }
}
