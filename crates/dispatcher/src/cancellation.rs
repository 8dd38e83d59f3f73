use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use smart_queue_core::{CancelError, Job, JobStatus, JobStore, SchedulerError, SchedulerResult};
use smart_queue_infrastructure::{MetricsCollector, StructuredLogger};

/// 条件更新失败后重新读取状态的次数
const CANCEL_ATTEMPTS: usize = 2;

/// 取消守卫
///
/// 只有 `waiting` / `queued` 且没有未结束依赖方的作业可以取消。
pub struct CancellationGuard {
    job_store: Arc<dyn JobStore>,
    metrics: MetricsCollector,
}

impl CancellationGuard {
    pub fn new(job_store: Arc<dyn JobStore>) -> Self {
        Self {
            job_store,
            metrics: MetricsCollector::new(),
        }
    }

    pub async fn cancel(&self, job_id: Uuid) -> SchedulerResult<Job> {
        for _ in 0..CANCEL_ATTEMPTS {
            let job = self
                .job_store
                .get_job(job_id)
                .await?
                .ok_or(SchedulerError::JobNotFound { job_id })?;
            self.check_cancellable(&job).await?;

            if let Some(cancelled) = self.job_store.cancel_job(job_id, job.status).await? {
                StructuredLogger::log_job_cancelled(job_id, job.status);
                self.metrics.record_job_cancelled();
                return Ok(cancelled);
            }
            // 状态或依赖方在读取后发生了变化，重新判断
            debug!("作业 {} 取消时状态已变化，重新检查", job_id);
        }

        let job = self
            .job_store
            .get_job(job_id)
            .await?
            .ok_or(SchedulerError::JobNotFound { job_id })?;
        self.check_cancellable(&job).await?;
        info!("作业 {} 状态持续变化，放弃取消", job_id);
        Err(SchedulerError::Internal(format!(
            "作业 {job_id} 取消时发生并发修改"
        )))
    }

    async fn check_cancellable(&self, job: &Job) -> SchedulerResult<()> {
        if job.status.is_terminal() {
            return Err(CancelError::AlreadyTerminal { status: job.status }.into());
        }
        if job.status == JobStatus::Running {
            return Err(CancelError::NotCancellable { status: job.status }.into());
        }

        let dependants: Vec<Uuid> = self
            .job_store
            .get_dependants(job.id)
            .await?
            .into_iter()
            .filter(|d| !d.status.is_terminal())
            .map(|d| d.job_id)
            .collect();
        if !dependants.is_empty() {
            return Err(CancelError::HasDependents { dependants }.into());
        }
        Ok(())
    }
}
