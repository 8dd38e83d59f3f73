use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use smart_queue_core::{Job, JobStatus, JobStore, SchedulerResult};

/// 依赖就绪判断
///
/// 只检查直接依赖。传递依赖之所以成立，是因为 `completed` 只会在一次成功的尝试后写入，
/// 而祖先作业自身在依赖满足前不会被派发。
#[async_trait]
pub trait DependencyCheck: Send + Sync {
    async fn is_ready(&self, job: &Job) -> SchedulerResult<bool>;
}

pub struct DependencyResolver {
    job_store: Arc<dyn JobStore>,
}

impl DependencyResolver {
    pub fn new(job_store: Arc<dyn JobStore>) -> Self {
        Self { job_store }
    }

    /// 尚未完成的直接依赖
    pub async fn blocking_dependencies(&self, job: &Job) -> SchedulerResult<Vec<uuid::Uuid>> {
        let dependencies = self.job_store.get_dependencies(job.id).await?;
        Ok(dependencies
            .into_iter()
            .filter(|d| d.status != JobStatus::Completed)
            .map(|d| d.job_id)
            .collect())
    }
}

#[async_trait]
impl DependencyCheck for DependencyResolver {
    async fn is_ready(&self, job: &Job) -> SchedulerResult<bool> {
        let blocking = self.blocking_dependencies(job).await?;
        if !blocking.is_empty() {
            debug!("作业 {} 仍在等待依赖: {:?}", job.job_id, blocking);
        }
        Ok(blocking.is_empty())
    }
}
