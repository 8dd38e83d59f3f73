use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use smart_queue_core::{Job, JobStore, SchedulerResult};

use crate::dependency_resolver::DependencyCheck;

/// 就绪作业扫描器
///
/// 按 (priority DESC, run_at ASC, id ASC) 分页读取到期作业并过滤依赖未满足的作业。
/// 被依赖阻塞的作业不会占满批次：最多翻 `max_pages` 页来凑满 `batch_size`。
pub struct ReadinessScanner {
    job_store: Arc<dyn JobStore>,
    dependency_check: Arc<dyn DependencyCheck>,
    batch_size: i64,
    max_pages: u32,
}

impl ReadinessScanner {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        dependency_check: Arc<dyn DependencyCheck>,
        batch_size: i64,
        max_pages: u32,
    ) -> Self {
        Self {
            job_store,
            dependency_check,
            batch_size: batch_size.max(1),
            max_pages: max_pages.max(1),
        }
    }

    pub async fn scan(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<Job>> {
        let mut ready = Vec::new();
        let mut cursor = None;

        for _ in 0..self.max_pages {
            let page = self
                .job_store
                .find_due_jobs(now, cursor.as_ref(), self.batch_size)
                .await?;
            let exhausted = (page.len() as i64) < self.batch_size;
            cursor = page.last().map(Job::scan_cursor);

            for job in page {
                match self.dependency_check.is_ready(&job).await {
                    Ok(true) => {
                        ready.push(job);
                        if ready.len() as i64 >= self.batch_size {
                            return Ok(ready);
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("检查作业 {} 的依赖失败，本轮跳过: {}", job.job_id, e);
                    }
                }
            }

            if exhausted {
                break;
            }
        }

        debug!("本次扫描找到 {} 个就绪作业", ready.len());
        Ok(ready)
    }
}
