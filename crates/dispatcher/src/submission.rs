use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use smart_queue_core::{
    ExecutionLog, Job, JobDetails, JobFilter, JobStore, JobSubmission, NewJob, SchedulerError,
    SchedulerResult,
};
use smart_queue_infrastructure::{MetricsCollector, StructuredLogger};

use crate::cancellation::CancellationGuard;

/// 对一批新作业按依赖做拓扑排序，被依赖的作业排在前面
///
/// 已存在的作业不可能依赖尚未创建的作业，因此环只能经过本批次内的边。
pub fn topological_order(jobs: Vec<NewJob>) -> SchedulerResult<Vec<NewJob>> {
    let mut index: HashMap<Uuid, usize> = HashMap::with_capacity(jobs.len());
    for (i, job) in jobs.iter().enumerate() {
        if index.insert(job.job_id, i).is_some() {
            return Err(SchedulerError::InvalidJobParams(format!(
                "批次中作业ID重复: {}",
                job.job_id
            )));
        }
        if job.depends_on.contains(&job.job_id) {
            return Err(SchedulerError::DependencyCycle {
                path: vec![job.job_id, job.job_id],
            });
        }
    }

    let mut in_degree = vec![0usize; jobs.len()];
    let mut dependants: Vec<Vec<usize>> = vec![Vec::new(); jobs.len()];
    for (i, job) in jobs.iter().enumerate() {
        for dep in &job.depends_on {
            if let Some(&d) = index.get(dep) {
                in_degree[i] += 1;
                dependants[d].push(i);
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..jobs.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(jobs.len());
    while let Some(i) = queue.pop_front() {
        order.push(i);
        for &next in &dependants[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() < jobs.len() {
        let remaining: HashSet<usize> = (0..jobs.len()).filter(|&i| in_degree[i] > 0).collect();
        return Err(SchedulerError::DependencyCycle {
            path: find_cycle(&jobs, &index, &remaining),
        });
    }

    let mut slots: Vec<Option<NewJob>> = jobs.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

/// 在剩余节点中沿依赖边前进直到重复访问，返回闭合路径
fn find_cycle(jobs: &[NewJob], index: &HashMap<Uuid, usize>, remaining: &HashSet<usize>) -> Vec<Uuid> {
    let Some(&start) = remaining.iter().min() else {
        return Vec::new();
    };
    let mut path = vec![start];
    let mut seen: HashMap<usize, usize> = HashMap::from([(start, 0)]);
    let mut current = start;

    loop {
        let next = jobs[current]
            .depends_on
            .iter()
            .filter_map(|dep| index.get(dep).copied())
            .find(|i| remaining.contains(i));
        let Some(next) = next else {
            return path.iter().map(|&i| jobs[i].job_id).collect();
        };
        if let Some(&pos) = seen.get(&next) {
            let mut cycle: Vec<Uuid> = path[pos..].iter().map(|&i| jobs[i].job_id).collect();
            cycle.push(jobs[next].job_id);
            return cycle;
        }
        seen.insert(next, path.len());
        path.push(next);
        current = next;
    }
}

/// 作业提交与查询服务
pub struct JobService {
    job_store: Arc<dyn JobStore>,
    cancellation: CancellationGuard,
    metrics: MetricsCollector,
}

impl JobService {
    pub fn new(job_store: Arc<dyn JobStore>) -> Self {
        Self {
            cancellation: CancellationGuard::new(job_store.clone()),
            job_store,
            metrics: MetricsCollector::new(),
        }
    }

    pub async fn submit(&self, submission: JobSubmission) -> SchedulerResult<Job> {
        let mut jobs = self.submit_batch(vec![submission]).await?;
        jobs.pop()
            .ok_or_else(|| SchedulerError::Internal("提交结果为空".to_string()))
    }

    /// 原子提交一组可以互相引用的作业，返回顺序与提交顺序一致
    pub async fn submit_batch(&self, submissions: Vec<JobSubmission>) -> SchedulerResult<Vec<Job>> {
        if submissions.is_empty() {
            return Ok(Vec::new());
        }
        for submission in &submissions {
            submission.validate()?;
        }

        let now = Utc::now();
        let resolved: Vec<NewJob> = submissions.into_iter().map(|s| s.resolve(now)).collect();
        let submitted_order: Vec<Uuid> = resolved.iter().map(|j| j.job_id).collect();
        let ordered = topological_order(resolved)?;

        let created = self.job_store.create_jobs(&ordered).await?;
        for job in &created {
            StructuredLogger::log_job_submitted(job.job_id, &job.job_name, job.priority, job.run_at);
        }
        self.metrics.record_jobs_submitted(created.len());
        info!("提交作业 {} 个", created.len());

        let mut by_id: HashMap<Uuid, Job> = created.into_iter().map(|j| (j.job_id, j)).collect();
        Ok(submitted_order
            .iter()
            .filter_map(|id| by_id.remove(id))
            .collect())
    }

    pub async fn get_job(&self, job_id: Uuid) -> SchedulerResult<JobDetails> {
        let job = self.require_job(job_id).await?;
        let depends_on = self
            .job_store
            .get_dependencies(job.id)
            .await?
            .into_iter()
            .map(|d| d.job_id)
            .collect();
        Ok(JobDetails { job, depends_on })
    }

    /// 批量查询，跳过不存在的ID，按创建顺序返回
    pub async fn get_jobs(&self, job_ids: &[Uuid]) -> SchedulerResult<Vec<Job>> {
        self.job_store.get_jobs(job_ids).await
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> SchedulerResult<Vec<Job>> {
        self.job_store.list_jobs(filter).await
    }

    /// 按尝试编号升序
    pub async fn list_logs(&self, job_id: Uuid) -> SchedulerResult<Vec<ExecutionLog>> {
        let job = self.require_job(job_id).await?;
        self.job_store.list_logs(job.id).await
    }

    /// 实时通知的轮询入口
    pub async fn list_logs_after(
        &self,
        last_log_id: Option<i64>,
        limit: i64,
    ) -> SchedulerResult<Vec<ExecutionLog>> {
        self.job_store.list_logs_after(last_log_id, limit).await
    }

    pub async fn cancel(&self, job_id: Uuid) -> SchedulerResult<Job> {
        self.cancellation.cancel(job_id).await
    }

    async fn require_job(&self, job_id: Uuid) -> SchedulerResult<Job> {
        self.job_store
            .get_job(job_id)
            .await?
            .ok_or(SchedulerError::JobNotFound { job_id })
    }
}
