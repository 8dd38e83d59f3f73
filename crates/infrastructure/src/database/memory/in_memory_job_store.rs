use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use smart_queue_core::{
    AttemptTransition, ExecutionLog, Job, JobDependency, JobFilter, JobStatus, JobStore,
    LinkedJob, NewExecutionLog, NewJob, RecordOutcome, ScanCursor, SchedulerError,
    SchedulerResult,
};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// 进程内作业存储
///
/// 所有操作在同一把锁内完成，因此每个方法天然具备与数据库事务相同的原子性。
/// 用于嵌入式模式和测试。
#[derive(Default)]
pub struct InMemoryJobStore {
    state: Mutex<StoreState>,
}

#[derive(Default)]
struct StoreState {
    jobs: BTreeMap<i64, Job>,
    by_uuid: HashMap<Uuid, i64>,
    dependencies: Vec<JobDependency>,
    logs: Vec<ExecutionLog>,
    next_job_id: i64,
    next_dependency_id: i64,
    next_log_id: i64,
}

impl StoreState {
    fn job_mut(&mut self, job_id: Uuid) -> Option<&mut Job> {
        let id = *self.by_uuid.get(&job_id)?;
        self.jobs.get_mut(&id)
    }

    fn has_active_dependants(&self, job_id: i64) -> bool {
        self.dependencies
            .iter()
            .filter(|d| d.depends_on_id == job_id)
            .filter_map(|d| self.jobs.get(&d.dependant_id))
            .any(|dependant| !dependant.status.is_terminal())
    }

    fn linked(&self, dependency: &JobDependency, other: i64) -> Option<LinkedJob> {
        self.jobs.get(&other).map(|job| LinkedJob {
            dependency: dependency.clone(),
            job_id: job.job_id,
            status: job.status,
        })
    }

    fn validate_new_job(&self, new_job: &NewJob, batch: &HashMap<Uuid, i64>) -> SchedulerResult<()> {
        if self.by_uuid.contains_key(&new_job.job_id) || batch.contains_key(&new_job.job_id) {
            return Err(SchedulerError::InvalidJobParams(format!(
                "作业ID已存在: {}",
                new_job.job_id
            )));
        }
        for dependency in &new_job.depends_on {
            if batch.contains_key(dependency) {
                continue;
            }
            let id = self
                .by_uuid
                .get(dependency)
                .ok_or(SchedulerError::DependencyNotFound {
                    job_id: *dependency,
                })?;
            if let Some(job) = self.jobs.get(id) {
                if matches!(job.status, JobStatus::Failed | JobStatus::Cancelled) {
                    return Err(SchedulerError::InvalidJobParams(format!(
                        "依赖作业 {dependency} 已处于 {} 状态，无法再满足",
                        job.status
                    )));
                }
            }
        }
        Ok(())
    }
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn job_count(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    pub async fn log_count(&self) -> usize {
        self.state.lock().await.logs.len()
    }
}

fn sort_key(job: &Job) -> (std::cmp::Reverse<smart_queue_core::JobPriority>, DateTime<Utc>, i64) {
    (std::cmp::Reverse(job.priority), job.run_at, job.id)
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_jobs(&self, jobs: &[NewJob]) -> SchedulerResult<Vec<Job>> {
        let mut state = self.state.lock().await;

        // 先整体校验，保证失败时不产生部分写入
        let mut planned: HashMap<Uuid, i64> = HashMap::new();
        for (offset, new_job) in jobs.iter().enumerate() {
            state.validate_new_job(new_job, &planned)?;
            planned.insert(new_job.job_id, state.next_job_id + 1 + offset as i64);
        }

        let now = Utc::now();
        let mut created = Vec::with_capacity(jobs.len());
        for new_job in jobs {
            state.next_job_id += 1;
            let id = state.next_job_id;
            let job = Job {
                id,
                job_id: new_job.job_id,
                job_name: new_job.job_name.clone(),
                job_type: new_job.job_type.clone(),
                payload: new_job.payload.clone(),
                status: JobStatus::Waiting,
                priority: new_job.priority,
                resource_requirements: new_job.resource_requirements.clone(),
                retry_config: new_job.retry_config.clone(),
                timeout_seconds: new_job.timeout_seconds,
                times_attempted: 0,
                run_at: new_job.run_at,
                results: None,
                claimed_by: None,
                queued_at: None,
                started_at: None,
                created_time: now,
                modified_time: now,
            };

            for dependency in &new_job.depends_on {
                let depends_on_id = match planned.get(dependency) {
                    Some(id) => *id,
                    None => *state.by_uuid.get(dependency).ok_or(
                        SchedulerError::DependencyNotFound {
                            job_id: *dependency,
                        },
                    )?,
                };
                state.next_dependency_id += 1;
                let dependency_id = state.next_dependency_id;
                state.dependencies.push(JobDependency {
                    id: dependency_id,
                    dependant_id: id,
                    depends_on_id,
                    created_time: now,
                });
            }

            state.by_uuid.insert(job.job_id, id);
            state.jobs.insert(id, job.clone());
            created.push(job);
        }

        debug!("写入作业成功: {} 个", created.len());
        Ok(created)
    }

    async fn get_job(&self, job_id: Uuid) -> SchedulerResult<Option<Job>> {
        let state = self.state.lock().await;
        Ok(state
            .by_uuid
            .get(&job_id)
            .and_then(|id| state.jobs.get(id))
            .cloned())
    }

    async fn get_jobs(&self, job_ids: &[Uuid]) -> SchedulerResult<Vec<Job>> {
        let state = self.state.lock().await;
        let mut jobs: Vec<Job> = job_ids
            .iter()
            .filter_map(|job_id| state.by_uuid.get(job_id))
            .filter_map(|id| state.jobs.get(id))
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.id);
        jobs.dedup_by_key(|job| job.id);
        Ok(jobs)
    }

    async fn list_jobs(&self, filter: &JobFilter) -> SchedulerResult<Vec<Job>> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .values()
            .filter(|job| filter.status.map_or(true, |s| job.status == s))
            .filter(|job| filter.priority.map_or(true, |p| job.priority == p))
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn find_due_jobs(
        &self,
        now: DateTime<Utc>,
        after: Option<&ScanCursor>,
        limit: i64,
    ) -> SchedulerResult<Vec<Job>> {
        let state = self.state.lock().await;
        let mut due: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| job.is_due(now))
            .filter(|job| after.map_or(true, |cursor| cursor.precedes(job)))
            .cloned()
            .collect();
        due.sort_by_key(sort_key);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn claim_job(&self, job_id: Uuid, claimed_by: &str) -> SchedulerResult<Option<Job>> {
        let mut state = self.state.lock().await;
        let Some(job) = state.job_mut(job_id) else {
            return Ok(None);
        };
        if job.status != JobStatus::Waiting {
            return Ok(None);
        }
        let now = Utc::now();
        job.status = JobStatus::Queued;
        job.claimed_by = Some(claimed_by.to_string());
        job.queued_at = Some(now);
        job.modified_time = now;
        Ok(Some(job.clone()))
    }

    async fn mark_running(
        &self,
        job_id: Uuid,
        attempt_number: i32,
    ) -> SchedulerResult<Option<Job>> {
        let mut state = self.state.lock().await;
        let Some(job) = state.job_mut(job_id) else {
            return Ok(None);
        };
        if job.status != JobStatus::Queued || job.next_attempt_number() != attempt_number {
            return Ok(None);
        }
        let now = Utc::now();
        job.status = JobStatus::Running;
        job.started_at = Some(now);
        job.modified_time = now;
        Ok(Some(job.clone()))
    }

    async fn cancel_job(&self, job_id: Uuid, expected: JobStatus) -> SchedulerResult<Option<Job>> {
        let mut state = self.state.lock().await;
        let Some(id) = state.by_uuid.get(&job_id).copied() else {
            return Ok(None);
        };
        if state.has_active_dependants(id) {
            return Ok(None);
        }
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(None);
        };
        if job.status != expected || !job.status.can_transition_to(JobStatus::Cancelled) {
            return Ok(None);
        }
        job.status = JobStatus::Cancelled;
        job.modified_time = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn get_dependencies(&self, job_id: i64) -> SchedulerResult<Vec<LinkedJob>> {
        let state = self.state.lock().await;
        Ok(state
            .dependencies
            .iter()
            .filter(|d| d.dependant_id == job_id)
            .filter_map(|d| state.linked(d, d.depends_on_id))
            .collect())
    }

    async fn get_dependants(&self, job_id: i64) -> SchedulerResult<Vec<LinkedJob>> {
        let state = self.state.lock().await;
        Ok(state
            .dependencies
            .iter()
            .filter(|d| d.depends_on_id == job_id)
            .filter_map(|d| state.linked(d, d.dependant_id))
            .collect())
    }

    async fn record_attempt(
        &self,
        log: &NewExecutionLog,
        transition: Option<&AttemptTransition>,
    ) -> SchedulerResult<RecordOutcome> {
        let mut state = self.state.lock().await;
        let internal_id = *state
            .by_uuid
            .get(&log.job_uuid)
            .ok_or(SchedulerError::JobNotFound {
                job_id: log.job_uuid,
            })?;

        let duplicate = state
            .logs
            .iter()
            .any(|l| l.job_id == internal_id && l.attempt_number == log.attempt_number);
        if duplicate {
            return Ok(RecordOutcome::Duplicate);
        }

        let now = Utc::now();
        let mut updated = None;
        if let Some(transition) = transition {
            let Some(job) = state.jobs.get_mut(&internal_id) else {
                return Err(SchedulerError::JobNotFound {
                    job_id: log.job_uuid,
                });
            };
            let target = transition.decision.target_status();
            if !job.status.accepts_outcome()
                || !job.status.can_transition_to(target)
                || job.times_attempted != transition.expected_times_attempted
            {
                return Ok(RecordOutcome::Conflict);
            }

            job.status = target;
            job.times_attempted = transition.expected_times_attempted + 1;
            if let Some(run_at) = transition.decision.run_at() {
                job.run_at = run_at;
            }
            if let Some(results) = transition.decision.results() {
                job.results = Some(results.clone());
            }
            if target == JobStatus::Waiting {
                job.claimed_by = None;
                job.queued_at = None;
                job.started_at = None;
            }
            job.modified_time = now;
            updated = Some(job.clone());
        }

        state.next_log_id += 1;
        let log_id = state.next_log_id;
        state.logs.push(ExecutionLog {
            id: log_id,
            job_id: internal_id,
            job_uuid: log.job_uuid,
            attempt_number: log.attempt_number,
            log_timestamp: now,
            message: log.message.clone(),
            duration_seconds: log.duration_seconds(),
            is_successful: log.is_successful,
            results: log.results.clone(),
            resource_usage: log.resource_usage.clone(),
            execution_start_time: log.execution_start_time,
            execution_end_time: log.execution_end_time,
            worker_id: log.worker_id.clone(),
        });

        Ok(match updated {
            Some(job) => RecordOutcome::Applied(job),
            None => RecordOutcome::LoggedOnly,
        })
    }

    async fn list_logs(&self, job_id: i64) -> SchedulerResult<Vec<ExecutionLog>> {
        let state = self.state.lock().await;
        let mut logs: Vec<ExecutionLog> = state
            .logs
            .iter()
            .filter(|l| l.job_id == job_id)
            .cloned()
            .collect();
        logs.sort_by_key(|l| l.attempt_number);
        Ok(logs)
    }

    async fn list_logs_after(
        &self,
        last_log_id: Option<i64>,
        limit: i64,
    ) -> SchedulerResult<Vec<ExecutionLog>> {
        let state = self.state.lock().await;
        Ok(state
            .logs
            .iter()
            .filter(|l| last_log_id.map_or(true, |last| l.id > last))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn requeue_stale_dispatches(
        &self,
        queued_before: DateTime<Utc>,
        limit: i64,
    ) -> SchedulerResult<Vec<Job>> {
        let mut state = self.state.lock().await;
        let mut stale: Vec<(DateTime<Utc>, i64)> = state
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Queued)
            .filter_map(|job| job.queued_at.map(|at| (at, job.id)))
            .filter(|(at, _)| *at < queued_before)
            .collect();
        stale.sort();
        stale.truncate(limit.max(0) as usize);

        let now = Utc::now();
        let mut requeued = Vec::with_capacity(stale.len());
        for (_, id) in stale {
            if let Some(job) = state.jobs.get_mut(&id) {
                job.status = JobStatus::Waiting;
                job.claimed_by = None;
                job.queued_at = None;
                job.modified_time = now;
                requeued.push(job.clone());
            }
        }
        Ok(requeued)
    }

    async fn find_timed_out_attempts(
        &self,
        now: DateTime<Utc>,
        default_timeout_seconds: i64,
        limit: i64,
    ) -> SchedulerResult<Vec<Job>> {
        let state = self.state.lock().await;
        let mut timed_out: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Running)
            .filter(|job| {
                let timeout = job
                    .timeout_seconds
                    .map(i64::from)
                    .unwrap_or(default_timeout_seconds);
                job.started_at
                    .is_some_and(|started| started + Duration::seconds(timeout) < now)
            })
            .cloned()
            .collect();
        timed_out.sort_by_key(|job| job.started_at);
        timed_out.truncate(limit.max(0) as usize);
        Ok(timed_out)
    }
}
