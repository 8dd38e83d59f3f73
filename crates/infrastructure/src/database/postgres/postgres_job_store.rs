use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use smart_queue_core::{
    AttemptTransition, ExecutionLog, Job, JobDependency, JobFilter, JobPriority, JobStatus,
    JobStore, LinkedJob, NewExecutionLog, NewJob, RecordOutcome, ResourceRequirements,
    RetryConfig, ScanCursor, SchedulerError, SchedulerResult,
};
use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

const JOB_COLUMNS: &str = "id, job_id, job_name, job_type, payload, status, priority, cpu_units, \
     memory_mb, max_attempts, backoff_multiplier, initial_delay_seconds, timeout_seconds, \
     times_attempted, run_at, results, claimed_by, queued_at, started_at, created_time, modified_time";

const LOG_COLUMNS: &str = "id, job_id, job_uuid, attempt_number, log_timestamp, message, \
     duration_seconds, is_successful, results, cpu_units, memory_mb, execution_start_time, \
     execution_end_time, worker_id";

pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &PgRow) -> SchedulerResult<Job> {
        Ok(Job {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            job_name: row.try_get("job_name")?,
            job_type: row.try_get("job_type")?,
            payload: row.try_get("payload")?,
            status: row.try_get("status")?,
            priority: JobPriority::from_rank(row.try_get("priority")?)?,
            resource_requirements: ResourceRequirements {
                cpu_units: row.try_get("cpu_units")?,
                memory_mb: row.try_get("memory_mb")?,
            },
            retry_config: RetryConfig {
                max_attempts: row.try_get("max_attempts")?,
                backoff_multiplier: row.try_get("backoff_multiplier")?,
                initial_delay_seconds: row.try_get("initial_delay_seconds")?,
            },
            timeout_seconds: row.try_get("timeout_seconds")?,
            times_attempted: row.try_get("times_attempted")?,
            run_at: row.try_get("run_at")?,
            results: row.try_get("results")?,
            claimed_by: row.try_get("claimed_by")?,
            queued_at: row.try_get("queued_at")?,
            started_at: row.try_get("started_at")?,
            created_time: row.try_get("created_time")?,
            modified_time: row.try_get("modified_time")?,
        })
    }

    fn row_to_log(row: &PgRow) -> SchedulerResult<ExecutionLog> {
        Ok(ExecutionLog {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            job_uuid: row.try_get("job_uuid")?,
            attempt_number: row.try_get("attempt_number")?,
            log_timestamp: row.try_get("log_timestamp")?,
            message: row.try_get("message")?,
            duration_seconds: row.try_get("duration_seconds")?,
            is_successful: row.try_get("is_successful")?,
            results: row.try_get("results")?,
            resource_usage: ResourceRequirements {
                cpu_units: row.try_get("cpu_units")?,
                memory_mb: row.try_get("memory_mb")?,
            },
            execution_start_time: row.try_get("execution_start_time")?,
            execution_end_time: row.try_get("execution_end_time")?,
            worker_id: row.try_get("worker_id")?,
        })
    }

    fn row_to_linked_job(row: &PgRow) -> SchedulerResult<LinkedJob> {
        Ok(LinkedJob {
            dependency: JobDependency {
                id: row.try_get("id")?,
                dependant_id: row.try_get("dependant_id")?,
                depends_on_id: row.try_get("depends_on_id")?,
                created_time: row.try_get("created_time")?,
            },
            job_id: row.try_get("linked_job_id")?,
            status: row.try_get("linked_status")?,
        })
    }

    /// 解析依赖作业的内部主键，并以共享锁阻止其在本事务提交前被取消
    async fn resolve_dependency(
        tx: &mut Transaction<'_, Postgres>,
        inserted: &HashMap<Uuid, i64>,
        dependency: Uuid,
    ) -> SchedulerResult<i64> {
        if let Some(id) = inserted.get(&dependency) {
            return Ok(*id);
        }

        let row = sqlx::query("SELECT id, status FROM jobs WHERE job_id = $1 FOR SHARE")
            .bind(dependency)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(SchedulerError::DependencyNotFound { job_id: dependency })?;

        let status: JobStatus = row.try_get("status")?;
        if matches!(status, JobStatus::Failed | JobStatus::Cancelled) {
            return Err(SchedulerError::InvalidJobParams(format!(
                "依赖作业 {dependency} 已处于 {status} 状态，无法再满足"
            )));
        }

        Ok(row.try_get("id")?)
    }

    async fn insert_job(tx: &mut Transaction<'_, Postgres>, job: &NewJob) -> SchedulerResult<Job> {
        let sql = format!(
            "INSERT INTO jobs (job_id, job_name, job_type, payload, status, priority, cpu_units, \
             memory_mb, max_attempts, backoff_multiplier, initial_delay_seconds, timeout_seconds, run_at) \
             VALUES ($1, $2, $3, $4, 'waiting', $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING {JOB_COLUMNS}"
        );

        let row = sqlx::query(&sql)
            .bind(job.job_id)
            .bind(&job.job_name)
            .bind(&job.job_type)
            .bind(&job.payload)
            .bind(job.priority.rank())
            .bind(job.resource_requirements.cpu_units)
            .bind(job.resource_requirements.memory_mb)
            .bind(job.retry_config.max_attempts)
            .bind(job.retry_config.backoff_multiplier)
            .bind(job.retry_config.initial_delay_seconds)
            .bind(job.timeout_seconds)
            .bind(job.run_at)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    SchedulerError::InvalidJobParams(format!("作业ID已存在: {}", job.job_id))
                }
                _ => SchedulerError::Database(e),
            })?;

        Self::row_to_job(&row)
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, jobs), fields(count = jobs.len()))]
    async fn create_jobs(&self, jobs: &[NewJob]) -> SchedulerResult<Vec<Job>> {
        let mut tx = self.pool.begin().await?;
        let mut inserted: HashMap<Uuid, i64> = HashMap::new();
        let mut created = Vec::with_capacity(jobs.len());

        for new_job in jobs {
            let mut depends_on_ids = Vec::with_capacity(new_job.depends_on.len());
            for dependency in &new_job.depends_on {
                depends_on_ids
                    .push(Self::resolve_dependency(&mut tx, &inserted, *dependency).await?);
            }

            let job = Self::insert_job(&mut tx, new_job).await?;

            for depends_on_id in depends_on_ids {
                sqlx::query(
                    "INSERT INTO job_dependencies (dependant_id, depends_on_id) VALUES ($1, $2)",
                )
                .bind(job.id)
                .bind(depends_on_id)
                .execute(&mut *tx)
                .await?;
            }

            inserted.insert(job.job_id, job.id);
            created.push(job);
        }

        tx.commit().await?;
        debug!("写入作业成功: {} 个", created.len());
        Ok(created)
    }

    #[instrument(skip(self), fields(job_id = %job_id))]
    async fn get_job(&self, job_id: Uuid) -> SchedulerResult<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = $1");
        let row = sqlx::query(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    #[instrument(skip(self, job_ids), fields(count = job_ids.len()))]
    async fn get_jobs(&self, job_ids: &[Uuid]) -> SchedulerResult<Vec<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ANY($1) ORDER BY id");
        let rows = sqlx::query(&sql)
            .bind(job_ids)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_job).collect()
    }

    #[instrument(skip(self))]
    async fn list_jobs(&self, filter: &JobFilter) -> SchedulerResult<Vec<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE ($1::VARCHAR IS NULL OR status = $1) \
               AND ($2::SMALLINT IS NULL OR priority = $2) \
             ORDER BY id OFFSET $3 LIMIT $4"
        );
        let rows = sqlx::query(&sql)
            .bind(filter.status)
            .bind(filter.priority.map(|p| p.rank()))
            .bind(filter.offset.max(0))
            .bind(filter.limit.max(0))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_job).collect()
    }

    #[instrument(skip(self, after))]
    async fn find_due_jobs(
        &self,
        now: DateTime<Utc>,
        after: Option<&ScanCursor>,
        limit: i64,
    ) -> SchedulerResult<Vec<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE status = 'waiting' AND run_at <= $1 \
               AND ($2::SMALLINT IS NULL \
                    OR priority < $2 \
                    OR (priority = $2 AND (run_at > $3 OR (run_at = $3 AND id > $4)))) \
             ORDER BY priority DESC, run_at ASC, id ASC \
             LIMIT $5"
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(after.map(|c| c.priority.rank()))
            .bind(after.map(|c| c.run_at))
            .bind(after.map(|c| c.id))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_job).collect()
    }

    #[instrument(skip(self), fields(job_id = %job_id, claimed_by = %claimed_by))]
    async fn claim_job(&self, job_id: Uuid, claimed_by: &str) -> SchedulerResult<Option<Job>> {
        let sql = format!(
            "UPDATE jobs SET status = 'queued', claimed_by = $2, queued_at = NOW(), modified_time = NOW() \
             WHERE job_id = $1 AND status = 'waiting' \
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(job_id)
            .bind(claimed_by)
            .fetch_optional(&self.pool)
            .await?;

        if row.is_none() {
            debug!("作业 {} 已不处于waiting状态，认领失败", job_id);
        }
        row.as_ref().map(Self::row_to_job).transpose()
    }

    #[instrument(skip(self), fields(job_id = %job_id, attempt_number = attempt_number))]
    async fn mark_running(
        &self,
        job_id: Uuid,
        attempt_number: i32,
    ) -> SchedulerResult<Option<Job>> {
        let sql = format!(
            "UPDATE jobs SET status = 'running', started_at = NOW(), modified_time = NOW() \
             WHERE job_id = $1 AND status = 'queued' AND times_attempted + 1 = $2 \
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(job_id)
            .bind(attempt_number)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    #[instrument(skip(self), fields(job_id = %job_id, expected = %expected))]
    async fn cancel_job(&self, job_id: Uuid, expected: JobStatus) -> SchedulerResult<Option<Job>> {
        let sql = format!(
            "UPDATE jobs j SET status = 'cancelled', modified_time = NOW() \
             WHERE j.job_id = $1 AND j.status = $2 AND j.status IN ('waiting', 'queued') \
               AND NOT EXISTS ( \
                   SELECT 1 FROM job_dependencies d \
                   JOIN jobs dj ON dj.id = d.dependant_id \
                   WHERE d.depends_on_id = j.id \
                     AND dj.status NOT IN ('completed', 'failed', 'cancelled')) \
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(job_id)
            .bind(expected)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    #[instrument(skip(self))]
    async fn get_dependencies(&self, job_id: i64) -> SchedulerResult<Vec<LinkedJob>> {
        let rows = sqlx::query(
            "SELECT d.id, d.dependant_id, d.depends_on_id, d.created_time, \
                    j.job_id AS linked_job_id, j.status AS linked_status \
             FROM job_dependencies d JOIN jobs j ON j.id = d.depends_on_id \
             WHERE d.dependant_id = $1 ORDER BY d.id",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_linked_job).collect()
    }

    #[instrument(skip(self))]
    async fn get_dependants(&self, job_id: i64) -> SchedulerResult<Vec<LinkedJob>> {
        let rows = sqlx::query(
            "SELECT d.id, d.dependant_id, d.depends_on_id, d.created_time, \
                    j.job_id AS linked_job_id, j.status AS linked_status \
             FROM job_dependencies d JOIN jobs j ON j.id = d.dependant_id \
             WHERE d.depends_on_id = $1 ORDER BY d.id",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_linked_job).collect()
    }

    #[instrument(skip(self, log, transition), fields(
        job_id = %log.job_uuid,
        attempt_number = log.attempt_number,
        success = log.is_successful,
    ))]
    async fn record_attempt(
        &self,
        log: &NewExecutionLog,
        transition: Option<&AttemptTransition>,
    ) -> SchedulerResult<RecordOutcome> {
        let mut tx = self.pool.begin().await?;

        let job_row = sqlx::query("SELECT id FROM jobs WHERE job_id = $1")
            .bind(log.job_uuid)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(SchedulerError::JobNotFound {
                job_id: log.job_uuid,
            })?;
        let internal_id: i64 = job_row.try_get("id")?;

        let inserted = sqlx::query(
            "INSERT INTO execution_logs (job_id, job_uuid, attempt_number, message, duration_seconds, \
             is_successful, results, cpu_units, memory_mb, execution_start_time, execution_end_time, worker_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (job_id, attempt_number) DO NOTHING \
             RETURNING id",
        )
        .bind(internal_id)
        .bind(log.job_uuid)
        .bind(log.attempt_number)
        .bind(&log.message)
        .bind(log.duration_seconds())
        .bind(log.is_successful)
        .bind(&log.results)
        .bind(log.resource_usage.cpu_units)
        .bind(log.resource_usage.memory_mb)
        .bind(log.execution_start_time)
        .bind(log.execution_end_time)
        .bind(&log.worker_id)
        .fetch_optional(&mut *tx)
        .await?;

        if inserted.is_none() {
            tx.rollback().await?;
            debug!("执行日志已存在，忽略重复事件");
            return Ok(RecordOutcome::Duplicate);
        }

        let Some(transition) = transition else {
            tx.commit().await?;
            return Ok(RecordOutcome::LoggedOnly);
        };

        let target = transition.decision.target_status();
        let sql = format!(
            "UPDATE jobs SET status = $2, times_attempted = $3 + 1, \
                 run_at = COALESCE($4, run_at), results = COALESCE($5, results), \
                 claimed_by = CASE WHEN $2 = 'waiting' THEN NULL ELSE claimed_by END, \
                 queued_at = CASE WHEN $2 = 'waiting' THEN NULL ELSE queued_at END, \
                 started_at = CASE WHEN $2 = 'waiting' THEN NULL ELSE started_at END, \
                 modified_time = NOW() \
             WHERE id = $1 AND status IN ('queued', 'running') AND times_attempted = $3 \
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(internal_id)
            .bind(target)
            .bind(transition.expected_times_attempted)
            .bind(transition.decision.run_at())
            .bind(transition.decision.results())
            .fetch_optional(&mut *tx)
            .await?;

        match row {
            Some(row) => {
                let job = Self::row_to_job(&row)?;
                tx.commit().await?;
                Ok(RecordOutcome::Applied(job))
            }
            None => {
                tx.rollback().await?;
                debug!("作业状态已被并发修改，回滚执行日志写入");
                Ok(RecordOutcome::Conflict)
            }
        }
    }

    #[instrument(skip(self))]
    async fn list_logs(&self, job_id: i64) -> SchedulerResult<Vec<ExecutionLog>> {
        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM execution_logs WHERE job_id = $1 ORDER BY attempt_number"
        );
        let rows = sqlx::query(&sql)
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_log).collect()
    }

    #[instrument(skip(self))]
    async fn list_logs_after(
        &self,
        last_log_id: Option<i64>,
        limit: i64,
    ) -> SchedulerResult<Vec<ExecutionLog>> {
        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM execution_logs \
             WHERE ($1::BIGINT IS NULL OR id > $1) ORDER BY id LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(last_log_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_log).collect()
    }

    #[instrument(skip(self))]
    async fn requeue_stale_dispatches(
        &self,
        queued_before: DateTime<Utc>,
        limit: i64,
    ) -> SchedulerResult<Vec<Job>> {
        let sql = format!(
            "UPDATE jobs SET status = 'waiting', claimed_by = NULL, queued_at = NULL, modified_time = NOW() \
             WHERE id IN ( \
                 SELECT id FROM jobs \
                 WHERE status = 'queued' AND queued_at < $1 \
                 ORDER BY queued_at \
                 LIMIT $2 \
                 FOR UPDATE SKIP LOCKED) \
               AND status = 'queued' \
             RETURNING {JOB_COLUMNS}"
        );
        let rows = sqlx::query(&sql)
            .bind(queued_before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_job).collect()
    }

    #[instrument(skip(self))]
    async fn find_timed_out_attempts(
        &self,
        now: DateTime<Utc>,
        default_timeout_seconds: i64,
        limit: i64,
    ) -> SchedulerResult<Vec<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE status = 'running' AND started_at IS NOT NULL \
               AND started_at + make_interval(secs => COALESCE(timeout_seconds, $2::BIGINT)::DOUBLE PRECISION) < $1 \
             ORDER BY started_at \
             LIMIT $3"
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(default_timeout_seconds)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_job).collect()
    }
}
