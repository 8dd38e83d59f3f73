use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::SchedulerResult;
use crate::models::{
    AttemptTransition, ExecutionLog, Job, JobFilter, JobStatus, LinkedJob, NewExecutionLog,
    NewJob, RecordOutcome, ScanCursor,
};

/// 作业存储接口
///
/// 所有影响正确性的状态修改都以条件更新（比较当前状态后再写入）的形式提供，
/// 返回 `None` 表示条件不满足，调用方据此判断是否发生并发竞争。
#[async_trait]
pub trait JobStore: Send + Sync {
    /// 在同一事务中写入作业及其依赖边，`depends_on` 可引用已存在的作业或同批次中更早的作业
    async fn create_jobs(&self, jobs: &[NewJob]) -> SchedulerResult<Vec<Job>>;

    async fn get_job(&self, job_id: Uuid) -> SchedulerResult<Option<Job>>;

    /// 批量查询作业，忽略不存在的标识
    async fn get_jobs(&self, job_ids: &[Uuid]) -> SchedulerResult<Vec<Job>>;

    async fn list_jobs(&self, filter: &JobFilter) -> SchedulerResult<Vec<Job>>;

    /// 按 (priority DESC, run_at ASC, id ASC) 返回 `waiting` 且 `run_at <= now` 的作业
    async fn find_due_jobs(
        &self,
        now: DateTime<Utc>,
        after: Option<&ScanCursor>,
        limit: i64,
    ) -> SchedulerResult<Vec<Job>>;

    /// `waiting -> queued`
    async fn claim_job(&self, job_id: Uuid, claimed_by: &str) -> SchedulerResult<Option<Job>>;

    /// `queued -> running`，仅当 `attempt_number` 是当前尝试时生效
    async fn mark_running(&self, job_id: Uuid, attempt_number: i32)
        -> SchedulerResult<Option<Job>>;

    /// `expected -> cancelled`，仅当不存在未结束的依赖方时生效
    async fn cancel_job(&self, job_id: Uuid, expected: JobStatus) -> SchedulerResult<Option<Job>>;

    /// 以该作业为 dependant 的依赖边
    async fn get_dependencies(&self, job_id: i64) -> SchedulerResult<Vec<LinkedJob>>;

    /// 以该作业为 depends_on 的依赖边
    async fn get_dependants(&self, job_id: i64) -> SchedulerResult<Vec<LinkedJob>>;

    /// 写入执行日志，并在同一事务中应用可选的状态转换
    async fn record_attempt(
        &self,
        log: &NewExecutionLog,
        transition: Option<&AttemptTransition>,
    ) -> SchedulerResult<RecordOutcome>;

    async fn list_logs(&self, job_id: i64) -> SchedulerResult<Vec<ExecutionLog>>;

    /// 按日志主键升序返回 `last_log_id` 之后的日志
    async fn list_logs_after(
        &self,
        last_log_id: Option<i64>,
        limit: i64,
    ) -> SchedulerResult<Vec<ExecutionLog>>;

    /// 将 `queued_at` 早于 `queued_before` 的 `queued` 作业重置为 `waiting`
    async fn requeue_stale_dispatches(
        &self,
        queued_before: DateTime<Utc>,
        limit: i64,
    ) -> SchedulerResult<Vec<Job>>;

    /// 运行时间超过自身超时（或默认超时）的 `running` 作业
    async fn find_timed_out_attempts(
        &self,
        now: DateTime<Utc>,
        default_timeout_seconds: i64,
        limit: i64,
    ) -> SchedulerResult<Vec<Job>>;
}
