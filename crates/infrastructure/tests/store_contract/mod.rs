//! `JobStore` 行为契约，内存实现和PostgreSQL实现共用同一组断言

use anyhow::Result;
use chrono::{Duration, Utc};
use smart_queue_core::{
    AttemptDecision, AttemptTransition, JobFilter, JobPriority, JobStatus, JobStore,
    JobSubmission, NewExecutionLog, NewJob, RecordOutcome, ResourceRequirements, RetryConfig,
    SchedulerError,
};
use uuid::Uuid;

fn due_job(name: &str) -> NewJob {
    JobSubmission::new(name).resolve(Utc::now() - Duration::seconds(5))
}

fn due_job_with(name: &str, priority: JobPriority, offset_seconds: i64) -> NewJob {
    let mut submission = JobSubmission::new(name);
    submission.priority = priority;
    submission.run_at = Some(Utc::now() - Duration::seconds(offset_seconds));
    submission.resolve(Utc::now())
}

fn attempt_log(job_id: Uuid, attempt_number: i32, is_successful: bool) -> NewExecutionLog {
    let end = Utc::now();
    NewExecutionLog {
        job_uuid: job_id,
        attempt_number,
        message: format!("attempt {attempt_number}"),
        is_successful,
        results: Some(serde_json::json!({ "attempt": attempt_number })),
        resource_usage: ResourceRequirements::default(),
        execution_start_time: Some(end - Duration::seconds(2)),
        execution_end_time: Some(end),
        worker_id: Some("worker-1".to_string()),
    }
}

pub async fn create_with_dependencies(store: &dyn JobStore) -> Result<()> {
    let parent = due_job("parent");
    let mut child = due_job("child");
    child.depends_on = vec![parent.job_id];

    let created = store.create_jobs(&[parent.clone(), child.clone()]).await?;
    assert_eq!(created.len(), 2);
    assert!(created[0].id < created[1].id);
    assert!(created.iter().all(|j| j.status == JobStatus::Waiting));
    assert!(created.iter().all(|j| j.times_attempted == 0));

    let deps = store.get_dependencies(created[1].id).await?;
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].job_id, parent.job_id);
    assert_eq!(deps[0].status, JobStatus::Waiting);

    let dependants = store.get_dependants(created[0].id).await?;
    assert_eq!(dependants.len(), 1);
    assert_eq!(dependants[0].job_id, child.job_id);

    let fetched = store
        .get_jobs(&[parent.job_id, Uuid::new_v4(), child.job_id])
        .await?;
    assert_eq!(fetched.len(), 2);

    let waiting = store
        .list_jobs(&JobFilter {
            status: Some(JobStatus::Waiting),
            ..Default::default()
        })
        .await?;
    assert!(waiting.iter().any(|j| j.job_id == child.job_id));
    Ok(())
}

pub async fn create_is_atomic_on_unknown_dependency(store: &dyn JobStore) -> Result<()> {
    let first = due_job("first");
    let mut second = due_job("second");
    let missing = Uuid::new_v4();
    second.depends_on = vec![missing];

    let err = store
        .create_jobs(&[first.clone(), second])
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::DependencyNotFound { job_id } if job_id == missing));
    assert!(store.get_job(first.job_id).await?.is_none());
    Ok(())
}

pub async fn create_rejects_terminal_dependency(store: &dyn JobStore) -> Result<()> {
    let parent = due_job("doomed");
    store.create_jobs(&[parent.clone()]).await?;
    store.cancel_job(parent.job_id, JobStatus::Waiting).await?;

    let mut child = due_job("orphan");
    child.depends_on = vec![parent.job_id];
    let err = store.create_jobs(&[child]).await.unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidJobParams(_)));
    Ok(())
}

pub async fn due_jobs_follow_scan_order(store: &dyn JobStore) -> Result<()> {
    let low = due_job_with("low", JobPriority::Low, 100);
    let normal_late = due_job_with("normal-late", JobPriority::Normal, 10);
    let normal_early = due_job_with("normal-early", JobPriority::Normal, 50);
    let critical = due_job_with("critical", JobPriority::Critical, 1);
    let mut future = JobSubmission::new("future");
    future.priority = JobPriority::Critical;
    future.run_at = Some(Utc::now() + Duration::hours(1));
    let future = future.resolve(Utc::now());

    store
        .create_jobs(&[
            low.clone(),
            normal_late.clone(),
            normal_early.clone(),
            critical.clone(),
            future.clone(),
        ])
        .await?;

    let now = Utc::now();
    let all = store.find_due_jobs(now, None, 10).await?;
    let order: Vec<Uuid> = all.iter().map(|j| j.job_id).collect();
    assert_eq!(
        order,
        vec![
            critical.job_id,
            normal_early.job_id,
            normal_late.job_id,
            low.job_id
        ]
    );

    let first_page = store.find_due_jobs(now, None, 2).await?;
    let cursor = first_page[1].scan_cursor();
    let second_page = store.find_due_jobs(now, Some(&cursor), 2).await?;
    let rest: Vec<Uuid> = second_page.iter().map(|j| j.job_id).collect();
    assert_eq!(rest, vec![normal_late.job_id, low.job_id]);
    Ok(())
}

pub async fn claim_is_exclusive(store: &dyn JobStore) -> Result<()> {
    let job = due_job("contended");
    store.create_jobs(&[job.clone()]).await?;

    let first = store.claim_job(job.job_id, "dispatcher-a").await?;
    let second = store.claim_job(job.job_id, "dispatcher-b").await?;

    let claimed = first.expect("first claim wins");
    assert_eq!(claimed.status, JobStatus::Queued);
    assert_eq!(claimed.claimed_by.as_deref(), Some("dispatcher-a"));
    assert!(claimed.queued_at.is_some());
    assert!(second.is_none());
    assert!(store.claim_job(Uuid::new_v4(), "dispatcher-a").await?.is_none());
    Ok(())
}

pub async fn mark_running_checks_attempt(store: &dyn JobStore) -> Result<()> {
    let job = due_job("runner");
    store.create_jobs(&[job.clone()]).await?;
    store.claim_job(job.job_id, "dispatcher-a").await?;

    assert!(store.mark_running(job.job_id, 2).await?.is_none());
    let running = store.mark_running(job.job_id, 1).await?.expect("running");
    assert_eq!(running.status, JobStatus::Running);
    assert!(running.started_at.is_some());
    assert!(store.mark_running(job.job_id, 1).await?.is_none());
    Ok(())
}

pub async fn record_attempt_transitions_once(store: &dyn JobStore) -> Result<()> {
    let mut submission = JobSubmission::new("flaky");
    submission.retry_config = RetryConfig {
        max_attempts: 3,
        backoff_multiplier: 2.0,
        initial_delay_seconds: 2.0,
    };
    submission.run_at = Some(Utc::now() - Duration::seconds(1));
    let job = submission.resolve(Utc::now());
    store.create_jobs(&[job.clone()]).await?;
    store.claim_job(job.job_id, "dispatcher-a").await?;
    store.mark_running(job.job_id, 1).await?;

    let retry_at = Utc::now() + Duration::seconds(2);
    let transition = AttemptTransition {
        expected_times_attempted: 0,
        decision: AttemptDecision::Retry {
            run_at: retry_at,
            delay_seconds: 2.0,
            results: Some(serde_json::json!({ "error": "boom" })),
        },
    };

    let outcome = store
        .record_attempt(&attempt_log(job.job_id, 1, false), Some(&transition))
        .await?;
    let updated = match outcome {
        RecordOutcome::Applied(job) => job,
        other => panic!("expected Applied, got {other:?}"),
    };
    assert_eq!(updated.status, JobStatus::Waiting);
    assert_eq!(updated.times_attempted, 1);
    assert!(updated.claimed_by.is_none());
    assert!((updated.run_at - retry_at).num_milliseconds().abs() < 5);

    let duplicate = store
        .record_attempt(&attempt_log(job.job_id, 1, false), Some(&transition))
        .await?;
    assert!(matches!(duplicate, RecordOutcome::Duplicate));

    // 作业已回到 waiting，过期的转换条件不再满足，日志也不写入
    let stale = store
        .record_attempt(&attempt_log(job.job_id, 2, true), Some(&transition))
        .await?;
    assert!(matches!(stale, RecordOutcome::Conflict));

    let logged = store
        .record_attempt(&attempt_log(job.job_id, 2, true), None)
        .await?;
    assert!(matches!(logged, RecordOutcome::LoggedOnly));

    let logs = store.list_logs(updated.id).await?;
    let attempts: Vec<i32> = logs.iter().map(|l| l.attempt_number).collect();
    assert_eq!(attempts, vec![1, 2]);
    assert!(!logs[0].is_successful);
    assert_eq!(logs[0].duration_seconds, Some(2.0));
    Ok(())
}

pub async fn cancel_respects_dependants(store: &dyn JobStore) -> Result<()> {
    let parent = due_job("cancel-parent");
    let mut child = due_job("cancel-child");
    child.depends_on = vec![parent.job_id];
    store.create_jobs(&[parent.clone(), child.clone()]).await?;

    assert!(store
        .cancel_job(parent.job_id, JobStatus::Waiting)
        .await?
        .is_none());
    assert!(store
        .cancel_job(child.job_id, JobStatus::Queued)
        .await?
        .is_none());

    let cancelled_child = store
        .cancel_job(child.job_id, JobStatus::Waiting)
        .await?
        .expect("child cancelled");
    assert_eq!(cancelled_child.status, JobStatus::Cancelled);

    let cancelled_parent = store
        .cancel_job(parent.job_id, JobStatus::Waiting)
        .await?
        .expect("parent cancelled once dependants are terminal");
    assert_eq!(cancelled_parent.status, JobStatus::Cancelled);
    assert!(store
        .cancel_job(parent.job_id, JobStatus::Cancelled)
        .await?
        .is_none());
    Ok(())
}

pub async fn reconciliation_queries(store: &dyn JobStore) -> Result<()> {
    let stale = due_job("stale-dispatch");
    let mut short = JobSubmission::new("short-timeout");
    short.timeout_seconds = Some(30);
    short.run_at = Some(Utc::now() - Duration::seconds(1));
    let short = short.resolve(Utc::now());
    store.create_jobs(&[stale.clone(), short.clone()]).await?;

    store.claim_job(stale.job_id, "dispatcher-a").await?;
    let requeued = store
        .requeue_stale_dispatches(Utc::now() + Duration::seconds(60), 10)
        .await?;
    let requeued_job = requeued
        .iter()
        .find(|j| j.job_id == stale.job_id)
        .expect("stale dispatch requeued");
    assert_eq!(requeued_job.status, JobStatus::Waiting);
    assert!(requeued_job.claimed_by.is_none());

    store.claim_job(short.job_id, "dispatcher-a").await?;
    store.mark_running(short.job_id, 1).await?;

    let not_yet = store
        .find_timed_out_attempts(Utc::now(), 3600, 10)
        .await?;
    assert!(not_yet.iter().all(|j| j.job_id != short.job_id));

    let timed_out = store
        .find_timed_out_attempts(Utc::now() + Duration::seconds(31), 3600, 10)
        .await?;
    assert!(timed_out.iter().any(|j| j.job_id == short.job_id));
    Ok(())
}

pub async fn log_feed_pages_forward(store: &dyn JobStore) -> Result<()> {
    let job = due_job("feed");
    store.create_jobs(&[job.clone()]).await?;
    for attempt in 1..=3 {
        store
            .record_attempt(&attempt_log(job.job_id, attempt, true), None)
            .await?;
    }

    let all = store.list_logs_after(None, 100).await?;
    let mine: Vec<_> = all.iter().filter(|l| l.job_uuid == job.job_id).collect();
    assert_eq!(mine.len(), 3);

    let after_first = store.list_logs_after(Some(mine[0].id), 100).await?;
    assert!(after_first.iter().all(|l| l.id > mine[0].id));
    assert_eq!(
        after_first
            .iter()
            .filter(|l| l.job_uuid == job.job_id)
            .count(),
        2
    );
    Ok(())
}
