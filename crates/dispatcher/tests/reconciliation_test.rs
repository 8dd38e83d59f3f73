use chrono::{Duration, Utc};
use smart_queue_core::JobStatus;
use smart_queue_dispatcher::{IngestOutcome, JobService, ReconcileReport};
use smart_queue_testing_utils::{AttemptEventBuilder, SubmissionBuilder, TestHarness};

mod common;

#[tokio::test]
async fn test_attempt_timeout_fails_attempt_and_schedules_retry() {
    let harness = TestHarness::new().await;
    let service = JobService::new(harness.job_store());
    let components = common::components(&harness, "dispatcher-a");

    let job = service
        .submit(
            SubmissionBuilder::new("hung")
                .with_timeout(30)
                .with_retry(2, 1.0, 10.0)
                .build(),
        )
        .await
        .unwrap();
    components.scheduler.tick(Utc::now()).await.unwrap();
    components
        .ingestor
        .handle_event(&AttemptEventBuilder::started(job.job_id, 1).build(), Utc::now())
        .await
        .unwrap();

    let before_deadline = components
        .reconciliation
        .sweep(Utc::now() + Duration::seconds(20))
        .await
        .unwrap();
    assert_eq!(before_deadline, ReconcileReport::default());

    let sweep_at = Utc::now() + Duration::seconds(31);
    let report = components.reconciliation.sweep(sweep_at).await.unwrap();
    assert_eq!(report.timed_out, 1);

    let retried = common::job(&harness, job.job_id).await;
    assert_eq!(retried.status, JobStatus::Waiting);
    assert_eq!(retried.times_attempted, 1);
    assert_eq!(retried.run_at, sweep_at + Duration::seconds(10));

    let logs = service.list_logs(job.job_id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert!(!logs[0].is_successful);
    assert_eq!(
        logs[0].results,
        Some(serde_json::json!({"error": "attempt timed out"}))
    );

    // 执行端迟到的结果与合成的失败是同一尝试
    let late = components
        .ingestor
        .handle_event(&AttemptEventBuilder::succeeded(job.job_id, 1).build(), sweep_at)
        .await
        .unwrap();
    assert_eq!(late, IngestOutcome::Duplicate);
    assert_eq!(common::job(&harness, job.job_id).await.status, JobStatus::Waiting);
}

#[tokio::test]
async fn test_stale_dispatch_is_requeued() {
    let harness = TestHarness::new().await;
    let service = JobService::new(harness.job_store());
    let components = common::components(&harness, "dispatcher-a");
    let dispatch_timeout = harness.dispatcher_config.dispatch_timeout_seconds;

    let job = service
        .submit(SubmissionBuilder::new("lost").build())
        .await
        .unwrap();
    components.scheduler.tick(Utc::now()).await.unwrap();

    let report = components.reconciliation.sweep(Utc::now()).await.unwrap();
    assert_eq!(report.requeued, 0);

    let later = Utc::now() + Duration::seconds(dispatch_timeout + 1);
    let report = components.reconciliation.sweep(later).await.unwrap();
    assert_eq!(report.requeued, 1);

    let requeued = common::job(&harness, job.job_id).await;
    assert_eq!(requeued.status, JobStatus::Waiting);
    assert_eq!(requeued.times_attempted, 0);
    assert!(requeued.claimed_by.is_none());

    let report = components.scheduler.tick(later).await.unwrap();
    assert_eq!(report.dispatched, vec![job.job_id]);
    assert_eq!(harness.queue.dispatched().len(), 2);
}

#[tokio::test]
async fn test_late_outcome_from_requeued_dispatch_does_not_block_redispatch() {
    let harness = TestHarness::new().await;
    let service = JobService::new(harness.job_store());
    let components = common::components(&harness, "dispatcher-a");
    let dispatch_timeout = harness.dispatcher_config.dispatch_timeout_seconds;

    let job = service
        .submit(
            SubmissionBuilder::new("slow-start")
                .with_timeout(30)
                .with_retry(3, 2.0, 1.0)
                .build(),
        )
        .await
        .unwrap();
    components.scheduler.tick(Utc::now()).await.unwrap();

    let later = Utc::now() + Duration::seconds(dispatch_timeout + 1);
    let report = components.reconciliation.sweep(later).await.unwrap();
    assert_eq!(report.requeued, 1);

    // 旧执行端在作业被重置后才回报结果
    let late = components
        .ingestor
        .handle_event(&AttemptEventBuilder::failed(job.job_id, 1).build(), later)
        .await
        .unwrap();
    assert_eq!(late, IngestOutcome::Abandoned);
    assert!(service.list_logs(job.job_id).await.unwrap().is_empty());
    let waiting = common::job(&harness, job.job_id).await;
    assert_eq!(waiting.status, JobStatus::Waiting);
    assert_eq!(waiting.times_attempted, 0);

    let report = components.scheduler.tick(later).await.unwrap();
    assert_eq!(report.dispatched, vec![job.job_id]);

    let started = components
        .ingestor
        .handle_event(&AttemptEventBuilder::started(job.job_id, 1).build(), later)
        .await
        .unwrap();
    assert_eq!(started, IngestOutcome::Started);

    let finished = components
        .ingestor
        .handle_event(&AttemptEventBuilder::succeeded(job.job_id, 1).build(), later)
        .await
        .unwrap();
    assert_eq!(finished, IngestOutcome::Applied(JobStatus::Completed));

    let completed = common::job(&harness, job.job_id).await;
    assert_eq!(completed.status, JobStatus::Completed);
    assert_eq!(completed.times_attempted, 1);
    let logs = service.list_logs(job.job_id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].is_successful);

    let hours_later = later + Duration::hours(3);
    let report = components.reconciliation.sweep(hours_later).await.unwrap();
    assert_eq!(report, ReconcileReport::default());
}

#[tokio::test]
async fn test_requeued_dispatch_interleaving_with_redispatch_settles() {
    let harness = TestHarness::new().await;
    let service = JobService::new(harness.job_store());
    let components = common::components(&harness, "dispatcher-a");
    let dispatch_timeout = harness.dispatcher_config.dispatch_timeout_seconds;

    let job = service
        .submit(
            SubmissionBuilder::new("two-workers")
                .with_timeout(30)
                .with_retry(3, 2.0, 1.0)
                .build(),
        )
        .await
        .unwrap();
    components.scheduler.tick(Utc::now()).await.unwrap();

    let later = Utc::now() + Duration::seconds(dispatch_timeout + 1);
    components.reconciliation.sweep(later).await.unwrap();

    // 作业处于 waiting 时旧执行端的开始事件无效
    let early_start = components
        .ingestor
        .handle_event(&AttemptEventBuilder::started(job.job_id, 1).build(), later)
        .await
        .unwrap();
    assert_eq!(early_start, IngestOutcome::StartIgnored);

    components.scheduler.tick(later).await.unwrap();
    assert_eq!(harness.queue.dispatched().len(), 2);

    // 两个执行端都收到了尝试1，先开始的一方生效
    let first = components
        .ingestor
        .handle_event(&AttemptEventBuilder::started(job.job_id, 1).build(), later)
        .await
        .unwrap();
    assert_eq!(first, IngestOutcome::Started);
    let second = components
        .ingestor
        .handle_event(&AttemptEventBuilder::started(job.job_id, 1).build(), later)
        .await
        .unwrap();
    assert_eq!(second, IngestOutcome::StartIgnored);

    let failed = components
        .ingestor
        .handle_event(&AttemptEventBuilder::failed(job.job_id, 1).build(), later)
        .await
        .unwrap();
    assert_eq!(failed, IngestOutcome::Applied(JobStatus::Waiting));
    let succeeded = components
        .ingestor
        .handle_event(&AttemptEventBuilder::succeeded(job.job_id, 1).build(), later)
        .await
        .unwrap();
    assert_eq!(succeeded, IngestOutcome::Duplicate);

    let retried = common::job(&harness, job.job_id).await;
    assert_eq!(retried.status, JobStatus::Waiting);
    assert_eq!(retried.times_attempted, 1);
    assert_eq!(retried.run_at, later + Duration::seconds(1));
}

#[tokio::test]
async fn test_redispatched_attempt_still_times_out() {
    let harness = TestHarness::new().await;
    let service = JobService::new(harness.job_store());
    let components = common::components(&harness, "dispatcher-a");
    let dispatch_timeout = harness.dispatcher_config.dispatch_timeout_seconds;

    let job = service
        .submit(
            SubmissionBuilder::new("silent")
                .with_timeout(30)
                .with_retry(1, 2.0, 1.0)
                .build(),
        )
        .await
        .unwrap();
    components.scheduler.tick(Utc::now()).await.unwrap();

    let later = Utc::now() + Duration::seconds(dispatch_timeout + 1);
    components.reconciliation.sweep(later).await.unwrap();
    let late = components
        .ingestor
        .handle_event(&AttemptEventBuilder::succeeded(job.job_id, 1).build(), later)
        .await
        .unwrap();
    assert_eq!(late, IngestOutcome::Abandoned);

    components.scheduler.tick(later).await.unwrap();
    components
        .ingestor
        .handle_event(&AttemptEventBuilder::started(job.job_id, 1).build(), later)
        .await
        .unwrap();

    let report = components
        .reconciliation
        .sweep(Utc::now() + Duration::seconds(31))
        .await
        .unwrap();
    assert_eq!(report.timed_out, 1);

    let failed = common::job(&harness, job.job_id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.times_attempted, 1);
}
