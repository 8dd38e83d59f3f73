use smart_queue_core::{JobFilter, JobPriority, JobStatus, SchedulerError};
use smart_queue_dispatcher::JobService;
use smart_queue_testing_utils::{AttemptEventBuilder, SubmissionBuilder, TestHarness};
use uuid::Uuid;

mod common;

#[tokio::test]
async fn test_cyclic_batch_is_rejected_atomically() {
    let harness = TestHarness::new().await;
    let service = JobService::new(harness.job_store());

    let a = SubmissionBuilder::new("a");
    let b = SubmissionBuilder::new("b");
    let c = SubmissionBuilder::new("c");
    let (a_id, b_id, c_id) = (a.job_id(), b.job_id(), c.job_id());
    let batch = vec![
        a.depends_on(&[c_id]).build(),
        b.depends_on(&[a_id]).build(),
        c.depends_on(&[b_id]).build(),
    ];

    match service.submit_batch(batch).await {
        Err(SchedulerError::DependencyCycle { path }) => {
            assert_eq!(path.first(), path.last());
            for id in [a_id, b_id, c_id] {
                assert!(path.contains(&id));
            }
        }
        other => panic!("expected DependencyCycle, got {other:?}"),
    }
    assert_eq!(harness.store.job_count().await, 0);
}

#[tokio::test]
async fn test_unknown_dependency_rejects_whole_batch() {
    let harness = TestHarness::new().await;
    let service = JobService::new(harness.job_store());
    let missing = Uuid::new_v4();

    let result = service
        .submit_batch(vec![
            SubmissionBuilder::new("fine").build(),
            SubmissionBuilder::new("broken").depends_on(&[missing]).build(),
        ])
        .await;
    assert!(matches!(
        result,
        Err(SchedulerError::DependencyNotFound { job_id }) if job_id == missing
    ));
    assert_eq!(harness.store.job_count().await, 0);
}

#[tokio::test]
async fn test_batch_results_follow_submission_order() {
    let harness = TestHarness::new().await;
    let service = JobService::new(harness.job_store());

    let root = SubmissionBuilder::new("root");
    let leaf = SubmissionBuilder::new("leaf").depends_on(&[root.job_id()]);
    let (root_id, leaf_id) = (root.job_id(), leaf.job_id());

    let created = service
        .submit_batch(vec![leaf.build(), root.build()])
        .await
        .unwrap();
    let ids: Vec<Uuid> = created.iter().map(|j| j.job_id).collect();
    assert_eq!(ids, vec![leaf_id, root_id]);
    assert!(created.iter().all(|j| j.status == JobStatus::Waiting));
    assert!(created.iter().all(|j| j.times_attempted == 0));

    let details = service.get_job(leaf_id).await.unwrap();
    assert_eq!(details.depends_on, vec![root_id]);
    assert!(service.get_job(root_id).await.unwrap().depends_on.is_empty());
}

#[tokio::test]
async fn test_dependency_on_existing_job() {
    let harness = TestHarness::new().await;
    let service = JobService::new(harness.job_store());

    let first = service
        .submit(SubmissionBuilder::new("first").build())
        .await
        .unwrap();
    let second = service
        .submit(
            SubmissionBuilder::new("second")
                .depends_on(&[first.job_id])
                .build(),
        )
        .await
        .unwrap();
    assert_eq!(
        service.get_job(second.job_id).await.unwrap().depends_on,
        vec![first.job_id]
    );
}

#[tokio::test]
async fn test_invalid_submissions_are_rejected() {
    let harness = TestHarness::new().await;
    let service = JobService::new(harness.job_store());

    let cases = vec![
        SubmissionBuilder::new("  ").build(),
        SubmissionBuilder::new("zero-attempts")
            .with_retry(0, 2.0, 1.0)
            .build(),
        SubmissionBuilder::new("shrinking")
            .with_retry(3, 0.5, 1.0)
            .build(),
        SubmissionBuilder::new("negative-delay")
            .with_retry(3, 2.0, -1.0)
            .build(),
        SubmissionBuilder::new("no-timeout").with_timeout(0).build(),
    ];
    for submission in cases {
        let name = submission.job_name.clone();
        assert!(
            matches!(
                service.submit(submission).await,
                Err(SchedulerError::InvalidJobParams(_))
            ),
            "{name:?} should be rejected"
        );
    }

    let self_dependent = SubmissionBuilder::new("self");
    let own_id = self_dependent.job_id();
    assert!(matches!(
        service
            .submit(self_dependent.depends_on(&[own_id]).build())
            .await,
        Err(SchedulerError::DependencyCycle { .. })
    ));
    assert_eq!(harness.store.job_count().await, 0);
}

#[tokio::test]
async fn test_list_jobs_filters_by_status_and_priority() {
    let harness = TestHarness::new().await;
    let service = JobService::new(harness.job_store());

    let urgent = service
        .submit(
            SubmissionBuilder::new("urgent")
                .with_priority(JobPriority::Critical)
                .build(),
        )
        .await
        .unwrap();
    let routine = service
        .submit(SubmissionBuilder::new("routine").build())
        .await
        .unwrap();
    service.cancel(routine.job_id).await.unwrap();

    let critical = service
        .list_jobs(&JobFilter {
            priority: Some(JobPriority::Critical),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(critical.len(), 1);
    assert_eq!(critical[0].job_id, urgent.job_id);

    let cancelled = service
        .list_jobs(&JobFilter {
            status: Some(JobStatus::Cancelled),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].job_id, routine.job_id);

    assert_eq!(service.list_jobs(&JobFilter::default()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_log_feed_pages_through_new_entries() {
    let harness = TestHarness::new().await;
    let service = JobService::new(harness.job_store());
    let components = common::components(&harness, "dispatcher-a");

    let jobs = service
        .submit_batch(vec![
            SubmissionBuilder::new("one").build(),
            SubmissionBuilder::new("two").build(),
            SubmissionBuilder::new("three").build(),
        ])
        .await
        .unwrap();
    components.scheduler.tick(chrono::Utc::now()).await.unwrap();
    for job in &jobs {
        harness
            .publish_event(AttemptEventBuilder::succeeded(job.job_id, 1).build())
            .await
            .unwrap();
    }
    common::ingest_all(&harness, &components).await;

    let first_page = service.list_logs_after(None, 2).await.unwrap();
    assert_eq!(first_page.len(), 2);
    let cursor = first_page.last().map(|l| l.id);
    let second_page = service.list_logs_after(cursor, 2).await.unwrap();
    assert_eq!(second_page.len(), 1);
    assert!(second_page[0].id > first_page[1].id);
    assert!(service
        .list_logs_after(Some(second_page[0].id), 2)
        .await
        .unwrap()
        .is_empty());

    assert!(matches!(
        service.list_logs(Uuid::new_v4()).await,
        Err(SchedulerError::JobNotFound { .. })
    ));
}

#[tokio::test]
async fn test_batch_lookup_returns_known_jobs_in_creation_order() {
    let harness = TestHarness::new().await;
    let service = JobService::new(harness.job_store());

    let first = service
        .submit(SubmissionBuilder::new("first").build())
        .await
        .unwrap();
    let second = service
        .submit(SubmissionBuilder::new("second").build())
        .await
        .unwrap();

    let jobs = service
        .get_jobs(&[second.job_id, Uuid::new_v4(), first.job_id, second.job_id])
        .await
        .unwrap();
    let ids: Vec<Uuid> = jobs.iter().map(|j| j.job_id).collect();
    assert_eq!(ids, vec![first.job_id, second.job_id]);

    assert!(service.get_jobs(&[]).await.unwrap().is_empty());
}
