//! 需要本地Docker：`cargo test -p smart-queue-infrastructure -- --ignored`

use anyhow::Result;
use smart_queue_infrastructure::PostgresJobStore;

mod database_test_utils;
mod store_contract;

use database_test_utils::DatabaseTestContainer;

async fn store() -> Result<(DatabaseTestContainer, PostgresJobStore)> {
    let container = DatabaseTestContainer::new().await?;
    let store = PostgresJobStore::new(container.pool.clone());
    Ok((container, store))
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_postgres_create_with_dependencies() -> Result<()> {
    let (_container, store) = store().await?;
    store_contract::create_with_dependencies(&store).await
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_postgres_create_is_atomic() -> Result<()> {
    let (container, store) = store().await?;
    store_contract::create_is_atomic_on_unknown_dependency(&store).await?;
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
        .fetch_one(&container.pool)
        .await?;
    assert_eq!(count, 0);
    Ok(())
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_postgres_rejects_terminal_dependency() -> Result<()> {
    let (_container, store) = store().await?;
    store_contract::create_rejects_terminal_dependency(&store).await
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_postgres_scan_order() -> Result<()> {
    let (_container, store) = store().await?;
    store_contract::due_jobs_follow_scan_order(&store).await
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_postgres_claim_is_exclusive() -> Result<()> {
    let (_container, store) = store().await?;
    store_contract::claim_is_exclusive(&store).await
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_postgres_mark_running() -> Result<()> {
    let (_container, store) = store().await?;
    store_contract::mark_running_checks_attempt(&store).await
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_postgres_record_attempt() -> Result<()> {
    let (_container, store) = store().await?;
    store_contract::record_attempt_transitions_once(&store).await
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_postgres_cancel() -> Result<()> {
    let (_container, store) = store().await?;
    store_contract::cancel_respects_dependants(&store).await
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_postgres_reconciliation_queries() -> Result<()> {
    let (_container, store) = store().await?;
    store_contract::reconciliation_queries(&store).await
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_postgres_log_feed() -> Result<()> {
    let (_container, store) = store().await?;
    store_contract::log_feed_pages_forward(&store).await
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_postgres_concurrent_claims_have_one_winner() -> Result<()> {
    use chrono::Utc;
    use smart_queue_core::{JobStore, JobSubmission};
    use std::sync::Arc;

    let (_container, store) = store().await?;
    let store = Arc::new(store);
    let job = JobSubmission::new("raced").resolve(Utc::now());
    store.create_jobs(&[job.clone()]).await?;

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        let job_id = job.job_id;
        handles.push(tokio::spawn(async move {
            store.claim_job(job_id, &format!("dispatcher-{i}")).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await??.is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    Ok(())
}
