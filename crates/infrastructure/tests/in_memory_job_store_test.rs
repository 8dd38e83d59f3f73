use anyhow::Result;
use smart_queue_infrastructure::InMemoryJobStore;

mod store_contract;

#[tokio::test]
async fn test_in_memory_create_with_dependencies() -> Result<()> {
    store_contract::create_with_dependencies(&InMemoryJobStore::new()).await
}

#[tokio::test]
async fn test_in_memory_create_is_atomic() -> Result<()> {
    let store = InMemoryJobStore::new();
    store_contract::create_is_atomic_on_unknown_dependency(&store).await?;
    assert_eq!(store.job_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn test_in_memory_rejects_terminal_dependency() -> Result<()> {
    store_contract::create_rejects_terminal_dependency(&InMemoryJobStore::new()).await
}

#[tokio::test]
async fn test_in_memory_scan_order() -> Result<()> {
    store_contract::due_jobs_follow_scan_order(&InMemoryJobStore::new()).await
}

#[tokio::test]
async fn test_in_memory_claim_is_exclusive() -> Result<()> {
    store_contract::claim_is_exclusive(&InMemoryJobStore::new()).await
}

#[tokio::test]
async fn test_in_memory_mark_running() -> Result<()> {
    store_contract::mark_running_checks_attempt(&InMemoryJobStore::new()).await
}

#[tokio::test]
async fn test_in_memory_record_attempt() -> Result<()> {
    store_contract::record_attempt_transitions_once(&InMemoryJobStore::new()).await
}

#[tokio::test]
async fn test_in_memory_cancel() -> Result<()> {
    store_contract::cancel_respects_dependants(&InMemoryJobStore::new()).await
}

#[tokio::test]
async fn test_in_memory_reconciliation_queries() -> Result<()> {
    store_contract::reconciliation_queries(&InMemoryJobStore::new()).await
}

#[tokio::test]
async fn test_in_memory_log_feed() -> Result<()> {
    store_contract::log_feed_pages_forward(&InMemoryJobStore::new()).await
}
