#![allow(dead_code)]

use smart_queue_core::{Job, JobStore};
use smart_queue_dispatcher::DispatcherComponents;
use smart_queue_testing_utils::TestHarness;
use uuid::Uuid;

pub fn components(harness: &TestHarness, instance_id: &str) -> DispatcherComponents {
    DispatcherComponents::build(
        harness.job_store(),
        harness.message_queue(),
        &harness.dispatcher_config,
        &harness.queue_config,
        instance_id,
    )
    .expect("build dispatcher components")
}

pub async fn job(harness: &TestHarness, job_id: Uuid) -> Job {
    harness
        .store
        .get_job(job_id)
        .await
        .unwrap()
        .expect("job exists")
}

/// 消费执行事件队列直到为空
pub async fn ingest_all(harness: &TestHarness, components: &DispatcherComponents) -> usize {
    let mut total = 0;
    loop {
        let processed = components
            .ingestor
            .poll_once(
                harness.queue.as_ref(),
                &harness.queue_config.outcome_queue,
                harness.queue_config.consumer_batch_size,
            )
            .await
            .unwrap();
        if processed == 0 {
            return total;
        }
        total += processed;
    }
}
