//! Test data builders

use chrono::{DateTime, Duration, Utc};
use smart_queue_core::{
    AttemptEventKind, AttemptEventMessage, JobPriority, JobSubmission, ResourceRequirements,
    RetryConfig,
};
use uuid::Uuid;

/// 作业提交构造器，默认立即到期、无依赖、只尝试一次
pub struct SubmissionBuilder {
    submission: JobSubmission,
}

impl SubmissionBuilder {
    pub fn new(name: &str) -> Self {
        let mut submission = JobSubmission::new(name);
        submission.job_id = Some(Uuid::new_v4());
        submission.run_at = Some(Utc::now() - Duration::seconds(1));
        Self { submission }
    }

    pub fn job_id(&self) -> Uuid {
        self.submission.job_id.unwrap_or_default()
    }

    pub fn with_job_id(mut self, job_id: Uuid) -> Self {
        self.submission.job_id = Some(job_id);
        self
    }

    pub fn with_type(mut self, job_type: &str) -> Self {
        self.submission.job_type = Some(job_type.to_string());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.submission.payload = payload;
        self
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.submission.priority = priority;
        self
    }

    pub fn depends_on(mut self, job_ids: &[Uuid]) -> Self {
        self.submission.depends_on = job_ids.to_vec();
        self
    }

    pub fn with_retry(mut self, max_attempts: i32, multiplier: f64, initial_delay: f64) -> Self {
        self.submission.retry_config = RetryConfig {
            max_attempts,
            backoff_multiplier: multiplier,
            initial_delay_seconds: initial_delay,
        };
        self
    }

    pub fn with_timeout(mut self, timeout_seconds: i32) -> Self {
        self.submission.timeout_seconds = Some(timeout_seconds);
        self
    }

    pub fn run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.submission.run_at = Some(run_at);
        self
    }

    pub fn build(self) -> JobSubmission {
        self.submission
    }
}

/// 执行端上报事件构造器
pub struct AttemptEventBuilder {
    event: AttemptEventMessage,
}

impl AttemptEventBuilder {
    fn new(job_id: Uuid, attempt_number: i32, kind: AttemptEventKind) -> Self {
        let finished = Utc::now();
        let is_outcome = kind != AttemptEventKind::Started;
        Self {
            event: AttemptEventMessage {
                job_id,
                attempt_number,
                kind,
                started_at: Some(finished - Duration::seconds(1)),
                finished_at: is_outcome.then_some(finished),
                result: None,
                message: String::new(),
                worker_id: Some("test-worker".to_string()),
                resource_usage: ResourceRequirements::default(),
            },
        }
    }

    pub fn started(job_id: Uuid, attempt_number: i32) -> Self {
        Self::new(job_id, attempt_number, AttemptEventKind::Started)
    }

    pub fn succeeded(job_id: Uuid, attempt_number: i32) -> Self {
        Self::new(job_id, attempt_number, AttemptEventKind::Succeeded)
    }

    pub fn failed(job_id: Uuid, attempt_number: i32) -> Self {
        Self::new(job_id, attempt_number, AttemptEventKind::Failed)
            .with_message("attempt failed")
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.event.result = Some(result);
        self
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.event.message = message.to_string();
        self
    }

    pub fn build(self) -> AttemptEventMessage {
        self.event
    }
}
