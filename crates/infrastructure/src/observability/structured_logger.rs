//! Structured logging utilities
//!
//! 作业生命周期事件统一带 `event` 字段，便于在JSON日志中检索。

use chrono::{DateTime, Utc};
use smart_queue_core::{JobPriority, JobStatus};
use tracing::{info, warn};
use uuid::Uuid;

pub struct StructuredLogger;

impl StructuredLogger {
    pub fn log_job_submitted(job_id: Uuid, job_name: &str, priority: JobPriority, run_at: DateTime<Utc>) {
        info!(
            event = "job_submitted",
            job.id = %job_id,
            job.name = job_name,
            job.priority = %priority,
            job.run_at = %run_at,
            "作业已提交"
        );
    }

    pub fn log_job_dispatched(job_id: Uuid, attempt_number: i32, dispatch_priority: u8, instance_id: &str) {
        info!(
            event = "job_dispatched",
            job.id = %job_id,
            job.attempt = attempt_number,
            dispatch.priority = dispatch_priority,
            dispatcher.instance = instance_id,
            "作业已派发"
        );
    }

    pub fn log_job_transition(job_id: Uuid, from: JobStatus, to: JobStatus, times_attempted: i32) {
        info!(
            event = "job_transition",
            job.id = %job_id,
            job.from = %from,
            job.to = %to,
            job.times_attempted = times_attempted,
            "作业状态变更"
        );
    }

    pub fn log_retry_scheduled(job_id: Uuid, attempt_number: i32, delay_seconds: f64, run_at: DateTime<Utc>) {
        info!(
            event = "job_retry_scheduled",
            job.id = %job_id,
            job.attempt = attempt_number,
            retry.delay_seconds = delay_seconds,
            retry.run_at = %run_at,
            "作业将在退避后重试"
        );
    }

    pub fn log_job_cancelled(job_id: Uuid, previous: JobStatus) {
        info!(
            event = "job_cancelled",
            job.id = %job_id,
            job.previous_status = %previous,
            "作业已取消"
        );
    }

    pub fn log_stale_event(job_id: Uuid, attempt_number: i32, status: JobStatus, reason: &str) {
        warn!(
            event = "stale_attempt_event",
            job.id = %job_id,
            job.attempt = attempt_number,
            job.status = %status,
            reason = reason,
            "尝试事件已记录但未改变作业状态"
        );
    }
}
