//! Metrics collector for the job queue engine
//!
//! 指标通过 `metrics` 门面记录，未安装导出器时为空操作。

use metrics::{counter, gauge, histogram};

/// 调度引擎指标
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// 提交成功的作业数
    pub fn record_jobs_submitted(&self, count: usize) {
        counter!("smart_queue_jobs_submitted_total").increment(count as u64);
    }

    pub fn record_job_dispatched(&self, priority: &str) {
        counter!("smart_queue_jobs_dispatched_total", "priority" => priority.to_string())
            .increment(1);
    }

    /// 认领竞争失败（另一个实例先认领）
    pub fn record_claim_conflict(&self) {
        counter!("smart_queue_claim_conflicts_total").increment(1);
    }

    pub fn record_dispatch_fault(&self) {
        counter!("smart_queue_dispatch_faults_total").increment(1);
    }

    /// 已入库的尝试结果，`outcome` 为 completed / retry / failed / logged_only / duplicate
    pub fn record_attempt_outcome(&self, outcome: &str) {
        counter!("smart_queue_attempt_outcomes_total", "outcome" => outcome.to_string())
            .increment(1);
    }

    pub fn record_attempt_duration(&self, duration_seconds: f64) {
        histogram!("smart_queue_attempt_duration_seconds").record(duration_seconds);
    }

    pub fn record_job_cancelled(&self) {
        counter!("smart_queue_jobs_cancelled_total").increment(1);
    }

    pub fn record_reconciled(&self, kind: &str, count: usize) {
        counter!("smart_queue_reconciled_total", "kind" => kind.to_string())
            .increment(count as u64);
    }

    /// 单次调度周期耗时
    pub fn record_tick_duration(&self, duration_seconds: f64) {
        histogram!("smart_queue_tick_duration_seconds").record(duration_seconds);
    }

    pub fn update_ready_jobs(&self, count: usize) {
        gauge!("smart_queue_ready_jobs").set(count as f64);
    }

    pub fn update_queue_depth(&self, queue: &str, depth: u32) {
        gauge!("smart_queue_queue_depth", "queue" => queue.to_string()).set(f64::from(depth));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_exporter_is_noop() {
        let metrics = MetricsCollector::new();
        metrics.record_jobs_submitted(3);
        metrics.record_job_dispatched("High");
        metrics.record_attempt_outcome("completed");
        metrics.record_tick_duration(0.01);
        metrics.update_queue_depth("job_dispatch_queue", 2);
    }
}
