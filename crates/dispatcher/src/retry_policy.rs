use chrono::{DateTime, Duration, Utc};
use smart_queue_core::{
    config::MAX_BACKOFF_LIMIT_SECONDS, AttemptDecision, AttemptTransition, Job, RetryConfig,
};

/// 重试与退避策略
///
/// 纯计算，不访问存储。返回的转换由日志写入方在同一事务中应用。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_backoff_seconds: f64,
}

impl RetryPolicy {
    pub fn new(max_backoff_seconds: f64) -> Self {
        Self {
            max_backoff_seconds: if max_backoff_seconds.is_finite() {
                max_backoff_seconds.clamp(0.0, MAX_BACKOFF_LIMIT_SECONDS)
            } else {
                MAX_BACKOFF_LIMIT_SECONDS
            },
        }
    }

    /// 第 `attempt` 次失败后的等待时间：`initial_delay × multiplier^(attempt-1)`，不超过上限
    pub fn backoff_seconds(&self, config: &RetryConfig, attempt: i32) -> f64 {
        let exponent = attempt.saturating_sub(1).max(0);
        let delay = config.initial_delay_seconds * config.backoff_multiplier.powi(exponent);
        if delay.is_finite() {
            delay.min(self.max_backoff_seconds)
        } else {
            self.max_backoff_seconds
        }
    }

    /// 根据本次尝试结果决定作业的下一个状态
    pub fn on_attempt_outcome(
        &self,
        job: &Job,
        succeeded: bool,
        results: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> AttemptTransition {
        let decision = if succeeded {
            AttemptDecision::Complete { results }
        } else if job.is_final_attempt() {
            AttemptDecision::Fail { results }
        } else {
            let delay_seconds = self.backoff_seconds(&job.retry_config, job.next_attempt_number());
            let delay = Duration::milliseconds((delay_seconds * 1000.0).round() as i64);
            let run_at = now.checked_add_signed(delay).unwrap_or(now);
            AttemptDecision::Retry {
                run_at,
                delay_seconds,
                results,
            }
        };

        AttemptTransition {
            expected_times_attempted: job.times_attempted,
            decision,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(86_400.0)
    }
}
