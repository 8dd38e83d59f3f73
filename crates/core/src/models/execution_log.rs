use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Job, ResourceRequirements};

/// 单次尝试的执行日志，写入后不可修改
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: i64,
    pub job_id: i64,
    pub job_uuid: Uuid,
    pub attempt_number: i32,
    pub log_timestamp: DateTime<Utc>,
    pub message: String,
    pub duration_seconds: Option<f64>,
    pub is_successful: bool,
    pub results: Option<serde_json::Value>,
    pub resource_usage: ResourceRequirements,
    pub execution_start_time: Option<DateTime<Utc>>,
    pub execution_end_time: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewExecutionLog {
    pub job_uuid: Uuid,
    pub attempt_number: i32,
    pub message: String,
    pub is_successful: bool,
    pub results: Option<serde_json::Value>,
    pub resource_usage: ResourceRequirements,
    pub execution_start_time: Option<DateTime<Utc>>,
    pub execution_end_time: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
}

impl NewExecutionLog {
    pub fn duration_seconds(&self) -> Option<f64> {
        match (self.execution_start_time, self.execution_end_time) {
            (Some(start), Some(end)) if end >= start => {
                Some((end - start).num_milliseconds() as f64 / 1000.0)
            }
            _ => None,
        }
    }
}

/// 重试策略对一次尝试结果做出的决定
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptDecision {
    Complete {
        results: Option<serde_json::Value>,
    },
    Retry {
        run_at: DateTime<Utc>,
        delay_seconds: f64,
        results: Option<serde_json::Value>,
    },
    Fail {
        results: Option<serde_json::Value>,
    },
}

impl AttemptDecision {
    pub fn target_status(&self) -> super::JobStatus {
        match self {
            AttemptDecision::Complete { .. } => super::JobStatus::Completed,
            AttemptDecision::Retry { .. } => super::JobStatus::Waiting,
            AttemptDecision::Fail { .. } => super::JobStatus::Failed,
        }
    }

    pub fn results(&self) -> Option<&serde_json::Value> {
        match self {
            AttemptDecision::Complete { results }
            | AttemptDecision::Retry { results, .. }
            | AttemptDecision::Fail { results } => results.as_ref(),
        }
    }

    pub fn run_at(&self) -> Option<DateTime<Utc>> {
        match self {
            AttemptDecision::Retry { run_at, .. } => Some(*run_at),
            _ => None,
        }
    }
}

/// 与日志写入在同一事务内执行的条件状态转换
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptTransition {
    /// 仅当作业的 times_attempted 仍等于该值时才生效
    pub expected_times_attempted: i32,
    pub decision: AttemptDecision,
}

/// 日志写入结果
#[derive(Debug, Clone)]
pub enum RecordOutcome {
    /// 日志已写入且状态转换已生效
    Applied(Job),
    /// 日志已写入，没有状态转换
    LoggedOnly,
    /// 该尝试的日志已存在
    Duplicate,
    /// 作业状态已被并发修改，整个事务已回滚
    Conflict,
}
