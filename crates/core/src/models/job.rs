use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{SchedulerError, SchedulerResult};

/// 作业状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Waiting,
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// 终态不再允许任何状态转换
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// 执行结果事件只能作用于已派发的作业
    pub fn accepts_outcome(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }

    /// 作业状态机
    ///
    /// `queued -> waiting` 仅由派发超时对账产生；`queued -> completed/failed/waiting`
    /// 对应开始事件丢失或乱序时直接收到执行结果的情况。
    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Waiting, Queued)
                | (Waiting, Cancelled)
                | (Queued, Running)
                | (Queued, Cancelled)
                | (Queued, Waiting)
                | (Queued, Completed)
                | (Queued, Failed)
                | (Running, Waiting)
                | (Running, Completed)
                | (Running, Failed)
        )
    }

    pub fn ensure_transition(&self, to: JobStatus) -> SchedulerResult<()> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(SchedulerError::InvalidTransition { from: *self, to })
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobStatus::Waiting),
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(SchedulerError::Serialization(format!("无效的作业状态: {s}"))),
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for JobStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <&str as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for JobStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        s.parse::<JobStatus>().map_err(|e| e.to_string().into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for JobStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// 作业优先级，声明顺序即逻辑顺序（Low 最低）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl JobPriority {
    /// 存储层使用的序数，数值越大优先级越高
    pub fn rank(&self) -> i16 {
        match self {
            JobPriority::Low => 1,
            JobPriority::Normal => 2,
            JobPriority::High => 3,
            JobPriority::Critical => 4,
        }
    }

    pub fn from_rank(rank: i16) -> SchedulerResult<Self> {
        match rank {
            1 => Ok(JobPriority::Low),
            2 => Ok(JobPriority::Normal),
            3 => Ok(JobPriority::High),
            4 => Ok(JobPriority::Critical),
            _ => Err(SchedulerError::Serialization(format!(
                "无效的优先级序数: {rank}"
            ))),
        }
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobPriority::Low => "Low",
            JobPriority::Normal => "Normal",
            JobPriority::High => "High",
            JobPriority::Critical => "Critical",
        };
        f.write_str(s)
    }
}

impl FromStr for JobPriority {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(JobPriority::Low),
            "normal" => Ok(JobPriority::Normal),
            "high" => Ok(JobPriority::High),
            "critical" => Ok(JobPriority::Critical),
            _ => Err(SchedulerError::InvalidJobParams(format!("无效的优先级: {s}"))),
        }
    }
}

/// 资源需求声明，仅透传给执行端
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceRequirements {
    pub cpu_units: Option<i32>,
    pub memory_mb: Option<i32>,
}

/// 重试配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: i32,
    pub backoff_multiplier: f64,
    pub initial_delay_seconds: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_multiplier: 1.0,
            initial_delay_seconds: 0.0,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.max_attempts < 1 {
            return Err(SchedulerError::InvalidJobParams(
                "max_attempts 必须大于等于1".to_string(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(SchedulerError::InvalidJobParams(
                "backoff_multiplier 必须大于等于1.0".to_string(),
            ));
        }
        if !self.initial_delay_seconds.is_finite() || self.initial_delay_seconds < 0.0 {
            return Err(SchedulerError::InvalidJobParams(
                "initial_delay_seconds 不能为负数".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// 内部存储主键，同时表示创建顺序
    pub id: i64,
    pub job_id: Uuid,
    pub job_name: String,
    pub job_type: Option<String>,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub priority: JobPriority,
    pub resource_requirements: ResourceRequirements,
    pub retry_config: RetryConfig,
    pub timeout_seconds: Option<i32>,
    pub times_attempted: i32,
    pub run_at: DateTime<Utc>,
    pub results: Option<serde_json::Value>,
    pub claimed_by: Option<String>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub created_time: DateTime<Utc>,
    pub modified_time: DateTime<Utc>,
}

impl Job {
    /// 下一次执行的尝试编号（从1开始）
    pub fn next_attempt_number(&self) -> i32 {
        self.times_attempted + 1
    }

    /// 当前尝试失败后是否不再重试
    pub fn is_final_attempt(&self) -> bool {
        self.next_attempt_number() >= self.retry_config.max_attempts
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Waiting && self.run_at <= now
    }

    pub fn scan_cursor(&self) -> ScanCursor {
        ScanCursor {
            priority: self.priority,
            run_at: self.run_at,
            id: self.id,
        }
    }
}

/// 就绪扫描的键集分页游标，顺序为 (priority DESC, run_at ASC, id ASC)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanCursor {
    pub priority: JobPriority,
    pub run_at: DateTime<Utc>,
    pub id: i64,
}

impl ScanCursor {
    /// 该作业在扫描顺序中是否位于游标之后
    pub fn precedes(&self, job: &Job) -> bool {
        (
            std::cmp::Reverse(self.priority),
            self.run_at,
            self.id,
        ) < (std::cmp::Reverse(job.priority), job.run_at, job.id)
    }
}

/// 客户端提交的作业
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission {
    #[serde(default)]
    pub job_id: Option<Uuid>,
    pub job_name: String,
    #[serde(default, rename = "type")]
    pub job_type: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: JobPriority,
    #[serde(default)]
    pub resource_requirements: ResourceRequirements,
    #[serde(default)]
    pub retry_config: RetryConfig,
    #[serde(default)]
    pub timeout_seconds: Option<i32>,
    #[serde(default)]
    pub run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub depends_on: Vec<Uuid>,
}

impl JobSubmission {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_id: None,
            job_name: job_name.into(),
            job_type: None,
            payload: serde_json::Value::Null,
            priority: JobPriority::default(),
            resource_requirements: ResourceRequirements::default(),
            retry_config: RetryConfig::default(),
            timeout_seconds: None,
            run_at: None,
            depends_on: Vec::new(),
        }
    }

    /// 校验与存储状态无关的字段
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.job_name.trim().is_empty() {
            return Err(SchedulerError::InvalidJobParams(
                "作业名称不能为空".to_string(),
            ));
        }
        self.retry_config.validate()?;
        if let Some(timeout) = self.timeout_seconds {
            if timeout <= 0 {
                return Err(SchedulerError::InvalidJobParams(
                    "timeout_seconds 必须大于0".to_string(),
                ));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for dep in &self.depends_on {
            if !seen.insert(dep) {
                return Err(SchedulerError::InvalidJobParams(format!(
                    "重复的依赖作业: {dep}"
                )));
            }
        }
        Ok(())
    }

    /// 补全作业标识和最早运行时间
    pub fn resolve(self, now: DateTime<Utc>) -> NewJob {
        NewJob {
            job_id: self.job_id.unwrap_or_else(Uuid::new_v4),
            job_name: self.job_name,
            job_type: self.job_type,
            payload: self.payload,
            priority: self.priority,
            resource_requirements: self.resource_requirements,
            retry_config: self.retry_config,
            timeout_seconds: self.timeout_seconds,
            run_at: self.run_at.unwrap_or(now),
            depends_on: self.depends_on,
        }
    }
}

/// 已补全、等待写入存储的作业
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_id: Uuid,
    pub job_name: String,
    pub job_type: Option<String>,
    pub payload: serde_json::Value,
    pub priority: JobPriority,
    pub resource_requirements: ResourceRequirements,
    pub retry_config: RetryConfig,
    pub timeout_seconds: Option<i32>,
    pub run_at: DateTime<Utc>,
    pub depends_on: Vec<Uuid>,
}

/// 作业列表查询条件
#[derive(Debug, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub priority: Option<JobPriority>,
    pub offset: i64,
    pub limit: i64,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            status: None,
            priority: None,
            offset: 0,
            limit: 100,
        }
    }
}

/// 作业及其直接依赖
#[derive(Debug, Clone, Serialize)]
pub struct JobDetails {
    #[serde(flatten)]
    pub job: Job,
    pub depends_on: Vec<Uuid>,
}
