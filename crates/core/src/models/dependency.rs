use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::JobStatus;

/// 依赖边 `(dependant, depends_on)`，引用作业的内部主键
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobDependency {
    pub id: i64,
    pub dependant_id: i64,
    pub depends_on_id: i64,
    pub created_time: DateTime<Utc>,
}

/// 依赖边另一端作业的状态快照
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkedJob {
    pub dependency: JobDependency,
    pub job_id: Uuid,
    pub status: JobStatus,
}
