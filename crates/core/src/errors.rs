use thiserror::Error;
use uuid::Uuid;

use crate::models::JobStatus;

/// 取消作业被拒绝的原因
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CancelError {
    #[error("存在未结束的依赖作业: {dependants:?}")]
    HasDependents { dependants: Vec<Uuid> },

    #[error("作业已处于终态: {status}")]
    AlreadyTerminal { status: JobStatus },

    #[error("作业正在运行，无法取消: {status}")]
    NotCancellable { status: JobStatus },
}

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("作业未找到: {job_id}")]
    JobNotFound { job_id: Uuid },

    #[error("依赖作业不存在: {job_id}")]
    DependencyNotFound { job_id: Uuid },

    #[error("检测到循环依赖: {path:?}")]
    DependencyCycle { path: Vec<Uuid> },

    #[error("作业已被其他调度实例认领: {job_id}")]
    ClaimConflict { job_id: Uuid },

    #[error("取消作业失败: {0}")]
    Cancel(#[from] CancelError),

    #[error("派发失败: {0}")]
    DispatchFault(String),

    #[error("重复的执行日志事件: job={job_id}, attempt={attempt_number}")]
    DuplicateLogEvent { job_id: Uuid, attempt_number: i32 },

    #[error("非法的状态转换: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("无效的作业参数: {0}")]
    InvalidJobParams(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// 预期内的并发结果，不应作为故障记录
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            SchedulerError::ClaimConflict { .. } | SchedulerError::DuplicateLogEvent { .. }
        )
    }

    /// 需要返回给提交方的拒绝类错误
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            SchedulerError::DependencyCycle { .. }
                | SchedulerError::DependencyNotFound { .. }
                | SchedulerError::InvalidJobParams(_)
                | SchedulerError::Cancel(_)
                | SchedulerError::JobNotFound { .. }
        )
    }

    /// 可在下一个调度周期重试的瞬时错误
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SchedulerError::Database(_)
                | SchedulerError::DatabaseOperation(_)
                | SchedulerError::MessageQueue(_)
                | SchedulerError::DispatchFault(_)
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(e: serde_json::Error) -> Self {
        SchedulerError::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let conflict = SchedulerError::ClaimConflict {
            job_id: Uuid::new_v4(),
        };
        assert!(conflict.is_benign());
        assert!(!conflict.is_user_facing());

        let cycle = SchedulerError::DependencyCycle { path: vec![] };
        assert!(cycle.is_user_facing());
        assert!(!cycle.is_benign());

        let cancel: SchedulerError = CancelError::AlreadyTerminal {
            status: JobStatus::Completed,
        }
        .into();
        assert!(cancel.is_user_facing());

        let fault = SchedulerError::DispatchFault("timeout".to_string());
        assert!(fault.is_transient());
        assert!(!fault.is_user_facing());
    }

    #[test]
    fn test_error_display() {
        let err = SchedulerError::InvalidTransition {
            from: JobStatus::Completed,
            to: JobStatus::Waiting,
        };
        assert_eq!(err.to_string(), "非法的状态转换: completed -> waiting");
    }
}
