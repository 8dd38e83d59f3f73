use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Job, JobPriority, ResourceRequirements, RetryConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessageType {
    JobDispatch(JobDispatchMessage),
    AttemptEvent(AttemptEventMessage),
}

/// 派发给执行端的作业快照（认领后的完整状态）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobDispatchMessage {
    pub job_id: Uuid,
    pub job_name: String,
    pub job_type: Option<String>,
    pub payload: serde_json::Value,
    pub priority: JobPriority,
    pub dispatch_priority: u8,
    pub resource_requirements: ResourceRequirements,
    pub retry_config: RetryConfig,
    pub timeout_seconds: Option<i32>,
    pub attempt_number: i32,
    pub claimed_by: Option<String>,
    pub queued_at: Option<DateTime<Utc>>,
}

impl JobDispatchMessage {
    pub fn from_claimed(job: &Job, dispatch_priority: u8) -> Self {
        Self {
            job_id: job.job_id,
            job_name: job.job_name.clone(),
            job_type: job.job_type.clone(),
            payload: job.payload.clone(),
            priority: job.priority,
            dispatch_priority,
            resource_requirements: job.resource_requirements.clone(),
            retry_config: job.retry_config.clone(),
            timeout_seconds: job.timeout_seconds,
            attempt_number: job.next_attempt_number(),
            claimed_by: job.claimed_by.clone(),
            queued_at: job.queued_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptEventKind {
    Started,
    Succeeded,
    Failed,
}

/// 执行端上报的尝试事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttemptEventMessage {
    pub job_id: Uuid,
    pub attempt_number: i32,
    pub kind: AttemptEventKind,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub message: String,
    pub worker_id: Option<String>,
    #[serde(default)]
    pub resource_usage: ResourceRequirements,
}

impl AttemptEventMessage {
    pub fn is_outcome(&self) -> bool {
        self.kind != AttemptEventKind::Started
    }
}

impl Message {
    pub fn job_dispatch(message: JobDispatchMessage) -> Self {
        let correlation_id = Some(message.job_id.to_string());
        Self {
            id: Uuid::new_v4().to_string(),
            message_type: MessageType::JobDispatch(message),
            timestamp: Utc::now(),
            correlation_id,
        }
    }

    pub fn attempt_event(message: AttemptEventMessage) -> Self {
        let correlation_id = Some(message.job_id.to_string());
        Self {
            id: Uuid::new_v4().to_string(),
            message_type: MessageType::AttemptEvent(message),
            timestamp: Utc::now(),
            correlation_id,
        }
    }

    pub fn serialize_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn deserialize_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn message_type_str(&self) -> &'static str {
        match &self.message_type {
            MessageType::JobDispatch(_) => "job_dispatch",
            MessageType::AttemptEvent(_) => "attempt_event",
        }
    }

    /// 按主题交换机约定生成路由键，例如 `job.dispatch.<uuid>`
    pub fn routing_key(&self, prefix: &str) -> String {
        let job_id = match &self.message_type {
            MessageType::JobDispatch(msg) => msg.job_id,
            MessageType::AttemptEvent(msg) => msg.job_id,
        };
        format!("{prefix}.{job_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_event_wire_format() {
        let job_id = Uuid::new_v4();
        let raw = format!(
            r#"{{
                "id": "m-1",
                "message_type": {{
                    "type": "AttemptEvent",
                    "job_id": "{job_id}",
                    "attempt_number": 2,
                    "kind": "failed",
                    "started_at": null,
                    "finished_at": null,
                    "result": {{"exit_code": 1}},
                    "worker_id": "worker-a"
                }},
                "timestamp": "2026-01-01T00:00:00Z",
                "correlation_id": null
            }}"#
        );

        let message = Message::deserialize_bytes(raw.as_bytes()).unwrap();
        match message.message_type {
            MessageType::AttemptEvent(event) => {
                assert_eq!(event.job_id, job_id);
                assert_eq!(event.kind, AttemptEventKind::Failed);
                assert!(event.is_outcome());
                assert_eq!(event.message, "");
                assert_eq!(event.resource_usage, ResourceRequirements::default());
            }
            other => panic!("unexpected message type: {other:?}"),
        }
    }

    #[test]
    fn test_routing_key() {
        let job_id = Uuid::new_v4();
        let message = Message::attempt_event(AttemptEventMessage {
            job_id,
            attempt_number: 1,
            kind: AttemptEventKind::Started,
            started_at: None,
            finished_at: None,
            result: None,
            message: String::new(),
            worker_id: None,
            resource_usage: ResourceRequirements::default(),
        });
        assert_eq!(message.routing_key("job.logs"), format!("job.logs.{job_id}"));
        assert_eq!(message.message_type_str(), "attempt_event");
        assert_eq!(message.correlation_id, Some(job_id.to_string()));
    }
}
