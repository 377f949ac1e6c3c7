use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::JobId;

/// Lifecycle notifications raised by the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleKind {
    Waiting,
    Active,
    Completed,
    Failed,
    Stalled,
}

impl LifecycleKind {
    /// Bus event name, e.g. `job.completed`
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Waiting => "job.waiting",
            Self::Active => "job.active",
            Self::Completed => "job.completed",
            Self::Failed => "job.failed",
            Self::Stalled => "job.stalled",
        }
    }
}

/// Raw notification as delivered by a broker subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerNotification {
    pub job_id: JobId,
    pub kind: LifecycleKind,
    /// Return value for `completed`, failure reason for `failed`
    pub detail: Option<Value>,
    pub at: DateTime<Utc>,
}

impl BrokerNotification {
    pub fn new(job_id: JobId, kind: LifecycleKind) -> Self {
        Self {
            job_id,
            kind,
            detail: None,
            at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Queue-tagged lifecycle event republished by the event bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub queue_name: String,
    pub job_id: JobId,
    pub kind: LifecycleKind,
    pub payload: Option<Value>,
    pub occurred_at: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn from_notification(queue_name: &str, notification: BrokerNotification) -> Self {
        Self {
            queue_name: queue_name.to_string(),
            job_id: notification.job_id,
            kind: notification.kind,
            payload: notification.detail,
            occurred_at: notification.at,
        }
    }
}

/// Everything published on the process event bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    JobAdded {
        queue_name: String,
        job_id: JobId,
        job_type: String,
    },
    JobsBulkAdded {
        queue_name: String,
        count: usize,
    },
    Lifecycle(LifecycleEvent),
}

impl QueueEvent {
    /// Get event name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::JobAdded { .. } => "job.added",
            Self::JobsBulkAdded { .. } => "jobs.bulk_added",
            Self::Lifecycle(event) => event.kind.event_name(),
        }
    }

    pub fn queue_name(&self) -> &str {
        match self {
            Self::JobAdded { queue_name, .. } | Self::JobsBulkAdded { queue_name, .. } => queue_name,
            Self::Lifecycle(event) => &event.queue_name,
        }
    }

    /// Job this event refers to; bulk events have none
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            Self::JobAdded { job_id, .. } => Some(job_id),
            Self::JobsBulkAdded { .. } => None,
            Self::Lifecycle(event) => Some(&event.job_id),
        }
    }

    pub fn as_lifecycle(&self) -> Option<&LifecycleEvent> {
        match self {
            Self::Lifecycle(event) => Some(event),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names() {
        let added = QueueEvent::JobAdded {
            queue_name: "email-queue".to_string(),
            job_id: JobId::from("1"),
            job_type: "welcome".to_string(),
        };
        assert_eq!(added.event_name(), "job.added");
        assert_eq!(added.queue_name(), "email-queue");

        let bulk = QueueEvent::JobsBulkAdded { queue_name: "q".to_string(), count: 3 };
        assert_eq!(bulk.event_name(), "jobs.bulk_added");
        assert!(bulk.job_id().is_none());

        let stalled = QueueEvent::Lifecycle(LifecycleEvent::from_notification(
            "q",
            BrokerNotification::new(JobId::from("7"), LifecycleKind::Stalled),
        ));
        assert_eq!(stalled.event_name(), "job.stalled");
        assert_eq!(stalled.job_id(), Some(&JobId::from("7")));
    }
}
