//! Deployment status events
//!
//! The lifecycle manager and orchestrator publish a [`StatusEvent`] at every
//! transition. Publishing is fire-and-forget: a sink that cannot deliver an
//! event drops it and never fails the deployment.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use crate::models::deployment::{Deployment, DeploymentStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    #[serde(rename = "deployment.started")]
    Started,
    #[serde(rename = "deployment.status_updated")]
    StatusUpdated,
    #[serde(rename = "deployment.completed")]
    Completed,
    #[serde(rename = "deployment.failed")]
    Failed,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Started => write!(f, "deployment.started"),
            EventKind::StatusUpdated => write!(f, "deployment.status_updated"),
            EventKind::Completed => write!(f, "deployment.completed"),
            EventKind::Failed => write!(f, "deployment.failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    pub kind: EventKind,
    pub deployment_id: Uuid,
    pub project_id: Uuid,
    pub status: DeploymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Percent complete, 0-100
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    pub at: DateTime<Utc>,
}

impl StatusEvent {
    fn new(kind: EventKind, deployment: &Deployment) -> Self {
        Self {
            kind,
            deployment_id: deployment.id,
            project_id: deployment.project_id,
            status: deployment.status,
            message: None,
            progress: None,
            at: Utc::now(),
        }
    }

    pub fn started(deployment: &Deployment) -> Self {
        Self {
            progress: Some(0),
            ..Self::new(EventKind::Started, deployment)
        }
    }

    pub fn progress(deployment: &Deployment, message: impl Into<String>, progress: u8) -> Self {
        Self {
            message: Some(message.into()),
            progress: Some(progress.min(100)),
            ..Self::new(EventKind::StatusUpdated, deployment)
        }
    }

    /// Terminal event matching the deployment's final status
    pub fn finished(deployment: &Deployment) -> Self {
        let kind = match deployment.status {
            DeploymentStatus::Success | DeploymentStatus::RolledBack => EventKind::Completed,
            DeploymentStatus::Failed => EventKind::Failed,
            _ => EventKind::StatusUpdated,
        };
        Self {
            message: deployment.error_message.clone(),
            progress: Some(100),
            ..Self::new(kind, deployment)
        }
    }
}

/// Sink for status events
pub trait StatusBroadcaster: Send + Sync {
    fn publish(&self, event: StatusEvent);
}

/// Discards every event
pub struct NoopBroadcaster;

impl StatusBroadcaster for NoopBroadcaster {
    fn publish(&self, _event: StatusEvent) {}
}

/// Writes events to the log
pub struct LogBroadcaster;

impl StatusBroadcaster for LogBroadcaster {
    fn publish(&self, event: StatusEvent) {
        info!(
            deployment_id = %event.deployment_id,
            project_id = %event.project_id,
            status = %event.status,
            progress = event.progress,
            "{}: {}",
            event.kind,
            event.message.as_deref().unwrap_or("")
        );
    }
}

/// Fans events out to in-process subscribers
pub struct ChannelBroadcaster {
    tx: broadcast::Sender<StatusEvent>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }
}

impl StatusBroadcaster for ChannelBroadcaster {
    fn publish(&self, event: StatusEvent) {
        // no receivers is not an error
        let _ = self.tx.send(event);
    }
}

/// Publishes to several sinks in order
pub struct FanoutBroadcaster {
    sinks: Vec<Arc<dyn StatusBroadcaster>>,
}

impl FanoutBroadcaster {
    pub fn new(sinks: Vec<Arc<dyn StatusBroadcaster>>) -> Self {
        Self { sinks }
    }
}

impl StatusBroadcaster for FanoutBroadcaster {
    fn publish(&self, event: StatusEvent) {
        for sink in &self.sinks {
            sink.publish(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::deployment::DeploymentTrigger;

    fn deployment(status: DeploymentStatus) -> Deployment {
        Deployment {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            user_id: None,
            server_id: None,
            branch: "main".to_string(),
            commit_hash: None,
            previous_commit_hash: None,
            commit_message: None,
            trigger: DeploymentTrigger::Manual,
            status,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_seconds: None,
            output_log: String::new(),
            error_message: Some("build failed".to_string()),
            rollback_deployment_id: None,
            environment_snapshot: None,
        }
    }

    #[tokio::test]
    async fn test_channel_delivers_to_subscribers() {
        let broadcaster = ChannelBroadcaster::new(8);
        let mut rx = broadcaster.subscribe();

        broadcaster.publish(StatusEvent::started(&deployment(DeploymentStatus::Running)));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Started);
        assert_eq!(event.progress, Some(0));
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        ChannelBroadcaster::new(1).publish(StatusEvent::started(&deployment(DeploymentStatus::Running)));
    }

    #[test]
    fn test_finished_event_kind_follows_status() {
        let failed = StatusEvent::finished(&deployment(DeploymentStatus::Failed));
        assert_eq!(failed.kind, EventKind::Failed);
        assert_eq!(failed.message.as_deref(), Some("build failed"));

        let rolled_back = StatusEvent::finished(&deployment(DeploymentStatus::RolledBack));
        assert_eq!(rolled_back.kind, EventKind::Completed);

        let json = serde_json::to_value(&rolled_back).unwrap();
        assert_eq!(json["kind"], "deployment.completed");
        assert_eq!(json["status"], "rolled_back");
    }
}
