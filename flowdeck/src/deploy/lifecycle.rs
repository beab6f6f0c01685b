//! Deployment lifecycle management
//!
//! Owns every status change of a [`Deployment`]. Opening is serialized per
//! project so the check for an active deployment and the creation of a new
//! one happen as a single step: a project never has more than one deployment
//! in `pending` or `running`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm};
use crate::errors::EngineError;
use crate::events::{StatusBroadcaster, StatusEvent};
use crate::models::deployment::{Deployment, DeploymentRequest, DeploymentStatus, Outcome};
use crate::storage::deployments::DeploymentStore;

pub const CANCELLED_BY_USER: &str = "Deployment cancelled by user";

pub struct LifecycleManager {
    store: Arc<DeploymentStore>,
    broadcaster: Arc<dyn StatusBroadcaster>,
    project_locks: std::sync::Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl LifecycleManager {
    pub fn new(store: Arc<DeploymentStore>, broadcaster: Arc<dyn StatusBroadcaster>) -> Self {
        Self {
            store,
            broadcaster,
            project_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &DeploymentStore {
        &self.store
    }

    pub fn broadcaster(&self) -> &Arc<dyn StatusBroadcaster> {
        &self.broadcaster
    }

    fn project_lock(&self, project_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.project_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(project_id).or_default().clone()
    }

    /// Open a new running deployment, or fail with `DeploymentInProgress`
    /// without creating anything
    pub async fn open(&self, request: DeploymentRequest) -> Result<Deployment, EngineError> {
        let (deployment, _) = self.open_inner(request, false).await?;
        Ok(deployment)
    }

    /// Cancel any active deployment of the project, then open a new one.
    /// Returns the new deployment and the one it superseded.
    pub async fn force_open(
        &self,
        request: DeploymentRequest,
    ) -> Result<(Deployment, Option<Deployment>), EngineError> {
        self.open_inner(request, true).await
    }

    async fn open_inner(
        &self,
        request: DeploymentRequest,
        force: bool,
    ) -> Result<(Deployment, Option<Deployment>), EngineError> {
        let lock = self.project_lock(request.project_id);
        let _guard = lock.lock().await;

        let mut superseded = None;
        if let Some(active) = self.store.active_for(request.project_id) {
            if !force {
                return Err(EngineError::DeploymentInProgress {
                    project: request.project_slug.clone(),
                    deployment_id: active.id,
                });
            }
            warn!(
                "Force deploy of {}: cancelling active deployment {}",
                request.project_slug, active.id
            );
            superseded = Some(
                self.cancel_with_message(active.id, "Superseded by a forced deployment")
                    .await?,
            );
        }

        let mut fsm = DeploymentFsm::new(request.trigger);
        let pending = Deployment {
            id: Uuid::new_v4(),
            project_id: request.project_id,
            user_id: request.user_id,
            server_id: request.server_id,
            branch: request.branch,
            commit_hash: request.commit_hash,
            previous_commit_hash: request.previous_commit_hash,
            commit_message: request.commit_message,
            trigger: request.trigger,
            status: fsm.state(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_seconds: None,
            output_log: String::new(),
            error_message: None,
            rollback_deployment_id: request.rollback_deployment_id,
            environment_snapshot: request.environment_snapshot,
        };
        let id = pending.id;
        self.store.insert(pending).await?;

        let status = fsm.process(DeploymentEvent::Start)?;
        let deployment = self
            .store
            .update(id, |d| {
                d.status = status;
                d.started_at = Some(Utc::now());
                Ok(())
            })
            .await?;

        info!(
            "Opened deployment {} for {} ({} trigger)",
            deployment.id, request.project_slug, deployment.trigger
        );
        self.broadcaster.publish(StatusEvent::started(&deployment));
        Ok((deployment, superseded))
    }

    /// Move a running deployment to its terminal status.
    ///
    /// Completing an already-terminal deployment returns `AlreadyTerminal`
    /// and leaves the record untouched.
    pub async fn complete(
        &self,
        id: Uuid,
        outcome: Outcome,
        error_message: Option<String>,
    ) -> Result<Deployment, EngineError> {
        let deployment = self
            .store
            .update(id, |d| {
                if d.status.is_terminal() {
                    return Err(EngineError::AlreadyTerminal {
                        deployment_id: d.id,
                        status: d.status.to_string(),
                    });
                }

                let event = match outcome {
                    Outcome::Failed => DeploymentEvent::Fail(error_message.clone().unwrap_or_default()),
                    other => other.into(),
                };
                let mut fsm = DeploymentFsm::from_deployment(d);
                d.status = fsm.process(event)?;

                let now = Utc::now();
                d.completed_at = Some(now);
                d.duration_seconds = Some(d.elapsed_seconds(now));
                if d.status == DeploymentStatus::Failed {
                    d.error_message = Some(
                        error_message
                            .clone()
                            .filter(|m| !m.trim().is_empty())
                            .unwrap_or_else(|| "Deployment failed".to_string()),
                    );
                }
                Ok(())
            })
            .await?;

        info!(
            "Deployment {} finished as {} after {}s",
            deployment.id,
            deployment.status,
            deployment.duration_seconds.unwrap_or_default()
        );
        self.broadcaster.publish(StatusEvent::finished(&deployment));
        Ok(deployment)
    }

    /// Cancel a pending or running deployment.
    ///
    /// Only the record changes; processes already started keep running
    /// until their own timeout.
    pub async fn cancel(&self, id: Uuid) -> Result<Deployment, EngineError> {
        self.cancel_with_message(id, CANCELLED_BY_USER).await
    }

    async fn cancel_with_message(&self, id: Uuid, message: &str) -> Result<Deployment, EngineError> {
        let deployment = self
            .store
            .update(id, |d| {
                if d.status.is_terminal() {
                    return Err(EngineError::AlreadyTerminal {
                        deployment_id: d.id,
                        status: d.status.to_string(),
                    });
                }
                let mut fsm = DeploymentFsm::from_deployment(d);
                d.status = fsm.process(DeploymentEvent::Cancel)?;

                let now = Utc::now();
                d.completed_at = Some(now);
                d.duration_seconds = Some(d.elapsed_seconds(now));
                d.error_message = Some(message.to_string());
                Ok(())
            })
            .await?;

        info!("Deployment {} cancelled: {}", deployment.id, message);
        self.broadcaster
            .publish(StatusEvent::progress(&deployment, message, 100));
        Ok(deployment)
    }

    /// Append text to the deployment log; allowed in any state
    pub async fn append_log(&self, id: Uuid, text: &str) -> Result<(), EngineError> {
        if text.is_empty() {
            return Ok(());
        }
        self.store
            .update(id, |d| {
                d.output_log.push_str(text);
                if !text.ends_with('\n') {
                    d.output_log.push('\n');
                }
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Publish a progress event without touching the record
    pub fn report_progress(&self, deployment: &Deployment, message: &str, progress: u8) {
        self.broadcaster
            .publish(StatusEvent::progress(deployment, message, progress));
    }

    pub fn get(&self, id: Uuid) -> Result<Deployment, EngineError> {
        self.store.require(id)
    }

    pub fn active_for(&self, project_id: Uuid) -> Option<Deployment> {
        self.store.active_for(project_id)
    }

    pub fn list_for_project(&self, project_id: Uuid) -> Vec<Deployment> {
        self.store.for_project(project_id)
    }
}
