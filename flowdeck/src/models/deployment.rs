//! Deployment models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::project::Project;

/// Lifecycle status of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
    RolledBack,
}

impl DeploymentStatus {
    /// Pending and running deployments hold the project's active slot
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Statuses a later rollback may target
    pub fn is_success_class(&self) -> bool {
        matches!(self, Self::Success | Self::RolledBack)
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// What started a deployment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentTrigger {
    #[default]
    Manual,
    Webhook,
    Rollback,
    Schedule,
}

impl std::fmt::Display for DeploymentTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Webhook => write!(f, "webhook"),
            Self::Rollback => write!(f, "rollback"),
            Self::Schedule => write!(f, "schedule"),
        }
    }
}

/// Project configuration captured when a deployment is opened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub branch: String,
    pub environment: String,
    pub runtime_version: Option<String>,
    pub framework: Option<String>,
    #[serde(default)]
    pub env_variables: BTreeMap<String, String>,
    pub captured_at: DateTime<Utc>,
}

impl EnvironmentSnapshot {
    pub fn capture(project: &Project) -> Self {
        Self {
            branch: project.branch.clone(),
            environment: project.environment.clone(),
            runtime_version: project.runtime_version.clone(),
            framework: project.framework.clone(),
            env_variables: project.env_variables.clone(),
            captured_at: Utc::now(),
        }
    }
}

/// A single deployment attempt for a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: Uuid,
    pub project_id: Uuid,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub server_id: Option<String>,
    pub branch: String,
    #[serde(default)]
    pub commit_hash: Option<String>,
    #[serde(default)]
    pub previous_commit_hash: Option<String>,
    #[serde(default)]
    pub commit_message: Option<String>,
    #[serde(default)]
    pub trigger: DeploymentTrigger,
    pub status: DeploymentStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_seconds: Option<i64>,
    #[serde(default)]
    pub output_log: String,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub rollback_deployment_id: Option<Uuid>,
    #[serde(default)]
    pub environment_snapshot: Option<EnvironmentSnapshot>,
}

impl Deployment {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Seconds since `started_at`, falling back to `created_at`
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> i64 {
        let start = self.started_at.unwrap_or(self.created_at);
        (now - start).num_seconds().max(0)
    }
}

/// Everything the lifecycle manager needs to open a deployment
#[derive(Debug, Clone)]
pub struct DeploymentRequest {
    pub project_id: Uuid,
    pub project_slug: String,
    pub user_id: Option<String>,
    pub server_id: Option<String>,
    pub branch: String,
    pub commit_hash: Option<String>,
    pub previous_commit_hash: Option<String>,
    pub commit_message: Option<String>,
    pub trigger: DeploymentTrigger,
    pub rollback_deployment_id: Option<Uuid>,
    pub environment_snapshot: Option<EnvironmentSnapshot>,
}

impl DeploymentRequest {
    /// Request for a regular deploy of the project's configured branch
    pub fn for_project(project: &Project, trigger: DeploymentTrigger) -> Self {
        Self {
            project_id: project.id,
            project_slug: project.slug.clone(),
            user_id: project.owner_id.clone(),
            server_id: project.server_id.clone(),
            branch: project.branch.clone(),
            commit_hash: None,
            previous_commit_hash: project.current_commit_hash.clone(),
            commit_message: None,
            trigger,
            rollback_deployment_id: None,
            environment_snapshot: Some(EnvironmentSnapshot::capture(project)),
        }
    }
}

/// Terminal outcome handed to the lifecycle manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed,
    RolledBack,
}

impl Outcome {
    pub fn status(&self) -> DeploymentStatus {
        match self {
            Outcome::Success => DeploymentStatus::Success,
            Outcome::Failed => DeploymentStatus::Failed,
            Outcome::RolledBack => DeploymentStatus::RolledBack,
        }
    }
}
