//! Project models

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::script::{HookSet, RetryPolicy};

/// How a project is built and started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMethod {
    #[default]
    Docker,
    Standard,
}

/// Runtime status of the deployed application
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Stopped,
    Running,
    Building,
    Error,
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
            Self::Building => write!(f, "building"),
            Self::Error => write!(f, "error"),
        }
    }
}

const PHP_FRAMEWORKS: &[&str] = &["laravel", "symfony", "codeigniter"];
const NODE_FRAMEWORKS: &[&str] = &["next.js", "nextjs", "react", "vue", "nuxt.js", "nuxt", "node.js", "node"];

/// A deployable application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub repository_url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub deployment_method: DeploymentMethod,
    #[serde(default)]
    pub framework: Option<String>,
    #[serde(default)]
    pub runtime_version: Option<String>,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub health_check_url: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub env_variables: BTreeMap<String, String>,

    // Standard method commands
    #[serde(default)]
    pub build_command: Option<String>,
    #[serde(default)]
    pub start_command: Option<String>,
    #[serde(default)]
    pub stop_command: Option<String>,

    #[serde(default)]
    pub deployment_script_id: Option<Uuid>,
    #[serde(default)]
    pub rollback_script_id: Option<Uuid>,
    #[serde(default)]
    pub hooks: HookSet,
    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub last_deployed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub current_commit_hash: Option<String>,
    #[serde(default)]
    pub current_commit_message: Option<String>,
    #[serde(default)]
    pub last_commit_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub server_id: Option<String>,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_environment() -> String {
    "production".to_string()
}

fn default_true() -> bool {
    true
}

impl Project {
    /// Minimal project with defaults for everything else
    pub fn new(slug: impl Into<String>, name: impl Into<String>, repository_url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            slug: slug.into(),
            name: name.into(),
            repository_url: repository_url.into(),
            branch: default_branch(),
            deployment_method: DeploymentMethod::default(),
            framework: None,
            runtime_version: None,
            environment: default_environment(),
            domains: Vec::new(),
            health_check_url: None,
            port: None,
            env_variables: BTreeMap::new(),
            build_command: None,
            start_command: None,
            stop_command: None,
            deployment_script_id: None,
            rollback_script_id: None,
            hooks: HookSet::default(),
            retry: RetryPolicy::default(),
            status: ProjectStatus::default(),
            is_active: true,
            last_deployed_at: None,
            current_commit_hash: None,
            current_commit_message: None,
            last_commit_at: None,
            owner_id: None,
            server_id: None,
        }
    }

    /// Checkout directory under the projects root
    pub fn path(&self, projects_root: &Path) -> PathBuf {
        projects_root.join(&self.slug)
    }

    pub fn primary_domain(&self) -> Option<&str> {
        self.domains.first().map(String::as_str)
    }

    /// Image and container name for standalone docker deployments
    pub fn image_name(&self) -> String {
        format!("{}:latest", self.slug)
    }

    pub fn is_framework(&self, name: &str) -> bool {
        self.framework
            .as_deref()
            .map(|f| f.eq_ignore_ascii_case(name))
            .unwrap_or(false)
    }

    fn framework_in(&self, names: &[&str]) -> bool {
        names.iter().any(|name| self.is_framework(name))
    }

    pub fn is_php(&self) -> bool {
        self.framework_in(PHP_FRAMEWORKS)
    }

    /// Port the application listens on inside its container
    pub fn container_port(&self) -> u16 {
        if self.framework_in(NODE_FRAMEWORKS) {
            3000
        } else {
            80
        }
    }

    /// Published host port
    pub fn host_port(&self) -> u16 {
        self.port.unwrap_or(8000)
    }

    /// Whether the application runs in debug mode for its environment
    pub fn debug_enabled(&self) -> bool {
        matches!(self.environment.as_str(), "local" | "development")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_port_by_framework() {
        let mut project = Project::new("shop", "Shop", "https://github.com/acme/shop.git");
        assert_eq!(project.container_port(), 80);

        project.framework = Some("Next.js".to_string());
        assert_eq!(project.container_port(), 3000);

        project.framework = Some("Laravel".to_string());
        assert_eq!(project.container_port(), 80);
        assert!(project.is_php());
    }

    #[test]
    fn test_project_deserializes_with_defaults() {
        let json = r#"{
            "id": "6f1d7f5e-1a8e-4a47-9a2e-0d4c9d1e3b21",
            "slug": "blog",
            "name": "Blog",
            "repository_url": "https://github.com/acme/blog.git"
        }"#;
        let project: Project = serde_json::from_str(json).unwrap();
        assert_eq!(project.branch, "main");
        assert_eq!(project.environment, "production");
        assert_eq!(project.status, ProjectStatus::Stopped);
        assert!(project.is_active);
        assert!(!project.retry.enabled);
    }
}
