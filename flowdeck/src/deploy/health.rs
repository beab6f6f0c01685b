//! Project health checks
//!
//! A report combines an HTTP probe of the project's health URL, the state of
//! its container(s), disk usage of the projects root and the outcome of the
//! most recent deployment.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::errors::EngineError;
use crate::exec::runner::{CommandRunner, CommandSpec};
use crate::models::deployment::{Deployment, DeploymentStatus};
use crate::models::project::Project;
use crate::storage::settings::DiskThresholds;
use crate::telemetry::{self, HostMetrics};

use super::compose;
use super::docker;
use super::plan::Runtime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Unknown,
    InProgress,
    Healthy,
    Warning,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Healthy => write!(f, "healthy"),
            Self::Warning => write!(f, "warning"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub name: &'static str,
    pub status: HealthStatus,
    pub detail: String,
}

impl HealthCheck {
    fn new(name: &'static str, status: HealthStatus, detail: impl Into<String>) -> Self {
        Self {
            name,
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub project: String,
    pub status: HealthStatus,
    pub checks: Vec<HealthCheck>,
    pub metrics: HostMetrics,
    pub checked_at: DateTime<Utc>,
}

/// Worst status among the checks. In-progress and unknown checks only decide
/// the result when nothing else reported.
pub fn overall_status(checks: &[HealthCheck]) -> HealthStatus {
    let worst = checks
        .iter()
        .map(|c| c.status)
        .filter(|s| *s >= HealthStatus::Healthy)
        .max();
    match worst {
        Some(status) => status,
        None if checks.iter().any(|c| c.status == HealthStatus::InProgress) => HealthStatus::InProgress,
        None => HealthStatus::Unknown,
    }
}

/// URL probed for `project`: the configured health URL, or https on the first domain
pub fn probe_url(project: &Project) -> Result<Option<Url>, EngineError> {
    let raw = match (&project.health_check_url, project.primary_domain()) {
        (Some(url), _) if !url.trim().is_empty() => url.trim().to_string(),
        (_, Some(domain)) => format!("https://{}", domain),
        _ => return Ok(None),
    };

    let url = Url::parse(&raw)
        .map_err(|e| EngineError::ValidationError(format!("invalid health check url {}: {}", raw, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(EngineError::ValidationError(format!(
            "health check url must be http or https: {}",
            raw
        )));
    }
    Ok(Some(url))
}

pub fn disk_check(percent: f32, thresholds: &DiskThresholds) -> HealthCheck {
    let status = if percent >= thresholds.critical_percent {
        HealthStatus::Unhealthy
    } else if percent >= thresholds.warning_percent {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    };
    HealthCheck::new("disk", status, format!("{:.1}% used", percent))
}

pub fn deployment_check(last: Option<&Deployment>) -> HealthCheck {
    let Some(deployment) = last else {
        return HealthCheck::new("last_deployment", HealthStatus::Unknown, "never deployed");
    };
    let status = match deployment.status {
        DeploymentStatus::Success | DeploymentStatus::RolledBack => HealthStatus::Healthy,
        DeploymentStatus::Failed => HealthStatus::Unhealthy,
        DeploymentStatus::Pending | DeploymentStatus::Running => HealthStatus::InProgress,
        DeploymentStatus::Cancelled => HealthStatus::Warning,
    };
    HealthCheck::new(
        "last_deployment",
        status,
        format!("{} {}", deployment.id, deployment.status),
    )
}

pub struct HealthChecker {
    runner: Arc<dyn CommandRunner>,
    client: reqwest::Client,
    projects_root: PathBuf,
    thresholds: DiskThresholds,
    command_timeout: Duration,
}

impl HealthChecker {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        projects_root: PathBuf,
        thresholds: DiskThresholds,
        probe_timeout: Duration,
    ) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(probe_timeout)
            .user_agent(concat!("flowdeck/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            runner,
            client,
            projects_root,
            thresholds,
            command_timeout: probe_timeout,
        })
    }

    pub async fn check(&self, project: &Project, last: Option<&Deployment>) -> HealthReport {
        let metrics = telemetry::collect_metrics(&self.projects_root);

        let mut checks = vec![self.http_check(project).await];
        if let Some(check) = self.container_check(project).await {
            checks.push(check);
        }
        checks.push(disk_check(metrics.disk_percent, &self.thresholds));
        checks.push(deployment_check(last));

        HealthReport {
            project: project.slug.clone(),
            status: overall_status(&checks),
            checks,
            metrics,
            checked_at: Utc::now(),
        }
    }

    async fn http_check(&self, project: &Project) -> HealthCheck {
        let url = match probe_url(project) {
            Ok(Some(url)) => url,
            Ok(None) => return HealthCheck::new("http", HealthStatus::Unknown, "no health check url"),
            Err(err) => return HealthCheck::new("http", HealthStatus::Unhealthy, err.to_string()),
        };

        debug!("Probing {}", url);
        match self.client.get(url.clone()).send().await {
            Ok(response) => {
                let code = response.status();
                let status = if code.is_success() {
                    HealthStatus::Healthy
                } else if code.is_server_error() {
                    HealthStatus::Unhealthy
                } else {
                    HealthStatus::Warning
                };
                HealthCheck::new("http", status, format!("{} returned {}", url, code.as_u16()))
            }
            Err(err) => HealthCheck::new("http", HealthStatus::Unhealthy, format!("{}: {}", url, err)),
        }
    }

    async fn container_check(&self, project: &Project) -> Option<HealthCheck> {
        let dir = project.path(&self.projects_root);
        let runtime = Runtime::detect(project, &dir);
        let line = match &runtime {
            Runtime::Compose(_) => compose::running_services_line().to_string(),
            Runtime::Container => docker::running_line(project),
            Runtime::Native => return None,
        };

        let mut spec = CommandSpec::new(line, self.command_timeout);
        if dir.is_dir() {
            spec = spec.in_dir(dir);
        }
        let check = match self.runner.execute(&spec).await {
            Ok(result) => {
                let stdout = result.stdout.trim();
                let running = result.success
                    && match runtime {
                        Runtime::Compose(_) => !stdout.is_empty(),
                        _ => stdout == "true",
                    };
                if running {
                    HealthCheck::new("container", HealthStatus::Healthy, "running")
                } else {
                    HealthCheck::new("container", HealthStatus::Unhealthy, "not running")
                }
            }
            Err(err) => HealthCheck::new("container", HealthStatus::Unknown, err.to_string()),
        };
        Some(check)
    }
}
