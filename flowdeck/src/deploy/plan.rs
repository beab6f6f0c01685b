//! Deployment steps
//!
//! Every stage of the built-in flows is a list of [`Step`]s: a named shell
//! command with its own timeout. Stages run in order and stop at the first
//! failing required step.

use std::path::Path;
use std::time::Duration;

use crate::exec::runner::CommandSpec;
use crate::models::project::{DeploymentMethod, Project};
use crate::storage::settings::TimeoutSettings;

use super::{compose, docker};

#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    pub spec: CommandSpec,
    /// A failing optional step is logged and skipped
    pub optional: bool,
}

impl Step {
    pub fn new(name: impl Into<String>, line: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            spec: CommandSpec::new(line, timeout),
            optional: false,
        }
    }

    pub fn in_dir(mut self, dir: &Path) -> Self {
        self.spec = self.spec.in_dir(dir);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// How a project's workload is run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Runtime {
    /// `docker compose` with the given compose file name
    Compose(String),
    /// A single container from the project's Dockerfile
    Container,
    /// The project's own build/start/stop commands
    Native,
}

impl Runtime {
    /// Compose only applies when the method is docker and a compose file exists
    pub fn detect(project: &Project, dir: &Path) -> Self {
        match project.deployment_method {
            DeploymentMethod::Docker => match compose::compose_file(dir) {
                Some(file) => Runtime::Compose(file),
                None => Runtime::Container,
            },
            DeploymentMethod::Standard => Runtime::Native,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Runtime::Compose(_) => "docker compose",
            Runtime::Container => "docker",
            Runtime::Native => "standard",
        }
    }

    pub fn build_steps(&self, project: &Project, dir: &Path, timeouts: &TimeoutSettings) -> Vec<Step> {
        match self {
            Runtime::Compose(_) => compose::build_steps(dir, timeouts),
            Runtime::Container => docker::build_steps(project, dir, timeouts),
            Runtime::Native => native_step("build", project.build_command.as_deref(), dir, timeouts.build_secs),
        }
    }

    pub fn start_steps(&self, project: &Project, dir: &Path, timeouts: &TimeoutSettings) -> Vec<Step> {
        match self {
            Runtime::Compose(_) => compose::start_steps(dir, timeouts),
            Runtime::Container => docker::start_steps(project, timeouts),
            Runtime::Native => native_step("start", project.start_command.as_deref(), dir, timeouts.start_secs),
        }
    }

    pub fn stop_steps(&self, project: &Project, dir: &Path, timeouts: &TimeoutSettings) -> Vec<Step> {
        match self {
            Runtime::Compose(_) => compose::stop_steps(dir, timeouts),
            Runtime::Container => docker::stop_steps(project, timeouts),
            Runtime::Native => native_step("stop", project.stop_command.as_deref(), dir, timeouts.start_secs),
        }
    }

    /// Framework tasks run after a successful start; none of them is required
    pub fn post_start_steps(&self, project: &Project, dir: &Path, timeouts: &TimeoutSettings) -> Vec<Step> {
        if !project.is_framework("laravel") {
            return Vec::new();
        }
        let prefix = match self {
            Runtime::Compose(_) => compose::exec_prefix(),
            Runtime::Container => docker::exec_prefix(project),
            Runtime::Native => String::new(),
        };
        let timeout = Duration::from_secs(timeouts.maintenance_secs);
        LARAVEL_OPTIMIZE
            .iter()
            .map(|cmd| Step::new(*cmd, format!("{}{}", prefix, cmd), timeout).in_dir(dir).optional())
            .collect()
    }

    /// Cache and log maintenance for `cleanup`
    pub fn maintenance_steps(&self, project: &Project, dir: &Path, timeouts: &TimeoutSettings) -> Vec<Step> {
        let timeout = Duration::from_secs(timeouts.maintenance_secs);
        let mut steps = Vec::new();

        if project.is_framework("laravel") {
            let prefix = match self {
                Runtime::Compose(_) => compose::exec_prefix(),
                Runtime::Container => docker::exec_prefix(project),
                Runtime::Native => String::new(),
            };
            for cmd in LARAVEL_CLEAR {
                steps.push(Step::new(*cmd, format!("{}{}", prefix, cmd), timeout).in_dir(dir).optional());
            }
            steps.push(
                Step::new(
                    "truncate logs",
                    "find storage/logs -name '*.log' -type f -exec truncate -s 0 {} +",
                    timeout,
                )
                .in_dir(dir)
                .optional(),
            );
        }
        if *self != Runtime::Native {
            steps.push(docker::prune_step(timeouts));
        }
        steps
    }
}

const LARAVEL_OPTIMIZE: &[&str] = &[
    "php artisan config:cache",
    "php artisan route:cache",
    "php artisan view:cache",
    "php artisan migrate --force",
    "php artisan storage:link",
];

const LARAVEL_CLEAR: &[&str] = &[
    "php artisan cache:clear",
    "php artisan config:clear",
    "php artisan route:clear",
    "php artisan view:clear",
];

fn native_step(name: &str, command: Option<&str>, dir: &Path, timeout_secs: u64) -> Vec<Step> {
    match command.map(str::trim).filter(|c| !c.is_empty()) {
        Some(command) => vec![Step::new(name, command, Duration::from_secs(timeout_secs)).in_dir(dir)],
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_detection() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = Project::new("shop", "Shop", "https://github.com/acme/shop.git");

        assert_eq!(Runtime::detect(&project, dir.path()), Runtime::Container);

        std::fs::write(dir.path().join("docker-compose.yml"), "services: {}\n").unwrap();
        assert_eq!(
            Runtime::detect(&project, dir.path()),
            Runtime::Compose("docker-compose.yml".to_string())
        );

        project.deployment_method = DeploymentMethod::Standard;
        assert_eq!(Runtime::detect(&project, dir.path()), Runtime::Native);
    }

    #[test]
    fn test_native_steps_follow_project_commands() {
        let mut project = Project::new("shop", "Shop", "https://github.com/acme/shop.git");
        project.deployment_method = DeploymentMethod::Standard;
        project.build_command = Some("make build".to_string());
        project.start_command = Some("  ".to_string());
        let timeouts = TimeoutSettings::default();
        let dir = Path::new("/srv/shop");

        let build = Runtime::Native.build_steps(&project, dir, &timeouts);
        assert_eq!(build.len(), 1);
        assert_eq!(build[0].spec.line, "make build");
        assert_eq!(build[0].spec.timeout, Duration::from_secs(600));
        assert!(Runtime::Native.start_steps(&project, dir, &timeouts).is_empty());
    }

    #[test]
    fn test_laravel_post_start_steps_are_optional() {
        let mut project = Project::new("shop", "Shop", "https://github.com/acme/shop.git");
        project.framework = Some("Laravel".to_string());
        let steps = Runtime::Container.post_start_steps(&project, Path::new("/srv/shop"), &TimeoutSettings::default());

        assert_eq!(steps.len(), LARAVEL_OPTIMIZE.len());
        assert!(steps.iter().all(|s| s.optional));
        assert_eq!(steps[0].spec.line, "docker exec shop php artisan config:cache");
    }
}
