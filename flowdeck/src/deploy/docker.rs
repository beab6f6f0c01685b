//! Standalone container commands
//!
//! The container is named after the project slug and the image is tagged
//! `<slug>:latest`.

use std::path::Path;
use std::time::Duration;

use crate::models::project::Project;
use crate::storage::settings::TimeoutSettings;
use crate::utils::shell_quote;

use super::plan::Step;

pub const PRODUCTION_DOCKERFILE: &str = "Dockerfile.production";

pub fn exec_prefix(project: &Project) -> String {
    format!("docker exec {} ", shell_quote(&project.slug))
}

pub fn build_steps(project: &Project, dir: &Path, timeouts: &TimeoutSettings) -> Vec<Step> {
    let file_flag = if dir.join(PRODUCTION_DOCKERFILE).is_file() {
        format!(" -f {}", PRODUCTION_DOCKERFILE)
    } else {
        String::new()
    };
    let line = format!(
        "docker build{} -t {} .",
        file_flag,
        shell_quote(&project.image_name())
    );
    vec![Step::new("docker build", line, Duration::from_secs(timeouts.build_secs)).in_dir(dir)]
}

/// Replace any existing container with a fresh one from the latest image
pub fn start_steps(project: &Project, timeouts: &TimeoutSettings) -> Vec<Step> {
    let timeout = Duration::from_secs(timeouts.start_secs);
    vec![
        remove_step(project, timeout),
        Step::new("docker run", run_line(project), timeout),
    ]
}

pub fn stop_steps(project: &Project, timeouts: &TimeoutSettings) -> Vec<Step> {
    let name = shell_quote(&project.slug);
    vec![Step::new(
        "docker stop",
        format!("docker stop {}", name),
        Duration::from_secs(timeouts.start_secs),
    )]
}

fn remove_step(project: &Project, timeout: Duration) -> Step {
    let name = shell_quote(&project.slug);
    Step::new(
        "remove old container",
        format!("docker stop {0} || true && docker rm -f {0} || true", name),
        timeout,
    )
    .optional()
}

pub fn run_line(project: &Project) -> String {
    let mut line = format!(
        "docker run -d --name {} --restart unless-stopped -p {}:{}",
        shell_quote(&project.slug),
        project.host_port(),
        project.container_port()
    );

    line.push_str(&format!(
        " -e {}",
        shell_quote(&format!("APP_ENV={}", project.environment))
    ));
    line.push_str(&format!(" -e APP_DEBUG={}", project.debug_enabled()));
    for (key, value) in &project.env_variables {
        line.push_str(&format!(" -e {}", shell_quote(&format!("{}={}", key, value))));
    }

    line.push(' ');
    line.push_str(&shell_quote(&project.image_name()));
    line
}

/// Prints `true` when the container is running
pub fn running_line(project: &Project) -> String {
    format!(
        "docker inspect -f '{{{{.State.Running}}}}' {}",
        shell_quote(&project.slug)
    )
}

pub fn prune_step(timeouts: &TimeoutSettings) -> Step {
    Step::new(
        "docker prune",
        "docker system prune -f",
        Duration::from_secs(timeouts.maintenance_secs),
    )
    .optional()
}
