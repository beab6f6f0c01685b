//! Docker Compose commands

use std::path::Path;
use std::time::Duration;

use crate::storage::settings::TimeoutSettings;

use super::plan::Step;

/// Compose file names, in lookup order
pub const COMPOSE_FILES: &[&str] = &[
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

/// Name of the compose service tools are executed in
pub const APP_SERVICE: &str = "app";

pub fn compose_file(dir: &Path) -> Option<String> {
    COMPOSE_FILES
        .iter()
        .find(|name| dir.join(name).is_file())
        .map(|name| name.to_string())
}

pub fn exec_prefix() -> String {
    format!("docker compose exec -T {} ", APP_SERVICE)
}

pub fn build_steps(dir: &Path, timeouts: &TimeoutSettings) -> Vec<Step> {
    vec![Step::new(
        "compose build",
        "docker compose build --no-cache --pull",
        Duration::from_secs(timeouts.compose_build_secs),
    )
    .in_dir(dir)]
}

/// Tear down the previous stack, then bring the new one up
pub fn start_steps(dir: &Path, timeouts: &TimeoutSettings) -> Vec<Step> {
    vec![
        Step::new(
            "compose down",
            "docker compose down --remove-orphans",
            Duration::from_secs(timeouts.compose_cleanup_secs),
        )
        .in_dir(dir)
        .optional(),
        Step::new(
            "compose up",
            "docker compose up -d --remove-orphans",
            Duration::from_secs(timeouts.compose_start_secs),
        )
        .in_dir(dir),
    ]
}

pub fn stop_steps(dir: &Path, timeouts: &TimeoutSettings) -> Vec<Step> {
    vec![Step::new(
        "compose down",
        "docker compose down",
        Duration::from_secs(timeouts.compose_cleanup_secs),
    )
    .in_dir(dir)]
}

/// Prints the ids of running services; empty output means nothing is up
pub fn running_services_line() -> &'static str {
    "docker compose ps --status running -q"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_file_lookup_order() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(compose_file(dir.path()), None);

        std::fs::write(dir.path().join("compose.yaml"), "").unwrap();
        assert_eq!(compose_file(dir.path()).as_deref(), Some("compose.yaml"));

        std::fs::write(dir.path().join("docker-compose.yml"), "").unwrap();
        assert_eq!(compose_file(dir.path()).as_deref(), Some("docker-compose.yml"));
    }

    #[test]
    fn test_start_cleans_up_before_up() {
        let steps = start_steps(Path::new("/srv/shop"), &TimeoutSettings::default());
        assert_eq!(steps.len(), 2);
        assert!(steps[0].optional);
        assert_eq!(steps[0].spec.timeout, Duration::from_secs(180));
        assert_eq!(steps[1].spec.line, "docker compose up -d --remove-orphans");
        assert!(!steps[1].optional);
    }
}
