//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;
use crate::utils::BackoffOptions;

/// Engine settings, read from `settings.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Also write a daily rolling log file under the logs directory
    #[serde(default = "default_true")]
    pub log_to_file: bool,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Directory holding one checkout per project slug
    #[serde(default = "default_projects_root")]
    pub projects_root: PathBuf,

    /// Command timeouts
    #[serde(default)]
    pub timeouts: TimeoutSettings,

    /// Cap on captured stdout/stderr per stream
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Backoff between retry attempts
    #[serde(default)]
    pub retry_backoff: BackoffSettings,

    /// Pause between stop and start on restart
    #[serde(default = "default_restart_pause_secs")]
    pub restart_pause_secs: u64,

    /// Disk usage thresholds for health checks
    #[serde(default)]
    pub disk: DiskThresholds,

    /// Scratch scripts older than this are removed by cleanup
    #[serde(default = "default_stale_script_age_secs")]
    pub stale_script_age_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_projects_root() -> PathBuf {
    PathBuf::from("/var/www")
}

fn default_max_output_bytes() -> usize {
    crate::exec::runner::DEFAULT_MAX_OUTPUT_BYTES
}

fn default_restart_pause_secs() -> u64 {
    2
}

fn default_stale_script_age_secs() -> u64 {
    3600
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: true,
            server: ServerSettings::default(),
            projects_root: default_projects_root(),
            timeouts: TimeoutSettings::default(),
            max_output_bytes: default_max_output_bytes(),
            retry_backoff: BackoffSettings::default(),
            restart_pause_secs: default_restart_pause_secs(),
            disk: DiskThresholds::default(),
            stale_script_age_secs: default_stale_script_age_secs(),
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8085
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Command timeouts, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_command_secs")]
    pub git_secs: u64,

    #[serde(default = "default_git_info_secs")]
    pub git_info_secs: u64,

    #[serde(default = "default_build_secs")]
    pub build_secs: u64,

    #[serde(default = "default_command_secs")]
    pub start_secs: u64,

    #[serde(default = "default_compose_build_secs")]
    pub compose_build_secs: u64,

    #[serde(default = "default_command_secs")]
    pub compose_start_secs: u64,

    #[serde(default = "default_compose_cleanup_secs")]
    pub compose_cleanup_secs: u64,

    #[serde(default = "default_command_secs")]
    pub hook_secs: u64,

    #[serde(default = "default_health_probe_secs")]
    pub health_probe_secs: u64,

    #[serde(default = "default_command_secs")]
    pub maintenance_secs: u64,
}

fn default_command_secs() -> u64 {
    300
}

fn default_git_info_secs() -> u64 {
    15
}

fn default_build_secs() -> u64 {
    600
}

fn default_compose_build_secs() -> u64 {
    1200
}

fn default_compose_cleanup_secs() -> u64 {
    180
}

fn default_health_probe_secs() -> u64 {
    10
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            git_secs: default_command_secs(),
            git_info_secs: default_git_info_secs(),
            build_secs: default_build_secs(),
            start_secs: default_command_secs(),
            compose_build_secs: default_compose_build_secs(),
            compose_start_secs: default_command_secs(),
            compose_cleanup_secs: default_compose_cleanup_secs(),
            hook_secs: default_command_secs(),
            health_probe_secs: default_health_probe_secs(),
            maintenance_secs: default_command_secs(),
        }
    }
}

/// Retry backoff settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffSettings {
    #[serde(default = "default_backoff_step_secs")]
    pub step_secs: u64,

    #[serde(default = "default_backoff_max_secs")]
    pub max_delay_secs: u64,
}

fn default_backoff_step_secs() -> u64 {
    5
}

fn default_backoff_max_secs() -> u64 {
    30
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            step_secs: default_backoff_step_secs(),
            max_delay_secs: default_backoff_max_secs(),
        }
    }
}

impl BackoffSettings {
    pub fn to_options(&self) -> BackoffOptions {
        BackoffOptions {
            step: Duration::from_secs(self.step_secs),
            max_delay: Duration::from_secs(self.max_delay_secs),
        }
    }
}

/// Disk usage thresholds, in percent
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DiskThresholds {
    #[serde(default = "default_disk_warning")]
    pub warning_percent: f32,

    #[serde(default = "default_disk_critical")]
    pub critical_percent: f32,
}

fn default_disk_warning() -> f32 {
    75.0
}

fn default_disk_critical() -> f32 {
    90.0
}

impl Default for DiskThresholds {
    fn default() -> Self {
        Self {
            warning_percent: default_disk_warning(),
            critical_percent: default_disk_critical(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_settings_fill_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"log_level": "debug", "server": {"port": 9000}}"#).unwrap();
        assert_eq!(settings.log_level, LogLevel::Debug);
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.timeouts.compose_build_secs, 1200);
        assert_eq!(settings.retry_backoff.to_options(), BackoffOptions::default());
    }
}
