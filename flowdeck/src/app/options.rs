//! Application configuration options

use std::time::Duration;

use crate::deploy::orchestrator::OrchestratorOptions;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Orchestrator configuration
    pub orchestrator: OrchestratorOptions,

    /// Server configuration
    pub server: ServerOptions,

    /// Engine settings the options were built from
    pub settings: Settings,

    /// Capacity of the status event channel
    pub event_capacity: usize,

    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl AppOptions {
    pub fn from_settings(layout: StorageLayout, settings: Settings) -> Self {
        Self {
            orchestrator: OrchestratorOptions::from_settings(
                &settings,
                layout.scratch_dir().path().to_path_buf(),
            ),
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            layout,
            settings,
            event_capacity: 256,
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(StorageLayout::default(), Settings::default())
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        let settings = Settings::default();
        Self {
            host: settings.server.host,
            port: settings.server.port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_follow_settings() {
        let mut settings = Settings::default();
        settings.server.port = 9100;
        settings.restart_pause_secs = 7;

        let options = AppOptions::from_settings(StorageLayout::new("/tmp/flowdeck-test"), settings);
        assert_eq!(options.server.port, 9100);
        assert_eq!(options.orchestrator.restart_pause, Duration::from_secs(7));
        assert!(options.orchestrator.scratch_dir.starts_with("/tmp/flowdeck-test"));
    }
}
