//! Storage layout configuration

use std::path::PathBuf;

use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Environment variable overriding the default base directory
pub const HOME_ENV_VAR: &str = "FLOWDECK_HOME";

/// On-disk layout of settings, stores and scratch space
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    pub fn projects_file(&self) -> File {
        File::new(self.base_dir.join("projects.json"))
    }

    pub fn deployments_file(&self) -> File {
        File::new(self.base_dir.join("deployments.json"))
    }

    pub fn scripts_file(&self) -> File {
        File::new(self.base_dir.join("scripts.json"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Scratch directory for materialized scripts
    pub fn scratch_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("tmp"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), crate::errors::EngineError> {
        Dir::new(&self.base_dir).create().await?;
        self.logs_dir().create().await?;
        self.scratch_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        if let Some(home) = std::env::var_os(HOME_ENV_VAR) {
            return Self::new(PathBuf::from(home));
        }

        // Use /etc/flowdeck on Linux, or user home directory on other platforms
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/etc/flowdeck");

        #[cfg(not(target_os = "linux"))]
        let base_dir = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".flowdeck");

        Self::new(base_dir)
    }
}
