//! Directory operations

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs;

use crate::errors::EngineError;
use crate::filesys::file::File;

/// A directory wrapper with path
#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), EngineError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// List files in the directory
    pub async fn list_files(&self) -> Result<Vec<PathBuf>, EngineError> {
        let mut files = Vec::new();
        let mut entries = fs::read_dir(&self.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file() {
                files.push(path);
            }
        }

        Ok(files)
    }

    /// Delete files whose name starts with `prefix` and that are older than `max_age`.
    /// Returns the number of files removed.
    pub async fn remove_stale(&self, prefix: &str, max_age: Duration) -> Result<usize, EngineError> {
        if !self.exists().await {
            return Ok(0);
        }

        let now = SystemTime::now();
        let mut removed = 0;
        for path in self.list_files().await? {
            let matches_prefix = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(prefix))
                .unwrap_or(false);
            if !matches_prefix {
                continue;
            }

            let modified = fs::metadata(&path).await?.modified()?;
            let age = now.duration_since(modified).unwrap_or_default();
            if age >= max_age {
                fs::remove_file(&path).await?;
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// Get a file within this directory
    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    /// Get a subdirectory
    pub fn subdir(&self, name: &str) -> Dir {
        Dir::new(self.path.join(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_remove_stale_only_touches_prefixed_files() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Dir::new(tmp.path());
        dir.file("flowdeck_script_a.sh").write_string("a").await.unwrap();
        dir.file("keep.txt").write_string("b").await.unwrap();

        let removed = dir.remove_stale("flowdeck_script_", Duration::ZERO).await.unwrap();
        assert_eq!(removed, 1);
        assert!(dir.file("keep.txt").exists().await);
        assert!(!dir.file("flowdeck_script_a.sh").exists().await);
    }
}
