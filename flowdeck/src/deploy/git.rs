//! Git collaborator

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tracing::debug;

use crate::errors::EngineError;
use crate::exec::runner::{CommandRunner, CommandSpec};
use crate::models::project::Project;
use crate::utils::shell_quote;

use super::plan::Step;

const LOG_FORMAT: &str = "%H|%an|%at|%s";

/// Latest commit of a checkout
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitInfo {
    pub hash: String,
    pub short_hash: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl CommitInfo {
    /// Parse one `%H|%an|%at|%s` line. The subject may itself contain `|`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.trim().splitn(4, '|');
        let hash = parts.next()?.trim();
        let author = parts.next()?.trim();
        let timestamp = parts.next()?.trim().parse::<i64>().ok()?;
        let message = parts.next().unwrap_or_default().trim();

        if hash.len() < 7 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self {
            hash: hash.to_string(),
            short_hash: hash[..7].to_string(),
            author: author.to_string(),
            timestamp: Utc.timestamp_opt(timestamp, 0).single()?,
            message: message.to_string(),
        })
    }
}

#[async_trait]
pub trait GitCollaborator: Send + Sync {
    /// Latest commit of the checkout in `dir`, `None` when it is not a repository yet
    async fn current_commit(&self, dir: &Path) -> Result<Option<CommitInfo>, EngineError>;
}

/// Git over the shell command runner
pub struct GitCli {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl GitCli {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }
}

#[async_trait]
impl GitCollaborator for GitCli {
    async fn current_commit(&self, dir: &Path) -> Result<Option<CommitInfo>, EngineError> {
        if !dir.join(".git").exists() {
            return Ok(None);
        }

        let line = format!("git log -1 --pretty=format:{}", shell_quote(LOG_FORMAT));
        let spec = CommandSpec::new(line.clone(), self.timeout).in_dir(dir);
        let result = self
            .runner
            .execute(&spec)
            .await?
            .ensure_success(&line, self.timeout)?;

        let info = CommitInfo::parse(&result.stdout);
        if info.is_none() {
            debug!("Unparseable git log output: {}", result.stdout.trim());
        }
        Ok(info)
    }
}

/// Clone the repository if missing, otherwise fetch and hard-reset to the branch head
pub fn sync_steps(project: &Project, dir: &Path, timeout: Duration) -> Vec<Step> {
    let branch = shell_quote(&project.branch);

    if dir.join(".git").exists() {
        vec![
            Step::new("git fetch", format!("git fetch origin {}", branch), timeout).in_dir(dir),
            Step::new(
                "git reset",
                format!("git reset --hard origin/{}", branch),
                timeout,
            )
            .in_dir(dir),
        ]
    } else {
        vec![Step::new(
            "git clone",
            format!(
                "git clone --branch {} {} {}",
                branch,
                shell_quote(&project.repository_url),
                shell_quote(&dir.to_string_lossy())
            ),
            timeout,
        )]
    }
}

/// Fetch and check out one commit
pub fn checkout_steps(dir: &Path, commit: &str, timeout: Duration) -> Vec<Step> {
    let commit = shell_quote(commit);
    vec![
        Step::new("git fetch", "git fetch origin", timeout).in_dir(dir).optional(),
        Step::new("git checkout", format!("git checkout --force {}", commit), timeout).in_dir(dir),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_line() {
        let info = CommitInfo::parse("0123456789abcdef0123456789abcdef01234567|Dana|1700000000|Fix | in title\n").unwrap();
        assert_eq!(info.short_hash, "0123456");
        assert_eq!(info.author, "Dana");
        assert_eq!(info.timestamp.timestamp(), 1_700_000_000);
        assert_eq!(info.message, "Fix | in title");

        assert!(CommitInfo::parse("").is_none());
        assert!(CommitInfo::parse("fatal: not a git repository").is_none());
        assert!(CommitInfo::parse("zzzzzzzz|a|1|b").is_none());
    }

    #[test]
    fn test_sync_clones_missing_checkout() {
        let root = tempfile::tempdir().unwrap();
        let project = Project::new("shop", "Shop", "https://github.com/acme/shop.git");
        let dir = root.path().join("shop");

        let steps = sync_steps(&project, &dir, Duration::from_secs(300));
        assert_eq!(steps.len(), 1);
        assert!(steps[0].spec.line.starts_with("git clone --branch main https://github.com/acme/shop.git "));

        std::fs::create_dir_all(dir.join(".git")).unwrap();
        let steps = sync_steps(&project, &dir, Duration::from_secs(300));
        let lines: Vec<&str> = steps.iter().map(|s| s.spec.line.as_str()).collect();
        assert_eq!(lines, ["git fetch origin main", "git reset --hard origin/main"]);
    }
}
