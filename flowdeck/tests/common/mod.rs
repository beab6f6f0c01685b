//! Shared test fixtures

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;

use flowdeck::app::options::AppOptions;
use flowdeck::app::state::AppState;
use flowdeck::deploy::git::{CommitInfo, GitCollaborator};
use flowdeck::errors::EngineError;
use flowdeck::exec::runner::{CommandRunner, CommandSpec, ExecutionResult};
use flowdeck::models::project::Project;
use flowdeck::scripts::materialize::SCRIPT_FILE_PREFIX;
use flowdeck::storage::layout::StorageLayout;
use flowdeck::storage::settings::Settings;

pub const COMMIT_HASH: &str = "4f2a9c1e8b7d6a5f4e3d2c1b0a9f8e7d6c5b4a39";

/// A materialized script seen by the runner while it still existed
#[derive(Debug, Clone)]
pub struct CapturedScript {
    pub line: String,
    pub path: PathBuf,
    pub content: String,
}

/// Command runner spy: records every command and fails the ones matching a
/// configured substring
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<CommandSpec>>,
    scripts: Mutex<Vec<CapturedScript>>,
    failures: Mutex<Vec<(String, i32)>>,
    timeouts: Mutex<Vec<String>>,
    delay: Duration,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command sleeps for `delay` before reporting
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn fail_on(&self, pattern: &str, exit_code: i32) {
        self.failures
            .lock()
            .unwrap()
            .push((pattern.to_string(), exit_code));
    }

    /// Matching commands report a timeout instead of an exit code
    pub fn time_out_on(&self, pattern: &str) {
        self.timeouts.lock().unwrap().push(pattern.to_string());
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
        self.timeouts.lock().unwrap().clear();
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.calls().into_iter().map(|spec| spec.line).collect()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.lines().iter().filter(|line| line.contains(pattern)).count()
    }

    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.lines().iter().position(|line| line.contains(pattern))
    }

    /// Scripts that were executed, excluding syntax checks
    pub fn executed_scripts(&self) -> Vec<CapturedScript> {
        self.scripts
            .lock()
            .unwrap()
            .iter()
            .filter(|script| !is_syntax_check(&script.line))
            .cloned()
            .collect()
    }

    pub fn reset(&self) {
        self.calls.lock().unwrap().clear();
        self.scripts.lock().unwrap().clear();
    }

    fn capture_script(&self, line: &str) {
        let Some(last) = line.split_whitespace().last() else {
            return;
        };
        let path = PathBuf::from(last.trim_matches('\''));
        if !path.to_string_lossy().contains(SCRIPT_FILE_PREFIX) {
            return;
        }
        if let Ok(content) = std::fs::read_to_string(&path) {
            self.scripts.lock().unwrap().push(CapturedScript {
                line: line.to_string(),
                path,
                content,
            });
        }
    }
}

fn is_syntax_check(line: &str) -> bool {
    [" -n ", " -l ", " -c ", "--check", "ast.parse"]
        .iter()
        .any(|marker| line.contains(marker))
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn execute(&self, spec: &CommandSpec) -> Result<ExecutionResult, EngineError> {
        self.calls.lock().unwrap().push(spec.clone());
        self.capture_script(&spec.line);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let timed_out = self
            .timeouts
            .lock()
            .unwrap()
            .iter()
            .any(|pattern| spec.line.contains(pattern.as_str()));
        if timed_out {
            return Ok(ExecutionResult {
                success: false,
                stderr: format!("{} timed out", spec.line),
                elapsed: spec.timeout,
                timed_out: true,
                ..Default::default()
            });
        }

        let failure = self
            .failures
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| spec.line.contains(pattern.as_str()))
            .map(|(_, code)| *code);

        Ok(match failure {
            Some(code) => ExecutionResult {
                success: false,
                stderr: format!("{} failed", spec.line),
                exit_code: Some(code),
                ..Default::default()
            },
            None => ExecutionResult {
                success: true,
                stdout: format!("ran {}", spec.line),
                exit_code: Some(0),
                ..Default::default()
            },
        })
    }
}

/// Git collaborator reporting a fixed commit for every checkout
pub struct StaticGit;

#[async_trait]
impl GitCollaborator for StaticGit {
    async fn current_commit(&self, _dir: &Path) -> Result<Option<CommitInfo>, EngineError> {
        Ok(Some(CommitInfo {
            hash: COMMIT_HASH.to_string(),
            short_hash: COMMIT_HASH[..7].to_string(),
            author: "Dana".to_string(),
            timestamp: Utc::now(),
            message: "Ship the thing".to_string(),
        }))
    }
}

/// Application state over a temporary storage directory
pub struct TestApp {
    pub dir: TempDir,
    pub runner: Arc<RecordingRunner>,
    pub options: AppOptions,
    pub state: AppState,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_runner(RecordingRunner::new()).await
    }

    pub async fn with_runner(runner: RecordingRunner) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.projects_root = dir.path().join("projects");
        settings.restart_pause_secs = 0;
        settings.log_to_file = false;

        let options = AppOptions::from_settings(StorageLayout::new(dir.path().join("home")), settings);
        let runner = Arc::new(runner);
        let state = AppState::with_collaborators(&options, runner.clone(), Arc::new(StaticGit))
            .await
            .unwrap();

        Self {
            dir,
            runner,
            options,
            state,
        }
    }

    pub fn projects_root(&self) -> PathBuf {
        self.options.orchestrator.projects_root.clone()
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.options.orchestrator.scratch_dir.clone()
    }

    /// Register a Docker project with the given slug
    pub async fn add_project(&self, slug: &str) -> Project {
        self.save_project(Project::new(slug, slug, format!("https://git.example.com/{}.git", slug)))
            .await
    }

    pub async fn save_project(&self, project: Project) -> Project {
        self.state.projects.save(project).await.unwrap()
    }

    /// Pretend the project has already been cloned
    pub fn create_checkout(&self, project: &Project) -> PathBuf {
        let dir = project.path(&self.projects_root());
        std::fs::create_dir_all(dir.join(".git")).unwrap();
        dir
    }
}
