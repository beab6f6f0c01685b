//! Shell command runner
//!
//! Every external operation (git, docker, interpreters, inline hooks) goes
//! through a [`CommandRunner`]. The production [`ShellRunner`] spawns one
//! `sh -c` child per call, captures both streams and enforces a hard
//! wall-clock timeout. Non-zero exits and timeouts are reported in the
//! [`ExecutionResult`]; only a failure to spawn is an `Err`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::EngineError;

/// Default cap for each captured stream (10 MiB)
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// One shell command to execute
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Full command line, interpreted by `sh -c`
    pub line: String,

    pub working_dir: Option<PathBuf>,

    pub env: BTreeMap<String, String>,

    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(line: impl Into<String>, timeout: Duration) -> Self {
        Self {
            line: line.into(),
            working_dir: None,
            env: BTreeMap::new(),
            timeout,
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }
}

/// Outcome of running a command, possibly across several attempts
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// `None` when killed by a signal or by the timeout
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
    pub attempts: u32,
    pub timed_out: bool,
    pub retry_exhausted: bool,
}

impl ExecutionResult {
    /// Combined stdout and stderr, as appended to deployment logs
    pub fn combined_output(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (true, true) => String::new(),
            (false, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }

    /// Convert a failed result into the matching error
    pub fn into_error(self, command: &str, timeout: Duration) -> EngineError {
        let failure = if self.timed_out {
            EngineError::TimeoutExceeded {
                command: command.to_string(),
                timeout,
            }
        } else {
            EngineError::ExternalCommandFailure {
                command: command.to_string(),
                exit_code: self.exit_code,
                stderr: if self.stderr.trim().is_empty() {
                    self.stdout
                } else {
                    self.stderr
                },
            }
        };

        if self.retry_exhausted {
            EngineError::RetryExhausted {
                attempts: self.attempts,
                last: Box::new(failure),
            }
        } else {
            failure
        }
    }

    /// `Ok(self)` on success, otherwise the matching error
    pub fn ensure_success(self, command: &str, timeout: Duration) -> Result<Self, EngineError> {
        if self.success {
            Ok(self)
        } else {
            Err(self.into_error(command, timeout))
        }
    }
}

/// Executes shell commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn execute(&self, spec: &CommandSpec) -> Result<ExecutionResult, EngineError>;
}

/// Runs commands as `sh -c <line>` child processes
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
    max_output_bytes: usize,
}

impl ShellRunner {
    pub fn new(max_output_bytes: usize) -> Self {
        Self {
            shell: "sh".to_string(),
            max_output_bytes,
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OUTPUT_BYTES)
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn execute(&self, spec: &CommandSpec) -> Result<ExecutionResult, EngineError> {
        debug!("Running: {}", spec.line);

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&spec.line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|source| EngineError::SpawnFailed {
            command: spec.line.clone(),
            source,
        })?;

        let cap = self.max_output_bytes as u64;
        let stdout_handle = child.stdout.take();
        let stderr_handle = child.stderr.take();
        let stdout_task = tokio::spawn(async move { read_stream(stdout_handle, cap).await });
        let stderr_task = tokio::spawn(async move { read_stream(stderr_handle, cap).await });

        let wait_result = tokio::time::timeout(spec.timeout, child.wait()).await;

        let (exit_code, success, timed_out) = match wait_result {
            Ok(Ok(status)) => (status.code(), status.success(), false),
            Ok(Err(e)) => {
                return Err(EngineError::SpawnFailed {
                    command: spec.line.clone(),
                    source: e,
                })
            }
            Err(_) => {
                // `kill_on_drop` only reaches the direct child; start_kill makes it explicit
                warn!("Command timed out after {:?}: {}", spec.timeout, spec.line);
                let _ = child.start_kill();
                let _ = child.wait().await;
                (None, false, true)
            }
        };

        let stdout_bytes = stdout_task.await.unwrap_or_default();
        let stderr_bytes = stderr_task.await.unwrap_or_default();

        Ok(ExecutionResult {
            success,
            stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
            stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
            exit_code,
            elapsed: start.elapsed(),
            attempts: 1,
            timed_out,
            retry_exhausted: false,
        })
    }
}

/// Read an entire stream into a buffer, capped at `cap` bytes
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>, cap: u64) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h).take(cap).read_to_end(&mut buf).await;
        // drain the remainder so the child never blocks on a full pipe
        let _ = tokio::io::copy(&mut h, &mut tokio::io::sink()).await;
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        let runner = ShellRunner::default();
        let result = runner
            .execute(&CommandSpec::new("echo hello; echo oops >&2; exit 3", Duration::from_secs(5)))
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.stdout.trim(), "hello");
        assert_eq!(result.stderr.trim(), "oops");
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn test_timeout_kills_the_child() {
        let runner = ShellRunner::default();
        let result = runner
            .execute(&CommandSpec::new("sleep 5", Duration::from_millis(200)))
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.timed_out);
        assert!(result.elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_env_and_working_dir_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = BTreeMap::new();
        env.insert("GREETING".to_string(), "hi".to_string());
        let spec = CommandSpec::new("echo $GREETING; pwd", Duration::from_secs(5))
            .in_dir(dir.path())
            .with_env(env);

        let result = ShellRunner::default().execute(&spec).await.unwrap();
        assert!(result.success);
        assert!(result.stdout.starts_with("hi"));
    }

    #[tokio::test]
    async fn test_output_is_truncated_at_cap() {
        let runner = ShellRunner::new(16);
        let result = runner
            .execute(&CommandSpec::new("yes | head -c 4096", Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.stdout.len(), 16);
    }

    #[test]
    fn test_into_error_wraps_exhausted_retries() {
        let result = ExecutionResult {
            success: false,
            exit_code: Some(1),
            stderr: "boom".to_string(),
            attempts: 3,
            retry_exhausted: true,
            ..Default::default()
        };
        let err = result.into_error("make", Duration::from_secs(10));
        assert!(matches!(err, EngineError::RetryExhausted { attempts: 3, .. }));
    }
}
