//! Error types for flowdeck

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Main error type for the deployment engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Deployment {deployment_id} is already in progress for project {project}")]
    DeploymentInProgress { project: String, deployment_id: Uuid },

    #[error("{language} syntax check failed: {message}")]
    ScriptSyntaxError { language: String, message: String },

    #[error("Command `{command}` failed ({}): {}", describe_exit(.exit_code), .stderr.trim())]
    ExternalCommandFailure {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Command `{command}` exceeded its timeout of {}s", .timeout.as_secs())]
    TimeoutExceeded { command: String, timeout: Duration },

    #[error("Gave up after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<EngineError>,
    },

    #[error("Invalid rollback target {target}: {reason}")]
    RollbackTargetInvalid { target: Uuid, reason: String },

    #[error("Deployment {deployment_id} is already {status}")]
    AlreadyTerminal { deployment_id: Uuid, status: String },

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Hook cycle detected: {0}")]
    HookCycle(String),

    #[error("Failed to spawn `{command}`: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Deployment {deployment_id} failed: {source}")]
    DeploymentFailed {
        deployment_id: Uuid,
        #[source]
        source: Box<EngineError>,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

impl EngineError {
    /// Process exit code used by the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::DeploymentInProgress { .. } => 3,
            EngineError::ScriptSyntaxError { .. } => 4,
            EngineError::ExternalCommandFailure { .. } => 5,
            EngineError::TimeoutExceeded { .. } => 6,
            EngineError::RetryExhausted { .. } => 7,
            EngineError::RollbackTargetInvalid { .. } => 8,
            EngineError::NotFound(_) => 9,
            EngineError::ValidationError(_) => 10,
            EngineError::DeploymentFailed { source, .. } => source.exit_code(),
            _ => 1,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::IoError(_) => "io_error",
            EngineError::JsonError(_) => "json_error",
            EngineError::HttpError(_) => "http_error",
            EngineError::DeploymentInProgress { .. } => "deployment_in_progress",
            EngineError::ScriptSyntaxError { .. } => "script_syntax_error",
            EngineError::ExternalCommandFailure { .. } => "external_command_failure",
            EngineError::TimeoutExceeded { .. } => "timeout_exceeded",
            EngineError::RetryExhausted { .. } => "retry_exhausted",
            EngineError::RollbackTargetInvalid { .. } => "rollback_target_invalid",
            EngineError::AlreadyTerminal { .. } => "already_terminal",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::HookCycle(_) => "hook_cycle",
            EngineError::SpawnFailed { .. } => "spawn_failed",
            EngineError::DeploymentFailed { source, .. } => source.code(),
            EngineError::ConfigError(_) => "config_error",
            EngineError::ServerError(_) => "server_error",
            EngineError::ShutdownError(_) => "shutdown_error",
            EngineError::ValidationError(_) => "validation_error",
            EngineError::NotFound(_) => "not_found",
            EngineError::Internal(_) => "internal_error",
        }
    }

    /// The innermost cause, looking through deployment and retry wrappers
    pub fn root_cause(&self) -> &EngineError {
        match self {
            EngineError::DeploymentFailed { source, .. } => source.root_cause(),
            EngineError::RetryExhausted { last, .. } => last.root_cause(),
            other => other,
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_follow_the_wrapped_cause() {
        let cause = EngineError::ExternalCommandFailure {
            command: "docker build".to_string(),
            exit_code: Some(1),
            stderr: "no such file".to_string(),
        };
        let err = EngineError::DeploymentFailed {
            deployment_id: Uuid::new_v4(),
            source: Box::new(cause),
        };
        assert_eq!(err.exit_code(), 5);
        assert_eq!(err.code(), "external_command_failure");
    }

    #[test]
    fn test_root_cause_unwraps_retries() {
        let err = EngineError::RetryExhausted {
            attempts: 3,
            last: Box::new(EngineError::TimeoutExceeded {
                command: "sleep 10".to_string(),
                timeout: Duration::from_secs(1),
            }),
        };
        assert_eq!(err.exit_code(), 7);
        assert!(matches!(err.root_cause(), EngineError::TimeoutExceeded { .. }));
    }

    #[test]
    fn test_signal_exit_is_described() {
        let err = EngineError::ExternalCommandFailure {
            command: "sh".to_string(),
            exit_code: None,
            stderr: String::new(),
        };
        assert!(err.to_string().contains("terminated by signal"));
    }
}
