//! Hook dispatch
//!
//! Hooks run strictly in list order. A failing hook is recorded and the list
//! carries on; hook failures never change the outcome of the action they
//! surround.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::EngineError;
use crate::exec::runner::{CommandRunner, CommandSpec, ExecutionResult};
use crate::models::script::{Hook, HookClass};
use crate::scripts::context::ExecutionContext;
use crate::scripts::template::render;
use crate::utils::truncate;

/// Output kept per hook record
const MAX_HOOK_OUTPUT: usize = 4096;

/// Runs a stored script on behalf of a hook.
///
/// `chain` holds the ids of the scripts currently executing, outermost
/// first, so a reference back into the chain can be refused.
#[async_trait]
pub trait ScriptInvoker: Send + Sync {
    async fn invoke(
        &self,
        script_id: Uuid,
        ctx: &ExecutionContext,
        chain: &[Uuid],
    ) -> Result<ExecutionResult, EngineError>;
}

/// Outcome of a single hook
#[derive(Debug, Clone, Serialize)]
pub struct HookRecord {
    pub class: HookClass,
    pub hook: String,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub output: String,
    pub error: Option<String>,
}

impl HookRecord {
    fn from_result(class: HookClass, hook: &Hook, result: &ExecutionResult) -> Self {
        let output = result.combined_output();
        Self {
            class,
            hook: hook.label(),
            success: result.success,
            exit_code: result.exit_code,
            output: truncate(output.trim(), MAX_HOOK_OUTPUT).to_string(),
            error: if result.timed_out {
                Some("timed out".to_string())
            } else {
                None
            },
        }
    }

    fn from_error(class: HookClass, hook: &Hook, err: &EngineError) -> Self {
        Self {
            class,
            hook: hook.label(),
            success: false,
            exit_code: None,
            output: String::new(),
            error: Some(err.to_string()),
        }
    }

    /// One log line per hook
    pub fn log_line(&self) -> String {
        let state = if self.success { "ok" } else { "failed" };
        let mut line = format!("[{} hook] {}: {}", self.class, self.hook, state);
        if let Some(error) = &self.error {
            line.push_str(&format!(" ({})", error));
        }
        if !self.output.is_empty() {
            line.push('\n');
            line.push_str(&self.output);
        }
        line
    }
}

pub struct HookDispatcher {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl HookDispatcher {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    /// Run every hook in `hooks` and record each outcome
    pub async fn run(
        &self,
        class: HookClass,
        hooks: &[Hook],
        ctx: &ExecutionContext,
        scripts: &dyn ScriptInvoker,
        chain: &[Uuid],
    ) -> Vec<HookRecord> {
        let mut records = Vec::with_capacity(hooks.len());

        for hook in hooks {
            let outcome = match hook {
                Hook::Inline(command) => self.run_inline(command, ctx).await,
                Hook::Script { script_id } => scripts.invoke(*script_id, ctx, chain).await,
            };

            let record = match outcome {
                Ok(result) => HookRecord::from_result(class, hook, &result),
                Err(err) => HookRecord::from_error(class, hook, &err),
            };
            if record.success {
                debug!("{} hook '{}' succeeded", class, record.hook);
            } else {
                warn!(
                    "{} hook '{}' failed: {}",
                    class,
                    record.hook,
                    record.error.as_deref().unwrap_or(&record.output)
                );
            }
            records.push(record);
        }

        records
    }

    async fn run_inline(
        &self,
        command: &str,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, EngineError> {
        let line = render(command, &ctx.variables(&Default::default()));
        let mut spec = CommandSpec::new(line, self.timeout).with_env(ctx.env());
        if let Some(dir) = ctx.working_dir() {
            spec = spec.in_dir(dir);
        }
        self.runner.execute(&spec).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use crate::models::project::Project;

    struct ScriptedRunner {
        lines: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn execute(&self, spec: &CommandSpec) -> Result<ExecutionResult, EngineError> {
            self.lines.lock().unwrap().push(spec.line.clone());
            let success = !spec.line.contains("fail");
            Ok(ExecutionResult {
                success,
                exit_code: Some(if success { 0 } else { 1 }),
                stdout: spec.line.clone(),
                ..Default::default()
            })
        }
    }

    struct NoScripts;

    #[async_trait]
    impl ScriptInvoker for NoScripts {
        async fn invoke(
            &self,
            script_id: Uuid,
            _ctx: &ExecutionContext,
            _chain: &[Uuid],
        ) -> Result<ExecutionResult, EngineError> {
            Err(EngineError::NotFound(format!("script {}", script_id)))
        }
    }

    #[tokio::test]
    async fn test_hooks_run_in_order_and_past_failures() {
        let runner = Arc::new(ScriptedRunner {
            lines: Mutex::new(Vec::new()),
        });
        let dispatcher = HookDispatcher::new(runner.clone(), Duration::from_secs(5));
        let project = Project::new("shop", "Shop", "https://github.com/acme/shop.git");
        let ctx = ExecutionContext::new(project, None, PathBuf::from("/nonexistent"));
        let missing = Uuid::new_v4();

        let hooks = vec![
            Hook::Inline("echo {{PROJECT_SLUG}}".to_string()),
            Hook::Inline("fail now".to_string()),
            Hook::Script { script_id: missing },
            Hook::Inline("echo last".to_string()),
        ];
        let records = dispatcher
            .run(HookClass::Pre, &hooks, &ctx, &NoScripts, &[])
            .await;

        assert_eq!(records.len(), 4);
        assert!(records[0].success);
        assert_eq!(records[0].output, "echo shop");
        assert!(!records[1].success);
        assert!(!records[2].success);
        assert!(records[2].error.as_deref().unwrap().contains("Not found"));
        assert!(records[3].success);
        assert_eq!(
            *runner.lines.lock().unwrap(),
            vec!["echo shop", "fail now", "echo last"]
        );
    }
}
