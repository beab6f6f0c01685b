//! Script execution
//!
//! A run resolves variables, renders the content, materializes it to a
//! temporary file and executes it through the interpreter, wrapped in the
//! script's pre, post and error hooks and its retry policy.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::EngineError;
use crate::exec::runner::{CommandRunner, CommandSpec, ExecutionResult};
use crate::models::script::{HookClass, ScriptDefinition};
use crate::scripts::context::ExecutionContext;
use crate::scripts::hooks::{HookDispatcher, HookRecord, ScriptInvoker};
use crate::scripts::materialize::MaterializedScript;
use crate::scripts::repository::ScriptRepository;
use crate::scripts::retry::run_with_retry;
use crate::scripts::template::{render, unresolved_tokens};
use crate::utils::BackoffOptions;

/// Result of one script run including its hooks
#[derive(Debug, Clone, Serialize)]
pub struct ScriptRun {
    pub script_id: Uuid,
    pub result: ExecutionResult,
    pub hooks: Vec<HookRecord>,
    /// Tokens left in the rendered content
    pub unresolved: Vec<String>,
}

impl ScriptRun {
    pub fn success(&self) -> bool {
        self.result.success
    }

    /// Script output followed by one line per hook
    pub fn log_text(&self) -> String {
        let mut text = self.result.combined_output();
        for record in &self.hooks {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&record.log_line());
        }
        text
    }
}

pub struct ScriptExecutor {
    runner: Arc<dyn CommandRunner>,
    repository: Arc<ScriptRepository>,
    dispatcher: HookDispatcher,
    backoff: BackoffOptions,
    scratch_dir: PathBuf,
}

impl ScriptExecutor {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        repository: Arc<ScriptRepository>,
        hook_timeout: Duration,
        backoff: BackoffOptions,
    ) -> Self {
        let scratch_dir = repository.scratch_dir().clone();
        Self {
            dispatcher: HookDispatcher::new(runner.clone(), hook_timeout),
            runner,
            repository,
            backoff,
            scratch_dir,
        }
    }

    pub fn repository(&self) -> &Arc<ScriptRepository> {
        &self.repository
    }

    pub fn dispatcher(&self) -> &HookDispatcher {
        &self.dispatcher
    }

    /// Run a stored script by id
    pub async fn execute_by_id(
        &self,
        script_id: Uuid,
        ctx: &ExecutionContext,
    ) -> Result<ScriptRun, EngineError> {
        let script = self.repository.require(script_id)?;
        self.execute(&script, ctx).await
    }

    /// Run `script`, its hooks and its retry policy
    pub async fn execute(
        &self,
        script: &ScriptDefinition,
        ctx: &ExecutionContext,
    ) -> Result<ScriptRun, EngineError> {
        self.execute_chain(script, ctx, Vec::new()).await
    }

    /// Run hooks of one class outside of a script, e.g. project-level hooks
    pub async fn run_hooks(
        &self,
        class: HookClass,
        hooks: &[crate::models::script::Hook],
        ctx: &ExecutionContext,
    ) -> Vec<HookRecord> {
        self.dispatcher.run(class, hooks, ctx, self, &[]).await
    }

    fn execute_chain<'a>(
        &'a self,
        script: &'a ScriptDefinition,
        ctx: &'a ExecutionContext,
        mut chain: Vec<Uuid>,
    ) -> BoxFuture<'a, Result<ScriptRun, EngineError>> {
        async move {
            if chain.contains(&script.id) {
                chain.push(script.id);
                let path: Vec<String> = chain.iter().map(Uuid::to_string).collect();
                return Err(EngineError::HookCycle(path.join(" -> ")));
            }
            if !script.enabled {
                return Err(EngineError::ValidationError(format!(
                    "script '{}' is disabled",
                    script.name
                )));
            }
            chain.push(script.id);

            let vars = ctx.variables(&script.variables);
            let content = render(&script.content, &vars);
            let unresolved = unresolved_tokens(&content);
            if !unresolved.is_empty() {
                warn!(
                    "Script '{}' has unresolved variables: {}",
                    script.name,
                    unresolved.join(", ")
                );
            }

            let file = MaterializedScript::create(&self.scratch_dir, script.language, &content)?;
            let timeout = Duration::from_secs(script.timeout_secs);
            let mut spec = CommandSpec::new(file.command_line(), timeout).with_env(ctx.env());
            if let Some(dir) = ctx.working_dir() {
                spec = spec.in_dir(dir);
            }

            info!("Running script '{}' ({})", script.name, script.language);
            let mut hooks = self
                .dispatcher
                .run(HookClass::Pre, &script.hooks.pre, ctx, self, &chain)
                .await;

            let result = run_with_retry(script.retry, &self.backoff, &script.name, |attempt| {
                debug!("Script '{}' attempt {}", script.name, attempt);
                self.runner.execute(&spec)
            })
            .await?;
            drop(file);

            let follow_up = if result.success {
                &script.hooks.post[..]
            } else {
                &script.hooks.error[..]
            };
            let class = if result.success {
                HookClass::Post
            } else {
                HookClass::Error
            };
            hooks.extend(self.dispatcher.run(class, follow_up, ctx, self, &chain).await);

            Ok(ScriptRun {
                script_id: script.id,
                result,
                hooks,
                unresolved,
            })
        }
        .boxed()
    }
}

#[async_trait]
impl ScriptInvoker for ScriptExecutor {
    async fn invoke(
        &self,
        script_id: Uuid,
        ctx: &ExecutionContext,
        chain: &[Uuid],
    ) -> Result<ExecutionResult, EngineError> {
        let script = self.repository.require(script_id)?;
        let run = self.execute_chain(&script, ctx, chain.to_vec()).await?;
        Ok(run.result)
    }
}
