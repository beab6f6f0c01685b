//! Deployment orchestration
//!
//! Entry point for every project operation. A deploy opens a deployment
//! through the lifecycle manager, runs the project's pre hooks, then its
//! custom deployment script or the built-in flow (sync, build, start), and
//! closes the deployment with the outcome. Build failures short-circuit the
//! flow so a broken image is never started.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::EngineError;
use crate::exec::runner::CommandRunner;
use crate::filesys::dir::Dir;
use crate::models::deployment::{
    Deployment, DeploymentRequest, DeploymentTrigger, EnvironmentSnapshot, Outcome,
};
use crate::models::project::{Project, ProjectStatus};
use crate::models::script::{HookClass, RetryPolicy};
use crate::scripts::context::ExecutionContext;
use crate::scripts::executor::ScriptExecutor;
use crate::scripts::materialize::SCRIPT_FILE_PREFIX;
use crate::scripts::retry::run_with_retry;
use crate::scripts::template::render;
use crate::storage::projects::ProjectStore;
use crate::storage::settings::{Settings, TimeoutSettings};
use crate::utils::BackoffOptions;

use super::git::{self, CommitInfo, GitCollaborator};
use super::health::{HealthChecker, HealthReport};
use super::lifecycle::LifecycleManager;
use super::plan::{Runtime, Step};

/// Options for a deploy
#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    /// Cancel an active deployment instead of refusing
    pub force: bool,
    pub trigger: DeploymentTrigger,
    pub user: Option<String>,
    /// Extra template variables, taking precedence over all others
    pub variables: BTreeMap<String, String>,
}

/// Result of stop/start/restart/cleanup
#[derive(Debug, Clone, Serialize)]
pub struct ActionReport {
    pub project: String,
    pub action: &'static str,
    pub status: ProjectStatus,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed_scripts: Option<usize>,
}

/// Orchestrator configuration taken from [`Settings`]
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub projects_root: PathBuf,
    pub timeouts: TimeoutSettings,
    pub backoff: BackoffOptions,
    pub restart_pause: Duration,
    pub stale_script_age: Duration,
    pub scratch_dir: PathBuf,
}

impl OrchestratorOptions {
    pub fn from_settings(settings: &Settings, scratch_dir: PathBuf) -> Self {
        Self {
            projects_root: settings.projects_root.clone(),
            timeouts: settings.timeouts.clone(),
            backoff: settings.retry_backoff.to_options(),
            restart_pause: Duration::from_secs(settings.restart_pause_secs),
            stale_script_age: Duration::from_secs(settings.stale_script_age_secs),
            scratch_dir,
        }
    }
}

/// Accumulates stage output and mirrors it into the deployment log.
///
/// Lines are buffered and written to the store on `flush`, once per step.
struct StageLog<'a> {
    lifecycle: &'a LifecycleManager,
    deployment: Option<Uuid>,
    text: String,
    pending: String,
}

impl<'a> StageLog<'a> {
    fn new(lifecycle: &'a LifecycleManager, deployment: Option<Uuid>) -> Self {
        Self {
            lifecycle,
            deployment,
            text: String::new(),
            pending: String::new(),
        }
    }

    fn push(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        for buffer in [&mut self.text, &mut self.pending] {
            buffer.push_str(text);
            if !text.ends_with('\n') {
                buffer.push('\n');
            }
        }
    }

    async fn flush(&mut self) -> Result<(), EngineError> {
        let pending = std::mem::take(&mut self.pending);
        match self.deployment {
            Some(id) if !pending.is_empty() => self.lifecycle.append_log(id, &pending).await,
            _ => Ok(()),
        }
    }
}

pub struct Orchestrator {
    lifecycle: Arc<LifecycleManager>,
    projects: Arc<ProjectStore>,
    executor: Arc<ScriptExecutor>,
    runner: Arc<dyn CommandRunner>,
    git: Arc<dyn GitCollaborator>,
    health: HealthChecker,
    options: OrchestratorOptions,
}

impl Orchestrator {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        projects: Arc<ProjectStore>,
        executor: Arc<ScriptExecutor>,
        runner: Arc<dyn CommandRunner>,
        git: Arc<dyn GitCollaborator>,
        health: HealthChecker,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            lifecycle,
            projects,
            executor,
            runner,
            git,
            health,
            options,
        }
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn projects(&self) -> &Arc<ProjectStore> {
        &self.projects
    }

    pub fn executor(&self) -> &Arc<ScriptExecutor> {
        &self.executor
    }

    fn context(&self, project: &Project, deployment: Option<&Deployment>) -> ExecutionContext {
        ExecutionContext::new(
            project.clone(),
            deployment.cloned(),
            self.options.projects_root.clone(),
        )
    }

    /// Checks run before a deployment is opened
    pub async fn validate_prerequisites(&self, project: &Project) -> Result<(), EngineError> {
        if !project.is_active {
            return Err(EngineError::ValidationError(format!(
                "project {} is not active",
                project.slug
            )));
        }
        if project.repository_url.trim().is_empty() {
            return Err(EngineError::ValidationError(format!(
                "project {} has no repository url",
                project.slug
            )));
        }
        if project.branch.trim().is_empty() {
            return Err(EngineError::ValidationError(format!(
                "project {} has no branch",
                project.slug
            )));
        }

        if let Some(script_id) = project.deployment_script_id {
            let script = self.executor.repository().require(script_id)?;
            let vars = self.context(project, None).variables(&script.variables);
            self.executor
                .repository()
                .check_syntax(script.language, &render(&script.content, &vars))
                .await?;
        }
        Ok(())
    }

    /// Deploy `project`, returning the finished deployment
    pub async fn deploy(&self, project: &Project, options: DeployOptions) -> Result<Deployment, EngineError> {
        self.validate_prerequisites(project).await?;

        let mut request = DeploymentRequest::for_project(project, options.trigger);
        if options.user.is_some() {
            request.user_id = options.user.clone();
        }

        let (deployment, superseded) = if options.force {
            self.lifecycle.force_open(request).await?
        } else {
            (self.lifecycle.open(request).await?, None)
        };

        info!("Deploying {} (deployment {})", project.slug, deployment.id);
        let mut ctx = self
            .context(project, Some(&deployment))
            .with_runtime_vars(options.variables.clone());
        let mut commit = None;

        // Any error past this point closes the deployment as failed
        let body = self
            .deploy_body(
                project,
                &deployment,
                superseded.as_ref(),
                &options.variables,
                &mut ctx,
                &mut commit,
            )
            .await;

        match body {
            Ok(()) => self.finish_success(project, &deployment, &ctx, Outcome::Success, commit).await,
            Err(err) => Err(self.finish_failure(project, &deployment, &ctx, err).await),
        }
    }

    async fn deploy_body(
        &self,
        project: &Project,
        deployment: &Deployment,
        superseded: Option<&Deployment>,
        variables: &BTreeMap<String, String>,
        ctx: &mut ExecutionContext,
        commit: &mut Option<CommitInfo>,
    ) -> Result<(), EngineError> {
        if let Some(old) = superseded {
            self.lifecycle
                .append_log(deployment.id, &format!("Superseded deployment {}", old.id))
                .await?;
        }

        *commit = self.record_commit(deployment, project).await;
        *ctx = self.refreshed_context(project, deployment.id, variables)?;

        self.set_project_status(project.id, ProjectStatus::Building).await?;
        self.run_project_hooks(HookClass::Pre, project, deployment, ctx).await?;

        match project.deployment_script_id {
            Some(script_id) => self.run_custom_script(script_id, deployment, ctx).await,
            None => {
                self.run_builtin_deploy(project, deployment, commit).await?;
                *ctx = self.refreshed_context(project, deployment.id, variables)?;
                Ok(())
            }
        }
    }

    /// Script context over the stored copy of the deployment
    fn refreshed_context(
        &self,
        project: &Project,
        deployment_id: Uuid,
        variables: &BTreeMap<String, String>,
    ) -> Result<ExecutionContext, EngineError> {
        let deployment = self.lifecycle.get(deployment_id)?;
        Ok(self
            .context(project, Some(&deployment))
            .with_runtime_vars(variables.clone()))
    }

    /// Redeploy the commit recorded by an earlier successful deployment.
    ///
    /// A new deployment is opened for the rollback; `target_id` is validated
    /// and read but never modified.
    pub async fn rollback(
        &self,
        project: &Project,
        target_id: Uuid,
        user: Option<String>,
    ) -> Result<Deployment, EngineError> {
        let target = self.validate_rollback_target(project, target_id)?;
        let commit = target.commit_hash.clone().unwrap_or_default();

        let mut request = DeploymentRequest::for_project(project, DeploymentTrigger::Rollback);
        request.branch = target.branch.clone();
        request.commit_hash = Some(commit.clone());
        request.commit_message = target.commit_message.clone();
        request.rollback_deployment_id = Some(target.id);
        request.environment_snapshot = target
            .environment_snapshot
            .clone()
            .or_else(|| Some(EnvironmentSnapshot::capture(project)));
        if user.is_some() {
            request.user_id = user;
        }

        let deployment = self.lifecycle.open(request).await?;
        info!(
            "Rolling back {} to {} (deployment {})",
            project.slug, commit, deployment.id
        );
        let ctx = self.context(project, Some(&deployment));
        let body = self.rollback_body(project, &deployment, &target, &ctx).await;

        let commit_info = Some(CommitInfo {
            short_hash: commit.chars().take(7).collect(),
            hash: commit.clone(),
            author: String::new(),
            timestamp: Utc::now(),
            message: target.commit_message.clone().unwrap_or_default(),
        });
        match body {
            Ok(()) => {
                self.finish_success(project, &deployment, &ctx, Outcome::RolledBack, commit_info)
                    .await
            }
            Err(err) => Err(self.finish_failure(project, &deployment, &ctx, err).await),
        }
    }

    async fn rollback_body(
        &self,
        project: &Project,
        deployment: &Deployment,
        target: &Deployment,
        ctx: &ExecutionContext,
    ) -> Result<(), EngineError> {
        let commit = target.commit_hash.as_deref().unwrap_or_default();
        self.lifecycle
            .append_log(
                deployment.id,
                &format!("Rollback to deployment {} at commit {}", target.id, commit),
            )
            .await?;

        self.set_project_status(project.id, ProjectStatus::Building).await?;
        self.run_project_hooks(HookClass::Pre, project, deployment, ctx).await?;

        match project.rollback_script_id {
            Some(script_id) => self.run_custom_script(script_id, deployment, ctx).await,
            None => self.run_builtin_rollback(project, deployment, commit).await,
        }
    }

    fn validate_rollback_target(&self, project: &Project, target_id: Uuid) -> Result<Deployment, EngineError> {
        let invalid = |reason: &str| EngineError::RollbackTargetInvalid {
            target: target_id,
            reason: reason.to_string(),
        };

        let target = self
            .lifecycle
            .store()
            .get(target_id)
            .ok_or_else(|| invalid("deployment not found"))?;
        if target.project_id != project.id {
            return Err(invalid("deployment belongs to another project"));
        }
        if !target.status.is_success_class() {
            return Err(invalid(&format!("deployment is {}", target.status)));
        }
        if target.commit_hash.as_deref().map_or(true, |c| c.trim().is_empty()) {
            return Err(invalid("deployment has no commit hash"));
        }
        Ok(target)
    }

    async fn finish_success(
        &self,
        project: &Project,
        deployment: &Deployment,
        ctx: &ExecutionContext,
        outcome: Outcome,
        commit: Option<CommitInfo>,
    ) -> Result<Deployment, EngineError> {
        let finished = match self.lifecycle.complete(deployment.id, outcome, None).await {
            Ok(finished) => finished,
            Err(EngineError::AlreadyTerminal { status, .. }) => {
                warn!(
                    "Deployment {} finished its work but is already {}",
                    deployment.id, status
                );
                self.lifecycle.get(deployment.id)?
            }
            Err(err) => return Err(err),
        };

        self.projects
            .update(project.id, |p| {
                p.status = ProjectStatus::Running;
                p.last_deployed_at = Some(Utc::now());
                if let Some(commit) = &commit {
                    p.current_commit_hash = Some(commit.hash.clone());
                    p.current_commit_message = Some(commit.message.clone());
                    p.last_commit_at = Some(commit.timestamp);
                }
                Ok(())
            })
            .await?;

        self.run_project_hooks(HookClass::Post, project, deployment, ctx).await?;
        info!("Deployment {} of {} is {}", finished.id, project.slug, finished.status);
        self.lifecycle.get(finished.id)
    }

    /// Close a failed deployment and return the error to surface
    async fn finish_failure(
        &self,
        project: &Project,
        deployment: &Deployment,
        ctx: &ExecutionContext,
        err: EngineError,
    ) -> EngineError {
        error!("Deployment {} of {} failed: {}", deployment.id, project.slug, err);

        if let Err(hook_err) = self.run_project_hooks(HookClass::Error, project, deployment, ctx).await {
            warn!("Could not record error hooks: {}", hook_err);
        }
        if let EngineError::RetryExhausted { attempts, .. } = &err {
            if let Err(log_err) = self
                .lifecycle
                .append_log(deployment.id, &format!("retries: {}", attempts))
                .await
            {
                warn!("Could not append to deployment log: {}", log_err);
            }
        }

        match self
            .lifecycle
            .complete(deployment.id, Outcome::Failed, Some(err.to_string()))
            .await
        {
            Ok(_) => {}
            Err(EngineError::AlreadyTerminal { status, .. }) => {
                warn!("Deployment {} failed but is already {}", deployment.id, status);
            }
            Err(complete_err) => {
                error!("Could not close deployment {}: {}", deployment.id, complete_err);
            }
        }

        if let Err(status_err) = self.set_project_status(project.id, ProjectStatus::Error).await {
            warn!("Could not update project status: {}", status_err);
        }

        EngineError::DeploymentFailed {
            deployment_id: deployment.id,
            source: Box::new(err),
        }
    }

    async fn run_project_hooks(
        &self,
        class: HookClass,
        project: &Project,
        deployment: &Deployment,
        ctx: &ExecutionContext,
    ) -> Result<(), EngineError> {
        let hooks = project.hooks.get(class);
        if hooks.is_empty() {
            return Ok(());
        }
        let records = self.executor.run_hooks(class, hooks, ctx).await;
        let mut log = StageLog::new(&self.lifecycle, Some(deployment.id));
        for record in records {
            log.push(&record.log_line());
        }
        log.flush().await
    }

    async fn run_custom_script(
        &self,
        script_id: Uuid,
        deployment: &Deployment,
        ctx: &ExecutionContext,
    ) -> Result<(), EngineError> {
        let script = self.executor.repository().require(script_id)?;
        self.lifecycle
            .report_progress(deployment, &format!("Running script {}", script.name), 20);

        let run = self.executor.execute(&script, ctx).await?;
        self.lifecycle.append_log(deployment.id, &run.log_text()).await?;

        if run.success() {
            Ok(())
        } else {
            Err(run.result.into_error(&script.name, Duration::from_secs(script.timeout_secs)))
        }
    }

    async fn run_builtin_deploy(
        &self,
        project: &Project,
        deployment: &Deployment,
        commit: &mut Option<CommitInfo>,
    ) -> Result<(), EngineError> {
        let dir = project.path(&self.options.projects_root);
        let timeouts = &self.options.timeouts;
        let mut log = StageLog::new(&self.lifecycle, Some(deployment.id));

        tokio::fs::create_dir_all(&self.options.projects_root).await?;

        self.lifecycle.report_progress(deployment, "Syncing repository", 10);
        log.push("=== Sync ===");
        let sync = git::sync_steps(project, &dir, Duration::from_secs(timeouts.git_secs));
        self.run_steps(&sync, project.retry, &mut log).await?;
        *commit = self.record_commit(deployment, project).await;

        self.run_build_and_start(project, deployment, &mut log).await
    }

    async fn run_builtin_rollback(
        &self,
        project: &Project,
        deployment: &Deployment,
        commit: &str,
    ) -> Result<(), EngineError> {
        let dir = project.path(&self.options.projects_root);
        if !dir.join(".git").exists() {
            return Err(EngineError::ValidationError(format!(
                "no checkout of {} at {}",
                project.slug,
                dir.display()
            )));
        }
        let mut log = StageLog::new(&self.lifecycle, Some(deployment.id));

        self.lifecycle.report_progress(deployment, "Checking out target commit", 10);
        log.push("=== Checkout ===");
        let checkout = git::checkout_steps(&dir, commit, Duration::from_secs(self.options.timeouts.git_secs));
        self.run_steps(&checkout, project.retry, &mut log).await?;

        self.run_build_and_start(project, deployment, &mut log).await
    }

    /// Build, then start; a failed build returns before anything is started
    async fn run_build_and_start(
        &self,
        project: &Project,
        deployment: &Deployment,
        log: &mut StageLog<'_>,
    ) -> Result<(), EngineError> {
        let dir = project.path(&self.options.projects_root);
        let timeouts = &self.options.timeouts;
        let runtime = Runtime::detect(project, &dir);
        info!("Using {} runtime for {}", runtime.name(), project.slug);

        self.lifecycle.report_progress(deployment, "Building", 40);
        log.push("=== Build ===");
        let build = runtime.build_steps(project, &dir, timeouts);
        self.run_steps(&build, project.retry, log).await?;

        self.lifecycle.report_progress(deployment, "Starting", 70);
        log.push("=== Start ===");
        let start = runtime.start_steps(project, &dir, timeouts);
        self.run_steps(&start, project.retry, log).await?;

        let post = runtime.post_start_steps(project, &dir, timeouts);
        if !post.is_empty() {
            self.lifecycle.report_progress(deployment, "Optimizing", 90);
            log.push("=== Optimize ===");
            self.run_steps(&post, RetryPolicy::disabled(), log).await?;
        }
        log.flush().await
    }

    /// Run steps in order; the first failing required step ends the run
    async fn run_steps(
        &self,
        steps: &[Step],
        policy: RetryPolicy,
        log: &mut StageLog<'_>,
    ) -> Result<(), EngineError> {
        for step in steps {
            let outcome = self.run_step(step, policy, log).await;
            log.flush().await?;
            outcome?;
        }
        Ok(())
    }

    async fn run_step(&self, step: &Step, policy: RetryPolicy, log: &mut StageLog<'_>) -> Result<(), EngineError> {
        log.push(&format!("$ {}", step.spec.line));
        let policy = if step.optional { RetryPolicy::disabled() } else { policy };
        let result = run_with_retry(policy, &self.options.backoff, &step.name, |_| {
            self.runner.execute(&step.spec)
        })
        .await?;
        log.push(&result.combined_output());

        if result.success {
            return Ok(());
        }
        if step.optional {
            warn!("Optional step '{}' failed, continuing", step.name);
            log.push(&format!("{} failed (not required)", step.name));
            return Ok(());
        }
        Err(result.into_error(&step.spec.line, step.spec.timeout))
    }

    /// Store the checkout's latest commit on the deployment; failures only warn
    async fn record_commit(&self, deployment: &Deployment, project: &Project) -> Option<CommitInfo> {
        let dir = project.path(&self.options.projects_root);
        let info = match self.git.current_commit(&dir).await {
            Ok(Some(info)) => info,
            Ok(None) => return None,
            Err(err) => {
                warn!("Could not read commit info for {}: {}", project.slug, err);
                return None;
            }
        };

        let update = self
            .lifecycle
            .store()
            .update(deployment.id, |d| {
                d.commit_hash = Some(info.hash.clone());
                d.commit_message = Some(info.message.clone());
                Ok(())
            })
            .await;
        if let Err(err) = update {
            warn!("Could not record commit on deployment {}: {}", deployment.id, err);
        }
        Some(info)
    }

    /// Refresh the project's commit metadata from its checkout
    pub async fn update_project_commit_info(&self, project: &Project) -> Result<Project, EngineError> {
        let dir = project.path(&self.options.projects_root);
        let Some(info) = self.git.current_commit(&dir).await? else {
            return Ok(project.clone());
        };
        self.projects
            .update(project.id, |p| {
                p.current_commit_hash = Some(info.hash.clone());
                p.current_commit_message = Some(info.message.clone());
                p.last_commit_at = Some(info.timestamp);
                Ok(())
            })
            .await
    }

    async fn set_project_status(&self, id: Uuid, status: ProjectStatus) -> Result<Project, EngineError> {
        self.projects
            .update(id, |p| {
                p.status = status;
                Ok(())
            })
            .await
    }

    async fn run_action(
        &self,
        project: &Project,
        action: &'static str,
        steps: Vec<Step>,
        on_success: ProjectStatus,
    ) -> Result<ActionReport, EngineError> {
        info!("{} {}", action, project.slug);
        let mut log = StageLog::new(&self.lifecycle, None);
        match self.run_steps(&steps, RetryPolicy::disabled(), &mut log).await {
            Ok(()) => {
                let project = self.set_project_status(project.id, on_success).await?;
                Ok(ActionReport {
                    project: project.slug,
                    action,
                    status: project.status,
                    output: log.text,
                    removed_scripts: None,
                })
            }
            Err(err) => {
                error!("{} of {} failed: {}", action, project.slug, err);
                self.set_project_status(project.id, ProjectStatus::Error).await?;
                Err(err)
            }
        }
    }

    pub async fn stop(&self, project: &Project) -> Result<ActionReport, EngineError> {
        let dir = project.path(&self.options.projects_root);
        let steps = Runtime::detect(project, &dir).stop_steps(project, &dir, &self.options.timeouts);
        self.run_action(project, "stop", steps, ProjectStatus::Stopped).await
    }

    pub async fn start(&self, project: &Project) -> Result<ActionReport, EngineError> {
        let dir = project.path(&self.options.projects_root);
        let steps = Runtime::detect(project, &dir).start_steps(project, &dir, &self.options.timeouts);
        self.run_action(project, "start", steps, ProjectStatus::Running).await
    }

    /// Stop, pause, start. A failed stop is logged and the start still runs.
    pub async fn restart(&self, project: &Project) -> Result<ActionReport, EngineError> {
        let stop_output = match self.stop(project).await {
            Ok(report) => report.output,
            Err(err) => {
                warn!("Stop before restart of {} failed: {}", project.slug, err);
                format!("stop failed: {}\n", err)
            }
        };
        tokio::time::sleep(self.options.restart_pause).await;

        let mut report = self.start(project).await?;
        report.action = "restart";
        report.output = format!("{}{}", stop_output, report.output);
        Ok(report)
    }

    /// Clear framework caches and logs, prune docker and remove stale scratch scripts
    pub async fn cleanup(&self, project: &Project) -> Result<ActionReport, EngineError> {
        let dir = project.path(&self.options.projects_root);
        let steps = Runtime::detect(project, &dir).maintenance_steps(project, &dir, &self.options.timeouts);

        let mut log = StageLog::new(&self.lifecycle, None);
        self.run_steps(&steps, RetryPolicy::disabled(), &mut log).await?;

        let removed = Dir::new(&self.options.scratch_dir)
            .remove_stale(SCRIPT_FILE_PREFIX, self.options.stale_script_age)
            .await?;
        if removed > 0 {
            info!("Removed {} stale script files", removed);
        }

        let current = self.projects.get(project.id).unwrap_or_else(|| project.clone());
        Ok(ActionReport {
            project: current.slug,
            action: "cleanup",
            status: current.status,
            output: log.text,
            removed_scripts: Some(removed),
        })
    }

    pub async fn health_check(&self, project: &Project) -> HealthReport {
        let last = self.lifecycle.list_for_project(project.id).into_iter().next();
        self.health.check(project, last.as_ref()).await
    }

    pub async fn cancel(&self, deployment_id: Uuid) -> Result<Deployment, EngineError> {
        self.lifecycle.cancel(deployment_id).await
    }

    pub fn rollback_points(&self, project: &Project, limit: usize) -> Vec<Deployment> {
        self.lifecycle.store().rollback_points(project.id, limit)
    }

    pub fn deployment_logs(&self, deployment_id: Uuid) -> Result<String, EngineError> {
        Ok(self.lifecycle.get(deployment_id)?.output_log)
    }

    pub fn deployments(&self, project: &Project) -> Vec<Deployment> {
        self.lifecycle.list_for_project(project.id)
    }
}
