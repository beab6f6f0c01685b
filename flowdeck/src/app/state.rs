//! Application state management

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::app::options::AppOptions;
use crate::deploy::git::{GitCli, GitCollaborator};
use crate::deploy::health::HealthChecker;
use crate::deploy::lifecycle::LifecycleManager;
use crate::deploy::orchestrator::Orchestrator;
use crate::errors::EngineError;
use crate::events::{ChannelBroadcaster, FanoutBroadcaster, LogBroadcaster, StatusBroadcaster};
use crate::exec::runner::{CommandRunner, ShellRunner};
use crate::scripts::executor::ScriptExecutor;
use crate::scripts::repository::ScriptRepository;
use crate::storage::deployments::DeploymentStore;
use crate::storage::projects::ProjectStore;

/// Main application state
pub struct AppState {
    /// Command runner shared by every component
    pub runner: Arc<dyn CommandRunner>,

    /// In-process status event channel
    pub events: Arc<ChannelBroadcaster>,

    pub projects: Arc<ProjectStore>,

    pub deployments: Arc<DeploymentStore>,

    pub scripts: Arc<ScriptRepository>,

    pub lifecycle: Arc<LifecycleManager>,

    pub executor: Arc<ScriptExecutor>,

    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    /// Initialize application state with the shell runner and git CLI
    pub async fn init(options: &AppOptions) -> Result<Self, EngineError> {
        let runner: Arc<dyn CommandRunner> =
            Arc::new(ShellRunner::new(options.settings.max_output_bytes));
        let git: Arc<dyn GitCollaborator> = Arc::new(GitCli::new(
            runner.clone(),
            Duration::from_secs(options.settings.timeouts.git_info_secs),
        ));
        Self::with_collaborators(options, runner, git).await
    }

    /// Initialize application state around the given collaborators
    pub async fn with_collaborators(
        options: &AppOptions,
        runner: Arc<dyn CommandRunner>,
        git: Arc<dyn GitCollaborator>,
    ) -> Result<Self, EngineError> {
        info!("Initializing application state...");
        options.layout.setup().await?;

        let projects = Arc::new(ProjectStore::open(&options.layout).await?);
        let deployments = Arc::new(DeploymentStore::open(&options.layout).await?);
        let scripts = Arc::new(ScriptRepository::open(&options.layout, runner.clone()).await?);

        let events = Arc::new(ChannelBroadcaster::new(options.event_capacity));
        let broadcaster: Arc<dyn StatusBroadcaster> = Arc::new(FanoutBroadcaster::new(vec![
            events.clone() as Arc<dyn StatusBroadcaster>,
            Arc::new(LogBroadcaster),
        ]));
        let lifecycle = Arc::new(LifecycleManager::new(deployments.clone(), broadcaster));

        let settings = &options.settings;
        let executor = Arc::new(ScriptExecutor::new(
            runner.clone(),
            scripts.clone(),
            Duration::from_secs(settings.timeouts.hook_secs),
            settings.retry_backoff.to_options(),
        ));
        let health = HealthChecker::new(
            runner.clone(),
            settings.projects_root.clone(),
            settings.disk,
            Duration::from_secs(settings.timeouts.health_probe_secs),
        )?;
        let orchestrator = Arc::new(Orchestrator::new(
            lifecycle.clone(),
            projects.clone(),
            executor.clone(),
            runner.clone(),
            git,
            health,
            options.orchestrator.clone(),
        ));

        Ok(Self {
            runner,
            events,
            projects,
            deployments,
            scripts,
            lifecycle,
            executor,
            orchestrator,
        })
    }
}
