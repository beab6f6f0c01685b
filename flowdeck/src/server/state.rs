//! Server state

use std::sync::Arc;

use crate::app::state::AppState;
use crate::deploy::lifecycle::LifecycleManager;
use crate::deploy::orchestrator::Orchestrator;
use crate::scripts::repository::ScriptRepository;
use crate::storage::projects::ProjectStore;

/// Server state shared across handlers
pub struct ServerState {
    pub projects: Arc<ProjectStore>,
    pub scripts: Arc<ScriptRepository>,
    pub lifecycle: Arc<LifecycleManager>,
    pub orchestrator: Arc<Orchestrator>,
}

impl ServerState {
    pub fn new(app_state: &AppState) -> Self {
        Self {
            projects: app_state.projects.clone(),
            scripts: app_state.scripts.clone(),
            lifecycle: app_state.lifecycle.clone(),
            orchestrator: app_state.orchestrator.clone(),
        }
    }
}
