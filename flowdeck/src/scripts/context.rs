//! Execution context shared by scripts and hooks

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::Utc;

use crate::models::deployment::Deployment;
use crate::models::project::Project;
use crate::scripts::template::{default_variables, Variables};

const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Project, deployment and caller variables a script runs with
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub project: Project,
    pub deployment: Option<Deployment>,
    pub projects_root: PathBuf,
    /// Caller-supplied variables; highest precedence
    pub runtime_vars: BTreeMap<String, String>,
}

impl ExecutionContext {
    pub fn new(project: Project, deployment: Option<Deployment>, projects_root: PathBuf) -> Self {
        Self {
            project,
            deployment,
            projects_root,
            runtime_vars: BTreeMap::new(),
        }
    }

    pub fn with_runtime_vars(mut self, vars: BTreeMap<String, String>) -> Self {
        self.runtime_vars = vars;
        self
    }

    /// Project checkout if present, otherwise the projects root if present
    pub fn working_dir(&self) -> Option<PathBuf> {
        let checkout = self.project.path(&self.projects_root);
        if checkout.is_dir() {
            Some(checkout)
        } else if self.projects_root.is_dir() {
            Some(self.projects_root.clone())
        } else {
            None
        }
    }

    /// Process environment for scripts and hooks
    pub fn env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert(
            "PATH".to_string(),
            std::env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.to_string()),
        );
        env.insert(
            "HOME".to_string(),
            std::env::var("HOME").unwrap_or_else(|_| "/root".to_string()),
        );
        env.insert("PROJECT_ENV".to_string(), self.project.environment.clone());
        env.insert("PROJECT_ID".to_string(), self.project.id.to_string());
        env.insert("PROJECT_SLUG".to_string(), self.project.slug.clone());
        if let Some(deployment) = &self.deployment {
            env.insert("DEPLOYMENT_ID".to_string(), deployment.id.to_string());
        }
        for (key, value) in &self.project.env_variables {
            env.insert(key.clone(), value.clone());
        }
        env
    }

    /// Defaults, then `script_vars`, then the runtime variables
    pub fn variables(&self, script_vars: &BTreeMap<String, String>) -> Variables {
        let mut vars = default_variables(
            &self.project,
            self.deployment.as_ref(),
            &self.projects_root,
            Utc::now(),
        );
        vars.merge(script_vars);
        vars.merge(&self.runtime_vars);
        vars
    }
}
