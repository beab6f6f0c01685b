//! Script repository
//!
//! Stores user-authored scripts and validates them on every save: field
//! ranges, existence of referenced hook scripts, absence of hook cycles and a
//! dry-run syntax check for the script's language.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::EngineError;
use crate::exec::runner::{CommandRunner, CommandSpec};
use crate::models::project::Project;
use crate::models::script::{HookSet, NewScript, ScriptDefinition};
use crate::scripts::builtin::{self, ScriptTemplate};
use crate::scripts::language::ScriptLanguage;
use crate::scripts::materialize::MaterializedScript;
use crate::scripts::template::Placeholder;
use crate::storage::layout::StorageLayout;
use crate::storage::table::{Record, Table};

pub const MAX_NAME_LEN: usize = 255;
pub const TIMEOUT_RANGE_SECS: std::ops::RangeInclusive<u64> = 10..=3600;
pub const MAX_ATTEMPTS_RANGE: std::ops::RangeInclusive<u32> = 1..=10;

/// Exit status of `sh` when the interpreter binary is missing
const COMMAND_NOT_FOUND: i32 = 127;

impl Record for ScriptDefinition {
    fn id(&self) -> Uuid {
        self.id
    }
}

pub struct ScriptRepository {
    table: Table<ScriptDefinition>,
    runner: Arc<dyn CommandRunner>,
    scratch_dir: PathBuf,
    check_timeout: Duration,
    /// Held across the hook graph check and the write that depends on it
    graph_lock: Mutex<()>,
}

impl ScriptRepository {
    pub async fn open(
        layout: &StorageLayout,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            table: Table::open("script", layout.scripts_file()).await?,
            runner,
            scratch_dir: layout.scratch_dir().path().to_path_buf(),
            check_timeout: Duration::from_secs(30),
            graph_lock: Mutex::new(()),
        })
    }

    pub fn scratch_dir(&self) -> &PathBuf {
        &self.scratch_dir
    }

    pub fn get(&self, id: Uuid) -> Option<ScriptDefinition> {
        self.table.get(id)
    }

    pub fn require(&self, id: Uuid) -> Result<ScriptDefinition, EngineError> {
        self.table.require(id)
    }

    pub fn list(&self) -> Vec<ScriptDefinition> {
        let mut scripts = self.table.list();
        scripts.sort_by(|a, b| a.name.cmp(&b.name));
        scripts
    }

    pub async fn create(&self, script: NewScript) -> Result<ScriptDefinition, EngineError> {
        let id = Uuid::new_v4();
        self.validate_content(&script).await?;

        let _graph = self.graph_lock.lock().await;
        self.check_hook_graph(id, &script.hooks)?;
        let definition = script.into_definition(id, Utc::now());
        info!("Created script {} ({})", definition.name, definition.id);
        self.table.upsert(definition).await
    }

    pub async fn update(&self, id: Uuid, script: NewScript) -> Result<ScriptDefinition, EngineError> {
        self.require(id)?;
        self.validate_content(&script).await?;

        let _graph = self.graph_lock.lock().await;
        let existing = self.require(id)?;
        self.check_hook_graph(id, &script.hooks)?;
        let definition = script.into_definition(id, existing.created_at);
        self.table.upsert(definition).await
    }

    /// Delete a script that no other script references
    pub async fn delete(&self, id: Uuid) -> Result<ScriptDefinition, EngineError> {
        let _graph = self.graph_lock.lock().await;
        if let Some(user) = self.table.find(|s| s.id != id && s.hooks.script_refs().any(|r| r == id)) {
            return Err(EngineError::ValidationError(format!(
                "script {} is used as a hook by '{}'",
                id, user.name
            )));
        }
        self.table
            .remove(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("script {}", id)))
    }

    /// Full validation of a script about to be stored under `id`
    pub async fn validate(&self, id: Uuid, script: &NewScript) -> Result<(), EngineError> {
        self.validate_content(script).await?;
        self.check_hook_graph(id, &script.hooks)
    }

    async fn validate_content(&self, script: &NewScript) -> Result<(), EngineError> {
        validate_fields(script)?;
        self.check_syntax(script.language, &script.content).await
    }

    /// Referenced scripts must exist and must not lead back to `id`
    pub fn check_hook_graph(&self, id: Uuid, hooks: &HookSet) -> Result<(), EngineError> {
        for reference in hooks.script_refs() {
            if reference != id && self.table.get(reference).is_none() {
                return Err(EngineError::ValidationError(format!(
                    "hook references unknown script {}",
                    reference
                )));
            }
        }

        let mut visited = HashSet::new();
        for start in hooks.script_refs() {
            let mut path = vec![id];
            if self.reaches(id, start, &mut visited, &mut path) {
                let chain: Vec<String> = path.iter().map(Uuid::to_string).collect();
                return Err(EngineError::HookCycle(chain.join(" -> ")));
            }
        }
        Ok(())
    }

    /// Depth-first search from `node` for `target` over stored hook references
    fn reaches(
        &self,
        target: Uuid,
        node: Uuid,
        visited: &mut HashSet<Uuid>,
        path: &mut Vec<Uuid>,
    ) -> bool {
        path.push(node);
        if node == target {
            return true;
        }
        if !visited.insert(node) {
            path.pop();
            return false;
        }

        let hooks = match self.table.get(node) {
            Some(script) => script.hooks,
            None => {
                path.pop();
                return false;
            }
        };
        for next in hooks.script_refs() {
            if self.reaches(target, next, visited, path) {
                return true;
            }
        }

        path.pop();
        false
    }

    /// Dry-run syntax check without executing the script.
    ///
    /// A missing interpreter is logged and not treated as a syntax error.
    pub async fn check_syntax(&self, language: ScriptLanguage, content: &str) -> Result<(), EngineError> {
        let script = MaterializedScript::create(&self.scratch_dir, language, content)?;
        let spec = CommandSpec::new(script.syntax_check_line(), self.check_timeout);
        let result = self.runner.execute(&spec).await?;

        if result.success {
            return Ok(());
        }
        if result.exit_code == Some(COMMAND_NOT_FOUND) {
            warn!(
                "{} is not installed, skipping syntax check",
                language.interpreter()
            );
            return Ok(());
        }

        let message = if result.timed_out {
            "syntax check timed out".to_string()
        } else {
            let output = result.combined_output();
            let output = output.trim();
            if output.is_empty() {
                format!("exit code {}", result.exit_code.unwrap_or(-1))
            } else {
                output.to_string()
            }
        };
        Err(EngineError::ScriptSyntaxError {
            language: language.to_string(),
            message,
        })
    }

    pub fn templates(&self) -> &'static [ScriptTemplate] {
        builtin::templates()
    }

    /// Instantiate a built-in template for `project` and store it
    pub async fn generate_from_template(
        &self,
        key: &str,
        project: &Project,
    ) -> Result<ScriptDefinition, EngineError> {
        let template = builtin::template(key)
            .ok_or_else(|| EngineError::NotFound(format!("script template {}", key)))?;
        self.create(template.instantiate(project)).await
    }
}

/// Placeholders a script may use, with descriptions
pub fn available_variables() -> Vec<(&'static str, &'static str)> {
    Placeholder::ALL
        .iter()
        .map(|p| (p.name(), p.description()))
        .collect()
}

pub fn validate_fields(script: &NewScript) -> Result<(), EngineError> {
    let name = script.name.trim();
    if name.is_empty() {
        return Err(EngineError::ValidationError("name is required".to_string()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(EngineError::ValidationError(format!(
            "name must be at most {} characters",
            MAX_NAME_LEN
        )));
    }
    if script.content.trim().is_empty() {
        return Err(EngineError::ValidationError("content is required".to_string()));
    }
    if !TIMEOUT_RANGE_SECS.contains(&script.timeout_secs) {
        return Err(EngineError::ValidationError(format!(
            "timeout must be between {} and {} seconds",
            TIMEOUT_RANGE_SECS.start(),
            TIMEOUT_RANGE_SECS.end()
        )));
    }
    if !MAX_ATTEMPTS_RANGE.contains(&script.retry.max_attempts) {
        return Err(EngineError::ValidationError(format!(
            "max attempts must be between {} and {}",
            MAX_ATTEMPTS_RANGE.start(),
            MAX_ATTEMPTS_RANGE.end()
        )));
    }
    Ok(())
}
