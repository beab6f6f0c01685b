//! Script definition models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scripts::language::ScriptLanguage;

/// Purpose of a script
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptType {
    #[default]
    Deployment,
    Rollback,
    Maintenance,
    Backup,
    Custom,
}

impl std::fmt::Display for ScriptType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deployment => write!(f, "deployment"),
            Self::Rollback => write!(f, "rollback"),
            Self::Maintenance => write!(f, "maintenance"),
            Self::Backup => write!(f, "backup"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// A hook is either an inline shell command or a reference to another script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Hook {
    Inline(String),
    Script { script_id: Uuid },
}

impl Hook {
    /// Short label used in logs and hook records
    pub fn label(&self) -> String {
        match self {
            Hook::Inline(command) => command.clone(),
            Hook::Script { script_id } => format!("script:{}", script_id),
        }
    }
}

/// Which list a hook belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookClass {
    Pre,
    Post,
    Error,
}

impl std::fmt::Display for HookClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pre => write!(f, "pre"),
            Self::Post => write!(f, "post"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Ordered hook lists around a main action
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookSet {
    #[serde(default)]
    pub pre: Vec<Hook>,
    #[serde(default)]
    pub post: Vec<Hook>,
    #[serde(default)]
    pub error: Vec<Hook>,
}

impl HookSet {
    pub fn get(&self, class: HookClass) -> &[Hook] {
        match class {
            HookClass::Pre => &self.pre,
            HookClass::Post => &self.post,
            HookClass::Error => &self.error,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Hook> {
        self.pre.iter().chain(self.post.iter()).chain(self.error.iter())
    }

    /// Scripts referenced by any hook in this set
    pub fn script_refs(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.iter().filter_map(|hook| match hook {
            Hook::Script { script_id } => Some(*script_id),
            Hook::Inline(_) => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.pre.is_empty() && self.post.is_empty() && self.error.is_empty()
    }
}

/// Retry policy.
///
/// `max_attempts` is the total number of runs and includes the first one:
/// `attempts(3)` runs a command at most three times, which is two retries.
/// A count of extra retries (as in `max_retries`) converts as
/// `max_retries + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    3
}

impl RetryPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_attempts: 1,
        }
    }

    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            enabled: true,
            max_attempts,
        }
    }

    /// Number of executions the policy allows
    pub fn total_attempts(&self) -> u32 {
        if self.enabled {
            self.max_attempts.max(1)
        } else {
            1
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: default_max_attempts(),
        }
    }
}

/// A stored, user-authored script
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptDefinition {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub script_type: ScriptType,
    #[serde(default)]
    pub language: ScriptLanguage,
    pub content: String,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub hooks: HookSet,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

/// Fields accepted when creating or updating a script
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewScript {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub script_type: ScriptType,
    #[serde(default)]
    pub language: ScriptLanguage,
    pub content: String,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub hooks: HookSet,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl NewScript {
    pub fn into_definition(self, id: Uuid, created_at: DateTime<Utc>) -> ScriptDefinition {
        ScriptDefinition {
            id,
            name: self.name,
            description: self.description,
            script_type: self.script_type,
            language: self.language,
            content: self.content,
            variables: self.variables,
            hooks: self.hooks,
            timeout_secs: self.timeout_secs,
            retry: self.retry,
            enabled: self.enabled,
            created_at,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_deserializes_both_forms() {
        let id = Uuid::new_v4();
        let json = format!(r#"["php artisan down", {{"script_id": "{}"}}]"#, id);
        let hooks: Vec<Hook> = serde_json::from_str(&json).unwrap();
        assert_eq!(hooks[0], Hook::Inline("php artisan down".to_string()));
        assert_eq!(hooks[1], Hook::Script { script_id: id });
    }

    #[test]
    fn test_disabled_policy_runs_once() {
        let policy = RetryPolicy {
            enabled: false,
            max_attempts: 5,
        };
        assert_eq!(policy.total_attempts(), 1);
        assert_eq!(RetryPolicy::attempts(3).total_attempts(), 3);
    }

    #[test]
    fn test_max_attempts_includes_the_first_run() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"enabled": true, "max_attempts": 1}"#).unwrap();
        assert_eq!(policy.total_attempts(), 1);

        let policy: RetryPolicy = serde_json::from_str(r#"{"enabled": true}"#).unwrap();
        assert_eq!(policy.total_attempts(), 3);
        assert_eq!(RetryPolicy::attempts(0).total_attempts(), 1);
    }
}
