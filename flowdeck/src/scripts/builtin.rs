//! Built-in script templates

use serde::Serialize;

use crate::models::project::{DeploymentMethod, Project};
use crate::models::script::{NewScript, ScriptType};
use crate::scripts::language::ScriptLanguage;

#[derive(Debug, Clone, Serialize)]
pub struct ScriptTemplate {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub script_type: ScriptType,
    pub language: ScriptLanguage,
    pub timeout_secs: u64,
    pub content: &'static str,
}

static TEMPLATES: &[ScriptTemplate] = &[
    ScriptTemplate {
        key: "laravel_deployment",
        name: "Laravel Deployment",
        description: "Laravel deployment with migrations and cache rebuild",
        script_type: ScriptType::Deployment,
        language: ScriptLanguage::Bash,
        timeout_secs: 600,
        content: include_str!("../../templates/laravel_deployment.sh"),
    },
    ScriptTemplate {
        key: "node_deployment",
        name: "Node.js Deployment",
        description: "Node.js deployment managed by PM2",
        script_type: ScriptType::Deployment,
        language: ScriptLanguage::Bash,
        timeout_secs: 600,
        content: include_str!("../../templates/node_deployment.sh"),
    },
    ScriptTemplate {
        key: "database_backup",
        name: "Database Backup",
        description: "Compressed MySQL dump with rotation",
        script_type: ScriptType::Backup,
        language: ScriptLanguage::Bash,
        timeout_secs: 1800,
        content: include_str!("../../templates/database_backup.sh"),
    },
    ScriptTemplate {
        key: "rollback",
        name: "Emergency Rollback",
        description: "Reset to the target commit and rebuild",
        script_type: ScriptType::Rollback,
        language: ScriptLanguage::Bash,
        timeout_secs: 300,
        content: include_str!("../../templates/rollback.sh"),
    },
    ScriptTemplate {
        key: "health_check",
        name: "Health Check",
        description: "Endpoint, disk and memory checks",
        script_type: ScriptType::Custom,
        language: ScriptLanguage::Bash,
        timeout_secs: 60,
        content: include_str!("../../templates/health_check.sh"),
    },
    ScriptTemplate {
        key: "cache_warmer",
        name: "Cache Warmer",
        description: "Request common paths to pre-warm caches",
        script_type: ScriptType::Custom,
        language: ScriptLanguage::Python,
        timeout_secs: 300,
        content: include_str!("../../templates/cache_warmer.py"),
    },
];

pub fn templates() -> &'static [ScriptTemplate] {
    TEMPLATES
}

pub fn template(key: &str) -> Option<&'static ScriptTemplate> {
    TEMPLATES.iter().find(|t| t.key == key)
}

const CONTAINER_WRAPPED: &[&str] = &["composer", "php", "npm", "node"];

/// Adjust template content to the project's framework and deployment method
pub fn customize_for_project(content: &str, project: &Project) -> String {
    let mut lines: Vec<String> = Vec::new();

    for line in content.lines() {
        let wrap = project.deployment_method == DeploymentMethod::Docker
            && CONTAINER_WRAPPED
                .iter()
                .any(|cmd| line.starts_with(&format!("{} ", cmd)) || line == *cmd);
        if wrap {
            lines.push(format!("docker compose exec -T app {}", line));
        } else {
            lines.push(line.to_string());
        }

        if project.is_framework("laravel") && line.trim() == "php artisan migrate --force" {
            let seed = "php artisan db:seed --class=ProductionSeeder --force";
            if wrap {
                lines.push(format!("docker compose exec -T app {}", seed));
            } else {
                lines.push(seed.to_string());
            }
        }
    }

    let mut out = lines.join("\n");
    if content.ends_with('\n') {
        out.push('\n');
    }
    out
}

impl ScriptTemplate {
    /// A new script for `project` based on this template
    pub fn instantiate(&self, project: &Project) -> NewScript {
        NewScript {
            name: format!("{} - {}", self.name, project.name),
            description: Some(self.description.to_string()),
            script_type: self.script_type,
            language: self.language,
            content: customize_for_project(self.content, project),
            variables: Default::default(),
            hooks: Default::default(),
            timeout_secs: self.timeout_secs,
            retry: Default::default(),
            enabled: true,
        }
    }
}
