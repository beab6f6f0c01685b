//! `{{NAME}}` placeholder substitution
//!
//! Rendering is a single left-to-right pass over the template. Substituted
//! values are copied into the output and never scanned again, so a value
//! containing `{{OTHER}}` stays literal. Tokens with no value are left in
//! place verbatim and can be listed with [`unresolved_tokens`].

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::deployment::Deployment;
use crate::models::project::Project;

/// Fixed vocabulary of built-in placeholders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Placeholder {
    ProjectName,
    ProjectSlug,
    ProjectPath,
    Branch,
    CommitHash,
    PreviousCommit,
    DeploymentId,
    Timestamp,
    Env,
    DockerImage,
    Domain,
    PhpVersion,
    Framework,
}

impl Placeholder {
    pub const ALL: [Placeholder; 13] = [
        Placeholder::ProjectName,
        Placeholder::ProjectSlug,
        Placeholder::ProjectPath,
        Placeholder::Branch,
        Placeholder::CommitHash,
        Placeholder::PreviousCommit,
        Placeholder::DeploymentId,
        Placeholder::Timestamp,
        Placeholder::Env,
        Placeholder::DockerImage,
        Placeholder::Domain,
        Placeholder::PhpVersion,
        Placeholder::Framework,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Placeholder::ProjectName => "PROJECT_NAME",
            Placeholder::ProjectSlug => "PROJECT_SLUG",
            Placeholder::ProjectPath => "PROJECT_PATH",
            Placeholder::Branch => "BRANCH",
            Placeholder::CommitHash => "COMMIT_HASH",
            Placeholder::PreviousCommit => "PREVIOUS_COMMIT",
            Placeholder::DeploymentId => "DEPLOYMENT_ID",
            Placeholder::Timestamp => "TIMESTAMP",
            Placeholder::Env => "ENV",
            Placeholder::DockerImage => "DOCKER_IMAGE",
            Placeholder::Domain => "DOMAIN",
            Placeholder::PhpVersion => "PHP_VERSION",
            Placeholder::Framework => "FRAMEWORK",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Placeholder::ProjectName => "Project name",
            Placeholder::ProjectSlug => "Project slug",
            Placeholder::ProjectPath => "Full project path",
            Placeholder::Branch => "Current branch",
            Placeholder::CommitHash => "Current commit hash",
            Placeholder::PreviousCommit => "Previous commit hash",
            Placeholder::DeploymentId => "Current deployment ID",
            Placeholder::Timestamp => "Current timestamp",
            Placeholder::Env => "Environment (production/staging)",
            Placeholder::DockerImage => "Docker image name",
            Placeholder::Domain => "Primary domain",
            Placeholder::PhpVersion => "Language runtime version",
            Placeholder::Framework => "Framework type",
        }
    }

    /// The literal token, e.g. `{{BRANCH}}`
    pub fn token(&self) -> String {
        format!("{{{{{}}}}}", self.name())
    }
}

/// Strip optional `{{ }}` around a variable key
pub fn normalize_key(key: &str) -> &str {
    let key = key.trim();
    key.strip_prefix("{{")
        .and_then(|k| k.strip_suffix("}}"))
        .unwrap_or(key)
        .trim()
}

fn is_token_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Variable bindings keyed by bare token name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Variables {
    values: BTreeMap<String, String>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(normalize_key(key).to_string(), value.into());
    }

    pub fn set_placeholder(&mut self, placeholder: Placeholder, value: impl Into<String>) {
        self.values.insert(placeholder.name().to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(normalize_key(key)).map(String::as_str)
    }

    /// Overlay `other` on top of `self`; keys in `other` win
    pub fn merge<'a, I>(&mut self, other: I)
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (key, value) in other {
            self.set(key, value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.values.iter()
    }
}

impl<'a> IntoIterator for &'a Variables {
    type Item = (&'a String, &'a String);
    type IntoIter = std::collections::btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

/// Substitute every known `{{NAME}}` token in one pass
pub fn render(template: &str, vars: &Variables) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find("}}") else {
            rest = &rest[start..];
            break;
        };

        let name = &after[..end];
        match vars.values.get(name) {
            Some(value) if is_token_name(name) => {
                out.push_str(value);
                rest = &after[end + 2..];
            }
            _ => {
                out.push_str("{{");
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Well-formed tokens still present in `text`, in first-seen order
pub fn unresolved_tokens(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        let name = &after[..end];
        if is_token_name(name) {
            if !found.iter().any(|f| f == name) {
                found.push(name.to_string());
            }
            rest = &after[end + 2..];
        } else {
            rest = after;
        }
    }

    found
}

/// Built-in placeholder values for a project and, when known, its deployment
pub fn default_variables(
    project: &Project,
    deployment: Option<&Deployment>,
    projects_root: &Path,
    now: DateTime<Utc>,
) -> Variables {
    let mut vars = Variables::new();

    vars.set_placeholder(Placeholder::ProjectName, project.name.clone());
    vars.set_placeholder(Placeholder::ProjectSlug, project.slug.clone());
    vars.set_placeholder(
        Placeholder::ProjectPath,
        project.path(projects_root).to_string_lossy().into_owned(),
    );
    vars.set_placeholder(
        Placeholder::Branch,
        deployment.map(|d| d.branch.clone()).unwrap_or_else(|| project.branch.clone()),
    );

    let commit = deployment
        .and_then(|d| d.commit_hash.clone())
        .or_else(|| project.current_commit_hash.clone());
    if let Some(commit) = commit {
        vars.set_placeholder(Placeholder::CommitHash, commit);
    }

    vars.set_placeholder(
        Placeholder::PreviousCommit,
        deployment
            .and_then(|d| d.previous_commit_hash.clone())
            .unwrap_or_else(|| "HEAD~1".to_string()),
    );
    if let Some(deployment) = deployment {
        vars.set_placeholder(Placeholder::DeploymentId, deployment.id.to_string());
    }
    vars.set_placeholder(
        Placeholder::Timestamp,
        now.format("%Y-%m-%d %H:%M:%S").to_string(),
    );
    vars.set_placeholder(Placeholder::Env, project.environment.clone());
    vars.set_placeholder(Placeholder::DockerImage, project.image_name());
    vars.set_placeholder(
        Placeholder::Domain,
        project.primary_domain().unwrap_or("localhost").to_string(),
    );
    if let Some(version) = &project.runtime_version {
        vars.set_placeholder(Placeholder::PhpVersion, version.clone());
    }
    if let Some(framework) = &project.framework {
        vars.set_placeholder(Placeholder::Framework, framework.clone());
    }

    vars
}
