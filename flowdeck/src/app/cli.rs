//! Command line interface
//!
//! Arguments are positional words plus `--key=value` or bare `--flag`
//! options. Every command runs to completion in the calling process and
//! prints a short human readable summary.

use std::collections::HashMap;
use std::path::PathBuf;

use colored::{ColoredString, Colorize};
use uuid::Uuid;

use crate::app::state::AppState;
use crate::deploy::health::{HealthReport, HealthStatus};
use crate::deploy::orchestrator::{ActionReport, DeployOptions};
use crate::errors::EngineError;
use crate::filesys::file::File;
use crate::models::deployment::{Deployment, DeploymentStatus, DeploymentTrigger};
use crate::models::project::{Project, ProjectStatus};
use crate::models::script::NewScript;
use crate::scripts::language::ScriptLanguage;

pub const USAGE: &str = "Usage: flowdeck [--home=<dir>] <command>

Commands:
  serve                                   Run the HTTP API
  deploy <project> [--force]              Deploy the project's branch
  rollback <project> <deployment>         Redeploy an earlier successful deployment
  stop|start|restart|cleanup <project>    Control the running application
  health <project>                        Print a health report
  cancel <deployment>                     Cancel a pending or running deployment
  deployments <project> [--limit=N]       List recent deployments
  logs <deployment>                       Print a deployment's output log
  projects list                           List registered projects
  projects add <file.json>                Register or replace a project
  scripts list                            List stored scripts
  scripts templates                       List built-in script templates
  scripts validate <file> [--language=L]  Syntax check a script file
  scripts create <file.json>              Store a new script
  scripts generate <template> <project>   Store a script from a template

Options:
  --home=<dir>   Storage directory (default: $FLOWDECK_HOME or /etc/flowdeck)
  --version      Print version information
";

/// Raw command line split into positionals and options
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub positionals: Vec<String>,
    pub flags: HashMap<String, String>,
}

impl CliArgs {
    /// Parse arguments, excluding the program name
    pub fn parse<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cli_args = CliArgs::default();
        for arg in args.into_iter().map(Into::into) {
            if let Some(flag) = arg.strip_prefix("--") {
                // Handle --key=value and standalone flags like --force
                match flag.split_once('=') {
                    Some((key, value)) => cli_args.flags.insert(key.to_string(), value.to_string()),
                    None => cli_args.flags.insert(flag.to_string(), "true".to_string()),
                };
            } else if arg == "-h" {
                cli_args.flags.insert("help".to_string(), "true".to_string());
            } else {
                cli_args.positionals.push(arg);
            }
        }
        cli_args
    }

    pub fn flag(&self, key: &str) -> Option<&str> {
        self.flags.get(key).map(String::as_str)
    }

    pub fn has_flag(&self, key: &str) -> bool {
        matches!(self.flag(key), Some(value) if value != "false")
    }
}

/// Project control actions sharing one output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectAction {
    Stop,
    Start,
    Restart,
    Cleanup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Version,
    Serve,
    Deploy { project: String, force: bool },
    Rollback { project: String, deployment: Uuid },
    Action { action: ProjectAction, project: String },
    Health { project: String },
    Cancel { deployment: Uuid },
    Deployments { project: String, limit: usize },
    Logs { deployment: Uuid },
    ProjectsList,
    ProjectsAdd { file: PathBuf },
    ScriptsList,
    ScriptsTemplates,
    ScriptsValidate { file: PathBuf, language: Option<ScriptLanguage> },
    ScriptsCreate { file: PathBuf },
    ScriptsGenerate { template: String, project: String },
}

fn usage_error(message: impl Into<String>) -> EngineError {
    EngineError::ValidationError(message.into())
}

fn positional<'a>(args: &'a CliArgs, index: usize, name: &str) -> Result<&'a str, EngineError> {
    args.positionals
        .get(index)
        .map(String::as_str)
        .ok_or_else(|| usage_error(format!("missing <{}> argument", name)))
}

fn deployment_id(args: &CliArgs, index: usize) -> Result<Uuid, EngineError> {
    let raw = positional(args, index, "deployment")?;
    raw.parse()
        .map_err(|_| usage_error(format!("'{}' is not a deployment id", raw)))
}

impl Command {
    pub fn parse(args: &CliArgs) -> Result<Self, EngineError> {
        if args.has_flag("version") {
            return Ok(Command::Version);
        }
        if args.has_flag("help") {
            return Ok(Command::Help);
        }

        let Some(word) = args.positionals.first() else {
            return Ok(Command::Help);
        };

        let project = || positional(args, 1, "project").map(str::to_string);
        let action = |action| -> Result<Command, EngineError> {
            Ok(Command::Action {
                action,
                project: project()?,
            })
        };

        match word.as_str() {
            "help" => Ok(Command::Help),
            "version" => Ok(Command::Version),
            "serve" => Ok(Command::Serve),
            "deploy" => Ok(Command::Deploy {
                project: project()?,
                force: args.has_flag("force"),
            }),
            "rollback" => Ok(Command::Rollback {
                project: project()?,
                deployment: deployment_id(args, 2)?,
            }),
            "stop" => action(ProjectAction::Stop),
            "start" => action(ProjectAction::Start),
            "restart" => action(ProjectAction::Restart),
            "cleanup" => action(ProjectAction::Cleanup),
            "health" => Ok(Command::Health { project: project()? }),
            "cancel" => Ok(Command::Cancel {
                deployment: deployment_id(args, 1)?,
            }),
            "deployments" => {
                let limit = match args.flag("limit") {
                    Some(raw) => raw
                        .parse()
                        .map_err(|_| usage_error(format!("invalid --limit '{}'", raw)))?,
                    None => 20,
                };
                Ok(Command::Deployments {
                    project: project()?,
                    limit,
                })
            }
            "logs" => Ok(Command::Logs {
                deployment: deployment_id(args, 1)?,
            }),
            "projects" => match args.positionals.get(1).map(String::as_str) {
                None | Some("list") => Ok(Command::ProjectsList),
                Some("add") => Ok(Command::ProjectsAdd {
                    file: positional(args, 2, "file")?.into(),
                }),
                Some(other) => Err(usage_error(format!("unknown projects command '{}'", other))),
            },
            "scripts" => Self::parse_scripts(args),
            other => Err(usage_error(format!("unknown command '{}'", other))),
        }
    }

    fn parse_scripts(args: &CliArgs) -> Result<Self, EngineError> {
        match args.positionals.get(1).map(String::as_str) {
            None | Some("list") => Ok(Command::ScriptsList),
            Some("templates") => Ok(Command::ScriptsTemplates),
            Some("validate") => {
                let language = args
                    .flag("language")
                    .map(str::parse::<ScriptLanguage>)
                    .transpose()
                    .map_err(usage_error)?;
                Ok(Command::ScriptsValidate {
                    file: positional(args, 2, "file")?.into(),
                    language,
                })
            }
            Some("create") => Ok(Command::ScriptsCreate {
                file: positional(args, 2, "file")?.into(),
            }),
            Some("generate") => Ok(Command::ScriptsGenerate {
                template: positional(args, 2, "template")?.to_string(),
                project: positional(args, 3, "project")?.to_string(),
            }),
            Some(other) => Err(usage_error(format!("unknown scripts command '{}'", other))),
        }
    }
}

/// Language implied by a file extension
pub fn language_for_path(path: &std::path::Path) -> Option<ScriptLanguage> {
    let extension = path.extension()?.to_str()?;
    ScriptLanguage::ALL
        .into_iter()
        .find(|language| language.extension() == extension)
}

// ================================= OUTPUT ======================================= //

fn colorize_deployment_status(status: DeploymentStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        DeploymentStatus::Success => text.green(),
        DeploymentStatus::RolledBack => text.cyan(),
        DeploymentStatus::Failed => text.red(),
        DeploymentStatus::Cancelled => text.yellow(),
        DeploymentStatus::Pending | DeploymentStatus::Running => text.blue(),
    }
}

fn colorize_project_status(status: ProjectStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        ProjectStatus::Running => text.green(),
        ProjectStatus::Error => text.red(),
        ProjectStatus::Building => text.blue(),
        ProjectStatus::Stopped => text.yellow(),
    }
}

fn colorize_health_status(status: HealthStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        HealthStatus::Healthy => text.green(),
        HealthStatus::Warning => text.yellow(),
        HealthStatus::Unhealthy => text.red(),
        HealthStatus::InProgress => text.blue(),
        HealthStatus::Unknown => text.dimmed(),
    }
}

fn short_commit(deployment: &Deployment) -> &str {
    deployment
        .commit_hash
        .as_deref()
        .map(|hash| &hash[..hash.len().min(7)])
        .unwrap_or("-")
}

fn print_deployment_row(deployment: &Deployment) {
    println!(
        "[{}] {} {} {} ({}) {}",
        deployment.id.to_string().green(),
        colorize_deployment_status(deployment.status),
        deployment.branch,
        short_commit(deployment),
        deployment.trigger,
        deployment.created_at.format("%Y-%m-%d %H:%M:%S")
    );
}

fn print_deployment(deployment: &Deployment) {
    print_deployment_row(deployment);
    if let Some(seconds) = deployment.duration_seconds {
        println!("  duration: {}s", seconds);
    }
    if let Some(message) = &deployment.commit_message {
        println!("  commit: {}", message);
    }
    if let Some(target) = deployment.rollback_deployment_id {
        println!("  rollback of: {}", target);
    }
    if let Some(error) = &deployment.error_message {
        println!("  error: {}", error.red());
    }
}

fn print_action(report: &ActionReport) {
    println!(
        "{} {} {} :: {}",
        "✓".green(),
        report.action,
        report.project,
        colorize_project_status(report.status)
    );
    if let Some(removed) = report.removed_scripts {
        println!("  removed {} stale script file(s)", removed);
    }
    if !report.output.trim().is_empty() {
        println!("\n{}", report.output.trim_end());
    }
}

fn print_health(report: &HealthReport) {
    println!(
        "{} :: {} (checked {})",
        report.project,
        colorize_health_status(report.status),
        report.checked_at.format("%Y-%m-%d %H:%M:%S")
    );
    for check in &report.checks {
        println!(
            "  {:<12} {:<12} {}",
            check.name,
            colorize_health_status(check.status).to_string(),
            check.detail
        );
    }
    let metrics = &report.metrics;
    println!(
        "  memory {:.1}% of {} MiB, disk {:.1}% of {} GiB, {} cpus, up {}s",
        metrics.memory_percent,
        metrics.memory_total / (1024 * 1024),
        metrics.disk_percent,
        metrics.disk_total / (1024 * 1024 * 1024),
        metrics.cpu_count,
        metrics.uptime_secs
    );
}

fn print_project(project: &Project) {
    println!(
        "[{}] {} :: {} ({}@{})",
        project.slug.green(),
        project.name,
        colorize_project_status(project.status),
        project.repository_url,
        project.branch
    );
}

// ================================= EXECUTION ==================================== //

/// Run a non-server command against the application state
pub async fn execute(command: Command, state: &AppState) -> Result<(), EngineError> {
    match command {
        Command::Help => print!("{}", USAGE),
        // Handled before the state is built
        Command::Version | Command::Serve => {}
        Command::Deploy { project, force } => {
            let project = state.projects.resolve(&project)?;
            let options = DeployOptions {
                force,
                trigger: DeploymentTrigger::Manual,
                user: std::env::var("USER").ok(),
                ..Default::default()
            };
            let deployment = state.orchestrator.deploy(&project, options).await?;
            print_deployment(&deployment);
        }
        Command::Rollback {
            project,
            deployment,
        } => {
            let project = state.projects.resolve(&project)?;
            let rollback = state
                .orchestrator
                .rollback(&project, deployment, std::env::var("USER").ok())
                .await?;
            print_deployment(&rollback);
        }
        Command::Action { action, project } => {
            let project = state.projects.resolve(&project)?;
            let report = match action {
                ProjectAction::Stop => state.orchestrator.stop(&project).await?,
                ProjectAction::Start => state.orchestrator.start(&project).await?,
                ProjectAction::Restart => state.orchestrator.restart(&project).await?,
                ProjectAction::Cleanup => state.orchestrator.cleanup(&project).await?,
            };
            print_action(&report);
        }
        Command::Health { project } => {
            let project = state.projects.resolve(&project)?;
            print_health(&state.orchestrator.health_check(&project).await);
        }
        Command::Cancel { deployment } => {
            let deployment = state.orchestrator.cancel(deployment).await?;
            print_deployment_row(&deployment);
        }
        Command::Deployments { project, limit } => {
            let project = state.projects.resolve(&project)?;
            let deployments = state.orchestrator.deployments(&project);
            if deployments.is_empty() {
                println!("No deployments for {}", project.slug);
            }
            for deployment in deployments.iter().take(limit) {
                print_deployment_row(deployment);
            }
        }
        Command::Logs { deployment } => {
            print!("{}", state.orchestrator.deployment_logs(deployment)?);
        }
        Command::ProjectsList => {
            let projects = state.projects.list();
            if projects.is_empty() {
                println!("No projects registered");
            }
            for project in &projects {
                print_project(project);
            }
        }
        Command::ProjectsAdd { file } => {
            let project: Project = File::new(file).read_json().await?;
            let project = state.projects.save(project).await?;
            println!("{} Saved project {}", "✓".green(), project.slug);
            print_project(&project);
        }
        Command::ScriptsList => {
            for script in state.scripts.list() {
                let enabled = if script.enabled {
                    "enabled".green()
                } else {
                    "disabled".yellow()
                };
                println!(
                    "[{}] {} :: {} {} {}",
                    script.id.to_string().green(),
                    script.name,
                    script.script_type,
                    script.language,
                    enabled
                );
            }
        }
        Command::ScriptsTemplates => {
            for template in state.scripts.templates() {
                println!(
                    "[{}] {} ({}, {})\n  {}",
                    template.key.green(),
                    template.name,
                    template.script_type,
                    template.language,
                    template.description
                );
            }
        }
        Command::ScriptsValidate { file, language } => {
            let language = language
                .or_else(|| language_for_path(&file))
                .ok_or_else(|| {
                    usage_error(format!(
                        "cannot infer the language of {}; pass --language",
                        file.display()
                    ))
                })?;
            let content = File::new(&file).read_string().await?;
            state.scripts.check_syntax(language, &content).await?;
            println!("{} {} is valid {}", "✓".green(), file.display(), language);
        }
        Command::ScriptsCreate { file } => {
            let script: NewScript = File::new(file).read_json().await?;
            let script = state.scripts.create(script).await?;
            println!("{} Created script {} [{}]", "✓".green(), script.name, script.id);
        }
        Command::ScriptsGenerate { template, project } => {
            let project = state.projects.resolve(&project)?;
            let script = state
                .scripts
                .generate_from_template(&template, &project)
                .await?;
            println!("{} Created script {} [{}]", "✓".green(), script.name, script.id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Command, EngineError> {
        Command::parse(&CliArgs::parse(args.iter().copied()))
    }

    #[test]
    fn test_args_split_flags_and_positionals() {
        let args = CliArgs::parse(["deploy", "shop", "--force", "--home=/tmp/fd"]);
        assert_eq!(args.positionals, vec!["deploy", "shop"]);
        assert!(args.has_flag("force"));
        assert_eq!(args.flag("home"), Some("/tmp/fd"));
        assert!(!CliArgs::parse(["--force=false"]).has_flag("force"));
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse(&["deploy", "shop", "--force"]).unwrap(),
            Command::Deploy {
                project: "shop".to_string(),
                force: true
            }
        );
        assert_eq!(
            parse(&["restart", "shop"]).unwrap(),
            Command::Action {
                action: ProjectAction::Restart,
                project: "shop".to_string()
            }
        );
        assert_eq!(parse(&[]).unwrap(), Command::Help);
        assert_eq!(parse(&["serve", "--version"]).unwrap(), Command::Version);
        assert_eq!(parse(&["projects"]).unwrap(), Command::ProjectsList);

        let id = Uuid::new_v4();
        assert_eq!(
            parse(&["rollback", "shop", &id.to_string()]).unwrap(),
            Command::Rollback {
                project: "shop".to_string(),
                deployment: id
            }
        );
        assert_eq!(
            parse(&["scripts", "validate", "x.txt", "--language=python"]).unwrap(),
            Command::ScriptsValidate {
                file: PathBuf::from("x.txt"),
                language: Some(ScriptLanguage::Python)
            }
        );
    }

    #[test]
    fn test_parse_errors_are_validation_errors() {
        for args in [
            vec!["deploy"],
            vec!["rollback", "shop", "not-a-uuid"],
            vec!["launch", "shop"],
            vec!["scripts", "validate", "a.sh", "--language=cobol"],
            vec!["deployments", "shop", "--limit=many"],
        ] {
            let err = parse(&args).unwrap_err();
            assert_eq!(err.exit_code(), 10, "{:?}", args);
        }
    }

    #[test]
    fn test_language_for_path() {
        assert_eq!(
            language_for_path(std::path::Path::new("deploy.sh")),
            Some(ScriptLanguage::Bash)
        );
        assert_eq!(
            language_for_path(std::path::Path::new("warm.py")),
            Some(ScriptLanguage::Python)
        );
        assert_eq!(language_for_path(std::path::Path::new("README")), None);
    }
}
