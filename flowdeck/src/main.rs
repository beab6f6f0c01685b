//! flowdeck - Entry Point
//!
//! Runs one CLI command to completion, or serves the HTTP API with `serve`.

use std::env;

use colored::Colorize;
use tracing::{error, info};

use flowdeck::app::cli::{execute, CliArgs, Command, USAGE};
use flowdeck::app::options::AppOptions;
use flowdeck::app::run::run;
use flowdeck::app::state::AppState;
use flowdeck::errors::EngineError;
use flowdeck::logs::{init_logging, LogOptions};
use flowdeck::storage::layout::StorageLayout;
use flowdeck::storage::settings::Settings;
use flowdeck::utils::version_info;

#[tokio::main]
async fn main() {
    let cli_args = CliArgs::parse(env::args().skip(1));

    let command = match Command::parse(&cli_args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{} {}\n\n{}", "x".red(), e, USAGE);
            std::process::exit(e.exit_code());
        }
    };

    // Print version and exit
    let version = version_info();
    if command == Command::Version {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return;
    }
    if command == Command::Help {
        print!("{}", USAGE);
        return;
    }

    let layout = match cli_args.flag("home") {
        Some(home) => StorageLayout::new(home),
        None => StorageLayout::default(),
    };

    if let Err(e) = run_command(version.version, layout, command).await {
        eprintln!("{} {}", "x".red(), e);
        std::process::exit(e.exit_code());
    }
}

async fn run_command(
    version: String,
    layout: StorageLayout,
    command: Command,
) -> Result<(), EngineError> {
    // Retrieve the settings file
    let settings: Settings = layout.settings_file().read_json_or_default().await?;
    layout.setup().await?;

    // Initialize logging; only the server logs to stdout by default
    let serving = command == Command::Serve;
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        stdout: serving,
        log_dir: settings
            .log_to_file
            .then(|| layout.logs_dir().path().to_path_buf()),
        json_format: settings.log_json,
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let options = AppOptions::from_settings(layout, settings);

    if serving {
        info!("Running flowdeck with options: {:?}", options);
        let result = run(version, options, await_shutdown_signal()).await;
        if let Err(e) = &result {
            error!("Failed to run the server: {e}");
        }
        return result;
    }

    let state = AppState::init(&options).await?;
    execute(command, &state).await
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Unable to install signal handlers, waiting for Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
        }
        info!("Ctrl+C received, shutting down...");
    }
}
