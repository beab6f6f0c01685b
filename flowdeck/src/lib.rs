//! flowdeck
//!
//! Deployment orchestration for git-hosted applications: builds and starts
//! projects with Docker or native commands, runs user scripts with hooks and
//! retries, and keeps an auditable history of every deployment.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod events;
pub mod exec;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod scripts;
pub mod server;
pub mod storage;
pub mod telemetry;
pub mod utils;
