//! Deployment module

pub mod compose;
pub mod docker;
pub mod fsm;
pub mod git;
pub mod health;
pub mod lifecycle;
pub mod orchestrator;
pub mod plan;

pub use lifecycle::LifecycleManager;
pub use orchestrator::{DeployOptions, Orchestrator, OrchestratorOptions};
