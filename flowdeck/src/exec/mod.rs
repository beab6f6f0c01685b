//! External command execution

pub mod runner;

pub use runner::{CommandRunner, CommandSpec, ExecutionResult, ShellRunner};
