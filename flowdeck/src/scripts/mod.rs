pub mod builtin;
pub mod context;
pub mod executor;
pub mod hooks;
pub mod language;
pub mod materialize;
pub mod repository;
pub mod retry;
pub mod template;

pub use context::ExecutionContext;
pub use executor::{ScriptExecutor, ScriptRun};
pub use hooks::{HookDispatcher, HookRecord};
pub use repository::ScriptRepository;
