pub mod cli;
pub mod options;
pub mod run;
pub mod state;
