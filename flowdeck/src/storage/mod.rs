//! Persistent storage

pub mod deployments;
pub mod layout;
pub mod projects;
pub mod settings;
pub mod table;
