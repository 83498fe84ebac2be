//! CLI command implementations.

pub mod action;
pub mod models;
pub mod upload;

/// Result type of every command.
pub type CommandResult = Result<(), Box<dyn std::error::Error>>;
