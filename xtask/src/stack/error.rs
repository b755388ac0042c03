//! Error types for stack commands.

use std::path::PathBuf;

use thiserror::Error;
use tinylinker_core::{PlanError, StackError};

/// Result type alias for stack module.
pub type Result<T> = std::result::Result<T, StackCommandError>;

/// Errors that can occur while synthesizing or planning the stack.
#[derive(Error, Debug)]
pub enum StackCommandError {
    #[error(transparent)]
    Stack(#[from] StackError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("Failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize output: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Plan replaces {}; pass --allow-replacement to proceed", resources.join(", "))]
    ReplacementRefused { resources: Vec<String> },

    #[error("Operation cancelled by user")]
    UserCancelled,

    #[error("Prompt failed: {0}")]
    Prompt(String),
}
