//! Error types for direct table operations.

use thiserror::Error;

/// Result type alias for tables module.
pub type Result<T> = std::result::Result<T, TablesError>;

/// Errors that can occur during DynamoDB operations.
#[derive(Error, Debug)]
pub enum TablesError {
    #[error("AWS SDK error: {0}")]
    AwsSdk(String),

    #[error("Table '{table_name}' has no partition key in its description")]
    MissingPartitionKey { table_name: String },

    #[error("Table '{table_name}' must be replaced to change its keys from {current} to {desired}; refusing to drop data")]
    ReplaceRequired {
        table_name: String,
        current: String,
        desired: String,
    },

    #[error("Table '{table_name}' has TTL enabled on '{current}', not '{desired}'; disable it before deploying")]
    TtlConflict {
        table_name: String,
        current: String,
        desired: String,
    },

    #[error("Operation cancelled by user")]
    UserCancelled,

    #[error("Prompt failed: {0}")]
    Prompt(String),

    #[error("Timeout waiting for table '{table_name}' to become active")]
    TableActivationTimeout { table_name: String },
}

pub(super) fn sdk_error(err: impl std::fmt::Display) -> TablesError {
    TablesError::AwsSdk(err.to_string())
}
