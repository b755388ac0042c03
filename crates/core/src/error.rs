//! Error types for stack composition and planning.

use thiserror::Error;

use crate::resource::LogicalId;

/// Result type alias for stack composition.
pub type Result<T> = std::result::Result<T, StackError>;

/// Invalid or incomplete deployment configuration. Raised before any
/// resource is declared.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("account is required")]
    MissingAccount,

    #[error("invalid account id '{0}': expected 12 digits")]
    InvalidAccount(String),

    #[error("region is required")]
    MissingRegion,

    #[error("invalid region '{0}'")]
    InvalidRegion(String),

    #[error("a removal policy is required for every table")]
    MissingRemovalPolicy,

    #[error("invalid removal policy '{0}': expected 'retain' or 'destroy'")]
    InvalidRemovalPolicy(String),

    #[error("domain name is required when a custom domain is configured")]
    MissingDomainName,

    #[error("invalid domain name '{0}'")]
    InvalidDomainName(String),

    #[error("base URL is required when no domain name is configured")]
    MissingBaseUrl,

    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("invalid stack name '{0}'")]
    InvalidStackName(String),

    #[error("invalid stage name '{0}'")]
    InvalidStageName(String),

    #[error("invalid table prefix '{0}'")]
    InvalidTablePrefix(String),

    #[error("invalid route topology '{0}': expected 'proxy' or 'explicit'")]
    InvalidRouteTopology(String),

    #[error("function memory must be between 128 and 10240 MB, got {0}")]
    InvalidMemory(u32),

    #[error("function timeout must be between 1 and 900 seconds, got {0}")]
    InvalidTimeout(u32),

    #[error("throttling limits must be positive (rate {rate}, burst {burst})")]
    InvalidThrottle { rate: u32, burst: u32 },
}

/// Wiring errors in the resource graph. These are bugs in how resources are
/// composed and are reported at declaration time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("resource '{0}' is declared more than once")]
    DuplicateResource(LogicalId),

    #[error("'{resource}' references unknown resource '{missing}'")]
    UnknownReference {
        resource: LogicalId,
        missing: LogicalId,
    },

    #[error("resource '{0}' references itself")]
    SelfReference(LogicalId),

    #[error("dependency cycle: {}", format_cycle(.0))]
    Cycle(Vec<LogicalId>),
}

fn format_cycle(cycle: &[LogicalId]) -> String {
    cycle
        .iter()
        .map(LogicalId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Errors composing a stack.
#[derive(Debug, Error)]
pub enum StackError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Errors reading a previously synthesized template.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("malformed template: {0}")]
    MalformedTemplate(String),

    #[error("previous template has inconsistent dependencies: {0}")]
    Graph(#[from] GraphError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display_joins_path() {
        let err = GraphError::Cycle(vec![
            LogicalId::new("A"),
            LogicalId::new("B"),
            LogicalId::new("A"),
        ]);
        assert_eq!(err.to_string(), "dependency cycle: A -> B -> A");
    }

    #[test]
    fn test_stack_error_is_transparent() {
        let err: StackError = ConfigError::MissingAccount.into();
        assert_eq!(err.to_string(), "account is required");
    }
}
