//! Deployment configuration.
//!
//! [`StackConfig`] is what users write (JSON file and/or CLI flags); every
//! field that identifies target infrastructure is optional there so sources
//! can be merged. [`StackConfig::validate`] turns it into a
//! [`ResolvedConfig`] or a [`ConfigError`] before anything is declared.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::gateway::{CorsPolicy, RouteTopology, ThrottleSettings};
use crate::tables::{TableRemovalPolicies, DEFAULT_TABLE_PREFIX};

pub const DEFAULT_STACK_NAME: &str = "TinyLinkerStack";
pub const DEFAULT_STAGE_NAME: &str = "dev";
pub const DEFAULT_IMAGE_REPOSITORY: &str = "tinylinker-api";

/// Function sizing and image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FunctionSettings {
    /// Full image URI. Defaults to the `tinylinker-api:latest` repository
    /// in the target account's registry.
    #[serde(default)]
    pub image_uri: Option<String>,
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u32,
}

fn default_memory_mb() -> u32 {
    512
}

fn default_timeout_secs() -> u32 {
    30
}

impl Default for FunctionSettings {
    fn default() -> Self {
        Self {
            image_uri: None,
            memory_mb: default_memory_mb(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Function settings with the image URI resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFunctionSettings {
    pub image_uri: String,
    pub memory_mb: u32,
    pub timeout_secs: u32,
}

/// User-facing stack configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StackConfig {
    #[serde(default = "default_stack_name")]
    pub stack_name: String,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub removal_policies: Option<TableRemovalPolicies>,
    /// Enables the custom domain when present.
    #[serde(default)]
    pub domain_name: Option<String>,
    /// Public base URL handed to the function. Defaults to
    /// `https://{domain_name}`.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_stage_name")]
    pub stage_name: String,
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,
    #[serde(default)]
    pub routes: RouteTopology,
    #[serde(default)]
    pub throttle: ThrottleSettings,
    #[serde(default)]
    pub cors: CorsPolicy,
    #[serde(default)]
    pub function: FunctionSettings,
}

fn default_stack_name() -> String {
    DEFAULT_STACK_NAME.to_string()
}

fn default_stage_name() -> String {
    DEFAULT_STAGE_NAME.to_string()
}

fn default_table_prefix() -> String {
    DEFAULT_TABLE_PREFIX.to_string()
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            stack_name: default_stack_name(),
            account: None,
            region: None,
            removal_policies: None,
            domain_name: None,
            base_url: None,
            stage_name: default_stage_name(),
            table_prefix: default_table_prefix(),
            routes: RouteTopology::default(),
            throttle: ThrottleSettings::default(),
            cors: CorsPolicy::default(),
            function: FunctionSettings::default(),
        }
    }
}

/// A configuration that passed validation. Only [`StackConfig::validate`]
/// builds one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub stack_name: String,
    pub account: String,
    pub region: String,
    pub removal_policies: TableRemovalPolicies,
    pub domain_name: Option<String>,
    pub base_url: String,
    pub stage_name: String,
    pub table_prefix: String,
    pub routes: RouteTopology,
    pub throttle: ThrottleSettings,
    pub cors: CorsPolicy,
    pub function: ResolvedFunctionSettings,
}

impl StackConfig {
    /// Parses a JSON configuration document.
    pub fn from_json(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }

    /// Checks every field and resolves derived values.
    pub fn validate(&self) -> Result<ResolvedConfig, ConfigError> {
        if !is_valid_stack_name(&self.stack_name) {
            return Err(ConfigError::InvalidStackName(self.stack_name.clone()));
        }

        let account = self.account.as_deref().ok_or(ConfigError::MissingAccount)?;
        if account.len() != 12 || !account.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigError::InvalidAccount(account.to_string()));
        }

        let region = self.region.as_deref().ok_or(ConfigError::MissingRegion)?;
        if !is_valid_region(region) {
            return Err(ConfigError::InvalidRegion(region.to_string()));
        }

        let removal_policies = self
            .removal_policies
            .ok_or(ConfigError::MissingRemovalPolicy)?;

        let domain_name = match self.domain_name.as_deref().map(str::trim) {
            None => None,
            Some("") => return Err(ConfigError::MissingDomainName),
            Some(name) => {
                let name = name.trim_end_matches('.').to_ascii_lowercase();
                if !is_valid_domain_name(&name) {
                    return Err(ConfigError::InvalidDomainName(name));
                }
                Some(name)
            }
        };

        let base_url = match (&self.base_url, &domain_name) {
            (Some(url), _) => validate_base_url(url)?,
            (None, Some(domain)) => format!("https://{domain}"),
            (None, None) => return Err(ConfigError::MissingBaseUrl),
        };

        if self.stage_name.is_empty()
            || !self
                .stage_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConfigError::InvalidStageName(self.stage_name.clone()));
        }

        if !is_valid_table_prefix(&self.table_prefix) {
            return Err(ConfigError::InvalidTablePrefix(self.table_prefix.clone()));
        }

        if self.throttle.rate_limit == 0 || self.throttle.burst_limit == 0 {
            return Err(ConfigError::InvalidThrottle {
                rate: self.throttle.rate_limit,
                burst: self.throttle.burst_limit,
            });
        }

        let function = &self.function;
        if !(128..=10_240).contains(&function.memory_mb) {
            return Err(ConfigError::InvalidMemory(function.memory_mb));
        }
        if !(1..=900).contains(&function.timeout_secs) {
            return Err(ConfigError::InvalidTimeout(function.timeout_secs));
        }
        let image_uri = function.image_uri.clone().unwrap_or_else(|| {
            format!("{account}.dkr.ecr.{region}.amazonaws.com/{DEFAULT_IMAGE_REPOSITORY}:latest")
        });

        Ok(ResolvedConfig {
            stack_name: self.stack_name.clone(),
            account: account.to_string(),
            region: region.to_string(),
            removal_policies,
            domain_name,
            base_url,
            stage_name: self.stage_name.clone(),
            table_prefix: self.table_prefix.clone(),
            routes: self.routes,
            throttle: self.throttle,
            cors: self.cors.clone(),
            function: ResolvedFunctionSettings {
                image_uri,
                memory_mb: function.memory_mb,
                timeout_secs: function.timeout_secs,
            },
        })
    }
}

fn is_valid_stack_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && name.len() <= 128
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// e.g. `us-west-2`, `ap-southeast-1`, `us-gov-east-1`.
fn is_valid_region(region: &str) -> bool {
    let parts: Vec<&str> = region.split('-').collect();
    parts.len() >= 3
        && parts[0].len() == 2
        && parts[..parts.len() - 1]
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_lowercase()))
        && parts[parts.len() - 1]
            .parse::<u8>()
            .is_ok()
}

fn is_valid_domain_name(name: &str) -> bool {
    let labels: Vec<&str> = name.split('.').collect();
    name.len() <= 253
        && labels.len() >= 2
        && labels.iter().all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

fn is_valid_table_prefix(prefix: &str) -> bool {
    // Leaves room for the longest suffix ("-rate-limits") within 255.
    !prefix.is_empty()
        && prefix.len() <= 200
        && prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn validate_base_url(raw: &str) -> Result<String, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidBaseUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };
    let url = url::Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host"));
    }
    Ok(raw.trim_end_matches('/').to_string())
}
