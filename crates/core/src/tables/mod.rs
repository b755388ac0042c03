//! Table provisioning: the URLs, analytics and rate-limit tables.

pub mod live;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::resource::{LogicalId, RemovalPolicy, Resource, ResourceKind, ResourceProperties, ResourceSpec};

/// Item expiry attribute shared by every table.
pub const TTL_ATTRIBUTE: &str = "expiresAt";

/// Default prefix for physical table names.
pub const DEFAULT_TABLE_PREFIX: &str = "tinylinker";

pub const URLS_TABLE_ID: &str = "UrlsTable";
pub const ANALYTICS_TABLE_ID: &str = "AnalyticsTable";
pub const RATE_LIMITS_TABLE_ID: &str = "RateLimitsTable";

/// Table schema configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConfig {
    pub table_name: String,
    pub partition_key: KeyAttribute,
    pub sort_key: Option<KeyAttribute>,
    pub gsis: Vec<GsiConfig>,
    pub billing_mode: BillingMode,
    pub ttl_attribute: Option<String>,
    pub stream: Option<StreamViewType>,
    pub point_in_time_recovery: bool,
}

/// A key attribute definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyAttribute {
    pub name: String,
    pub attribute_type: AttributeType,
}

impl KeyAttribute {
    pub fn string(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attribute_type: AttributeType::String,
        }
    }

    pub fn number(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attribute_type: AttributeType::Number,
        }
    }
}

/// DynamoDB scalar attribute types used in keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    String,
    Number,
}

impl AttributeType {
    pub fn code(self) -> &'static str {
        match self {
            AttributeType::String => "S",
            AttributeType::Number => "N",
        }
    }
}

/// Global Secondary Index configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GsiConfig {
    pub name: String,
    pub partition_key: KeyAttribute,
    pub sort_key: Option<KeyAttribute>,
    pub projection: ProjectionType,
}

/// GSI projection type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionType {
    All,
    KeysOnly,
}

impl ProjectionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectionType::All => "ALL",
            ProjectionType::KeysOnly => "KEYS_ONLY",
        }
    }
}

/// Billing mode for the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingMode {
    PayPerRequest,
}

impl BillingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            BillingMode::PayPerRequest => "PAY_PER_REQUEST",
        }
    }
}

/// What a table stream record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamViewType {
    NewImage,
    OldImage,
    NewAndOldImages,
    KeysOnly,
}

impl StreamViewType {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamViewType::NewImage => "NEW_IMAGE",
            StreamViewType::OldImage => "OLD_IMAGE",
            StreamViewType::NewAndOldImages => "NEW_AND_OLD_IMAGES",
            StreamViewType::KeysOnly => "KEYS_ONLY",
        }
    }
}

/// The part of a table definition that cannot change without replacing
/// the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    pub partition_key: KeyAttribute,
    pub sort_key: Option<KeyAttribute>,
}

impl std::fmt::Display for KeySchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({})",
            self.partition_key.name,
            self.partition_key.attribute_type.code()
        )?;
        if let Some(sk) = &self.sort_key {
            write!(f, " / {} ({})", sk.name, sk.attribute_type.code())?;
        }
        Ok(())
    }
}

impl TableConfig {
    /// Sets the table name.
    pub fn with_table_name(mut self, name: &str) -> Self {
        self.table_name = name.to_string();
        self
    }

    pub fn key_schema(&self) -> KeySchema {
        KeySchema {
            partition_key: self.partition_key.clone(),
            sort_key: self.sort_key.clone(),
        }
    }

    /// Key attributes of the table and all its indexes, first definition wins.
    pub fn attribute_definitions(&self) -> Vec<KeyAttribute> {
        let mut definitions: Vec<KeyAttribute> = Vec::new();
        let keys = std::iter::once(&self.partition_key)
            .chain(self.sort_key.iter())
            .chain(
                self.gsis
                    .iter()
                    .flat_map(|gsi| std::iter::once(&gsi.partition_key).chain(gsi.sort_key.iter())),
            );
        for key in keys {
            if !definitions.iter().any(|d| d.name == key.name) {
                definitions.push(key.clone());
            }
        }
        definitions
    }
}

fn render_key_schema(partition_key: &KeyAttribute, sort_key: Option<&KeyAttribute>) -> serde_json::Value {
    let mut schema = vec![json!({ "AttributeName": partition_key.name, "KeyType": "HASH" })];
    if let Some(sk) = sort_key {
        schema.push(json!({ "AttributeName": sk.name, "KeyType": "RANGE" }));
    }
    serde_json::Value::Array(schema)
}

impl ResourceSpec for TableConfig {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Table
    }

    fn references(&self) -> Vec<LogicalId> {
        Vec::new()
    }

    fn render(&self) -> serde_json::Value {
        let attribute_definitions: Vec<_> = self
            .attribute_definitions()
            .iter()
            .map(|a| json!({ "AttributeName": a.name, "AttributeType": a.attribute_type.code() }))
            .collect();

        let mut props = json!({
            "TableName": self.table_name,
            "KeySchema": render_key_schema(&self.partition_key, self.sort_key.as_ref()),
            "AttributeDefinitions": attribute_definitions,
            "BillingMode": self.billing_mode.as_str(),
            "PointInTimeRecoverySpecification": {
                "PointInTimeRecoveryEnabled": self.point_in_time_recovery,
            },
        });

        if !self.gsis.is_empty() {
            let gsis: Vec<_> = self
                .gsis
                .iter()
                .map(|gsi| {
                    json!({
                        "IndexName": gsi.name,
                        "KeySchema": render_key_schema(&gsi.partition_key, gsi.sort_key.as_ref()),
                        "Projection": { "ProjectionType": gsi.projection.as_str() },
                    })
                })
                .collect();
            props["GlobalSecondaryIndexes"] = json!(gsis);
        }
        if let Some(ttl) = &self.ttl_attribute {
            props["TimeToLiveSpecification"] = json!({ "AttributeName": ttl, "Enabled": true });
        }
        if let Some(stream) = self.stream {
            props["StreamSpecification"] = json!({ "StreamViewType": stream.as_str() });
        }
        props
    }
}

/// Short links keyed by code, listable per user in creation order.
pub fn urls_table_config(prefix: &str) -> TableConfig {
    TableConfig {
        table_name: format!("{prefix}-urls"),
        partition_key: KeyAttribute::string("shortCode"),
        sort_key: None,
        gsis: vec![GsiConfig {
            name: "userId-createdAt-index".to_string(),
            partition_key: KeyAttribute::string("userId"),
            sort_key: Some(KeyAttribute::number("createdAt")),
            projection: ProjectionType::All,
        }],
        billing_mode: BillingMode::PayPerRequest,
        ttl_attribute: Some(TTL_ATTRIBUTE.to_string()),
        stream: None,
        point_in_time_recovery: false,
    }
}

/// One item per recorded visit, streamed to downstream consumers.
pub fn analytics_table_config(prefix: &str) -> TableConfig {
    TableConfig {
        table_name: format!("{prefix}-analytics"),
        partition_key: KeyAttribute::string("shortCode"),
        sort_key: Some(KeyAttribute::number("timestamp")),
        gsis: vec![GsiConfig {
            name: "shortCode-country-index".to_string(),
            partition_key: KeyAttribute::string("shortCode"),
            sort_key: Some(KeyAttribute::string("country")),
            projection: ProjectionType::KeysOnly,
        }],
        billing_mode: BillingMode::PayPerRequest,
        ttl_attribute: Some(TTL_ATTRIBUTE.to_string()),
        stream: Some(StreamViewType::NewImage),
        point_in_time_recovery: false,
    }
}

/// One counter bucket per identifier and time window.
pub fn rate_limits_table_config(prefix: &str) -> TableConfig {
    TableConfig {
        table_name: format!("{prefix}-rate-limits"),
        partition_key: KeyAttribute::string("identifier"),
        sort_key: Some(KeyAttribute::number("windowStart")),
        gsis: Vec::new(),
        billing_mode: BillingMode::PayPerRequest,
        ttl_attribute: Some(TTL_ATTRIBUTE.to_string()),
        stream: None,
        point_in_time_recovery: false,
    }
}

/// Removal policy for each table. Every field is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TableRemovalPolicies {
    pub urls: RemovalPolicy,
    pub analytics: RemovalPolicy,
    pub rate_limits: RemovalPolicy,
}

impl TableRemovalPolicies {
    pub fn uniform(policy: RemovalPolicy) -> Self {
        Self {
            urls: policy,
            analytics: policy,
            rate_limits: policy,
        }
    }
}

/// The provisioned tables and the handles downstream components wire to.
#[derive(Debug, Clone)]
pub struct Tables {
    pub urls: LogicalId,
    pub analytics: LogicalId,
    pub rate_limits: LogicalId,
    pub resources: Vec<Resource>,
}

impl Tables {
    pub fn ids(&self) -> [&LogicalId; 3] {
        [&self.urls, &self.analytics, &self.rate_limits]
    }
}

/// All three table definitions with their physical names, in declaration order.
pub fn table_configs(prefix: &str) -> [TableConfig; 3] {
    [
        urls_table_config(prefix),
        analytics_table_config(prefix),
        rate_limits_table_config(prefix),
    ]
}

/// Declares the three tables.
pub fn provision_tables(prefix: &str, policies: &TableRemovalPolicies) -> Tables {
    let [urls, analytics, rate_limits] = table_configs(prefix);

    let resources = vec![
        Resource::new(URLS_TABLE_ID, ResourceProperties::Table(urls))
            .with_removal_policy(policies.urls),
        Resource::new(ANALYTICS_TABLE_ID, ResourceProperties::Table(analytics))
            .with_removal_policy(policies.analytics),
        Resource::new(RATE_LIMITS_TABLE_ID, ResourceProperties::Table(rate_limits))
            .with_removal_policy(policies.rate_limits),
    ];

    tracing::debug!(prefix, ?policies, "declared tables");

    Tables {
        urls: LogicalId::new(URLS_TABLE_ID),
        analytics: LogicalId::new(ANALYTICS_TABLE_ID),
        rate_limits: LogicalId::new(RATE_LIMITS_TABLE_ID),
        resources,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table<'a>(tables: &'a Tables, id: &str) -> &'a TableConfig {
        let resource = tables
            .resources
            .iter()
            .find(|r| r.logical_id.as_str() == id)
            .unwrap();
        match &resource.properties {
            ResourceProperties::Table(config) => config,
            other => panic!("expected table, got {:?}", other.kind()),
        }
    }

    fn destroy_all() -> Tables {
        provision_tables(
            DEFAULT_TABLE_PREFIX,
            &TableRemovalPolicies::uniform(RemovalPolicy::Destroy),
        )
    }

    #[test]
    fn test_urls_table_schema() {
        let tables = destroy_all();
        let urls = table(&tables, URLS_TABLE_ID);
        assert_eq!(urls.table_name, "tinylinker-urls");
        assert_eq!(urls.partition_key, KeyAttribute::string("shortCode"));
        assert_eq!(urls.sort_key, None);
        assert_eq!(urls.gsis.len(), 1);
        assert_eq!(urls.gsis[0].partition_key, KeyAttribute::string("userId"));
        assert_eq!(urls.gsis[0].sort_key, Some(KeyAttribute::number("createdAt")));
        assert_eq!(urls.gsis[0].projection, ProjectionType::All);
        assert_eq!(urls.stream, None);
    }

    #[test]
    fn test_analytics_table_schema() {
        let tables = destroy_all();
        let analytics = table(&tables, ANALYTICS_TABLE_ID);
        assert_eq!(analytics.table_name, "tinylinker-analytics");
        assert_eq!(analytics.partition_key, KeyAttribute::string("shortCode"));
        assert_eq!(analytics.sort_key, Some(KeyAttribute::number("timestamp")));
        assert_eq!(analytics.gsis[0].sort_key, Some(KeyAttribute::string("country")));
        assert_eq!(analytics.gsis[0].projection, ProjectionType::KeysOnly);
        assert_eq!(analytics.stream, Some(StreamViewType::NewImage));
    }

    #[test]
    fn test_rate_limits_table_schema() {
        let tables = destroy_all();
        let limits = table(&tables, RATE_LIMITS_TABLE_ID);
        assert_eq!(limits.table_name, "tinylinker-rate-limits");
        assert_eq!(limits.partition_key, KeyAttribute::string("identifier"));
        assert_eq!(limits.sort_key, Some(KeyAttribute::number("windowStart")));
        assert!(limits.gsis.is_empty());
    }

    #[test]
    fn test_every_table_expires_and_bills_on_demand() {
        let tables = destroy_all();
        for id in tables.ids() {
            let config = table(&tables, id.as_str());
            assert_eq!(config.ttl_attribute.as_deref(), Some("expiresAt"));
            assert_eq!(config.billing_mode, BillingMode::PayPerRequest);
            assert!(!config.point_in_time_recovery);
        }
    }

    #[test]
    fn test_removal_policy_per_table() {
        let policies = TableRemovalPolicies {
            urls: RemovalPolicy::Retain,
            analytics: RemovalPolicy::Destroy,
            rate_limits: RemovalPolicy::Destroy,
        };
        let tables = provision_tables("tl", &policies);
        let policies: Vec<_> = tables.resources.iter().map(|r| r.removal_policy).collect();
        assert_eq!(
            policies,
            vec![
                Some(RemovalPolicy::Retain),
                Some(RemovalPolicy::Destroy),
                Some(RemovalPolicy::Destroy)
            ]
        );
        assert_eq!(table(&tables, URLS_TABLE_ID).table_name, "tl-urls");
    }

    #[test]
    fn test_attribute_definitions_are_deduplicated() {
        let analytics = analytics_table_config(DEFAULT_TABLE_PREFIX);
        let names: Vec<_> = analytics
            .attribute_definitions()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["shortCode", "timestamp", "country"]);
    }

    #[test]
    fn test_render_analytics_table() {
        let rendered = analytics_table_config(DEFAULT_TABLE_PREFIX).render();
        assert_eq!(
            rendered["KeySchema"],
            json!([
                { "AttributeName": "shortCode", "KeyType": "HASH" },
                { "AttributeName": "timestamp", "KeyType": "RANGE" },
            ])
        );
        assert_eq!(rendered["StreamSpecification"]["StreamViewType"], "NEW_IMAGE");
        assert_eq!(
            rendered["TimeToLiveSpecification"],
            json!({ "AttributeName": "expiresAt", "Enabled": true })
        );
        assert_eq!(
            rendered["GlobalSecondaryIndexes"][0]["Projection"]["ProjectionType"],
            "KEYS_ONLY"
        );
    }

    #[test]
    fn test_render_rate_limits_omits_indexes_and_stream() {
        let rendered = rate_limits_table_config(DEFAULT_TABLE_PREFIX).render();
        assert!(rendered.get("GlobalSecondaryIndexes").is_none());
        assert!(rendered.get("StreamSpecification").is_none());
    }

    #[test]
    fn test_key_schema_display() {
        let schema = analytics_table_config(DEFAULT_TABLE_PREFIX).key_schema();
        assert_eq!(schema.to_string(), "shortCode (S) / timestamp (N)");
    }
}
