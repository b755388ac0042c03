//! Resource model shared by every provisioner.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::compute::{FunctionConfig, PolicyConfig, RoleConfig};
use crate::domain::{
    AliasRecordConfig, BasePathMappingConfig, CertificateConfig, CustomDomainConfig,
    HostedZoneConfig,
};
use crate::error::ConfigError;
use crate::gateway::{
    ApiResourceConfig, DeploymentConfig, MethodConfig, PermissionConfig, RestApiConfig,
    StageConfig,
};
use crate::tables::TableConfig;

/// Stable identifier of a resource inside the stack template.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalId(String);

impl LogicalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LogicalId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// What happens to a resource when it leaves the stack.
///
/// There is deliberately no `Default`: stateful resources must pick one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalPolicy {
    Retain,
    Destroy,
}

impl RemovalPolicy {
    /// CloudFormation `DeletionPolicy` / `UpdateReplacePolicy` value.
    pub fn deletion_policy(self) -> &'static str {
        match self {
            RemovalPolicy::Retain => "Retain",
            RemovalPolicy::Destroy => "Delete",
        }
    }
}

impl FromStr for RemovalPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "retain" => Ok(RemovalPolicy::Retain),
            "destroy" => Ok(RemovalPolicy::Destroy),
            _ => Err(ConfigError::InvalidRemovalPolicy(s.to_string())),
        }
    }
}

impl fmt::Display for RemovalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemovalPolicy::Retain => f.write_str("retain"),
            RemovalPolicy::Destroy => f.write_str("destroy"),
        }
    }
}

/// A property value, possibly resolved only at deploy time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Literal(String),
    Number(u64),
    Bool(bool),
    /// `Ref` to another resource.
    Ref(LogicalId),
    /// `Fn::GetAtt` on another resource.
    Attribute {
        resource: LogicalId,
        attribute: String,
    },
    /// `Fn::Sub` template. Every `${Id}` / `${Id.Attr}` placeholder that
    /// names a resource must be listed in `references`.
    Sub {
        template: String,
        references: Vec<LogicalId>,
    },
    /// `Fn::Join` over a list-valued attribute.
    Join { delimiter: String, list: Box<Value> },
}

impl Value {
    pub fn literal(value: impl Into<String>) -> Self {
        Value::Literal(value.into())
    }

    pub fn reference(id: &LogicalId) -> Self {
        Value::Ref(id.clone())
    }

    pub fn attribute(id: &LogicalId, attribute: &str) -> Self {
        Value::Attribute {
            resource: id.clone(),
            attribute: attribute.to_string(),
        }
    }

    /// Builds an `Fn::Sub` value whose placeholders refer to `references`.
    pub fn sub(template: impl Into<String>, references: &[&LogicalId]) -> Self {
        Value::Sub {
            template: template.into(),
            references: references.iter().map(|id| (*id).clone()).collect(),
        }
    }

    pub fn join(delimiter: &str, list: Value) -> Self {
        Value::Join {
            delimiter: delimiter.to_string(),
            list: Box::new(list),
        }
    }

    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Value::Literal(s) => Some(s),
            _ => None,
        }
    }

    /// Resources this value cannot be resolved without.
    pub fn references(&self) -> Vec<LogicalId> {
        match self {
            Value::Literal(_) | Value::Number(_) | Value::Bool(_) => Vec::new(),
            Value::Ref(id) => vec![id.clone()],
            Value::Attribute { resource, .. } => vec![resource.clone()],
            Value::Sub { references, .. } => references.clone(),
            Value::Join { list, .. } => list.references(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Literal(s) => json!(s),
            Value::Number(n) => json!(n),
            Value::Bool(b) => json!(b),
            Value::Ref(id) => json!({ "Ref": id.as_str() }),
            Value::Attribute {
                resource,
                attribute,
            } => json!({ "Fn::GetAtt": [resource.as_str(), attribute] }),
            Value::Sub { template, .. } => json!({ "Fn::Sub": template }),
            Value::Join { delimiter, list } => json!({ "Fn::Join": [delimiter, list.to_json()] }),
        }
    }
}

/// Coarse classification of resources, used for counting and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    Table,
    Role,
    Policy,
    Function,
    RestApi,
    ApiResource,
    ApiMethod,
    ApiDeployment,
    ApiStage,
    InvokePermission,
    HostedZone,
    Certificate,
    CustomDomain,
    BasePathMapping,
    AliasRecord,
}

impl ResourceKind {
    /// CloudFormation resource type.
    pub fn cfn_type(self) -> &'static str {
        match self {
            ResourceKind::Table => "AWS::DynamoDB::Table",
            ResourceKind::Role => "AWS::IAM::Role",
            ResourceKind::Policy => "AWS::IAM::Policy",
            ResourceKind::Function => "AWS::Lambda::Function",
            ResourceKind::RestApi => "AWS::ApiGateway::RestApi",
            ResourceKind::ApiResource => "AWS::ApiGateway::Resource",
            ResourceKind::ApiMethod => "AWS::ApiGateway::Method",
            ResourceKind::ApiDeployment => "AWS::ApiGateway::Deployment",
            ResourceKind::ApiStage => "AWS::ApiGateway::Stage",
            ResourceKind::InvokePermission => "AWS::Lambda::Permission",
            ResourceKind::HostedZone => "AWS::Route53::HostedZone",
            ResourceKind::Certificate => "AWS::CertificateManager::Certificate",
            ResourceKind::CustomDomain => "AWS::ApiGateway::DomainName",
            ResourceKind::BasePathMapping => "AWS::ApiGateway::BasePathMapping",
            ResourceKind::AliasRecord => "AWS::Route53::RecordSet",
        }
    }

    /// Resources whose replacement loses data or delegation.
    pub fn is_stateful(self) -> bool {
        matches!(self, ResourceKind::Table | ResourceKind::HostedZone)
    }

    /// Properties whose change forces CloudFormation to replace the resource.
    pub fn replacement_properties(self) -> &'static [&'static str] {
        match self {
            ResourceKind::Table => &["KeySchema", "TableName"],
            ResourceKind::HostedZone => &["Name"],
            ResourceKind::Certificate => {
                &["DomainName", "ValidationMethod", "DomainValidationOptions"]
            }
            ResourceKind::CustomDomain => &["DomainName"],
            ResourceKind::ApiResource => &["ParentId", "PathPart", "RestApiId"],
            ResourceKind::ApiMethod => &["HttpMethod", "ResourceId", "RestApiId"],
            ResourceKind::AliasRecord => &["Name", "Type", "HostedZoneId"],
            _ => &[],
        }
    }

    pub fn from_cfn_type(cfn_type: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.cfn_type() == cfn_type)
    }

    pub const ALL: [ResourceKind; 15] = [
        ResourceKind::Table,
        ResourceKind::Role,
        ResourceKind::Policy,
        ResourceKind::Function,
        ResourceKind::RestApi,
        ResourceKind::ApiResource,
        ResourceKind::ApiMethod,
        ResourceKind::ApiDeployment,
        ResourceKind::ApiStage,
        ResourceKind::InvokePermission,
        ResourceKind::HostedZone,
        ResourceKind::Certificate,
        ResourceKind::CustomDomain,
        ResourceKind::BasePathMapping,
        ResourceKind::AliasRecord,
    ];
}

/// Behavior every typed resource declaration provides.
pub trait ResourceSpec {
    fn kind(&self) -> ResourceKind;

    /// Resources referenced from this declaration's properties.
    fn references(&self) -> Vec<LogicalId>;

    /// CloudFormation `Properties` block.
    fn render(&self) -> serde_json::Value;
}

/// Typed properties of every resource the stack can declare.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceProperties {
    Table(TableConfig),
    Role(RoleConfig),
    Policy(PolicyConfig),
    Function(FunctionConfig),
    RestApi(RestApiConfig),
    ApiResource(ApiResourceConfig),
    ApiMethod(MethodConfig),
    ApiDeployment(DeploymentConfig),
    ApiStage(StageConfig),
    InvokePermission(PermissionConfig),
    HostedZone(HostedZoneConfig),
    Certificate(CertificateConfig),
    CustomDomain(CustomDomainConfig),
    BasePathMapping(BasePathMappingConfig),
    AliasRecord(AliasRecordConfig),
}

impl ResourceProperties {
    fn spec(&self) -> &dyn ResourceSpec {
        match self {
            ResourceProperties::Table(p) => p,
            ResourceProperties::Role(p) => p,
            ResourceProperties::Policy(p) => p,
            ResourceProperties::Function(p) => p,
            ResourceProperties::RestApi(p) => p,
            ResourceProperties::ApiResource(p) => p,
            ResourceProperties::ApiMethod(p) => p,
            ResourceProperties::ApiDeployment(p) => p,
            ResourceProperties::ApiStage(p) => p,
            ResourceProperties::InvokePermission(p) => p,
            ResourceProperties::HostedZone(p) => p,
            ResourceProperties::Certificate(p) => p,
            ResourceProperties::CustomDomain(p) => p,
            ResourceProperties::BasePathMapping(p) => p,
            ResourceProperties::AliasRecord(p) => p,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.spec().kind()
    }

    pub fn references(&self) -> Vec<LogicalId> {
        self.spec().references()
    }

    pub fn render(&self) -> serde_json::Value {
        self.spec().render()
    }
}

/// A single declared resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub logical_id: LogicalId,
    pub properties: ResourceProperties,
    pub removal_policy: Option<RemovalPolicy>,
    /// Ordering edges not expressed by any property reference.
    pub depends_on: Vec<LogicalId>,
}

impl Resource {
    pub fn new(logical_id: impl Into<String>, properties: ResourceProperties) -> Self {
        Self {
            logical_id: LogicalId::new(logical_id),
            properties,
            removal_policy: None,
            depends_on: Vec::new(),
        }
    }

    pub fn with_removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.removal_policy = Some(policy);
        self
    }

    pub fn with_dependency(mut self, id: &LogicalId) -> Self {
        if !self.depends_on.contains(id) {
            self.depends_on.push(id.clone());
        }
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.properties.kind()
    }

    /// Everything this resource must be created after, sorted and deduplicated.
    pub fn dependencies(&self) -> Vec<LogicalId> {
        let all: BTreeSet<LogicalId> = self
            .properties
            .references()
            .into_iter()
            .chain(self.depends_on.iter().cloned())
            .collect();
        all.into_iter().collect()
    }
}

/// Converts a list of values into a JSON array.
pub(crate) fn json_list(values: &[Value]) -> serde_json::Value {
    serde_json::Value::Array(values.iter().map(Value::to_json).collect())
}

/// Collects references from several values.
pub(crate) fn references_of<'a>(values: impl IntoIterator<Item = &'a Value>) -> Vec<LogicalId> {
    values.into_iter().flat_map(Value::references).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removal_policy_parse() {
        assert_eq!("retain".parse::<RemovalPolicy>(), Ok(RemovalPolicy::Retain));
        assert_eq!("DESTROY".parse::<RemovalPolicy>(), Ok(RemovalPolicy::Destroy));
        assert_eq!(
            "keep".parse::<RemovalPolicy>(),
            Err(ConfigError::InvalidRemovalPolicy("keep".to_string()))
        );
    }

    #[test]
    fn test_removal_policy_deletion_policy() {
        assert_eq!(RemovalPolicy::Retain.deletion_policy(), "Retain");
        assert_eq!(RemovalPolicy::Destroy.deletion_policy(), "Delete");
    }

    #[test]
    fn test_value_to_json() {
        let table = LogicalId::new("UrlsTable");
        assert_eq!(Value::reference(&table).to_json(), json!({ "Ref": "UrlsTable" }));
        assert_eq!(
            Value::attribute(&table, "Arn").to_json(),
            json!({ "Fn::GetAtt": ["UrlsTable", "Arn"] })
        );
        assert_eq!(
            Value::sub("${UrlsTable.Arn}/index/*", &[&table]).to_json(),
            json!({ "Fn::Sub": "${UrlsTable.Arn}/index/*" })
        );
        assert_eq!(
            Value::join(",", Value::attribute(&table, "Names")).to_json(),
            json!({ "Fn::Join": [",", { "Fn::GetAtt": ["UrlsTable", "Names"] }] })
        );
    }

    #[test]
    fn test_value_references() {
        let zone = LogicalId::new("HostedZone");
        assert!(Value::literal("x").references().is_empty());
        assert_eq!(
            Value::join(",", Value::attribute(&zone, "NameServers")).references(),
            vec![zone]
        );
    }

    #[test]
    fn test_stateful_kinds() {
        assert!(ResourceKind::Table.is_stateful());
        assert!(ResourceKind::HostedZone.is_stateful());
        assert!(!ResourceKind::Function.is_stateful());
    }

    #[test]
    fn test_kind_from_cfn_type() {
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceKind::from_cfn_type(kind.cfn_type()), Some(kind));
        }
        assert_eq!(ResourceKind::from_cfn_type("AWS::S3::Bucket"), None);
    }
}
