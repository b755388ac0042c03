//! Compute provisioning: the container-image function behind the API.

use std::collections::BTreeMap;

use serde_json::json;

use crate::config::ResolvedFunctionSettings;
use crate::resource::{
    json_list, references_of, LogicalId, Resource, ResourceKind, ResourceProperties, ResourceSpec,
    Value,
};
use crate::tables::Tables;

pub const FUNCTION_ID: &str = "ApiHandler";
pub const ROLE_ID: &str = "ApiHandlerServiceRole";
pub const POLICY_ID: &str = "ApiHandlerServiceRoleDefaultPolicy";

pub const URLS_TABLE_NAME_VAR: &str = "URLS_TABLE_NAME";
pub const ANALYTICS_TABLE_NAME_VAR: &str = "ANALYTICS_TABLE_NAME";
pub const RATE_LIMITS_TABLE_NAME_VAR: &str = "RATE_LIMITS_TABLE_NAME";
pub const BASE_URL_VAR: &str = "BASE_URL";
pub const STAGE_VAR: &str = "API_GATEWAY_STAGE";

/// The complete environment contract of the API handler.
pub const ENVIRONMENT_KEYS: [&str; 5] = [
    URLS_TABLE_NAME_VAR,
    ANALYTICS_TABLE_NAME_VAR,
    RATE_LIMITS_TABLE_NAME_VAR,
    BASE_URL_VAR,
    STAGE_VAR,
];

const READ_DATA_ACTIONS: &[&str] = &[
    "dynamodb:BatchGetItem",
    "dynamodb:GetRecords",
    "dynamodb:GetShardIterator",
    "dynamodb:Query",
    "dynamodb:GetItem",
    "dynamodb:Scan",
    "dynamodb:ConditionCheckItem",
];

const WRITE_DATA_ACTIONS: &[&str] = &[
    "dynamodb:BatchWriteItem",
    "dynamodb:PutItem",
    "dynamodb:UpdateItem",
    "dynamodb:DeleteItem",
];

const DESCRIBE_TABLE_ACTION: &str = "dynamodb:DescribeTable";

/// Level of data access granted on a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableAccess {
    ReadWrite,
}

impl TableAccess {
    pub fn actions(self) -> Vec<&'static str> {
        match self {
            TableAccess::ReadWrite => READ_DATA_ACTIONS
                .iter()
                .chain(WRITE_DATA_ACTIONS)
                .chain(std::iter::once(&DESCRIBE_TABLE_ACTION))
                .copied()
                .collect(),
        }
    }
}

/// Data access the function holds on one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableGrant {
    pub table: LogicalId,
    pub access: TableAccess,
}

impl TableGrant {
    fn statement(&self) -> PolicyStatement {
        PolicyStatement {
            actions: self.access.actions().into_iter().map(String::from).collect(),
            resources: vec![
                Value::attribute(&self.table, "Arn"),
                Value::sub(format!("${{{}.Arn}}/index/*", self.table), &[&self.table]),
            ],
        }
    }
}

/// Execution role assumed by the function.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleConfig {
    pub service_principal: String,
    pub managed_policy_arns: Vec<Value>,
}

impl ResourceSpec for RoleConfig {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Role
    }

    fn references(&self) -> Vec<LogicalId> {
        references_of(&self.managed_policy_arns)
    }

    fn render(&self) -> serde_json::Value {
        json!({
            "AssumeRolePolicyDocument": {
                "Version": "2012-10-17",
                "Statement": [{
                    "Action": "sts:AssumeRole",
                    "Effect": "Allow",
                    "Principal": { "Service": self.service_principal },
                }],
            },
            "ManagedPolicyArns": json_list(&self.managed_policy_arns),
        })
    }
}

/// One `Allow` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyStatement {
    pub actions: Vec<String>,
    pub resources: Vec<Value>,
}

/// Inline policy attached to the execution role.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyConfig {
    pub policy_name: String,
    pub role: LogicalId,
    pub statements: Vec<PolicyStatement>,
}

impl ResourceSpec for PolicyConfig {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Policy
    }

    fn references(&self) -> Vec<LogicalId> {
        let mut refs = vec![self.role.clone()];
        refs.extend(references_of(self.statements.iter().flat_map(|s| s.resources.iter())));
        refs
    }

    fn render(&self) -> serde_json::Value {
        let statements: Vec<_> = self
            .statements
            .iter()
            .map(|s| {
                json!({
                    "Action": s.actions,
                    "Effect": "Allow",
                    "Resource": json_list(&s.resources),
                })
            })
            .collect();
        json!({
            "PolicyName": self.policy_name,
            "Roles": [Value::reference(&self.role).to_json()],
            "PolicyDocument": {
                "Version": "2012-10-17",
                "Statement": statements,
            },
        })
    }
}

/// The container-image function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionConfig {
    pub image_uri: String,
    pub memory_mb: u32,
    pub timeout_secs: u32,
    pub environment: BTreeMap<String, Value>,
    pub role: LogicalId,
    /// Rendered through the role's policy, kept here for inspection.
    pub grants: Vec<TableGrant>,
}

impl FunctionConfig {
    pub fn grant_for(&self, table: &LogicalId) -> Option<&TableGrant> {
        self.grants.iter().find(|g| &g.table == table)
    }
}

impl ResourceSpec for FunctionConfig {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Function
    }

    fn references(&self) -> Vec<LogicalId> {
        let mut refs = vec![self.role.clone()];
        refs.extend(references_of(self.environment.values()));
        refs
    }

    fn render(&self) -> serde_json::Value {
        let variables: serde_json::Map<String, serde_json::Value> = self
            .environment
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        json!({
            "PackageType": "Image",
            "Code": { "ImageUri": self.image_uri },
            "Role": Value::attribute(&self.role, "Arn").to_json(),
            "MemorySize": self.memory_mb,
            "Timeout": self.timeout_secs,
            "Environment": { "Variables": variables },
        })
    }
}

/// The provisioned function and its supporting IAM resources.
#[derive(Debug, Clone)]
pub struct ApiFunction {
    pub function: LogicalId,
    pub role: LogicalId,
    pub policy: LogicalId,
    pub resources: Vec<Resource>,
}

/// Declares the function, its role and the read/write grants on every table.
pub fn provision_function(
    tables: &Tables,
    base_url: &str,
    stage_name: &str,
    settings: &ResolvedFunctionSettings,
) -> ApiFunction {
    let role = LogicalId::new(ROLE_ID);
    let policy = LogicalId::new(POLICY_ID);

    let environment = BTreeMap::from([
        (URLS_TABLE_NAME_VAR.to_string(), Value::reference(&tables.urls)),
        (
            ANALYTICS_TABLE_NAME_VAR.to_string(),
            Value::reference(&tables.analytics),
        ),
        (
            RATE_LIMITS_TABLE_NAME_VAR.to_string(),
            Value::reference(&tables.rate_limits),
        ),
        (BASE_URL_VAR.to_string(), Value::literal(base_url)),
        (STAGE_VAR.to_string(), Value::literal(stage_name)),
    ]);

    let grants: Vec<TableGrant> = tables
        .ids()
        .into_iter()
        .map(|table| TableGrant {
            table: table.clone(),
            access: TableAccess::ReadWrite,
        })
        .collect();

    let role_resource = Resource::new(
        ROLE_ID,
        ResourceProperties::Role(RoleConfig {
            service_principal: "lambda.amazonaws.com".to_string(),
            managed_policy_arns: vec![Value::sub(
                "arn:${AWS::Partition}:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole",
                &[],
            )],
        }),
    );

    let policy_resource = Resource::new(
        POLICY_ID,
        ResourceProperties::Policy(PolicyConfig {
            policy_name: POLICY_ID.to_string(),
            role: role.clone(),
            statements: grants.iter().map(TableGrant::statement).collect(),
        }),
    );

    // The policy must be attached before the function can use its grants.
    let function_resource = Resource::new(
        FUNCTION_ID,
        ResourceProperties::Function(FunctionConfig {
            image_uri: settings.image_uri.clone(),
            memory_mb: settings.memory_mb,
            timeout_secs: settings.timeout_secs,
            environment,
            role: role.clone(),
            grants,
        }),
    )
    .with_dependency(&policy);

    tracing::debug!(image = %settings.image_uri, base_url, stage_name, "declared api function");

    ApiFunction {
        function: LogicalId::new(FUNCTION_ID),
        role,
        policy,
        resources: vec![role_resource, policy_resource, function_resource],
    }
}
