//! Stack composition.
//!
//! [`compose`] is the single entry point: configuration in, validated stack
//! out. Provisioners run in dependency order and hand each other logical
//! IDs; nothing is looked up by name after the fact.

use crate::compute::provision_function;
use crate::config::StackConfig;
use crate::domain::provision_domain;
use crate::error::{GraphError, Result};
use crate::gateway::{provision_gateway, GatewaySettings};
use crate::graph::ResourceGraph;
use crate::resource::{LogicalId, Resource, ResourceKind, Value};
use crate::tables::provision_tables;

pub const API_URL_OUTPUT: &str = "ApiUrl";
pub const CUSTOM_DOMAIN_URL_OUTPUT: &str = "CustomDomainUrl";
pub const NAME_SERVERS_OUTPUT: &str = "NameServers";

pub const STACK_DESCRIPTION: &str = "TinyLinker URL shortener";

/// A named value published after deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackOutput {
    pub name: String,
    pub value: Value,
    pub description: String,
}

impl StackOutput {
    fn new(name: &str, value: Value, description: &str) -> Self {
        Self {
            name: name.to_string(),
            value,
            description: description.to_string(),
        }
    }
}

/// A composed stack: resources in declaration order plus their graph.
#[derive(Debug, Clone)]
pub struct Stack {
    name: String,
    description: String,
    account: String,
    region: String,
    resources: Vec<Resource>,
    graph: ResourceGraph,
    outputs: Vec<StackOutput>,
}

impl Stack {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Resources in declaration order.
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    pub fn outputs(&self) -> &[StackOutput] {
        &self.outputs
    }

    pub fn output(&self, name: &str) -> Option<&StackOutput> {
        self.outputs.iter().find(|o| o.name == name)
    }

    pub fn resource(&self, id: &LogicalId) -> Option<&Resource> {
        self.resources.iter().find(|r| &r.logical_id == id)
    }

    /// Resources in apply order.
    pub fn ordered_resources(&self) -> impl Iterator<Item = &Resource> {
        self.graph
            .apply_order()
            .iter()
            .filter_map(|id| self.resource(id))
    }

    pub fn resources_of(&self, kind: ResourceKind) -> impl Iterator<Item = &Resource> {
        self.resources.iter().filter(move |r| r.kind() == kind)
    }

    pub fn count(&self, kind: ResourceKind) -> usize {
        self.resources_of(kind).count()
    }
}

/// Composes the full stack from configuration.
///
/// # Errors
/// - `StackError::Config` if the configuration does not validate
/// - `StackError::Graph` if the declared resources do not form a DAG
pub fn compose(config: &StackConfig) -> Result<Stack> {
    let resolved = config.validate()?;

    let tables = provision_tables(&resolved.table_prefix, &resolved.removal_policies);
    let function = provision_function(
        &tables,
        &resolved.base_url,
        &resolved.stage_name,
        &resolved.function,
    );
    let gateway = provision_gateway(
        &function,
        &GatewaySettings {
            stage_name: resolved.stage_name.clone(),
            throttle: resolved.throttle,
            cors: resolved.cors.clone(),
            topology: resolved.routes,
        },
    );
    tracing::debug!(deployment = %gateway.deployment, "fingerprinted route tree");

    let mut outputs = vec![StackOutput::new(
        API_URL_OUTPUT,
        gateway.invoke_url(),
        "Invoke URL of the API stage",
    )];

    let mut resources = Vec::new();
    resources.extend(tables.resources);
    resources.extend(function.resources);

    let domain = resolved
        .domain_name
        .as_deref()
        .map(|name| provision_domain(name, &gateway));
    resources.extend(gateway.resources);

    if let Some(domain) = domain {
        outputs.push(StackOutput::new(
            CUSTOM_DOMAIN_URL_OUTPUT,
            Value::literal(domain.url()),
            "Public URL of the custom domain",
        ));
        outputs.push(StackOutput::new(
            NAME_SERVERS_OUTPUT,
            domain.name_servers(),
            "Name servers to delegate the domain to",
        ));
        resources.extend(domain.resources);
    }

    let graph = ResourceGraph::build(&resources)?;
    validate_outputs(&outputs, &graph)?;

    tracing::info!(
        stack = %resolved.stack_name,
        resources = resources.len(),
        domain = resolved.domain_name.as_deref().unwrap_or("-"),
        routes = %resolved.routes,
        "composed stack"
    );
    tracing::debug!(order = ?graph.apply_order(), "apply order");

    Ok(Stack {
        name: resolved.stack_name,
        description: STACK_DESCRIPTION.to_string(),
        account: resolved.account,
        region: resolved.region,
        resources,
        graph,
        outputs,
    })
}

fn validate_outputs(outputs: &[StackOutput], graph: &ResourceGraph) -> std::result::Result<(), GraphError> {
    for output in outputs {
        if let Some(missing) = output
            .value
            .references()
            .into_iter()
            .find(|id| !graph.contains(id))
        {
            return Err(GraphError::UnknownReference {
                resource: LogicalId::new(output.name.as_str()),
                missing,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, StackError};
    use crate::gateway::RouteTopology;
    use crate::resource::RemovalPolicy;
    use crate::tables::TableRemovalPolicies;

    fn config(domain: Option<&str>) -> StackConfig {
        StackConfig {
            account: Some("123456789012".to_string()),
            region: Some("us-west-2".to_string()),
            removal_policies: Some(TableRemovalPolicies::uniform(RemovalPolicy::Retain)),
            domain_name: domain.map(str::to_string),
            base_url: Some("https://short.example.org".to_string()),
            ..StackConfig::default()
        }
    }

    #[test]
    fn test_compose_without_domain() {
        let stack = compose(&config(None)).unwrap();
        assert_eq!(stack.name(), "TinyLinkerStack");
        assert_eq!(stack.count(ResourceKind::Table), 3);
        assert_eq!(stack.count(ResourceKind::Function), 1);
        assert_eq!(stack.count(ResourceKind::RestApi), 1);
        assert_eq!(stack.count(ResourceKind::HostedZone), 0);
        let names: Vec<&str> = stack.outputs().iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec![API_URL_OUTPUT]);
    }

    #[test]
    fn test_compose_with_domain() {
        let stack = compose(&config(Some("links.example.com"))).unwrap();
        for kind in [
            ResourceKind::HostedZone,
            ResourceKind::Certificate,
            ResourceKind::CustomDomain,
            ResourceKind::BasePathMapping,
            ResourceKind::AliasRecord,
        ] {
            assert_eq!(stack.count(kind), 1, "{kind:?}");
        }
        assert_eq!(
            stack.output(CUSTOM_DOMAIN_URL_OUTPUT).unwrap().value,
            Value::literal("https://links.example.com")
        );
        assert!(stack.output(NAME_SERVERS_OUTPUT).is_some());
    }

    #[test]
    fn test_every_resource_is_ordered() {
        let stack = compose(&config(Some("links.example.com"))).unwrap();
        assert_eq!(stack.ordered_resources().count(), stack.resources().len());
        let graph = stack.graph();
        for resource in stack.resources() {
            let position = graph.position(&resource.logical_id).unwrap();
            for dep in resource.dependencies() {
                assert!(graph.position(&dep).unwrap() < position);
            }
        }
    }

    #[test]
    fn test_function_after_tables_gateway_after_function() {
        let stack = compose(&config(None)).unwrap();
        let graph = stack.graph();
        let function = LogicalId::new(crate::compute::FUNCTION_ID);
        for table in stack.resources_of(ResourceKind::Table) {
            assert!(graph.depends_on(&function, &table.logical_id));
        }
        let stage = LogicalId::new(crate::gateway::STAGE_ID);
        assert!(graph.depends_on(&stage, &function));
    }

    #[test]
    fn test_explicit_routes() {
        let mut config = config(None);
        config.routes = RouteTopology::Explicit;
        let stack = compose(&config).unwrap();
        assert!(stack
            .resources()
            .iter()
            .any(|r| r.logical_id.as_str() == "TinyLinkerApiAnalyticsShortCodeGet"));
        assert!(!stack
            .resources()
            .iter()
            .any(|r| r.logical_id.as_str() == "TinyLinkerApiProxyAny"));
    }

    #[test]
    fn test_config_error_surfaces() {
        let mut config = config(None);
        config.removal_policies = None;
        assert!(matches!(
            compose(&config),
            Err(StackError::Config(ConfigError::MissingRemovalPolicy))
        ));
    }

    #[test]
    fn test_output_with_dangling_reference() {
        let graph = ResourceGraph::from_edges(Vec::new()).unwrap();
        let outputs = vec![StackOutput::new(
            "Broken",
            Value::reference(&LogicalId::new("Missing")),
            "",
        )];
        assert_eq!(
            validate_outputs(&outputs, &graph),
            Err(GraphError::UnknownReference {
                resource: LogicalId::new("Broken"),
                missing: LogicalId::new("Missing"),
            })
        );
    }
}
