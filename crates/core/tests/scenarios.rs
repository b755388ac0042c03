//! End-to-end composition scenarios.

use serde_json::json;
use tinylinker_core::compute::{ENVIRONMENT_KEYS, FUNCTION_ID};
use tinylinker_core::gateway::{RouteTopology, STAGE_ID};
use tinylinker_core::planning::{calculate_change_plan, calculate_destroy_plan, ChangeAction};
use tinylinker_core::stack::{API_URL_OUTPUT, CUSTOM_DOMAIN_URL_OUTPUT, NAME_SERVERS_OUTPUT};
use tinylinker_core::tables::TableRemovalPolicies;
use tinylinker_core::{
    compose, render_template, ConfigError, LogicalId, RemovalPolicy, ResourceKind,
    ResourceProperties, Stack, StackConfig, StackError, Value,
};

fn with_domain() -> StackConfig {
    StackConfig {
        account: Some("123456789012".to_string()),
        region: Some("us-west-2".to_string()),
        removal_policies: Some(TableRemovalPolicies::uniform(RemovalPolicy::Destroy)),
        domain_name: Some("links.example.com".to_string()),
        ..StackConfig::default()
    }
}

fn without_domain() -> StackConfig {
    StackConfig {
        domain_name: None,
        base_url: Some("https://abc123.execute-api.us-west-2.amazonaws.com/dev".to_string()),
        ..with_domain()
    }
}

fn position(stack: &Stack, id: &str) -> usize {
    stack
        .graph()
        .position(&LogicalId::new(id))
        .unwrap_or_else(|| panic!("{id} missing from apply order"))
}

#[test]
fn scenario_a_custom_domain() {
    let stack = compose(&with_domain()).unwrap();

    assert_eq!(stack.count(ResourceKind::Table), 3);
    assert_eq!(stack.count(ResourceKind::Function), 1);
    assert_eq!(stack.count(ResourceKind::RestApi), 1);
    assert_eq!(stack.count(ResourceKind::HostedZone), 1);
    assert_eq!(stack.count(ResourceKind::Certificate), 1);
    assert_eq!(stack.count(ResourceKind::CustomDomain), 1);
    assert_eq!(stack.count(ResourceKind::BasePathMapping), 1);
    assert_eq!(stack.count(ResourceKind::AliasRecord), 1);

    // Zone, then certificate, then domain, then mapping and alias.
    let zone = position(&stack, "HostedZone");
    let cert = position(&stack, "Certificate");
    let domain = position(&stack, "CustomDomain");
    assert!(zone < cert);
    assert!(cert < domain);
    assert!(domain < position(&stack, "CustomDomainBasePathMapping"));
    assert!(domain < position(&stack, "AliasRecord"));

    let template = render_template(&stack);
    let outputs = template["Outputs"].as_object().unwrap();
    assert_eq!(outputs.len(), 3);
    assert!(outputs.contains_key(API_URL_OUTPUT));
    assert_eq!(
        outputs[CUSTOM_DOMAIN_URL_OUTPUT]["Value"],
        "https://links.example.com"
    );
    assert_eq!(
        outputs[NAME_SERVERS_OUTPUT]["Value"],
        json!({ "Fn::Join": [",", { "Fn::GetAtt": ["HostedZone", "NameServers"] }] })
    );
}

#[test]
fn scenario_b_no_domain() {
    let stack = compose(&without_domain()).unwrap();

    for kind in [
        ResourceKind::HostedZone,
        ResourceKind::Certificate,
        ResourceKind::CustomDomain,
        ResourceKind::BasePathMapping,
        ResourceKind::AliasRecord,
    ] {
        assert_eq!(stack.count(kind), 0, "{kind:?}");
    }
    assert_eq!(stack.count(ResourceKind::Table), 3);

    let names: Vec<&str> = stack.outputs().iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, vec![API_URL_OUTPUT]);
}

#[test]
fn function_environment_and_grants() {
    let stack = compose(&with_domain()).unwrap();
    let function = stack.resource(&LogicalId::new(FUNCTION_ID)).unwrap();
    let ResourceProperties::Function(config) = &function.properties else {
        panic!("ApiHandler is not a function");
    };

    let mut keys: Vec<&str> = config.environment.keys().map(String::as_str).collect();
    keys.sort_unstable();
    let mut expected = ENVIRONMENT_KEYS.to_vec();
    expected.sort_unstable();
    assert_eq!(keys, expected);
    assert_eq!(
        config.environment["BASE_URL"],
        Value::literal("https://links.example.com")
    );

    let tables: Vec<&LogicalId> = stack
        .resources_of(ResourceKind::Table)
        .map(|r| &r.logical_id)
        .collect();
    assert_eq!(tables.len(), 3);
    for table in tables {
        assert!(config.grant_for(table).is_some(), "no grant on {table}");
        assert!(stack.graph().depends_on(&function.logical_id, table));
    }
}

#[test]
fn redeploying_unchanged_config_is_a_no_op() {
    let first = render_template(&compose(&with_domain()).unwrap());
    let second = render_template(&compose(&with_domain()).unwrap());
    assert_eq!(first, second);

    let plan = calculate_change_plan(Some(&first), &second).unwrap();
    assert!(plan.is_empty());
    assert!(!plan.requires_replacement());
}

#[test]
fn first_deploy_creates_every_resource() {
    let stack = compose(&with_domain()).unwrap();
    let template = render_template(&stack);
    let plan = calculate_change_plan(None, &template).unwrap();
    assert_eq!(plan.changes().len(), stack.resources().len());
    assert_eq!(plan.summary().create, stack.resources().len());
}

#[test]
fn partition_key_change_requires_replacement() {
    let desired = render_template(&compose(&with_domain()).unwrap());
    let mut previous = desired.clone();
    previous["Resources"]["UrlsTable"]["Properties"]["KeySchema"] =
        json!([{ "AttributeName": "code", "KeyType": "HASH" }]);

    let plan = calculate_change_plan(Some(&previous), &desired).unwrap();
    let change = plan.get("UrlsTable").unwrap();
    assert_eq!(
        change.action,
        ChangeAction::Replace {
            reasons: vec!["KeySchema".to_string()],
            data_loss: true,
        }
    );
    assert!(plan.requires_replacement());
    assert!(plan.data_loss());
}

fn deployment_id(stack: &Stack) -> String {
    stack
        .resources_of(ResourceKind::ApiDeployment)
        .next()
        .map(|r| r.logical_id.to_string())
        .unwrap()
}

#[test]
fn switching_route_topology_rolls_out_a_new_deployment() {
    let proxy = compose(&without_domain()).unwrap();
    let explicit = compose(&StackConfig {
        routes: RouteTopology::Explicit,
        ..without_domain()
    })
    .unwrap();

    let before = deployment_id(&proxy);
    let after = deployment_id(&explicit);
    assert_ne!(before, after);

    let plan =
        calculate_change_plan(Some(&render_template(&proxy)), &render_template(&explicit)).unwrap();
    assert_eq!(plan.get(&after).unwrap().action, ChangeAction::Create);
    assert_eq!(
        plan.get(&before).unwrap().action,
        ChangeAction::Delete { data_loss: false }
    );
    assert_eq!(
        plan.get(STAGE_ID).unwrap().action,
        ChangeAction::Update {
            changed: vec!["DeploymentId".to_string()]
        }
    );
    assert_eq!(
        plan.get("TinyLinkerApiShortCodeGet").unwrap().action,
        ChangeAction::Create
    );
    assert_eq!(
        plan.get("TinyLinkerApiProxyAny").unwrap().action,
        ChangeAction::Delete { data_loss: false }
    );
}

#[test]
fn cors_change_rolls_out_a_new_deployment() {
    let before = compose(&without_domain()).unwrap();
    let mut config = without_domain();
    config.cors.allow_headers.push("X-Request-Id".to_string());
    let after = compose(&config).unwrap();

    let plan =
        calculate_change_plan(Some(&render_template(&before)), &render_template(&after)).unwrap();
    assert_eq!(
        plan.get(&deployment_id(&after)).unwrap().action,
        ChangeAction::Create
    );
    assert!(matches!(
        plan.get("TinyLinkerApiRootOptions").unwrap().action,
        ChangeAction::Update { .. }
    ));
}

#[test]
fn dropping_the_domain_removes_dns_resources() {
    let previous = render_template(&compose(&with_domain()).unwrap());
    let desired = render_template(&compose(&StackConfig {
        domain_name: None,
        base_url: Some("https://links.example.com".to_string()),
        ..with_domain()
    })
    .unwrap());

    let plan = calculate_change_plan(Some(&previous), &desired).unwrap();
    assert_eq!(plan.summary().delete, 5);
    assert_eq!(
        plan.get("HostedZone").unwrap().action,
        ChangeAction::Delete { data_loss: true }
    );
    // Dependents go first.
    let order: Vec<&str> = plan
        .changes()
        .iter()
        .filter(|c| matches!(c.action, ChangeAction::Delete { .. }))
        .map(|c| c.logical_id.as_str())
        .collect();
    let alias = order.iter().position(|id| *id == "AliasRecord").unwrap();
    let zone = order.iter().position(|id| *id == "HostedZone").unwrap();
    assert!(alias < zone);
}

#[test]
fn retained_tables_survive_destroy() {
    let config = StackConfig {
        removal_policies: Some(TableRemovalPolicies {
            urls: RemovalPolicy::Retain,
            analytics: RemovalPolicy::Retain,
            rate_limits: RemovalPolicy::Destroy,
        }),
        ..with_domain()
    };
    let template = render_template(&compose(&config).unwrap());
    let plan = calculate_destroy_plan(&template).unwrap();

    assert_eq!(plan.get("UrlsTable").unwrap().action, ChangeAction::Retain);
    assert_eq!(plan.get("AnalyticsTable").unwrap().action, ChangeAction::Retain);
    assert_eq!(
        plan.get("RateLimitsTable").unwrap().action,
        ChangeAction::Delete { data_loss: true }
    );
    assert_eq!(plan.summary().retain, 2);
}

#[test]
fn missing_configuration_is_rejected() {
    let config = StackConfig {
        domain_name: Some(String::new()),
        ..with_domain()
    };
    assert!(matches!(
        compose(&config),
        Err(StackError::Config(ConfigError::MissingDomainName))
    ));

    let config = StackConfig {
        removal_policies: None,
        ..with_domain()
    };
    assert!(matches!(
        compose(&config),
        Err(StackError::Config(ConfigError::MissingRemovalPolicy))
    ));
}
