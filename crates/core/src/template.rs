//! CloudFormation template rendering.

use serde_json::{json, Map};

use crate::resource::Resource;
use crate::stack::Stack;

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

/// Renders the stack as a CloudFormation template.
///
/// Objects are backed by sorted maps, so equal stacks render identical JSON.
pub fn render_template(stack: &Stack) -> serde_json::Value {
    let mut resources = Map::new();
    for resource in stack.resources() {
        resources.insert(resource.logical_id.to_string(), render_resource(resource));
    }

    let mut outputs = Map::new();
    for output in stack.outputs() {
        outputs.insert(
            output.name.clone(),
            json!({
                "Description": output.description,
                "Value": output.value.to_json(),
            }),
        );
    }

    let mut template = json!({
        "AWSTemplateFormatVersion": TEMPLATE_FORMAT_VERSION,
        "Description": stack.description(),
        "Resources": resources,
    });
    if !outputs.is_empty() {
        template["Outputs"] = serde_json::Value::Object(outputs);
    }
    template
}

/// Pretty-printed template with a trailing newline.
pub fn render_template_string(stack: &Stack) -> Result<String, serde_json::Error> {
    let mut rendered = serde_json::to_string_pretty(&render_template(stack))?;
    rendered.push('\n');
    Ok(rendered)
}

fn render_resource(resource: &Resource) -> serde_json::Value {
    let mut rendered = json!({
        "Type": resource.kind().cfn_type(),
        "Properties": resource.properties.render(),
    });

    // Property references are implied by Ref/GetAtt/Sub; only explicit
    // ordering edges need DependsOn.
    if !resource.depends_on.is_empty() {
        let mut depends_on: Vec<&str> = resource.depends_on.iter().map(|id| id.as_str()).collect();
        depends_on.sort_unstable();
        rendered["DependsOn"] = json!(depends_on);
    }

    if let Some(policy) = resource.removal_policy {
        rendered["DeletionPolicy"] = json!(policy.deletion_policy());
        rendered["UpdateReplacePolicy"] = json!(policy.deletion_policy());
    }

    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StackConfig;
    use crate::resource::RemovalPolicy;
    use crate::stack::compose;
    use crate::tables::TableRemovalPolicies;

    fn stack(domain: Option<&str>) -> Stack {
        compose(&StackConfig {
            account: Some("123456789012".to_string()),
            region: Some("us-west-2".to_string()),
            removal_policies: Some(TableRemovalPolicies {
                urls: RemovalPolicy::Retain,
                analytics: RemovalPolicy::Destroy,
                rate_limits: RemovalPolicy::Destroy,
            }),
            domain_name: domain.map(str::to_string),
            base_url: Some("https://short.example.org".to_string()),
            ..StackConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_template_header() {
        let template = render_template(&stack(None));
        assert_eq!(template["AWSTemplateFormatVersion"], "2010-09-09");
        assert_eq!(template["Description"], "TinyLinker URL shortener");
        assert!(template["Outputs"]["ApiUrl"]["Value"]["Fn::Sub"].is_string());
    }

    #[test]
    fn test_removal_policies_render() {
        let template = render_template(&stack(None));
        let resources = &template["Resources"];
        assert_eq!(resources["UrlsTable"]["DeletionPolicy"], "Retain");
        assert_eq!(resources["UrlsTable"]["UpdateReplacePolicy"], "Retain");
        assert_eq!(resources["AnalyticsTable"]["DeletionPolicy"], "Delete");
        assert!(resources["ApiHandler"].get("DeletionPolicy").is_none());
    }

    #[test]
    fn test_resource_types() {
        let template = render_template(&stack(Some("links.example.com")));
        let resources = &template["Resources"];
        assert_eq!(resources["UrlsTable"]["Type"], "AWS::DynamoDB::Table");
        assert_eq!(resources["ApiHandler"]["Type"], "AWS::Lambda::Function");
        assert_eq!(resources["HostedZone"]["Type"], "AWS::Route53::HostedZone");
        assert_eq!(resources["AliasRecord"]["Type"], "AWS::Route53::RecordSet");
    }

    #[test]
    fn test_explicit_dependencies_render_sorted() {
        let template = render_template(&stack(None));
        let deployment = template["Resources"]
            .as_object()
            .unwrap()
            .values()
            .find(|r| r["Type"] == "AWS::ApiGateway::Deployment")
            .unwrap();
        let depends_on = deployment["DependsOn"].as_array().unwrap();
        let names: Vec<&str> = depends_on.iter().filter_map(|v| v.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
        assert!(names.contains(&"TinyLinkerApiProxyAny"));
        assert!(template["Resources"]["UrlsTable"].get("DependsOn").is_none());
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let first = render_template_string(&stack(Some("links.example.com"))).unwrap();
        let second = render_template_string(&stack(Some("links.example.com"))).unwrap();
        assert_eq!(first, second);
        assert!(first.ends_with('\n'));
    }
}
