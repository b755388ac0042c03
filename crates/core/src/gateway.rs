//! Gateway provisioning: the REST API in front of the function.
//!
//! Exactly one [`RouteTopology`] is used per stack. The catch-all proxy
//! hands every request to the function untouched; the explicit table only
//! exposes the three endpoints the handler implements and binds each with
//! a non-proxy integration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::compute::ApiFunction;
use crate::error::ConfigError;
use crate::resource::{LogicalId, Resource, ResourceKind, ResourceProperties, ResourceSpec, Value};

pub const REST_API_ID: &str = "TinyLinkerApi";
/// Prefix of the deployment's logical id; the suffix fingerprints the
/// route tree so every change to it rolls out a new deployment.
pub const DEPLOYMENT_ID_PREFIX: &str = "TinyLinkerApiDeployment";
pub const STAGE_ID: &str = "TinyLinkerApiDeploymentStage";
pub const PERMISSION_ID: &str = "TinyLinkerApiInvokePermission";

pub const REST_API_NAME: &str = "TinyLinker API";
pub const REST_API_DESCRIPTION: &str = "URL shortener with analytics";

/// Status code the non-proxy methods use for redirects.
pub const REDIRECT_STATUS: &str = "302";

/// Every status a non-proxy method can answer with.
const EXPLICIT_STATUS_CODES: [&str; 6] = ["200", "201", REDIRECT_STATUS, "400", "404", "500"];

const FINGERPRINT_LEN: usize = 8;

/// Request mapping shared by every non-proxy method. The function receives
/// the same event a proxy integration would hand it.
const REQUEST_HEADERS_TEMPLATE: &str = r##""headers":{#foreach($name in $input.params().header.keySet())"$name":"$util.escapeJavaScript($input.params().header.get($name))"#if($foreach.hasNext),#end#end},"queryStringParameters":{#foreach($name in $input.params().querystring.keySet())"$name":"$util.escapeJavaScript($input.params().querystring.get($name))"#if($foreach.hasNext),#end#end},"body":"$util.escapeJavaScript($input.body).replaceAll("\\'","'")","isBase64Encoded":false,"requestContext":{"stage":"$context.stage","requestId":"$context.requestId","identity":{"sourceIp":"$context.identity.sourceIp","userAgent":"$util.escapeJavaScript($context.identity.userAgent)"}}"##;

/// Unwraps the function's `{statusCode, headers, body}` result into the
/// method response.
const RESPONSE_TEMPLATE: &str = r#"#set($response = $input.path('$'))
#set($context.responseOverride.status = $response.statusCode)
#if($response.headers.location)#set($context.responseOverride.header.Location = $response.headers.location)#end
$response.body"#;

/// Steady-state and burst request limits applied to every method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ThrottleSettings {
    /// Requests per second.
    pub rate_limit: u32,
    /// Burst capacity.
    pub burst_limit: u32,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            rate_limit: 50,
            burst_limit: 100,
        }
    }
}

/// CORS preflight policy answered on every path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CorsPolicy {
    pub allow_origins: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    pub allow_credentials: bool,
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self {
            allow_origins: vec!["*".to_string()],
            allow_methods: ["OPTIONS", "GET", "PUT", "POST", "DELETE", "PATCH", "HEAD"]
                .map(String::from)
                .to_vec(),
            allow_headers: [
                "Content-Type",
                "X-Amz-Date",
                "Authorization",
                "X-Api-Key",
                "X-Amz-Security-Token",
                "X-Amz-User-Agent",
            ]
            .map(String::from)
            .to_vec(),
            allow_credentials: true,
        }
    }
}

impl CorsPolicy {
    /// Response header mappings for the mock preflight integration.
    ///
    /// With several allowed origins only the first one is echoed; a mock
    /// integration cannot pick the origin per request.
    fn response_parameters(&self) -> serde_json::Map<String, serde_json::Value> {
        let origin = self.allow_origins.first().map(String::as_str).unwrap_or("*");
        let mut params = serde_json::Map::new();
        params.insert(
            "method.response.header.Access-Control-Allow-Headers".to_string(),
            json!(format!("'{}'", self.allow_headers.join(","))),
        );
        params.insert(
            "method.response.header.Access-Control-Allow-Origin".to_string(),
            json!(format!("'{}'", origin)),
        );
        params.insert(
            "method.response.header.Access-Control-Allow-Methods".to_string(),
            json!(format!("'{}'", self.allow_methods.join(","))),
        );
        if self.allow_credentials {
            params.insert(
                "method.response.header.Access-Control-Allow-Credentials".to_string(),
                json!("'true'"),
            );
        }
        params
    }
}

/// Which route surface the API exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteTopology {
    /// `ANY /{proxy+}` forwarded as-is.
    #[default]
    Proxy,
    /// `POST /shorten`, `GET /{shortCode}`, `GET /analytics/{shortCode}`.
    Explicit,
}

impl RouteTopology {
    pub fn routes(self) -> Vec<Route> {
        match self {
            RouteTopology::Proxy => vec![Route::new(HttpMethod::Any, "/{proxy+}")],
            RouteTopology::Explicit => vec![
                Route::new(HttpMethod::Post, "/shorten"),
                Route::new(HttpMethod::Get, "/{shortCode}"),
                Route::new(HttpMethod::Get, "/analytics/{shortCode}"),
            ],
        }
    }

    fn integration(self, function: &LogicalId) -> Integration {
        match self {
            RouteTopology::Proxy => Integration::LambdaProxy {
                function: function.clone(),
            },
            RouteTopology::Explicit => Integration::Lambda {
                function: function.clone(),
            },
        }
    }
}

impl FromStr for RouteTopology {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "proxy" => Ok(RouteTopology::Proxy),
            "explicit" => Ok(RouteTopology::Explicit),
            _ => Err(ConfigError::InvalidRouteTopology(s.to_string())),
        }
    }
}

impl fmt::Display for RouteTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteTopology::Proxy => f.write_str("proxy"),
            RouteTopology::Explicit => f.write_str("explicit"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HttpMethod {
    Any,
    Get,
    Post,
    Options,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Any => "ANY",
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

/// A client-facing route.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Route {
    pub method: HttpMethod,
    pub path: String,
}

impl Route {
    pub fn new(method: HttpMethod, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method.as_str(), self.path)
    }
}

/// Where a path resource or method hangs in the resource tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentResource {
    Root,
    Resource(LogicalId),
}

impl ParentResource {
    fn id_value(&self, rest_api: &LogicalId) -> Value {
        match self {
            ParentResource::Root => Value::attribute(rest_api, "RootResourceId"),
            ParentResource::Resource(id) => Value::reference(id),
        }
    }
}

/// How a method reaches its backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Integration {
    /// `AWS_PROXY`: the function receives the raw request.
    LambdaProxy { function: LogicalId },
    /// `AWS`: direct, non-proxy invocation.
    Lambda { function: LogicalId },
    /// `MOCK` preflight answering CORS headers.
    CorsPreflight(CorsPolicy),
}

impl Integration {
    pub fn function(&self) -> Option<&LogicalId> {
        match self {
            Integration::LambdaProxy { function } | Integration::Lambda { function } => {
                Some(function)
            }
            Integration::CorsPreflight(_) => None,
        }
    }
}

fn invocation_uri(function: &LogicalId) -> Value {
    Value::sub(
        format!(
            "arn:${{AWS::Partition}}:apigateway:${{AWS::Region}}:lambda:path/2015-03-31/functions/${{{}.Arn}}/invocations",
            function
        ),
        &[function],
    )
}

fn path_parameter(name: &str) -> String {
    format!("$util.escapeJavaScript($input.params('{name}'))")
}

/// `application/json` mapping template for a non-proxy method on `path`.
fn request_template(method: HttpMethod, path: &str, params: &[&str]) -> String {
    let mut concrete_path = path.to_string();
    for name in params {
        concrete_path = concrete_path.replace(&format!("{{{name}}}"), &path_parameter(name));
    }
    let path_parameters = if params.is_empty() {
        "null".to_string()
    } else {
        let pairs: Vec<String> = params
            .iter()
            .map(|name| format!("\"{name}\":\"{}\"", path_parameter(name)))
            .collect();
        format!("{{{}}}", pairs.join(","))
    };

    format!(
        "{{\"httpMethod\":\"{}\",\"resource\":\"{}\",\"path\":\"{}\",\"pathParameters\":{},{}}}",
        method.as_str(),
        path,
        concrete_path,
        path_parameters,
        REQUEST_HEADERS_TEMPLATE
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestApiConfig {
    pub name: String,
    pub description: String,
}

impl ResourceSpec for RestApiConfig {
    fn kind(&self) -> ResourceKind {
        ResourceKind::RestApi
    }

    fn references(&self) -> Vec<LogicalId> {
        Vec::new()
    }

    fn render(&self) -> serde_json::Value {
        json!({ "Name": self.name, "Description": self.description })
    }
}

/// A path segment in the resource tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResourceConfig {
    pub rest_api: LogicalId,
    pub parent: ParentResource,
    pub path_part: String,
}

impl ResourceSpec for ApiResourceConfig {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ApiResource
    }

    fn references(&self) -> Vec<LogicalId> {
        let mut refs = vec![self.rest_api.clone()];
        refs.extend(self.parent.id_value(&self.rest_api).references());
        refs
    }

    fn render(&self) -> serde_json::Value {
        json!({
            "RestApiId": Value::reference(&self.rest_api).to_json(),
            "ParentId": self.parent.id_value(&self.rest_api).to_json(),
            "PathPart": self.path_part,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodConfig {
    pub rest_api: LogicalId,
    pub resource: ParentResource,
    /// Full path of the resource, e.g. `/analytics/{shortCode}`.
    pub path: String,
    pub http_method: HttpMethod,
    pub integration: Integration,
}

impl MethodConfig {
    fn path_parameters(&self) -> Vec<&str> {
        self.path
            .split('/')
            .filter_map(|seg| seg.strip_prefix('{')?.strip_suffix('}'))
            .filter(|name| !name.ends_with('+'))
            .collect()
    }
}

impl ResourceSpec for MethodConfig {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ApiMethod
    }

    fn references(&self) -> Vec<LogicalId> {
        let mut refs = vec![self.rest_api.clone()];
        refs.extend(self.resource.id_value(&self.rest_api).references());
        if let Some(function) = self.integration.function() {
            refs.push(function.clone());
        }
        refs
    }

    fn render(&self) -> serde_json::Value {
        let mut props = json!({
            "RestApiId": Value::reference(&self.rest_api).to_json(),
            "ResourceId": self.resource.id_value(&self.rest_api).to_json(),
            "HttpMethod": self.http_method.as_str(),
            "AuthorizationType": "NONE",
        });

        match &self.integration {
            Integration::LambdaProxy { function } => {
                props["Integration"] = json!({
                    "Type": "AWS_PROXY",
                    "IntegrationHttpMethod": "POST",
                    "Uri": invocation_uri(function).to_json(),
                });
            }
            Integration::Lambda { function } => {
                let params = self.path_parameters();
                props["Integration"] = json!({
                    "Type": "AWS",
                    "IntegrationHttpMethod": "POST",
                    "Uri": invocation_uri(function).to_json(),
                    "PassthroughBehavior": "NEVER",
                    "RequestTemplates": {
                        "application/json": request_template(self.http_method, &self.path, &params),
                    },
                    "IntegrationResponses": [
                        {
                            "StatusCode": "200",
                            "ResponseTemplates": { "application/json": RESPONSE_TEMPLATE },
                        },
                        // Unhandled function errors.
                        { "StatusCode": "500", "SelectionPattern": ".+" },
                    ],
                });
                props["MethodResponses"] = serde_json::Value::Array(
                    EXPLICIT_STATUS_CODES
                        .iter()
                        .map(|code| {
                            if *code == REDIRECT_STATUS {
                                json!({
                                    "StatusCode": code,
                                    "ResponseParameters": { "method.response.header.Location": true },
                                })
                            } else {
                                json!({ "StatusCode": code })
                            }
                        })
                        .collect(),
                );
                if !params.is_empty() {
                    let request_params: serde_json::Map<_, _> = params
                        .iter()
                        .map(|p| (format!("method.request.path.{p}"), json!(true)))
                        .collect();
                    props["RequestParameters"] = serde_json::Value::Object(request_params);
                }
            }
            Integration::CorsPreflight(cors) => {
                let response_params = cors.response_parameters();
                let method_params: serde_json::Map<_, _> = response_params
                    .keys()
                    .map(|k| (k.clone(), json!(true)))
                    .collect();
                props["Integration"] = json!({
                    "Type": "MOCK",
                    "RequestTemplates": { "application/json": "{ statusCode: 200 }" },
                    "IntegrationResponses": [{
                        "StatusCode": "204",
                        "ResponseParameters": response_params,
                    }],
                });
                props["MethodResponses"] = json!([{
                    "StatusCode": "204",
                    "ResponseParameters": method_params,
                }]);
            }
        }
        props
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentConfig {
    pub rest_api: LogicalId,
    pub description: String,
}

impl ResourceSpec for DeploymentConfig {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ApiDeployment
    }

    fn references(&self) -> Vec<LogicalId> {
        vec![self.rest_api.clone()]
    }

    fn render(&self) -> serde_json::Value {
        json!({
            "RestApiId": Value::reference(&self.rest_api).to_json(),
            "Description": self.description,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageConfig {
    pub rest_api: LogicalId,
    pub deployment: LogicalId,
    pub stage_name: String,
    pub throttle: ThrottleSettings,
}

impl ResourceSpec for StageConfig {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ApiStage
    }

    fn references(&self) -> Vec<LogicalId> {
        vec![self.rest_api.clone(), self.deployment.clone()]
    }

    fn render(&self) -> serde_json::Value {
        json!({
            "RestApiId": Value::reference(&self.rest_api).to_json(),
            "DeploymentId": Value::reference(&self.deployment).to_json(),
            "StageName": self.stage_name,
            "MethodSettings": [{
                "HttpMethod": "*",
                "ResourcePath": "/*",
                "ThrottlingRateLimit": self.throttle.rate_limit,
                "ThrottlingBurstLimit": self.throttle.burst_limit,
            }],
        })
    }
}

/// Lets API Gateway invoke the function.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionConfig {
    pub function: LogicalId,
    pub source_arn: Value,
}

impl ResourceSpec for PermissionConfig {
    fn kind(&self) -> ResourceKind {
        ResourceKind::InvokePermission
    }

    fn references(&self) -> Vec<LogicalId> {
        let mut refs = vec![self.function.clone()];
        refs.extend(self.source_arn.references());
        refs
    }

    fn render(&self) -> serde_json::Value {
        json!({
            "Action": "lambda:InvokeFunction",
            "FunctionName": Value::attribute(&self.function, "Arn").to_json(),
            "Principal": "apigateway.amazonaws.com",
            "SourceArn": self.source_arn.to_json(),
        })
    }
}

/// Inputs of the gateway provisioner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    pub stage_name: String,
    pub throttle: ThrottleSettings,
    pub cors: CorsPolicy,
    pub topology: RouteTopology,
}

/// The provisioned API and the handles the domain provisioner needs.
#[derive(Debug, Clone)]
pub struct ApiGateway {
    pub rest_api: LogicalId,
    pub deployment: LogicalId,
    pub stage: LogicalId,
    pub stage_name: String,
    pub resources: Vec<Resource>,
}

impl ApiGateway {
    /// Fully-qualified invoke URL of the stage.
    pub fn invoke_url(&self) -> Value {
        Value::sub(
            format!(
                "https://${{{}}}.execute-api.${{AWS::Region}}.${{AWS::URLSuffix}}/{}/",
                self.rest_api, self.stage_name
            ),
            &[&self.rest_api, &self.stage],
        )
    }
}

/// Logical id for the path resource at `path`, e.g.
/// `/analytics/{shortCode}` → `TinyLinkerApiAnalyticsShortCode`.
fn resource_logical_id(path: &str) -> String {
    let mut id = REST_API_ID.to_string();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        let cleaned: String = segment
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        let mut chars = cleaned.chars();
        if let Some(first) = chars.next() {
            id.push(first.to_ascii_uppercase());
            id.extend(chars);
        }
    }
    id
}

/// Short digest of every path resource and method, in declaration order.
fn route_tree_fingerprint(resources: &[Resource]) -> String {
    let mut hasher = Sha256::new();
    for resource in resources
        .iter()
        .filter(|r| matches!(r.kind(), ResourceKind::ApiResource | ResourceKind::ApiMethod))
    {
        hasher.update(resource.logical_id.as_str().as_bytes());
        hasher.update(resource.properties.render().to_string().as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    digest[..FINGERPRINT_LEN].to_string()
}

fn method_logical_id(path: &str, method: HttpMethod) -> String {
    let base = if path == "/" {
        format!("{REST_API_ID}Root")
    } else {
        resource_logical_id(path)
    };
    let verb = method.as_str();
    format!("{}{}{}", base, &verb[..1], verb[1..].to_ascii_lowercase())
}

/// Declares the REST API, its route tree, CORS preflights, deployment,
/// throttled stage and invoke permission.
pub fn provision_gateway(function: &ApiFunction, settings: &GatewaySettings) -> ApiGateway {
    let rest_api = LogicalId::new(REST_API_ID);
    let routes = settings.topology.routes();

    let mut resources = vec![Resource::new(
        REST_API_ID,
        ResourceProperties::RestApi(RestApiConfig {
            name: REST_API_NAME.to_string(),
            description: REST_API_DESCRIPTION.to_string(),
        }),
    )];

    // Path resources in first-seen order; root first.
    let mut paths: Vec<(String, ParentResource)> = vec![("/".to_string(), ParentResource::Root)];
    for route in &routes {
        let mut current = String::new();
        let mut parent = ParentResource::Root;
        for segment in route.path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            let id = LogicalId::new(resource_logical_id(&current));
            if !paths.iter().any(|(p, _)| p == &current) {
                resources.push(Resource::new(
                    id.as_str(),
                    ResourceProperties::ApiResource(ApiResourceConfig {
                        rest_api: rest_api.clone(),
                        parent: parent.clone(),
                        path_part: segment.to_string(),
                    }),
                ));
                paths.push((current.clone(), ParentResource::Resource(id.clone())));
            }
            parent = ParentResource::Resource(id);
        }
    }

    let mut methods: Vec<LogicalId> = Vec::new();
    for (path, node) in &paths {
        let id = method_logical_id(path, HttpMethod::Options);
        resources.push(Resource::new(
            id.as_str(),
            ResourceProperties::ApiMethod(MethodConfig {
                rest_api: rest_api.clone(),
                resource: node.clone(),
                path: path.clone(),
                http_method: HttpMethod::Options,
                integration: Integration::CorsPreflight(settings.cors.clone()),
            }),
        ));
        methods.push(LogicalId::new(id));
    }

    for route in &routes {
        let node = paths
            .iter()
            .find(|(p, _)| p == &route.path)
            .map(|(_, node)| node.clone())
            .unwrap_or(ParentResource::Root);
        let id = method_logical_id(&route.path, route.method);
        resources.push(Resource::new(
            id.as_str(),
            ResourceProperties::ApiMethod(MethodConfig {
                rest_api: rest_api.clone(),
                resource: node,
                path: route.path.clone(),
                http_method: route.method,
                integration: settings.topology.integration(&function.function),
            }),
        ));
        methods.push(LogicalId::new(id));
    }

    // A deployment snapshots the methods that exist when it is created, so
    // a new route tree needs a new deployment.
    let deployment_id = LogicalId::new(format!(
        "{DEPLOYMENT_ID_PREFIX}{}",
        route_tree_fingerprint(&resources)
    ));
    let mut deployment = Resource::new(
        deployment_id.as_str(),
        ResourceProperties::ApiDeployment(DeploymentConfig {
            rest_api: rest_api.clone(),
            description: REST_API_DESCRIPTION.to_string(),
        }),
    );
    for method in &methods {
        deployment = deployment.with_dependency(method);
    }
    resources.push(deployment);

    resources.push(Resource::new(
        STAGE_ID,
        ResourceProperties::ApiStage(StageConfig {
            rest_api: rest_api.clone(),
            deployment: deployment_id.clone(),
            stage_name: settings.stage_name.clone(),
            throttle: settings.throttle,
        }),
    ));

    resources.push(Resource::new(
        PERMISSION_ID,
        ResourceProperties::InvokePermission(PermissionConfig {
            function: function.function.clone(),
            source_arn: Value::sub(
                format!(
                    "arn:${{AWS::Partition}}:execute-api:${{AWS::Region}}:${{AWS::AccountId}}:${{{}}}/*/*/*",
                    rest_api
                ),
                &[&rest_api],
            ),
        }),
    ));

    tracing::debug!(
        topology = %settings.topology,
        routes = routes.len(),
        stage = %settings.stage_name,
        "declared rest api"
    );

    ApiGateway {
        rest_api,
        deployment: deployment_id,
        stage: LogicalId::new(STAGE_ID),
        stage_name: settings.stage_name.clone(),
        resources,
    }
}
