//! Custom domain provisioning.
//!
//! Creation order is load-bearing: the certificate is validated through
//! records in the new zone, the custom domain needs an issued certificate,
//! and the alias record targets the custom domain. Issuance only completes
//! once the registrar delegates to the zone's name servers, which is why
//! they are published as a stack output.

use serde_json::json;

use crate::gateway::ApiGateway;
use crate::resource::{
    LogicalId, RemovalPolicy, Resource, ResourceKind, ResourceProperties, ResourceSpec, Value,
};

pub const HOSTED_ZONE_ID: &str = "HostedZone";
pub const CERTIFICATE_ID: &str = "Certificate";
pub const CUSTOM_DOMAIN_ID: &str = "CustomDomain";
pub const BASE_PATH_MAPPING_ID: &str = "CustomDomainBasePathMapping";
pub const ALIAS_RECORD_ID: &str = "AliasRecord";

#[derive(Debug, Clone, PartialEq)]
pub struct HostedZoneConfig {
    pub zone_name: String,
}

impl ResourceSpec for HostedZoneConfig {
    fn kind(&self) -> ResourceKind {
        ResourceKind::HostedZone
    }

    fn references(&self) -> Vec<LogicalId> {
        Vec::new()
    }

    fn render(&self) -> serde_json::Value {
        json!({ "Name": format!("{}.", self.zone_name) })
    }
}

/// How certificate ownership is proven.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateValidation {
    /// Validation records are written into the given hosted zone.
    Dns { hosted_zone: LogicalId },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CertificateConfig {
    pub domain_name: String,
    pub validation: CertificateValidation,
}

impl ResourceSpec for CertificateConfig {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Certificate
    }

    fn references(&self) -> Vec<LogicalId> {
        match &self.validation {
            CertificateValidation::Dns { hosted_zone } => vec![hosted_zone.clone()],
        }
    }

    fn render(&self) -> serde_json::Value {
        match &self.validation {
            CertificateValidation::Dns { hosted_zone } => json!({
                "DomainName": self.domain_name,
                "ValidationMethod": "DNS",
                "DomainValidationOptions": [{
                    "DomainName": self.domain_name,
                    "HostedZoneId": Value::reference(hosted_zone).to_json(),
                }],
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointType {
    Regional,
}

impl EndpointType {
    pub fn as_str(self) -> &'static str {
        match self {
            EndpointType::Regional => "REGIONAL",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomDomainConfig {
    pub domain_name: String,
    pub certificate: LogicalId,
    pub endpoint_type: EndpointType,
}

impl ResourceSpec for CustomDomainConfig {
    fn kind(&self) -> ResourceKind {
        ResourceKind::CustomDomain
    }

    fn references(&self) -> Vec<LogicalId> {
        vec![self.certificate.clone()]
    }

    fn render(&self) -> serde_json::Value {
        json!({
            "DomainName": self.domain_name,
            "RegionalCertificateArn": Value::reference(&self.certificate).to_json(),
            "EndpointConfiguration": { "Types": [self.endpoint_type.as_str()] },
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasePathMappingConfig {
    pub domain: LogicalId,
    pub rest_api: LogicalId,
    pub stage: LogicalId,
    /// Empty maps the bare domain.
    pub base_path: String,
}

impl ResourceSpec for BasePathMappingConfig {
    fn kind(&self) -> ResourceKind {
        ResourceKind::BasePathMapping
    }

    fn references(&self) -> Vec<LogicalId> {
        vec![
            self.domain.clone(),
            self.rest_api.clone(),
            self.stage.clone(),
        ]
    }

    fn render(&self) -> serde_json::Value {
        let mut props = json!({
            "DomainName": Value::reference(&self.domain).to_json(),
            "RestApiId": Value::reference(&self.rest_api).to_json(),
            "Stage": Value::reference(&self.stage).to_json(),
        });
        if !self.base_path.is_empty() {
            props["BasePath"] = json!(self.base_path);
        }
        props
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AliasRecordConfig {
    pub hosted_zone: LogicalId,
    pub record_name: String,
    pub target: LogicalId,
}

impl ResourceSpec for AliasRecordConfig {
    fn kind(&self) -> ResourceKind {
        ResourceKind::AliasRecord
    }

    fn references(&self) -> Vec<LogicalId> {
        vec![self.hosted_zone.clone(), self.target.clone()]
    }

    fn render(&self) -> serde_json::Value {
        json!({
            "Name": format!("{}.", self.record_name),
            "Type": "A",
            "HostedZoneId": Value::reference(&self.hosted_zone).to_json(),
            "AliasTarget": {
                "DNSName": Value::attribute(&self.target, "RegionalDomainName").to_json(),
                "HostedZoneId": Value::attribute(&self.target, "RegionalHostedZoneId").to_json(),
            },
        })
    }
}

/// The provisioned domain resources.
#[derive(Debug, Clone)]
pub struct CustomDomain {
    pub domain_name: String,
    pub hosted_zone: LogicalId,
    pub certificate: LogicalId,
    pub custom_domain: LogicalId,
    pub base_path_mapping: LogicalId,
    pub alias_record: LogicalId,
    pub resources: Vec<Resource>,
}

impl CustomDomain {
    pub fn url(&self) -> String {
        format!("https://{}", self.domain_name)
    }

    /// Name servers the registrar must delegate to, comma separated.
    pub fn name_servers(&self) -> Value {
        Value::join(",", Value::attribute(&self.hosted_zone, "NameServers"))
    }
}

/// Binds `domain_name` to the gateway's stage.
pub fn provision_domain(domain_name: &str, gateway: &ApiGateway) -> CustomDomain {
    let hosted_zone = LogicalId::new(HOSTED_ZONE_ID);
    let certificate = LogicalId::new(CERTIFICATE_ID);
    let custom_domain = LogicalId::new(CUSTOM_DOMAIN_ID);

    let resources = vec![
        Resource::new(
            HOSTED_ZONE_ID,
            ResourceProperties::HostedZone(HostedZoneConfig {
                zone_name: domain_name.to_string(),
            }),
        )
        .with_removal_policy(RemovalPolicy::Destroy),
        Resource::new(
            CERTIFICATE_ID,
            ResourceProperties::Certificate(CertificateConfig {
                domain_name: domain_name.to_string(),
                validation: CertificateValidation::Dns {
                    hosted_zone: hosted_zone.clone(),
                },
            }),
        ),
        Resource::new(
            CUSTOM_DOMAIN_ID,
            ResourceProperties::CustomDomain(CustomDomainConfig {
                domain_name: domain_name.to_string(),
                certificate: certificate.clone(),
                endpoint_type: EndpointType::Regional,
            }),
        ),
        Resource::new(
            BASE_PATH_MAPPING_ID,
            ResourceProperties::BasePathMapping(BasePathMappingConfig {
                domain: custom_domain.clone(),
                rest_api: gateway.rest_api.clone(),
                stage: gateway.stage.clone(),
                base_path: String::new(),
            }),
        ),
        Resource::new(
            ALIAS_RECORD_ID,
            ResourceProperties::AliasRecord(AliasRecordConfig {
                hosted_zone: hosted_zone.clone(),
                record_name: domain_name.to_string(),
                target: custom_domain.clone(),
            }),
        ),
    ];

    tracing::debug!(domain_name, "declared custom domain");

    CustomDomain {
        domain_name: domain_name.to_string(),
        hosted_zone,
        certificate,
        custom_domain,
        base_path_mapping: LogicalId::new(BASE_PATH_MAPPING_ID),
        alias_record: LogicalId::new(ALIAS_RECORD_ID),
        resources,
    }
}
