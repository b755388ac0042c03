//! AWS SDK client setup (Imperative Shell).

use super::error::{sdk_error, Result, TablesError};
use aws_sdk_dynamodb::operation::describe_table::DescribeTableError;
use aws_sdk_dynamodb::types;
use aws_sdk_dynamodb::Client;
use tinylinker_core::tables::live::{GsiState, GsiStatus, TableState, TableStatus};
use tinylinker_core::tables::{AttributeType, KeyAttribute, KeySchema, StreamViewType};

/// AWS client configuration.
#[derive(Debug, Clone)]
pub struct AwsConfig {
    /// Custom endpoint URL (for local DynamoDB).
    pub endpoint_url: Option<String>,
    /// AWS region.
    pub region: String,
}

impl AwsConfig {
    /// Returns a display string for the target environment.
    pub fn target_display(&self) -> String {
        match &self.endpoint_url {
            Some(url) => format!("Local DynamoDB ({})", url),
            None => format!("AWS DynamoDB (region: {})", self.region),
        }
    }
}

/// Creates a DynamoDB client with the given configuration.
pub async fn create_client(config: &AwsConfig) -> Client {
    let mut sdk_config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(config.region.clone()));

    if let Some(endpoint) = &config.endpoint_url {
        sdk_config_loader = sdk_config_loader.endpoint_url(endpoint);
    }

    let sdk_config = sdk_config_loader.load().await;
    Client::new(&sdk_config)
}

/// Fetches current table state, returns None if table doesn't exist.
pub async fn get_table_state(client: &Client, table_name: &str) -> Result<Option<TableState>> {
    let response = match client.describe_table().table_name(table_name).send().await {
        Ok(response) => response,
        Err(err) => {
            return match err.into_service_error() {
                DescribeTableError::ResourceNotFoundException(_) => Ok(None),
                other => Err(sdk_error(other)),
            }
        }
    };

    let table = response
        .table()
        .ok_or_else(|| sdk_error(format!("empty description for table '{table_name}'")))?;

    let gsis = table
        .global_secondary_indexes()
        .iter()
        .map(|gsi| GsiState {
            name: gsi.index_name().unwrap_or_default().to_string(),
            status: match gsi.index_status() {
                Some(types::IndexStatus::Creating) => GsiStatus::Creating,
                Some(types::IndexStatus::Updating) => GsiStatus::Updating,
                Some(types::IndexStatus::Deleting) => GsiStatus::Deleting,
                _ => GsiStatus::Active,
            },
        })
        .collect();

    let status = match table.table_status() {
        Some(types::TableStatus::Creating) => TableStatus::Creating,
        Some(types::TableStatus::Updating) => TableStatus::Updating,
        Some(types::TableStatus::Deleting) => TableStatus::Deleting,
        _ => TableStatus::Active,
    };

    let key_attribute = |key_type: types::KeyType| -> Option<KeyAttribute> {
        let element = table
            .key_schema()
            .iter()
            .find(|k| *k.key_type() == key_type)?;
        let name = element.attribute_name();
        let attribute_type = table
            .attribute_definitions()
            .iter()
            .find(|d| d.attribute_name() == name)
            .map(|d| match d.attribute_type() {
                types::ScalarAttributeType::N => AttributeType::Number,
                _ => AttributeType::String,
            })
            .unwrap_or(AttributeType::String);
        Some(KeyAttribute {
            name: name.to_string(),
            attribute_type,
        })
    };

    let key_schema = KeySchema {
        partition_key: key_attribute(types::KeyType::Hash).ok_or_else(|| {
            TablesError::MissingPartitionKey {
                table_name: table_name.to_string(),
            }
        })?,
        sort_key: key_attribute(types::KeyType::Range),
    };

    let stream = table
        .stream_specification()
        .filter(|spec| spec.stream_enabled())
        .and_then(|spec| spec.stream_view_type())
        .map(|view| match view {
            types::StreamViewType::NewImage => StreamViewType::NewImage,
            types::StreamViewType::OldImage => StreamViewType::OldImage,
            types::StreamViewType::KeysOnly => StreamViewType::KeysOnly,
            _ => StreamViewType::NewAndOldImages,
        });

    let ttl_attribute = get_ttl_attribute(client, table_name).await?;

    Ok(Some(TableState {
        status,
        key_schema,
        gsis,
        ttl_attribute,
        stream,
    }))
}

/// Attribute of an enabled or enabling TTL.
async fn get_ttl_attribute(client: &Client, table_name: &str) -> Result<Option<String>> {
    let response = client
        .describe_time_to_live()
        .table_name(table_name)
        .send()
        .await
        .map_err(sdk_error)?;

    Ok(response.time_to_live_description().and_then(|ttl| {
        match ttl.time_to_live_status() {
            Some(types::TimeToLiveStatus::Enabled) | Some(types::TimeToLiveStatus::Enabling) => {
                ttl.attribute_name().map(str::to_string)
            }
            _ => None,
        }
    }))
}
