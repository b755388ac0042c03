//! Table deployment operations (Imperative Shell).

use super::client;
use super::error::{sdk_error, Result, TablesError};
use aws_sdk_dynamodb::types::{
    self, AttributeDefinition, BillingMode, GlobalSecondaryIndex, KeySchemaElement, KeyType,
    PointInTimeRecoverySpecification, Projection, ScalarAttributeType, StreamSpecification,
    TimeToLiveSpecification,
};
use aws_sdk_dynamodb::Client;
use std::time::Duration;
use tinylinker_core::tables::live::{TableDestroyPlan, TablePlan};
use tinylinker_core::tables::{
    AttributeType, GsiConfig, KeyAttribute, ProjectionType, StreamViewType, TableConfig,
};

const MAX_WAIT_ATTEMPTS: u32 = 60;
const WAIT_DELAY: Duration = Duration::from_secs(2);

/// The error a plan that cannot be applied automatically resolves to.
pub fn plan_conflict(plan: &TablePlan) -> Option<TablesError> {
    match plan {
        TablePlan::ReplaceRequired {
            table_name,
            current,
            desired,
        } => Some(TablesError::ReplaceRequired {
            table_name: table_name.clone(),
            current: current.to_string(),
            desired: desired.to_string(),
        }),
        TablePlan::TtlConflict {
            table_name,
            current,
            desired,
        } => Some(TablesError::TtlConflict {
            table_name: table_name.clone(),
            current: current.clone(),
            desired: desired.clone(),
        }),
        _ => None,
    }
}

/// Execute a deploy plan.
pub async fn execute_table_plan(client: &Client, plan: &TablePlan) -> Result<()> {
    if let Some(conflict) = plan_conflict(plan) {
        return Err(conflict);
    }

    match plan {
        TablePlan::CreateTable { config } => {
            create_table(client, config).await?;
            wait_for_table_active(client, &config.table_name).await?;
            if let Some(ttl) = &config.ttl_attribute {
                enable_ttl(client, &config.table_name, ttl).await?;
            }
            if config.point_in_time_recovery {
                enable_point_in_time_recovery(client, &config.table_name).await?;
            }
        }
        TablePlan::UpdateTable {
            table_name,
            gsis_to_add,
            enable_ttl: ttl,
            enable_stream,
        } => {
            for gsi in gsis_to_add {
                add_gsi(client, table_name, gsi).await?;
                wait_for_table_active(client, table_name).await?;
            }
            if let Some(ttl) = ttl {
                enable_ttl(client, table_name, ttl).await?;
            }
            if let Some(view) = enable_stream {
                enable_stream_on(client, table_name, *view).await?;
                wait_for_table_active(client, table_name).await?;
            }
        }
        TablePlan::ReplaceRequired { .. }
        | TablePlan::TtlConflict { .. }
        | TablePlan::NoChanges { .. } => {
            // Nothing to do
        }
    }
    Ok(())
}

/// Execute a destroy plan.
pub async fn execute_table_destroy_plan(client: &Client, plan: &TableDestroyPlan) -> Result<()> {
    match plan {
        TableDestroyPlan::DeleteTable { table_name } => {
            client
                .delete_table()
                .table_name(table_name)
                .send()
                .await
                .map_err(sdk_error)?;
        }
        TableDestroyPlan::Retained { .. } | TableDestroyPlan::AlreadyGone { .. } => {
            // Nothing to do
        }
    }
    Ok(())
}

fn key_schema(
    partition_key: &KeyAttribute,
    sort_key: Option<&KeyAttribute>,
) -> Result<Vec<KeySchemaElement>> {
    let mut schema = vec![KeySchemaElement::builder()
        .attribute_name(&partition_key.name)
        .key_type(KeyType::Hash)
        .build()
        .map_err(sdk_error)?];

    if let Some(sk) = sort_key {
        schema.push(
            KeySchemaElement::builder()
                .attribute_name(&sk.name)
                .key_type(KeyType::Range)
                .build()
                .map_err(sdk_error)?,
        );
    }
    Ok(schema)
}

fn attribute_definitions<'a>(
    keys: impl IntoIterator<Item = &'a KeyAttribute>,
) -> Result<Vec<AttributeDefinition>> {
    keys.into_iter()
        .map(|key| {
            AttributeDefinition::builder()
                .attribute_name(&key.name)
                .attribute_type(to_scalar_type(key.attribute_type))
                .build()
                .map_err(sdk_error)
        })
        .collect()
}

fn projection(projection_type: ProjectionType) -> Projection {
    Projection::builder()
        .projection_type(match projection_type {
            ProjectionType::All => types::ProjectionType::All,
            ProjectionType::KeysOnly => types::ProjectionType::KeysOnly,
        })
        .build()
}

fn stream_specification(view: StreamViewType) -> Result<StreamSpecification> {
    StreamSpecification::builder()
        .stream_enabled(true)
        .stream_view_type(match view {
            StreamViewType::NewImage => types::StreamViewType::NewImage,
            StreamViewType::OldImage => types::StreamViewType::OldImage,
            StreamViewType::NewAndOldImages => types::StreamViewType::NewAndOldImages,
            StreamViewType::KeysOnly => types::StreamViewType::KeysOnly,
        })
        .build()
        .map_err(sdk_error)
}

async fn create_table(client: &Client, config: &TableConfig) -> Result<()> {
    let mut request = client
        .create_table()
        .table_name(&config.table_name)
        .set_key_schema(Some(key_schema(
            &config.partition_key,
            config.sort_key.as_ref(),
        )?))
        .set_attribute_definitions(Some(attribute_definitions(
            &config.attribute_definitions(),
        )?))
        .billing_mode(BillingMode::PayPerRequest);

    for gsi in &config.gsis {
        request = request.global_secondary_indexes(
            GlobalSecondaryIndex::builder()
                .index_name(&gsi.name)
                .set_key_schema(Some(key_schema(&gsi.partition_key, gsi.sort_key.as_ref())?))
                .projection(projection(gsi.projection))
                .build()
                .map_err(sdk_error)?,
        );
    }

    if let Some(view) = config.stream {
        request = request.stream_specification(stream_specification(view)?);
    }

    request.send().await.map_err(sdk_error)?;
    Ok(())
}

async fn add_gsi(client: &Client, table_name: &str, gsi: &GsiConfig) -> Result<()> {
    use aws_sdk_dynamodb::types::{CreateGlobalSecondaryIndexAction, GlobalSecondaryIndexUpdate};

    let definitions =
        attribute_definitions(std::iter::once(&gsi.partition_key).chain(gsi.sort_key.iter()))?;

    client
        .update_table()
        .table_name(table_name)
        .set_attribute_definitions(Some(definitions))
        .global_secondary_index_updates(
            GlobalSecondaryIndexUpdate::builder()
                .create(
                    CreateGlobalSecondaryIndexAction::builder()
                        .index_name(&gsi.name)
                        .set_key_schema(Some(key_schema(
                            &gsi.partition_key,
                            gsi.sort_key.as_ref(),
                        )?))
                        .projection(projection(gsi.projection))
                        .build()
                        .map_err(sdk_error)?,
                )
                .build(),
        )
        .send()
        .await
        .map_err(sdk_error)?;

    Ok(())
}

async fn enable_ttl(client: &Client, table_name: &str, attribute: &str) -> Result<()> {
    client
        .update_time_to_live()
        .table_name(table_name)
        .time_to_live_specification(
            TimeToLiveSpecification::builder()
                .enabled(true)
                .attribute_name(attribute)
                .build()
                .map_err(sdk_error)?,
        )
        .send()
        .await
        .map_err(sdk_error)?;
    Ok(())
}

async fn enable_stream_on(client: &Client, table_name: &str, view: StreamViewType) -> Result<()> {
    client
        .update_table()
        .table_name(table_name)
        .stream_specification(stream_specification(view)?)
        .send()
        .await
        .map_err(sdk_error)?;
    Ok(())
}

async fn enable_point_in_time_recovery(client: &Client, table_name: &str) -> Result<()> {
    client
        .update_continuous_backups()
        .table_name(table_name)
        .point_in_time_recovery_specification(
            PointInTimeRecoverySpecification::builder()
                .point_in_time_recovery_enabled(true)
                .build()
                .map_err(sdk_error)?,
        )
        .send()
        .await
        .map_err(sdk_error)?;
    Ok(())
}

async fn wait_for_table_active(client: &Client, table_name: &str) -> Result<()> {
    for attempt in 1..=MAX_WAIT_ATTEMPTS {
        if let Some(state) = client::get_table_state(client, table_name).await? {
            if state.is_ready() {
                return Ok(());
            }
        }
        tracing::debug!(table_name, attempt, "waiting for table to become active");
        tokio::time::sleep(WAIT_DELAY).await;
    }

    Err(TablesError::TableActivationTimeout {
        table_name: table_name.to_string(),
    })
}

fn to_scalar_type(attr_type: AttributeType) -> ScalarAttributeType {
    match attr_type {
        AttributeType::String => ScalarAttributeType::S,
        AttributeType::Number => ScalarAttributeType::N,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinylinker_core::tables::{urls_table_config, DEFAULT_TABLE_PREFIX};

    #[test]
    fn test_conflicting_plans_are_refused() {
        let ttl = TablePlan::TtlConflict {
            table_name: "tinylinker-urls".to_string(),
            current: "deleteAfter".to_string(),
            desired: "expiresAt".to_string(),
        };
        assert!(matches!(
            plan_conflict(&ttl),
            Some(TablesError::TtlConflict { ref current, .. }) if current == "deleteAfter"
        ));

        let create = TablePlan::CreateTable {
            config: urls_table_config(DEFAULT_TABLE_PREFIX),
        };
        assert!(plan_conflict(&create).is_none());
    }

    #[test]
    fn test_scalar_types() {
        assert_eq!(to_scalar_type(AttributeType::String), ScalarAttributeType::S);
        assert_eq!(to_scalar_type(AttributeType::Number), ScalarAttributeType::N);
    }
}
