//! Pure functions for planning direct table deployments (Functional Core).
//!
//! These plans compare a described table against its desired
//! [`TableConfig`]. They are applied by the `xtask tables` shell, which is
//! meant for DynamoDB Local and scratch accounts; production goes through
//! the synthesized template.

use super::{GsiConfig, KeySchema, StreamViewType, TableConfig};
use crate::resource::RemovalPolicy;

/// Represents the current state of a table.
#[derive(Debug, Clone)]
pub struct TableState {
    pub status: TableStatus,
    pub key_schema: KeySchema,
    pub gsis: Vec<GsiState>,
    /// Attribute of an enabled (or enabling) TTL, if any.
    pub ttl_attribute: Option<String>,
    pub stream: Option<StreamViewType>,
}

/// Table status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    Active,
    Creating,
    Updating,
    Deleting,
}

/// GSI state.
#[derive(Debug, Clone)]
pub struct GsiState {
    pub name: String,
    pub status: GsiStatus,
}

/// GSI status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GsiStatus {
    Active,
    Creating,
    Updating,
    Deleting,
}

impl TableState {
    /// True once the table and all its indexes accept traffic.
    pub fn is_ready(&self) -> bool {
        self.status == TableStatus::Active && self.gsis.iter().all(|g| g.status == GsiStatus::Active)
    }
}

/// Planned changes for deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TablePlan {
    /// Table doesn't exist, needs to be created.
    CreateTable { config: TableConfig },
    /// Table exists with the right keys but is missing indexes, TTL or stream.
    UpdateTable {
        table_name: String,
        gsis_to_add: Vec<GsiConfig>,
        enable_ttl: Option<String>,
        enable_stream: Option<StreamViewType>,
    },
    /// Key schema differs. Only a replacement (with data loss) can fix it,
    /// which is never done automatically.
    ReplaceRequired {
        table_name: String,
        current: KeySchema,
        desired: KeySchema,
    },
    /// TTL is enabled on another attribute. DynamoDB allows one TTL
    /// attribute per table, so it has to be disabled by hand first.
    TtlConflict {
        table_name: String,
        current: String,
        desired: String,
    },
    /// Table is up to date, no changes needed.
    NoChanges { table_name: String },
}

impl TablePlan {
    pub fn table_name(&self) -> &str {
        match self {
            TablePlan::CreateTable { config } => &config.table_name,
            TablePlan::UpdateTable { table_name, .. }
            | TablePlan::ReplaceRequired { table_name, .. }
            | TablePlan::TtlConflict { table_name, .. }
            | TablePlan::NoChanges { table_name } => table_name,
        }
    }
}

/// Plan for destroying a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableDestroyPlan {
    /// Table exists and will be deleted.
    DeleteTable { table_name: String },
    /// Table exists but its removal policy keeps it.
    Retained { table_name: String },
    /// Table doesn't exist, nothing to do.
    AlreadyGone { table_name: String },
}

/// Pure function: Calculate what changes are needed to reach desired state.
pub fn calculate_table_plan(current: Option<&TableState>, desired: &TableConfig) -> TablePlan {
    let Some(state) = current else {
        return TablePlan::CreateTable {
            config: desired.clone(),
        };
    };

    let desired_keys = desired.key_schema();
    if state.key_schema != desired_keys {
        return TablePlan::ReplaceRequired {
            table_name: desired.table_name.clone(),
            current: state.key_schema.clone(),
            desired: desired_keys,
        };
    }

    // Find GSIs that exist in desired but not in current
    let existing_gsi_names: Vec<&str> = state.gsis.iter().map(|g| g.name.as_str()).collect();
    let gsis_to_add: Vec<GsiConfig> = desired
        .gsis
        .iter()
        .filter(|gsi| !existing_gsi_names.contains(&gsi.name.as_str()))
        .cloned()
        .collect();

    let enable_ttl = match (&desired.ttl_attribute, &state.ttl_attribute) {
        (Some(wanted), None) => Some(wanted.clone()),
        (Some(wanted), Some(current)) if current != wanted => {
            return TablePlan::TtlConflict {
                table_name: desired.table_name.clone(),
                current: current.clone(),
                desired: wanted.clone(),
            };
        }
        _ => None,
    };

    // An existing stream with another view type is left alone; switching
    // view types needs the stream disabled first.
    let enable_stream = match (desired.stream, state.stream) {
        (Some(view), None) => Some(view),
        _ => None,
    };

    if gsis_to_add.is_empty() && enable_ttl.is_none() && enable_stream.is_none() {
        TablePlan::NoChanges {
            table_name: desired.table_name.clone(),
        }
    } else {
        TablePlan::UpdateTable {
            table_name: desired.table_name.clone(),
            gsis_to_add,
            enable_ttl,
            enable_stream,
        }
    }
}

/// Pure function: Calculate destroy plan.
pub fn calculate_table_destroy_plan(
    current: Option<&TableState>,
    table_name: &str,
    policy: RemovalPolicy,
) -> TableDestroyPlan {
    match (current, policy) {
        (None, _) => TableDestroyPlan::AlreadyGone {
            table_name: table_name.to_string(),
        },
        (Some(_), RemovalPolicy::Retain) => TableDestroyPlan::Retained {
            table_name: table_name.to_string(),
        },
        (Some(_), RemovalPolicy::Destroy) => TableDestroyPlan::DeleteTable {
            table_name: table_name.to_string(),
        },
    }
}

/// Pure function: Format a deploy plan for display.
pub fn format_table_plan(plan: &TablePlan) -> Vec<String> {
    match plan {
        TablePlan::CreateTable { config } => {
            let mut lines = vec![
                format!("+ Create table: {}", config.table_name),
                format!("  Keys: {}", config.key_schema()),
            ];
            for gsi in &config.gsis {
                lines.push(format!("  + GSI: {} ({})", gsi.name, gsi.projection.as_str()));
                lines.push(format!(
                    "    Partition key: {} ({})",
                    gsi.partition_key.name,
                    gsi.partition_key.attribute_type.code()
                ));
                if let Some(sk) = &gsi.sort_key {
                    lines.push(format!(
                        "    Sort key: {} ({})",
                        sk.name,
                        sk.attribute_type.code()
                    ));
                }
            }
            if let Some(ttl) = &config.ttl_attribute {
                lines.push(format!("  TTL: {}", ttl));
            }
            if let Some(stream) = config.stream {
                lines.push(format!("  Stream: {}", stream.as_str()));
            }
            lines.push(format!("  Billing: {}", config.billing_mode.as_str()));
            lines
        }
        TablePlan::UpdateTable {
            table_name,
            gsis_to_add,
            enable_ttl,
            enable_stream,
        } => {
            let mut lines = vec![format!("~ Update table: {}", table_name)];
            for gsi in gsis_to_add {
                lines.push(format!("  + Add GSI: {}", gsi.name));
            }
            if let Some(ttl) = enable_ttl {
                lines.push(format!("  + Enable TTL on: {}", ttl));
            }
            if let Some(stream) = enable_stream {
                lines.push(format!("  + Enable stream: {}", stream.as_str()));
            }
            lines
        }
        TablePlan::ReplaceRequired {
            table_name,
            current,
            desired,
        } => vec![
            format!("! Table '{}' needs replacement (ALL DATA WOULD BE LOST)", table_name),
            format!("  Current keys: {}", current),
            format!("  Desired keys: {}", desired),
        ],
        TablePlan::TtlConflict {
            table_name,
            current,
            desired,
        } => vec![
            format!("! Table '{}' has TTL on '{}', wanted on '{}'", table_name, current, desired),
            "  Disable the current TTL before deploying".to_string(),
        ],
        TablePlan::NoChanges { table_name } => {
            vec![format!("= Table '{}' is up to date", table_name)]
        }
    }
}

/// Pure function: Format a destroy plan for display.
pub fn format_table_destroy_plan(plan: &TableDestroyPlan) -> Vec<String> {
    match plan {
        TableDestroyPlan::DeleteTable { table_name } => {
            vec![format!(
                "- Delete table: {} (ALL DATA WILL BE LOST)",
                table_name
            )]
        }
        TableDestroyPlan::Retained { table_name } => {
            vec![format!("= Table '{}' is retained by its removal policy", table_name)]
        }
        TableDestroyPlan::AlreadyGone { table_name } => {
            vec![format!("= Table '{}' does not exist", table_name)]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::{analytics_table_config, urls_table_config, KeyAttribute, DEFAULT_TABLE_PREFIX};

    fn active_state(config: &TableConfig) -> TableState {
        TableState {
            status: TableStatus::Active,
            key_schema: config.key_schema(),
            gsis: config
                .gsis
                .iter()
                .map(|g| GsiState {
                    name: g.name.clone(),
                    status: GsiStatus::Active,
                })
                .collect(),
            ttl_attribute: config.ttl_attribute.clone(),
            stream: config.stream,
        }
    }

    #[test]
    fn test_missing_table_is_created() {
        let desired = urls_table_config(DEFAULT_TABLE_PREFIX);
        let plan = calculate_table_plan(None, &desired);
        assert_eq!(plan, TablePlan::CreateTable { config: desired });
    }

    #[test]
    fn test_matching_table_has_no_changes() {
        let desired = analytics_table_config(DEFAULT_TABLE_PREFIX);
        let state = active_state(&desired);
        assert_eq!(
            calculate_table_plan(Some(&state), &desired),
            TablePlan::NoChanges {
                table_name: "tinylinker-analytics".to_string()
            }
        );
    }

    #[test]
    fn test_missing_gsi_ttl_and_stream_are_added() {
        let desired = analytics_table_config(DEFAULT_TABLE_PREFIX);
        let mut state = active_state(&desired);
        state.gsis.clear();
        state.ttl_attribute = None;
        state.stream = None;

        match calculate_table_plan(Some(&state), &desired) {
            TablePlan::UpdateTable {
                gsis_to_add,
                enable_ttl,
                enable_stream,
                ..
            } => {
                assert_eq!(gsis_to_add.len(), 1);
                assert_eq!(gsis_to_add[0].name, "shortCode-country-index");
                assert_eq!(enable_ttl.as_deref(), Some("expiresAt"));
                assert_eq!(enable_stream, Some(StreamViewType::NewImage));
            }
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn test_ttl_on_another_attribute_is_a_conflict() {
        let desired = analytics_table_config(DEFAULT_TABLE_PREFIX);
        let mut state = active_state(&desired);
        state.ttl_attribute = Some("deleteAfter".to_string());

        let plan = calculate_table_plan(Some(&state), &desired);
        assert_eq!(
            plan,
            TablePlan::TtlConflict {
                table_name: "tinylinker-analytics".to_string(),
                current: "deleteAfter".to_string(),
                desired: "expiresAt".to_string(),
            }
        );
        assert_eq!(plan.table_name(), "tinylinker-analytics");
        assert!(format_table_plan(&plan)[0].contains("'deleteAfter'"));
    }

    #[test]
    fn test_changed_partition_key_requires_replacement() {
        let desired = urls_table_config(DEFAULT_TABLE_PREFIX);
        let mut state = active_state(&desired);
        state.key_schema.partition_key = KeyAttribute::string("code");

        let plan = calculate_table_plan(Some(&state), &desired);
        assert!(matches!(plan, TablePlan::ReplaceRequired { .. }));
        let lines = format_table_plan(&plan);
        assert!(lines[0].starts_with('!'));
        assert_eq!(lines[1], "  Current keys: code (S)");
        assert_eq!(lines[2], "  Desired keys: shortCode (S)");
    }

    #[test]
    fn test_changed_key_type_requires_replacement() {
        let desired = analytics_table_config(DEFAULT_TABLE_PREFIX);
        let mut state = active_state(&desired);
        state.key_schema.sort_key = Some(KeyAttribute::string("timestamp"));
        assert!(matches!(
            calculate_table_plan(Some(&state), &desired),
            TablePlan::ReplaceRequired { .. }
        ));
    }

    #[test]
    fn test_destroy_plan_honors_removal_policy() {
        let state = active_state(&urls_table_config(DEFAULT_TABLE_PREFIX));
        assert_eq!(
            calculate_table_destroy_plan(Some(&state), "t", RemovalPolicy::Retain),
            TableDestroyPlan::Retained {
                table_name: "t".to_string()
            }
        );
        assert_eq!(
            calculate_table_destroy_plan(Some(&state), "t", RemovalPolicy::Destroy),
            TableDestroyPlan::DeleteTable {
                table_name: "t".to_string()
            }
        );
        assert_eq!(
            calculate_table_destroy_plan(None, "t", RemovalPolicy::Destroy),
            TableDestroyPlan::AlreadyGone {
                table_name: "t".to_string()
            }
        );
    }

    #[test]
    fn test_format_create_plan() {
        let plan = calculate_table_plan(None, &urls_table_config(DEFAULT_TABLE_PREFIX));
        let lines = format_table_plan(&plan);
        assert_eq!(lines[0], "+ Create table: tinylinker-urls");
        assert!(lines.contains(&"  TTL: expiresAt".to_string()));
        assert!(lines.contains(&"    Sort key: createdAt (N)".to_string()));
        assert_eq!(lines.last().unwrap(), "  Billing: PAY_PER_REQUEST");
    }

    #[test]
    fn test_readiness_requires_active_indexes() {
        let mut state = active_state(&urls_table_config(DEFAULT_TABLE_PREFIX));
        assert!(state.is_ready());
        state.gsis[0].status = GsiStatus::Creating;
        assert!(!state.is_ready());
    }
}
