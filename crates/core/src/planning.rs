//! Change planning between synthesized templates.
//!
//! Templates are compared resource by resource. The planner never talks to
//! AWS: it reads the previously synthesized template (or nothing, for a
//! first deploy) and the desired one, and reports what CloudFormation will
//! do with each logical ID. Replacements of stateful resources are flagged
//! so the shell can refuse them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Deserialize;
use serde_json::Value as Json;

use crate::error::PlanError;
use crate::graph::ResourceGraph;
use crate::resource::{LogicalId, ResourceKind};

/// What will happen to a single resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeAction {
    Create,
    /// Updated in place; lists the changed properties.
    Update { changed: Vec<String> },
    /// Deleted and recreated; lists the properties that force it.
    Replace { reasons: Vec<String>, data_loss: bool },
    Delete { data_loss: bool },
    /// Removed from the stack but kept in the account.
    Retain,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceChange {
    pub logical_id: LogicalId,
    pub resource_type: String,
    pub action: ChangeAction,
}

/// Ordered list of changes: creates/updates in apply order, then removals in
/// destroy order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangePlan {
    changes: Vec<ResourceChange>,
}

impl ChangePlan {
    pub fn changes(&self) -> &[ResourceChange] {
        &self.changes
    }

    pub fn get(&self, logical_id: &str) -> Option<&ResourceChange> {
        self.changes
            .iter()
            .find(|c| c.logical_id.as_str() == logical_id)
    }

    /// True when applying the plan would change nothing.
    pub fn is_empty(&self) -> bool {
        self.changes
            .iter()
            .all(|c| c.action == ChangeAction::Unchanged)
    }

    pub fn requires_replacement(&self) -> bool {
        self.changes
            .iter()
            .any(|c| matches!(c.action, ChangeAction::Replace { .. }))
    }

    pub fn data_loss(&self) -> bool {
        self.changes.iter().any(|c| {
            matches!(
                c.action,
                ChangeAction::Replace {
                    data_loss: true,
                    ..
                } | ChangeAction::Delete { data_loss: true }
            )
        })
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for change in &self.changes {
            match change.action {
                ChangeAction::Create => summary.create += 1,
                ChangeAction::Update { .. } => summary.update += 1,
                ChangeAction::Replace { .. } => summary.replace += 1,
                ChangeAction::Delete { .. } => summary.delete += 1,
                ChangeAction::Retain => summary.retain += 1,
                ChangeAction::Unchanged => summary.unchanged += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
    pub retain: usize,
    pub unchanged: usize,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete, {} to retain, {} unchanged",
            self.create, self.update, self.replace, self.delete, self.retain, self.unchanged
        )
    }
}

#[derive(Debug, Deserialize)]
struct Template {
    #[serde(rename = "Resources")]
    resources: BTreeMap<String, TemplateResource>,
}

#[derive(Debug, Deserialize)]
struct TemplateResource {
    #[serde(rename = "Type")]
    resource_type: String,
    #[serde(rename = "Properties", default)]
    properties: Json,
    #[serde(rename = "DependsOn", default)]
    depends_on: Option<DependsOn>,
    #[serde(rename = "DeletionPolicy", default)]
    deletion_policy: Option<String>,
    #[serde(rename = "UpdateReplacePolicy", default)]
    update_replace_policy: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DependsOn {
    One(String),
    Many(Vec<String>),
}

impl TemplateResource {
    fn kind(&self) -> Option<ResourceKind> {
        ResourceKind::from_cfn_type(&self.resource_type)
    }

    fn is_stateful(&self) -> bool {
        self.kind().is_some_and(ResourceKind::is_stateful)
    }

    fn dependencies(&self) -> Vec<LogicalId> {
        let mut deps = BTreeSet::new();
        collect_references(&self.properties, &mut deps);
        match &self.depends_on {
            Some(DependsOn::One(id)) => {
                deps.insert(LogicalId::new(id.as_str()));
            }
            Some(DependsOn::Many(ids)) => {
                deps.extend(ids.iter().map(|id| LogicalId::new(id.as_str())));
            }
            None => {}
        }
        deps.into_iter().collect()
    }
}

struct ParsedTemplate {
    resources: BTreeMap<LogicalId, TemplateResource>,
    graph: ResourceGraph,
}

fn parse_template(value: &Json) -> Result<ParsedTemplate, PlanError> {
    let template =
        Template::deserialize(value).map_err(|e| PlanError::MalformedTemplate(e.to_string()))?;
    let resources: BTreeMap<LogicalId, TemplateResource> = template
        .resources
        .into_iter()
        .map(|(id, resource)| (LogicalId::new(id), resource))
        .collect();
    let graph = ResourceGraph::from_edges(
        resources
            .iter()
            .map(|(id, resource)| (id.clone(), resource.dependencies())),
    )?;
    Ok(ParsedTemplate { resources, graph })
}

/// Collects logical IDs referenced through `Ref`, `Fn::GetAtt` and `Fn::Sub`.
fn collect_references(value: &Json, out: &mut BTreeSet<LogicalId>) {
    match value {
        Json::Object(map) if map.len() == 1 => {
            if let Some(target) = map.get("Ref") {
                if let Some(id) = target.as_str().filter(|id| !is_pseudo_parameter(id)) {
                    out.insert(LogicalId::new(id));
                }
            } else if let Some(attribute) = map.get("Fn::GetAtt") {
                let id = match attribute {
                    Json::Array(parts) => parts.first().and_then(Json::as_str),
                    Json::String(dotted) => dotted.split_once('.').map(|(id, _)| id),
                    _ => None,
                };
                if let Some(id) = id {
                    out.insert(LogicalId::new(id));
                }
            } else if let Some(sub) = map.get("Fn::Sub") {
                match sub {
                    Json::String(template) => sub_references(template, &BTreeSet::new(), out),
                    Json::Array(parts) => {
                        let variables = parts.get(1).and_then(Json::as_object);
                        let locals: BTreeSet<&str> = variables
                            .map(|vars| vars.keys().map(String::as_str).collect())
                            .unwrap_or_default();
                        if let Some(template) = parts.first().and_then(Json::as_str) {
                            sub_references(template, &locals, out);
                        }
                        for value in variables.into_iter().flat_map(|vars| vars.values()) {
                            collect_references(value, out);
                        }
                    }
                    _ => {}
                }
            } else {
                map.values().for_each(|v| collect_references(v, out));
            }
        }
        Json::Object(map) => map.values().for_each(|v| collect_references(v, out)),
        Json::Array(items) => items.iter().for_each(|v| collect_references(v, out)),
        _ => {}
    }
}

/// `${Id}` and `${Id.Attr}` placeholders, skipping `${!Literal}`, pseudo
/// parameters and local variables.
fn sub_references(template: &str, locals: &BTreeSet<&str>, out: &mut BTreeSet<LogicalId>) {
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        let name = &after[..end];
        rest = &after[end + 1..];

        if name.starts_with('!') || is_pseudo_parameter(name) || locals.contains(name) {
            continue;
        }
        let id = name.split_once('.').map_or(name, |(id, _)| id);
        if !locals.contains(id) {
            out.insert(LogicalId::new(id));
        }
    }
}

fn is_pseudo_parameter(name: &str) -> bool {
    name.starts_with("AWS::")
}

/// Top-level properties that differ, sorted.
fn changed_properties(before: &Json, after: &Json) -> Vec<String> {
    match (before.as_object(), after.as_object()) {
        (Some(before), Some(after)) => {
            let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
            keys.into_iter()
                .filter(|key| before.get(*key) != after.get(*key))
                .cloned()
                .collect()
        }
        _ if before == after => Vec::new(),
        _ => vec!["Properties".to_string()],
    }
}

fn diff_resource(before: &TemplateResource, after: &TemplateResource) -> ChangeAction {
    if before.resource_type != after.resource_type {
        return ChangeAction::Replace {
            reasons: vec!["Type".to_string()],
            data_loss: before.is_stateful(),
        };
    }

    let mut changed = changed_properties(&before.properties, &after.properties);
    let replacement_only = after
        .kind()
        .map(ResourceKind::replacement_properties)
        .unwrap_or(&[]);
    let reasons: Vec<String> = changed
        .iter()
        .filter(|property| replacement_only.contains(&property.as_str()))
        .cloned()
        .collect();
    if !reasons.is_empty() {
        return ChangeAction::Replace {
            reasons,
            data_loss: after.is_stateful(),
        };
    }

    if before.deletion_policy != after.deletion_policy {
        changed.push("DeletionPolicy".to_string());
    }
    if before.update_replace_policy != after.update_replace_policy {
        changed.push("UpdateReplacePolicy".to_string());
    }

    if changed.is_empty() {
        ChangeAction::Unchanged
    } else {
        ChangeAction::Update { changed }
    }
}

fn removal_action(resource: &TemplateResource) -> ChangeAction {
    match resource.deletion_policy.as_deref() {
        Some("Retain") => ChangeAction::Retain,
        Some("Snapshot") => ChangeAction::Delete { data_loss: false },
        _ => ChangeAction::Delete {
            data_loss: resource.is_stateful(),
        },
    }
}

fn removals(previous: &ParsedTemplate, keep: impl Fn(&LogicalId) -> bool) -> Vec<ResourceChange> {
    previous
        .graph
        .destroy_order()
        .into_iter()
        .filter(|id| !keep(id))
        .filter_map(|id| {
            let resource = previous.resources.get(&id)?;
            Some(ResourceChange {
                action: removal_action(resource),
                resource_type: resource.resource_type.clone(),
                logical_id: id,
            })
        })
        .collect()
}

/// Plans the transition from `previous` (absent on first deploy) to
/// `desired`.
///
/// # Errors
/// - `PlanError::MalformedTemplate` if either template cannot be read
/// - `PlanError::Graph` if either template references undeclared resources
///   or has a dependency cycle
pub fn calculate_change_plan(
    previous: Option<&Json>,
    desired: &Json,
) -> Result<ChangePlan, PlanError> {
    let desired = parse_template(desired)?;
    let previous = previous.map(parse_template).transpose()?;

    let mut changes: Vec<ResourceChange> = desired
        .graph
        .apply_order()
        .iter()
        .filter_map(|id| {
            let resource = desired.resources.get(id)?;
            let action = match previous.as_ref().and_then(|p| p.resources.get(id)) {
                None => ChangeAction::Create,
                Some(before) => diff_resource(before, resource),
            };
            Some(ResourceChange {
                logical_id: id.clone(),
                resource_type: resource.resource_type.clone(),
                action,
            })
        })
        .collect();

    if let Some(previous) = &previous {
        changes.extend(removals(previous, |id| desired.resources.contains_key(id)));
    }

    let plan = ChangePlan { changes };
    tracing::debug!(summary = %plan.summary(), "calculated change plan");
    Ok(plan)
}

/// Plans tearing down everything in `previous`, dependents first.
pub fn calculate_destroy_plan(previous: &Json) -> Result<ChangePlan, PlanError> {
    let previous = parse_template(previous)?;
    let plan = ChangePlan {
        changes: removals(&previous, |_| false),
    };
    tracing::debug!(summary = %plan.summary(), "calculated destroy plan");
    Ok(plan)
}

/// Pure function: Format a change plan for display. Unchanged resources are
/// omitted.
pub fn format_change_plan(plan: &ChangePlan) -> Vec<String> {
    if plan.is_empty() {
        return vec!["= No changes".to_string()];
    }
    let mut lines = Vec::new();
    for change in plan.changes() {
        lines.extend(format_change(change));
    }
    lines
}

/// Pure function: Format a destroy plan for display.
pub fn format_destroy_plan(plan: &ChangePlan) -> Vec<String> {
    if plan.changes().is_empty() {
        return vec!["= Nothing to destroy".to_string()];
    }
    plan.changes().iter().flat_map(format_change).collect()
}

fn format_change(change: &ResourceChange) -> Vec<String> {
    let id = &change.logical_id;
    let kind = &change.resource_type;
    match &change.action {
        ChangeAction::Create => vec![format!("+ Create {id} ({kind})")],
        ChangeAction::Update { changed } => {
            let mut lines = vec![format!("~ Update {id} ({kind})")];
            lines.extend(changed.iter().map(|p| format!("  ~ {p}")));
            lines
        }
        ChangeAction::Replace { reasons, data_loss } => {
            let mut lines = vec![format!(
                "! Replace {id} ({kind}){}",
                data_loss_suffix(*data_loss)
            )];
            lines.extend(reasons.iter().map(|p| format!("  ! {p}")));
            lines
        }
        ChangeAction::Delete { data_loss } => {
            vec![format!("- Delete {id} ({kind}){}", data_loss_suffix(*data_loss))]
        }
        ChangeAction::Retain => vec![format!("= Retain {id} ({kind}), kept in the account")],
        ChangeAction::Unchanged => Vec::new(),
    }
}

fn data_loss_suffix(data_loss: bool) -> &'static str {
    if data_loss {
        " (ALL DATA WILL BE LOST)"
    } else {
        ""
    }
}
