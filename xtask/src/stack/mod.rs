//! CloudFormation stack commands.

mod artifacts;
mod error;

pub use error::{Result, StackCommandError};

use std::path::{Path, PathBuf};

use crate::prelude::*;
use dialoguer::Confirm;
use tinylinker_core::gateway::RouteTopology;
use tinylinker_core::planning::{
    calculate_change_plan, calculate_destroy_plan, format_change_plan, format_destroy_plan,
    ChangeAction, ChangePlan,
};
use tinylinker_core::{compose, render_template, RemovalPolicy, Stack, StackConfig, TableRemovalPolicies, Value};

/// Stack synthesis and planning commands.
#[derive(Debug, clap::Parser)]
pub struct StackCommand {
    #[command(subcommand)]
    pub action: StackAction,
}

/// Available stack actions.
#[derive(Debug, clap::Subcommand)]
pub enum StackAction {
    /// Synthesize the CloudFormation template.
    Synth(SynthCommand),

    /// Show what deploying the current configuration would change.
    Plan(PlanCommand),

    /// Show what destroying a deployed stack would remove.
    Destroy(DestroyCommand),
}

/// Configuration sources. Flags override values from `--config`.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct ConfigArgs {
    /// JSON stack configuration file.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// CloudFormation stack name.
    #[arg(long)]
    pub stack_name: Option<String>,

    /// Target AWS account id (12 digits).
    #[arg(long)]
    pub account: Option<String>,

    /// Target AWS region.
    #[arg(long)]
    pub region: Option<String>,

    /// Removal policy for all three tables.
    #[arg(long, value_name = "retain|destroy")]
    pub removal_policy: Option<RemovalPolicy>,

    /// Custom domain; enables the hosted zone, certificate and alias record.
    #[arg(long)]
    pub domain_name: Option<String>,

    /// Public base URL for generated short links.
    #[arg(long)]
    pub base_url: Option<String>,

    /// API stage name.
    #[arg(long)]
    pub stage_name: Option<String>,

    /// Route topology.
    #[arg(long, value_name = "proxy|explicit")]
    pub routes: Option<RouteTopology>,

    /// Function container image URI.
    #[arg(long)]
    pub image_uri: Option<String>,

    /// Function memory in MB.
    #[arg(long)]
    pub memory_mb: Option<u32>,

    /// Function timeout in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u32>,

    /// Steady-state request rate limit of the stage.
    #[arg(long)]
    pub rate_limit: Option<u32>,

    /// Burst limit of the stage.
    #[arg(long)]
    pub burst_limit: Option<u32>,

    /// Prefix for the physical table names.
    #[arg(long)]
    pub table_prefix: Option<String>,
}

impl ConfigArgs {
    /// Loads the configuration file (if any) and applies flag overrides.
    pub fn load(&self) -> Result<StackConfig> {
        let base = match &self.config {
            Some(path) => artifacts::read_config(path)?,
            None => StackConfig::default(),
        };
        Ok(self.apply(base))
    }

    fn apply(&self, mut config: StackConfig) -> StackConfig {
        if let Some(name) = &self.stack_name {
            config.stack_name = name.clone();
        }
        if let Some(account) = &self.account {
            config.account = Some(account.clone());
        }
        if let Some(region) = &self.region {
            config.region = Some(region.clone());
        }
        if let Some(policy) = self.removal_policy {
            config.removal_policies = Some(TableRemovalPolicies::uniform(policy));
        }
        if let Some(domain) = &self.domain_name {
            config.domain_name = Some(domain.clone());
        }
        if let Some(url) = &self.base_url {
            config.base_url = Some(url.clone());
        }
        if let Some(stage) = &self.stage_name {
            config.stage_name = stage.clone();
        }
        if let Some(routes) = self.routes {
            config.routes = routes;
        }
        if let Some(image) = &self.image_uri {
            config.function.image_uri = Some(image.clone());
        }
        if let Some(memory) = self.memory_mb {
            config.function.memory_mb = memory;
        }
        if let Some(timeout) = self.timeout_secs {
            config.function.timeout_secs = timeout;
        }
        if let Some(rate) = self.rate_limit {
            config.throttle.rate_limit = rate;
        }
        if let Some(burst) = self.burst_limit {
            config.throttle.burst_limit = burst;
        }
        if let Some(prefix) = &self.table_prefix {
            config.table_prefix = prefix.clone();
        }
        config
    }
}

/// Synthesize the template.
#[derive(Debug, clap::Parser)]
pub struct SynthCommand {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Output directory.
    #[arg(long, default_value = "cdk.out")]
    pub out: PathBuf,
}

/// Plan a deployment.
#[derive(Debug, clap::Parser)]
#[command(long_about = "Compare the current configuration against a previously
synthesized template and print the changes CloudFormation would make.

Without --previous every resource is planned for creation. Plans that
replace resources are refused unless --allow-replacement is given. Plans
that replace or delete a table or hosted zone lose its data or delegation
and ask for confirmation unless --force is given.")]
pub struct PlanCommand {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Previously synthesized template.
    #[arg(long, value_name = "FILE")]
    pub previous: Option<PathBuf>,

    /// Accept plans that replace resources.
    #[arg(long)]
    pub allow_replacement: bool,

    /// Skip confirmation prompts.
    #[arg(long)]
    pub force: bool,

    /// Write the new template and manifest here once the plan is accepted.
    #[arg(long, value_name = "DIR")]
    pub out: Option<PathBuf>,
}

/// Plan a teardown.
#[derive(Debug, clap::Parser)]
pub struct DestroyCommand {
    /// Template of the deployed stack.
    #[arg(long, value_name = "FILE")]
    pub previous: PathBuf,
}

/// Main entry point for stack command.
pub fn run(command: StackCommand, global: crate::Global) -> Result<()> {
    match command.action {
        StackAction::Synth(cmd) => run_synth(cmd, &global),
        StackAction::Plan(cmd) => run_plan(cmd, &global),
        StackAction::Destroy(cmd) => run_destroy(cmd, &global),
    }
}

fn describe_value(value: &Value) -> String {
    match value.as_literal() {
        Some(literal) => literal.to_string(),
        None => value.to_json().to_string(),
    }
}

fn print_stack(stack: &Stack) {
    aprintln!("{} {}", p_b("Stack:"), stack.name());
    aprintln!("{} {} / {}", p_b("Target:"), stack.account(), stack.region());
    aprintln!();
    aprintln!("{}", p_c("Apply order:"));
    for (i, resource) in stack.ordered_resources().enumerate() {
        aprintln!(
            "  {:>2}. {} ({})",
            i + 1,
            resource.logical_id,
            resource.kind().cfn_type()
        );
    }
    aprintln!();
    aprintln!("{}", p_c("Outputs:"));
    for output in stack.outputs() {
        aprintln!("  {} = {}", output.name, describe_value(&output.value));
    }
    aprintln!();
}

fn write_artifacts(dir: &Path, stack: &Stack, global: &crate::Global) -> Result<()> {
    let output = artifacts::write_synth_output(dir, stack)?;
    if !global.is_silent() {
        aprintln!("{} {}", p_g("Wrote"), output.template.display());
        aprintln!("{} {}", p_g("Wrote"), output.manifest.display());
    }
    Ok(())
}

fn run_synth(cmd: SynthCommand, global: &crate::Global) -> Result<()> {
    let stack = compose(&cmd.config.load()?)?;

    if !global.is_silent() {
        print_stack(&stack);
    }

    write_artifacts(&cmd.out, &stack, global)
}

/// Logical IDs of every resource the plan replaces.
fn replaced_resources(plan: &ChangePlan) -> Vec<String> {
    plan.changes()
        .iter()
        .filter(|c| matches!(c.action, ChangeAction::Replace { .. }))
        .map(|c| c.logical_id.to_string())
        .collect()
}

/// Logical IDs of every resource whose data or delegation the plan loses.
fn lost_resources(plan: &ChangePlan) -> Vec<String> {
    plan.changes()
        .iter()
        .filter(|c| {
            matches!(
                c.action,
                ChangeAction::Replace {
                    data_loss: true,
                    ..
                } | ChangeAction::Delete { data_loss: true }
            )
        })
        .map(|c| c.logical_id.to_string())
        .collect()
}

/// Decides whether a plan may proceed. Returns the confirmation prompt for
/// destructive plans, or an error when replacement was not allowed.
fn destructive_prompt(plan: &ChangePlan, allow_replacement: bool) -> Result<Option<String>> {
    let replaced = replaced_resources(plan);
    if !replaced.is_empty() && !allow_replacement {
        return Err(StackCommandError::ReplacementRefused {
            resources: replaced,
        });
    }

    let lost = lost_resources(plan);
    let prompt = match (replaced.is_empty(), lost.is_empty()) {
        (true, true) => None,
        (false, true) => Some(format!("Replace {}?", replaced.join(", "))),
        (_, false) => Some(format!(
            "This plan destroys {}. ALL DATA IN THEM WILL BE LOST. Continue?",
            lost.join(", ")
        )),
    };
    Ok(prompt)
}

fn run_plan(cmd: PlanCommand, global: &crate::Global) -> Result<()> {
    let stack = compose(&cmd.config.load()?)?;
    let desired = render_template(&stack);
    let previous = cmd
        .previous
        .as_deref()
        .map(artifacts::read_template)
        .transpose()?;

    let plan = calculate_change_plan(previous.as_ref(), &desired)?;

    if !global.is_silent() {
        print_plan("Change Plan:", &format_change_plan(&plan));
        aprintln!("{} {}", p_b("Summary:"), plan.summary());
        aprintln!();
    }

    if let Some(prompt) = destructive_prompt(&plan, cmd.allow_replacement)? {
        if !cmd.force {
            let confirmed = Confirm::new()
                .with_prompt(prompt)
                .default(false)
                .interact()
                .map_err(|e| StackCommandError::Prompt(e.to_string()))?;

            if !confirmed {
                return Err(StackCommandError::UserCancelled);
            }
        }
    }

    if plan.is_empty() && !global.is_silent() {
        aprintln!("{}", p_g("Infrastructure is up to date."));
    }

    if let Some(dir) = &cmd.out {
        write_artifacts(dir, &stack, global)?;
    }

    Ok(())
}

fn run_destroy(cmd: DestroyCommand, global: &crate::Global) -> Result<()> {
    let previous = artifacts::read_template(&cmd.previous)?;
    let plan = calculate_destroy_plan(&previous)?;

    if !global.is_silent() {
        print_plan("Destroy Plan:", &format_destroy_plan(&plan));
        aprintln!("{} {}", p_b("Summary:"), plan.summary());
        if plan.data_loss() {
            aprintln!(
                "{}",
                p_r("Tables without a retain policy will be deleted with all their data.")
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_file_values() {
        let base = StackConfig {
            account: Some("111111111111".to_string()),
            region: Some("us-east-1".to_string()),
            stage_name: "prod".to_string(),
            ..StackConfig::default()
        };
        let args = ConfigArgs {
            region: Some("eu-west-1".to_string()),
            removal_policy: Some(RemovalPolicy::Retain),
            routes: Some(RouteTopology::Explicit),
            memory_mb: Some(1024),
            burst_limit: Some(200),
            ..ConfigArgs::default()
        };

        let config = args.apply(base);
        assert_eq!(config.account.as_deref(), Some("111111111111"));
        assert_eq!(config.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.stage_name, "prod");
        assert_eq!(
            config.removal_policies,
            Some(TableRemovalPolicies::uniform(RemovalPolicy::Retain))
        );
        assert_eq!(config.routes, RouteTopology::Explicit);
        assert_eq!(config.function.memory_mb, 1024);
        assert_eq!(config.throttle.burst_limit, 200);
        assert_eq!(config.throttle.rate_limit, 50);
    }

    #[test]
    fn test_no_flags_keep_defaults() {
        let config = ConfigArgs::default().load().unwrap();
        assert_eq!(config, StackConfig::default());
    }

    #[test]
    fn test_replaced_resources_lists_ids() {
        let desired = render_template(
            &compose(&StackConfig {
                account: Some("123456789012".to_string()),
                region: Some("us-west-2".to_string()),
                removal_policies: Some(TableRemovalPolicies::uniform(RemovalPolicy::Retain)),
                base_url: Some("https://short.example.org".to_string()),
                ..StackConfig::default()
            })
            .unwrap(),
        );
        let mut previous = desired.clone();
        previous["Resources"]["RateLimitsTable"]["Properties"]["TableName"] =
            serde_json::json!("old-rate-limits");

        let plan = calculate_change_plan(Some(&previous), &desired).unwrap();
        assert_eq!(replaced_resources(&plan), vec!["RateLimitsTable"]);
    }

    fn config() -> StackConfig {
        StackConfig {
            account: Some("123456789012".to_string()),
            region: Some("us-west-2".to_string()),
            removal_policies: Some(TableRemovalPolicies::uniform(RemovalPolicy::Destroy)),
            domain_name: Some("links.example.com".to_string()),
            ..StackConfig::default()
        }
    }

    #[test]
    fn test_dropping_domain_asks_before_losing_the_zone() {
        let previous = render_template(&compose(&config()).unwrap());
        let desired = render_template(
            &compose(&StackConfig {
                domain_name: None,
                base_url: Some("https://links.example.com".to_string()),
                ..config()
            })
            .unwrap(),
        );

        let plan = calculate_change_plan(Some(&previous), &desired).unwrap();
        assert!(!plan.requires_replacement());
        assert_eq!(lost_resources(&plan), vec!["HostedZone"]);

        let prompt = destructive_prompt(&plan, false).unwrap().unwrap();
        assert!(prompt.contains("HostedZone"));
        assert!(prompt.contains("ALL DATA"));
    }

    #[test]
    fn test_replacement_needs_permission() {
        let desired = render_template(&compose(&config()).unwrap());
        let mut previous = desired.clone();
        previous["Resources"]["UrlsTable"]["Properties"]["TableName"] =
            serde_json::json!("old-urls");
        let plan = calculate_change_plan(Some(&previous), &desired).unwrap();

        assert!(matches!(
            destructive_prompt(&plan, false),
            Err(StackCommandError::ReplacementRefused { .. })
        ));
        let prompt = destructive_prompt(&plan, true).unwrap().unwrap();
        assert!(prompt.contains("UrlsTable"));
    }

    #[test]
    fn test_harmless_plan_needs_no_prompt() {
        let template = render_template(&compose(&config()).unwrap());
        let plan = calculate_change_plan(Some(&template), &template).unwrap();
        assert_eq!(destructive_prompt(&plan, false).unwrap(), None);

        let first = calculate_change_plan(None, &template).unwrap();
        assert_eq!(destructive_prompt(&first, false).unwrap(), None);
    }

    #[test]
    fn test_describe_value() {
        assert_eq!(describe_value(&Value::literal("https://x.dev")), "https://x.dev");
        assert!(describe_value(&Value::reference(&tinylinker_core::LogicalId::new("A")))
            .contains("Ref"));
    }
}
