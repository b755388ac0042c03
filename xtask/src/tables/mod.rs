//! Direct DynamoDB table management.
//!
//! Deploys the three TinyLinker tables without CloudFormation, which is
//! handy against DynamoDB Local. Plans come from the core crate; this module
//! only describes, prints, confirms and applies.

mod client;
mod deploy;
mod error;

pub use error::{Result, TablesError};

use crate::prelude::*;
use dialoguer::Confirm;
use tinylinker_core::tables::live::{
    calculate_table_destroy_plan, calculate_table_plan, format_table_destroy_plan,
    format_table_plan, TableDestroyPlan, TablePlan,
};
use tinylinker_core::tables::{table_configs, DEFAULT_TABLE_PREFIX};
use tinylinker_core::RemovalPolicy;

/// DynamoDB table management commands.
#[derive(Debug, clap::Parser)]
pub struct TablesCommand {
    #[command(subcommand)]
    pub action: TablesAction,
}

/// Available table actions.
#[derive(Debug, clap::Subcommand)]
pub enum TablesAction {
    /// Deploy or destroy the URLs, analytics and rate-limit tables.
    Deploy(DeployCommand),
}

/// Deploy or update the tables.
#[derive(Debug, clap::Parser)]
#[command(long_about = "Deploy or destroy the TinyLinker DynamoDB tables.

By default, this command creates or updates the URLs, analytics and
rate-limit tables with their keys, indexes, TTL and streams.

Key schema changes are never applied: they require replacing the table,
which loses its data. Destroying honors the given removal policy.

The command shows a plan of changes before applying and asks for confirmation.")]
pub struct DeployCommand {
    /// Skip confirmation prompts.
    #[arg(long)]
    pub force: bool,

    /// Destroy the tables instead of creating/updating.
    #[arg(long)]
    pub destroy: bool,

    /// Removal policy applied when destroying (retain keeps the tables).
    #[arg(long, value_name = "retain|destroy", required_if_eq("destroy", "true"))]
    pub removal_policy: Option<RemovalPolicy>,

    /// Prefix for the physical table names.
    #[arg(long, default_value = DEFAULT_TABLE_PREFIX)]
    pub table_prefix: String,

    /// AWS region.
    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    pub region: String,

    /// Custom endpoint, e.g. http://localhost:8000 for DynamoDB Local.
    #[arg(long, env = "AWS_ENDPOINT_URL")]
    pub endpoint_url: Option<String>,
}

/// Main entry point for tables command.
pub async fn run(command: TablesCommand, global: crate::Global) -> Result<()> {
    match command.action {
        TablesAction::Deploy(deploy_cmd) => run_deploy(deploy_cmd, &global).await,
    }
}

fn confirm(prompt: &str, default: bool) -> Result<()> {
    let confirmed = Confirm::new()
        .with_prompt(prompt)
        .default(default)
        .interact()
        .map_err(|e| TablesError::Prompt(e.to_string()))?;

    if confirmed {
        Ok(())
    } else {
        Err(TablesError::UserCancelled)
    }
}

async fn run_deploy(cmd: DeployCommand, global: &crate::Global) -> Result<()> {
    let aws_config = client::AwsConfig {
        endpoint_url: cmd.endpoint_url.clone(),
        region: cmd.region.clone(),
    };

    if !global.is_silent() {
        aprintln!("{} {}", p_b("Target:"), aws_config.target_display());
        aprintln!();
    }

    let dynamo_client = client::create_client(&aws_config).await;
    let configs = table_configs(&cmd.table_prefix);

    if cmd.destroy {
        // clap enforces the policy together with --destroy.
        let policy = cmd.removal_policy.unwrap_or(RemovalPolicy::Retain);

        let mut plans = Vec::with_capacity(configs.len());
        for config in &configs {
            let state = client::get_table_state(&dynamo_client, &config.table_name).await?;
            plans.push(calculate_table_destroy_plan(
                state.as_ref(),
                &config.table_name,
                policy,
            ));
        }

        if !global.is_silent() {
            let lines: Vec<String> = plans.iter().flat_map(format_table_destroy_plan).collect();
            print_plan("Destroy Plan:", &lines);
        }

        if !plans
            .iter()
            .any(|p| matches!(p, TableDestroyPlan::DeleteTable { .. }))
        {
            if !global.is_silent() {
                aprintln!("{}", p_g("Nothing to destroy."));
            }
            return Ok(());
        }

        if !cmd.force {
            confirm(
                "Are you sure you want to delete these tables? ALL DATA WILL BE LOST",
                false,
            )?;
        }

        if !global.is_silent() {
            aprintln!("{}", p_b("Deleting tables..."));
        }

        for plan in &plans {
            deploy::execute_table_destroy_plan(&dynamo_client, plan).await?;
        }

        if !global.is_silent() {
            aprintln!("{}", p_g("Tables destroyed successfully."));
        }
    } else {
        let mut plans = Vec::with_capacity(configs.len());
        for config in &configs {
            let state = client::get_table_state(&dynamo_client, &config.table_name).await?;
            plans.push(calculate_table_plan(state.as_ref(), config));
        }

        if !global.is_silent() {
            let lines: Vec<String> = plans.iter().flat_map(format_table_plan).collect();
            print_plan("Deploy Plan:", &lines);
        }

        if let Some(conflict) = plans.iter().find_map(deploy::plan_conflict) {
            return Err(conflict);
        }

        if plans
            .iter()
            .all(|p| matches!(p, TablePlan::NoChanges { .. }))
        {
            if !global.is_silent() {
                aprintln!("{}", p_g("Infrastructure is up to date."));
            }
            return Ok(());
        }

        if !cmd.force {
            confirm("Apply these changes?", true)?;
        }

        if !global.is_silent() {
            aprintln!("{}", p_b("Applying changes..."));
        }

        for plan in &plans {
            tracing::info!(table = plan.table_name(), "applying table plan");
            deploy::execute_table_plan(&dynamo_client, plan).await?;
        }

        if !global.is_silent() {
            aprintln!("{}", p_g("Infrastructure deployed successfully."));
        }
    }

    Ok(())
}
