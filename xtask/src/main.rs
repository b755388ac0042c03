//! See <https://github.com/matklad/cargo-xtask/>
//!
//! This binary defines the deployment tasks for TinyLinker, which are not
//! expressible with just `cargo`.
//!
//! The binary is integrated into the `cargo` command line by using an
//! alias in `.cargo/config`.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod prelude;
mod stack;
mod tables;

/// Deployment tasks for the TinyLinker infrastructure
#[derive(Debug, Parser)]
#[command(name = "xtask")]
#[command(about = "Deployment tasks for TinyLinker", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: Global,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, clap::Args)]
pub struct Global {
    /// Silence the command output
    #[clap(long, global = true)]
    pub silent: bool,

    /// Enable verbose output
    #[clap(long, global = true)]
    pub verbose: bool,
}

impl Global {
    pub fn is_silent(&self) -> bool {
        self.silent
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    fn default_filter(&self) -> &'static str {
        if self.is_verbose() {
            "xtask=debug,tinylinker_core=debug"
        } else if self.is_silent() {
            "error"
        } else {
            "warn"
        }
    }
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Synthesize and plan the CloudFormation stack
    Stack(stack::StackCommand),

    /// Manage the DynamoDB tables directly (DynamoDB Local, scratch accounts)
    Tables(tables::TablesCommand),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.global.default_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Stack(stack_cmd) => {
            stack::run(stack_cmd, cli.global)?;
        }
        Commands::Tables(tables_cmd) => {
            tables::run(tables_cmd, cli.global).await?;
        }
    }

    Ok(())
}
