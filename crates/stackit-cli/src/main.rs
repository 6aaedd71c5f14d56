//! Stackit CLI tool.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "stackit")]
#[command(about = "Declarative stack composition", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a composition without provisioning anything
    Validate {
        /// Path to the composition file
        #[arg(default_value = "stackit.kdl")]
        path: String,
    },
    /// Show the construction order and stack dependencies
    Plan {
        /// Path to the composition file
        #[arg(default_value = "stackit.kdl")]
        path: String,
    },
    /// Compose every stack with the in-memory provisioner and print the exports
    Synth {
        /// Path to the composition file
        #[arg(default_value = "stackit.kdl")]
        path: String,
        /// Context override as key=value (repeatable)
        #[arg(long = "context", short = 'c')]
        context: Vec<String>,
        /// Account ID used in generated ARNs
        #[arg(long, env = "STACKIT_ACCOUNT", default_value = "123456789012")]
        account: String,
        /// Region for stacks that do not pin one
        #[arg(long, env = "STACKIT_REGION", default_value = "us-east-1")]
        region: String,
    },
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so synth output stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
        Commands::Plan { path } => {
            commands::plan(&path)?;
        }
        Commands::Synth {
            path,
            context,
            account,
            region,
        } => {
            commands::synth::synth(&path, &context, &account, &region)?;
        }
    }

    Ok(())
}
