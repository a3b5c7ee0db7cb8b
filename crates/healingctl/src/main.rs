//! healingctl - run healing actions through the Luminous healing service

use anyhow::Result;
use clap::{Parser, Subcommand};
use healing_common::HealingConfig;
use healingctl::{commands, PermissionHandler};

#[derive(Parser)]
#[command(name = "healingctl")]
#[command(about = "Luminous healing client - run whitelisted system repairs", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show execution mode, executor and available actions
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List supported healing actions
    Actions,

    /// Run a healing action
    Run {
        /// Action name, e.g. restart_service
        action: String,

        /// Action parameter as key=value (repeatable)
        #[arg(short = 'p', long = "param")]
        params: Vec<String>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Actions => commands::actions(),
        Commands::Status { json } => {
            let handler = PermissionHandler::new(&HealingConfig::load()).await;
            commands::status(&handler, json)?
        }
        Commands::Run {
            action,
            params,
            json,
        } => {
            let handler = PermissionHandler::new(&HealingConfig::load()).await;
            commands::run(&handler, &action, &params, json).await?
        }
    };

    std::process::exit(code);
}
