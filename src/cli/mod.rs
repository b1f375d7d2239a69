//! Command-line entry points.

mod admin_key;
mod migrate;
mod serve;
mod shield;
mod verify_chain;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "agora", about = "Anonymous, auditable e-voting backend")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the API server.
    Serve,
    /// Run the edge risk-scoring reverse proxy.
    Shield,
    /// Apply pending database migrations and exit.
    Migrate,
    /// Recompute the full audit chain; non-zero exit on any mismatch.
    VerifyChain,
    /// Create an admin API key and print it once.
    AdminKey {
        /// Operator-facing label for the key.
        #[arg(long)]
        label: String,
    },
}

/// Parse arguments and dispatch. The binary maps any error returned here to
/// exit code 1 (fatal startup, unreachable DB, failed chain verification).
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Command::Serve => serve::execute().await,
        Command::Shield => shield::execute().await,
        Command::Migrate => migrate::execute().await,
        Command::VerifyChain => verify_chain::execute().await,
        Command::AdminKey { label } => admin_key::execute(&label).await,
    }
}
