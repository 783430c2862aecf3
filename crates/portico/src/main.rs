//! Portico - OIDC session gateway for backend APIs
//!
//! Main entry point for the Portico CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{check_config, secret, signin_url, start};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Portico - OIDC session gateway for backend APIs
#[derive(Parser)]
#[command(name = "portico")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// User config directory (default: platform config dir)
    #[arg(long, global = true, env = "PORTICO_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the session gateway
    Start(start::StartArgs),

    /// Load and validate configuration
    CheckConfig(check_config::CheckConfigArgs),

    /// Print a provider authorization URL
    SigninUrl(signin_url::SigninUrlArgs),

    /// Store a secret in the system keyring
    SetSecret(secret::SetSecretArgs),

    /// Remove a secret from the system keyring
    DeleteSecret(secret::DeleteSecretArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing — console (human-readable) + rotating JSON file
    let filter = if cli.verbose {
        "portico=debug,portico_oauth=debug,portico_config=debug,tower_http=debug,info"
    } else {
        "portico=info,portico_oauth=info,portico_config=info,warn"
    };

    let log_dir = cli
        .config_dir
        .clone()
        .or_else(portico_config::xdg_config_dir)
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "portico.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "portico=trace,portico_oauth=trace,portico_config=trace,tower_http=debug,info",
                )),
        )
        .init();

    let ctx = commands::Context {
        json_output: cli.json,
        verbose: cli.verbose,
        config_dir: cli.config_dir,
    };

    match cli.command {
        Commands::Start(args) => start::run(args, &ctx).await,
        Commands::CheckConfig(args) => check_config::run(args, &ctx).await,
        Commands::SigninUrl(args) => signin_url::run(args, &ctx).await,
        Commands::SetSecret(args) => secret::run_set(args, &ctx).await,
        Commands::DeleteSecret(args) => secret::run_delete(args, &ctx).await,
    }
}
