//! `respond` -- CLI binary for the respond response-processing pipeline.
//!
//! Provides the following subcommands:
//!
//! - `respond run` -- Drive one request scenario through the pipeline and
//!   print the committed outcome.
//! - `respond check` -- Validate a scenario file without running it.

use clap::{Parser, Subcommand};

mod commands;

/// respond pipeline CLI.
#[derive(Parser)]
#[command(name = "respond", about = "respond response-processing pipeline CLI", version)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Run a request scenario and print its outcome as JSON.
    Run(commands::run::RunArgs),

    /// Validate a request scenario.
    Check(commands::check::CheckArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    match cli.command {
        Commands::Run(args) => commands::run::run(args).await?,
        Commands::Check(args) => commands::check::run(args).await?,
    }

    Ok(())
}
