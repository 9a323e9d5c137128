//! Arbor CLI - inspect, render and measure plugin chains.

mod chain_spec;
mod commands;
mod wav;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "arbor")]
#[command(author, version, about = "Arbor plugin-chain engine CLI", long_about = None)]
struct Cli {
    /// Engine configuration file (TOML)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the tree stored in a chain document
    Inspect(commands::inspect::InspectArgs),

    /// Render a WAV file through a chain
    Render(commands::render::RenderArgs),

    /// Report per-node and host latency of a chain
    Latency(commands::latency::LatencyArgs),

    /// List the bundled plugins and their parameters
    Plugins,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = commands::common::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Inspect(args) => commands::inspect::run(args),
        Commands::Render(args) => commands::render::run(args, config),
        Commands::Latency(args) => commands::latency::run(args, config),
        Commands::Plugins => commands::plugins::run(),
    }
}
