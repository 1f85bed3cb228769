//! Outcore CLI - diagnostics for the out-of-core buffer manager.
//!
//! Inspects the memory figures eviction policies plan against, lists the
//! built-in policies, and runs simulated allocation workloads so policy
//! parameters can be tried out before deploying them.

mod commands;
mod output;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use outcore::{BufferManagerConfig, ByteSize, PolicyKind};

/// Outcore buffer manager diagnostics.
///
/// A command-line interface for inspecting system memory, listing eviction
/// policies and simulating allocation workloads.
#[derive(Parser)]
#[command(name = "outcore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, global = true, default_value = "table")]
    format: OutputFormat,

    /// Buffer manager configuration (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Suppress progress and info messages
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Enable verbose debug logging
    #[arg(long, short, global = true)]
    verbose: bool,
}

/// Output format options.
#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable table format (default for TTY)
    #[default]
    Table,
    /// Machine-readable JSON format
    Json,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Show system memory as the eviction policies see it
    Meminfo,

    /// List eviction policies and their parameters
    Policies,

    /// Allocate buffers against simulated memory and read them back
    Simulate(SimulateArgs),
}

/// Workload for the simulate command.
#[derive(clap::Args)]
struct SimulateArgs {
    /// Number of buffers to allocate
    #[arg(long, short = 'n', default_value_t = 32)]
    count: usize,

    /// Size of each buffer (e.g. 32MiB)
    #[arg(long, short, default_value = "32MiB")]
    size: ByteSize,

    /// Simulated RAM available to managed buffers
    #[arg(long, default_value = "1GiB")]
    capacity: ByteSize,

    /// Eviction policy (overrides the configuration file)
    #[arg(long, short)]
    policy: Option<PolicyKind>,

    /// Policy parameter as name=value (repeatable)
    #[arg(long = "param", value_name = "NAME=VALUE")]
    params: Vec<String>,

    /// Allocate page-aligned buffers instead of heap buffers
    #[arg(long)]
    aligned: bool,

    /// Directory for dump files (default: a private temporary directory)
    #[arg(long)]
    dump_dir: Option<PathBuf>,
}

fn load_config(path: Option<&PathBuf>) -> Result<BufferManagerConfig> {
    let Some(path) = path else {
        return Ok(BufferManagerConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
}

fn main() {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else if !cli.quiet {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    let result = load_config(cli.config.as_ref()).and_then(|config| match cli.command {
        Commands::Meminfo => commands::meminfo::run(cli.format, cli.quiet),
        Commands::Policies => commands::policies::run(&config, cli.format, cli.quiet),
        Commands::Simulate(args) => commands::simulate::run(config, args, cli.format, cli.quiet),
    });

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
