//! corral - claim-based coordination for agent fleets
//!
//! CLI client for the corral kernel: stake and release claims, acquire
//! orchestrator slots, gate duplicate events, drive trunk merges, and
//! audit the store after a crash.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod context;

use commands::{audit, claim, gate, merge, slot};
use context::CliContext;

/// corral - claim-based coordination for agent fleets
#[derive(Parser, Debug)]
#[command(name = "corral")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the kernel configuration file
    #[arg(short, long, default_value = "corral.toml")]
    config: PathBuf,

    /// Project namespace (overrides the config file)
    #[arg(long)]
    project: Option<String>,

    /// Path to the claim store database (overrides the config file)
    #[arg(long)]
    store: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    // === Claim primitives ===
    /// Stake a claim on a resource
    Stake(claim::StakeArgs),

    /// Release a claim you hold
    Release(claim::ReleaseArgs),

    /// Show the claim on one resource
    Check(claim::CheckArgs),

    /// List claims by owner prefix and class
    #[command(alias = "ls")]
    List(claim::ListArgs),

    // === Protocols ===
    /// Acquire an orchestrator slot (admission control)
    Admit(slot::AdmitArgs),

    /// Show or release orchestrator slots
    Slots(slot::SlotsCommand),

    /// Gate a possibly-duplicated event delivery
    Gate(gate::GateArgs),

    /// Serialize a trunk integration behind the merge mutex
    Merge(merge::MergeArgs),

    /// Audit the store for violations left by crashed owners
    Audit(audit::AuditArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(commands::exit_codes::ERROR)
        },
    }
}

fn run(cli: Cli) -> Result<u8> {
    let ctx = CliContext::load(&cli.config, cli.project.as_deref(), cli.store.as_deref())
        .context("failed to load configuration")?;

    match cli.command {
        Commands::Stake(args) => claim::stake(&ctx, &args),
        Commands::Release(args) => claim::release(&ctx, &args),
        Commands::Check(args) => claim::check(&ctx, &args),
        Commands::List(args) => claim::list(&ctx, &args),
        Commands::Admit(args) => slot::admit(&ctx, &args),
        Commands::Slots(args) => slot::slots(&ctx, &args),
        Commands::Gate(args) => gate::run(&ctx, &args),
        Commands::Merge(args) => merge::run(&ctx, &args),
        Commands::Audit(args) => audit::run(&ctx, &args),
    }
}
