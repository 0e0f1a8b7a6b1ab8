//! Merge mutex command.
//!
//! Drives the full trunk-integration protocol for shell-scripted agents:
//! the rebase and integration steps are caller-supplied commands, run via
//! `sh -c`, so the kernel stays ignorant of the version-control tooling.

use std::process::Command;

use anyhow::Result;
use clap::Args;
use corral_core::merge::{IntegrationError, MergePhase, TrunkIntegrator};
use corral_core::{MergeCoordinator, MergeOutcome, SleepSignal, SystemClock};
use serde_json::json;
use tracing::debug;

use super::exit_codes;
use crate::context::CliContext;

/// Arguments for `corral merge`.
#[derive(Debug, Args)]
pub struct MergeArgs {
    /// Identity to hold the trunk lock under
    #[arg(long)]
    pub owner: String,

    /// Command run outside the lock for the speculative rebase
    #[arg(long)]
    pub preflight_cmd: Option<String>,

    /// Command run under the lock for the authoritative rebase and
    /// integration
    #[arg(long)]
    pub integrate_cmd: String,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

/// Integrator that shells out to caller-supplied commands.
struct ShellIntegrator {
    preflight_cmd: Option<String>,
    integrate_cmd: String,
}

impl ShellIntegrator {
    fn run(cmd: &str, phase: MergePhase) -> Result<(), IntegrationError> {
        debug!(%phase, cmd, "running integration hook");
        let status = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .status()
            .map_err(|err| IntegrationError {
                phase,
                message: format!("failed to spawn '{cmd}': {err}"),
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(IntegrationError {
                phase,
                message: format!("'{cmd}' exited with {status}"),
            })
        }
    }
}

impl TrunkIntegrator for ShellIntegrator {
    fn preflight_rebase(&mut self) -> Result<(), IntegrationError> {
        match &self.preflight_cmd {
            Some(cmd) => Self::run(cmd, MergePhase::Preflight),
            None => Ok(()),
        }
    }

    fn integrate(&mut self) -> Result<(), IntegrationError> {
        Self::run(&self.integrate_cmd, MergePhase::Held)
    }
}

/// `corral merge` - exit 0 on merged, 2 on lock timeout, 1 on
/// integration failure.
pub fn run(ctx: &CliContext, args: &MergeArgs) -> Result<u8> {
    let coordinator = MergeCoordinator::new(
        ctx.store(),
        std::sync::Arc::new(SystemClock),
        &ctx.config.project,
        &args.owner,
        ctx.config.merge.clone(),
    );
    let mut integrator = ShellIntegrator {
        preflight_cmd: args.preflight_cmd.clone(),
        integrate_cmd: args.integrate_cmd.clone(),
    };

    match coordinator.merge(&mut integrator, &SleepSignal)? {
        MergeOutcome::Merged { attempts } => {
            if args.json {
                println!("{}", json!({ "merged": { "attempts": attempts } }));
            } else {
                println!("merged (after {attempts} stake attempts)");
            }
            Ok(exit_codes::SUCCESS)
        },
        MergeOutcome::TimedOut {
            holder,
            waited_secs,
            attempts,
        } => {
            if args.json {
                println!(
                    "{}",
                    json!({
                        "timed_out": {
                            "holder": holder,
                            "waited_secs": waited_secs,
                            "attempts": attempts,
                        }
                    })
                );
            } else {
                println!("timed out after {waited_secs}s; trunk held by {holder}");
            }
            Ok(exit_codes::BUSY)
        },
    }
}
