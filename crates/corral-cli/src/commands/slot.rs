//! Orchestrator slot commands: admission, occupancy, release.

use anyhow::Result;
use clap::{Args, Subcommand};
use corral_core::{AdmissionOutcome, LeadSlot, ResourceUri, SlotAllocator};
use serde_json::json;

use super::exit_codes;
use crate::context::CliContext;

/// Arguments for `corral admit`.
#[derive(Debug, Args)]
pub struct AdmitArgs {
    /// Base name for the orchestrator; the won slot index becomes its
    /// suffix (e.g. "lead" -> "lead-2")
    #[arg(long, default_value = "lead")]
    pub name: String,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

/// Slot command group.
#[derive(Debug, Args)]
pub struct SlotsCommand {
    /// Output JSON
    #[arg(long)]
    pub json: bool,

    #[command(subcommand)]
    pub subcommand: SlotsSubcommand,
}

/// Slot subcommands.
#[derive(Debug, Subcommand)]
pub enum SlotsSubcommand {
    /// Show who holds each slot
    Show,

    /// Release a slot during clean shutdown
    Release {
        /// The slot index to release
        index: u32,
        /// The identity the slot was staked under
        #[arg(long)]
        owner: String,
    },
}

fn allocator(ctx: &CliContext) -> SlotAllocator {
    SlotAllocator::new(
        ctx.store(),
        &ctx.config.project,
        ctx.config.max_leads,
        ctx.config.ttl.slot,
    )
}

/// `corral admit` - exit 0 with the won slot, 2 when at capacity.
pub fn admit(ctx: &CliContext, args: &AdmitArgs) -> Result<u8> {
    match allocator(ctx).acquire(&args.name)? {
        AdmissionOutcome::Admitted(slot) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&slot)?);
            } else {
                println!("admitted: slot {} as {}", slot.index, slot.owner);
            }
            Ok(exit_codes::SUCCESS)
        },
        AdmissionOutcome::AtCapacity { occupants } => {
            if args.json {
                println!("{}", json!({ "at_capacity": { "occupants": occupants } }));
            } else {
                println!("at capacity ({} slots held):", occupants.len());
                for occupant in occupants {
                    println!("  slot {}: {}", occupant.index, occupant.owner);
                }
            }
            Ok(exit_codes::BUSY)
        },
    }
}

/// `corral slots show` / `corral slots release`.
pub fn slots(ctx: &CliContext, args: &SlotsCommand) -> Result<u8> {
    match &args.subcommand {
        SlotsSubcommand::Show => {
            let occupants = allocator(ctx).occupancy()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&occupants)?);
            } else if occupants.is_empty() {
                println!("no slots held (max {})", ctx.config.max_leads);
            } else {
                for occupant in occupants {
                    println!("slot {}: {}", occupant.index, occupant.owner);
                }
            }
            Ok(exit_codes::SUCCESS)
        },
        SlotsSubcommand::Release { index, owner } => {
            let slot = LeadSlot {
                index: *index,
                owner: owner.clone(),
                uri: ResourceUri::agent_slot(&ctx.config.project, *index)?,
            };
            let outcome = allocator(ctx).release(&slot)?;
            if args.json {
                println!("{}", json!({ "outcome": format!("{outcome:?}") }));
            } else {
                println!("{outcome:?}");
            }
            Ok(exit_codes::SUCCESS)
        },
    }
}
