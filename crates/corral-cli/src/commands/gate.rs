//! Idempotency gate command.
//!
//! Wraps an at-least-once triggered job: run `corral gate --event-id <id>`
//! first and only proceed when it prints `proceed`. A duplicate delivery
//! exits 0 with `already-handled` - success, because the work is done,
//! not an error.

use anyhow::Result;
use clap::Args;
use corral_core::{GateDecision, IdempotencyGate};
use serde_json::json;

use super::exit_codes;
use crate::context::CliContext;

/// Arguments for `corral gate`.
#[derive(Debug, Args)]
pub struct GateArgs {
    /// Stable event identifier from the delivery channel
    #[arg(long)]
    pub event_id: String,

    /// Identity of this handler instance
    #[arg(long, default_value = "handler")]
    pub owner: String,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

/// `corral gate` - exit 0 on both outcomes; only a store failure is an
/// error.
pub fn run(ctx: &CliContext, args: &GateArgs) -> Result<u8> {
    let gate = IdempotencyGate::new(ctx.store(), &ctx.config.project, ctx.config.ttl.message);
    match gate.admit(&args.event_id, &args.owner)? {
        GateDecision::Proceed => {
            if args.json {
                println!("{}", json!({ "decision": "proceed" }));
            } else {
                println!("proceed");
            }
        },
        GateDecision::AlreadyHandled { holder } => {
            if args.json {
                println!(
                    "{}",
                    json!({ "decision": "already_handled", "holder": holder })
                );
            } else {
                println!("already-handled by {holder}");
            }
        },
    }
    Ok(exit_codes::SUCCESS)
}
