//! Claim primitive commands: stake, release, check, list.

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use corral_core::{
    Claim, ClaimStore, ListFilter, ReleaseOutcome, ResourceClass, ResourceUri, StakeOutcome,
};
use serde_json::json;

use super::{exit_codes, format_ts};
use crate::context::CliContext;

/// Arguments for `corral stake`.
#[derive(Debug, Args)]
pub struct StakeArgs {
    /// Resource URI (task://, workspace://, agent://, message://)
    pub uri: ResourceUri,

    /// Owner identity to stake under
    #[arg(long)]
    pub owner: String,

    /// Lease duration (e.g. "120s", "2h"); defaults to the class TTL from
    /// the config
    #[arg(long, value_parser = humantime::parse_duration)]
    pub ttl: Option<Duration>,

    /// Free-text memo stored on the claim
    #[arg(long)]
    pub memo: Option<String>,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `corral release`.
#[derive(Debug, Args)]
pub struct ReleaseArgs {
    /// Resource URI to release
    pub uri: ResourceUri,

    /// Owner identity the claim was staked under
    #[arg(long)]
    pub owner: String,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `corral check`.
#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Resource URI to inspect
    pub uri: ResourceUri,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `corral list`.
#[derive(Debug, Args)]
pub struct ListArgs {
    /// Only claims whose owner starts with this prefix
    #[arg(long)]
    pub owner_prefix: Option<String>,

    /// Only claims of one class (task, workspace, agent, message)
    #[arg(long)]
    pub class: Option<ResourceClass>,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

fn print_claim_text(claim: &Claim) {
    println!("uri:       {}", claim.uri);
    println!("owner:     {}", claim.owner);
    println!("staked_at: {}", format_ts(claim.staked_at));
    println!("expires:   {}", format_ts(claim.expires_at()));
    if let Some(memo) = &claim.memo {
        println!("memo:      {memo}");
    }
}

/// Default TTL for a class, from config.
fn class_ttl(ctx: &CliContext, class: ResourceClass) -> Duration {
    let ttl = &ctx.config.ttl;
    match class {
        ResourceClass::Task => ttl.task,
        ResourceClass::Workspace => ttl.workspace,
        ResourceClass::AgentSlot => ttl.slot,
        ResourceClass::Message => ttl.message,
    }
}

/// `corral stake` - exit 0 on success, 2 on conflict.
pub fn stake(ctx: &CliContext, args: &StakeArgs) -> Result<u8> {
    let ttl = args.ttl.unwrap_or_else(|| class_ttl(ctx, args.uri.class()));
    let outcome = ctx
        .store()
        .stake(&args.uri, &args.owner, ttl, args.memo.as_deref())?;
    match outcome {
        StakeOutcome::Staked(claim) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&claim)?);
            } else {
                print_claim_text(&claim);
            }
            Ok(exit_codes::SUCCESS)
        },
        StakeOutcome::Conflict { holder, remaining } => {
            if args.json {
                println!(
                    "{}",
                    json!({
                        "conflict": {
                            "holder": holder,
                            "remaining_secs": remaining.as_secs(),
                        }
                    })
                );
            } else {
                println!(
                    "conflict: held by {holder} for another {}",
                    humantime::format_duration(remaining)
                );
            }
            Ok(exit_codes::BUSY)
        },
    }
}

/// `corral release` - exit 0 on released or not-found (idempotent), 2 if
/// someone else holds the claim.
pub fn release(ctx: &CliContext, args: &ReleaseArgs) -> Result<u8> {
    let outcome = ctx.store().release(&args.uri, &args.owner)?;
    let (text, code) = match &outcome {
        ReleaseOutcome::Released => ("released".to_string(), exit_codes::SUCCESS),
        ReleaseOutcome::NotFound => ("not found (already absent)".to_string(), exit_codes::SUCCESS),
        ReleaseOutcome::NotOwner { holder } => {
            (format!("not owner: held by {holder}"), exit_codes::BUSY)
        },
    };
    if args.json {
        let status = match outcome {
            ReleaseOutcome::Released => "released",
            ReleaseOutcome::NotFound => "not_found",
            ReleaseOutcome::NotOwner { .. } => "not_owner",
        };
        println!("{}", json!({ "status": status }));
    } else {
        println!("{text}");
    }
    Ok(code)
}

/// `corral check` - exit 0 whether present or absent.
pub fn check(ctx: &CliContext, args: &CheckArgs) -> Result<u8> {
    match ctx.store().check(&args.uri)? {
        Some(claim) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&claim)?);
            } else {
                print_claim_text(&claim);
            }
        },
        None => {
            if args.json {
                println!("null");
            } else {
                println!("absent");
            }
        },
    }
    Ok(exit_codes::SUCCESS)
}

/// `corral list`.
pub fn list(ctx: &CliContext, args: &ListArgs) -> Result<u8> {
    let mut filter = ListFilter::all().with_project(&ctx.config.project);
    if let Some(prefix) = &args.owner_prefix {
        filter = filter.with_owner_prefix(prefix);
    }
    if let Some(class) = args.class {
        filter = filter.with_class(class);
    }
    let claims = ctx.store().list(&filter)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&claims)?);
    } else if claims.is_empty() {
        println!("no claims");
    } else {
        for claim in &claims {
            println!(
                "{}\t{}\texpires {}",
                claim.uri,
                claim.owner,
                format_ts(claim.expires_at())
            );
        }
    }
    Ok(exit_codes::SUCCESS)
}
