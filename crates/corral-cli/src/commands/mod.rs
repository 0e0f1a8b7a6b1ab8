//! CLI command implementations.
//!
//! Each module implements one command group. Commands return a process
//! exit code so shell-scripted agents can branch on the outcome.

use chrono::{DateTime, Utc};

pub mod audit;
pub mod claim;
pub mod gate;
pub mod merge;
pub mod slot;

/// Exit codes shared by all commands.
///
/// `BUSY` distinguishes expected contention (conflict, at capacity, lock
/// timeout) from real failures, so a wrapping script can retry or defer
/// without parsing output.
pub mod exit_codes {
    /// Success exit code. Includes "already handled" and "nothing found":
    /// those are outcomes, not failures.
    pub const SUCCESS: u8 = 0;
    /// General error exit code (store unreachable, bad arguments).
    pub const ERROR: u8 = 1;
    /// The resource is legitimately held by someone else.
    pub const BUSY: u8 = 2;
}

/// Renders a Unix timestamp for human-readable output.
#[must_use]
pub fn format_ts(secs: u64) -> String {
    DateTime::<Utc>::from_timestamp(i64::try_from(secs).unwrap_or(i64::MAX), 0)
        .map_or_else(|| secs.to_string(), |dt| dt.to_rfc3339())
}
