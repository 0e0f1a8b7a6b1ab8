//! Claim record and expiry math.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::uri::ResourceUri;

/// Maximum length for an owner identity string.
///
/// Bounds allocation when reading owner identities from untrusted input.
pub const MAX_OWNER_LEN: usize = 256;

/// Maximum length for a claim memo.
pub const MAX_MEMO_LEN: usize = 1024;

/// A lease record granting exclusive, time-bounded ownership of a resource.
///
/// The expiry (`staked_at + ttl`) is fixed at stake time; there is no
/// refresh operation. Extending protection means releasing and re-staking,
/// accepting the risk of losing the claim in the gap. Crashed owners are
/// recovered via expiry, not heartbeats.
///
/// Expiry is a computed property evaluated lazily at read and stake time -
/// an expired claim is indistinguishable from one that was never staked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// The resource this claim covers.
    pub uri: ResourceUri,

    /// Hierarchical identity of the holder, e.g. `lead-0` or
    /// `lead-0/worker-3`. Parent and child agents share a name prefix but
    /// are distinct owners; the hierarchy is pure string convention.
    pub owner: String,

    /// Unix timestamp (seconds) at which the claim was staked.
    pub staked_at: u64,

    /// Lease duration in seconds, immutable once staked.
    pub ttl_secs: u64,

    /// Free-text annotation (e.g. the task ID a workspace claim belongs
    /// to). Read by the auditor and humans; never parsed for control flow.
    pub memo: Option<String>,
}

impl Claim {
    /// Unix timestamp (seconds) at which this claim expires.
    #[must_use]
    pub const fn expires_at(&self) -> u64 {
        self.staked_at.saturating_add(self.ttl_secs)
    }

    /// Returns `true` if the claim is expired at the given time.
    #[must_use]
    pub const fn is_expired_at(&self, now_secs: u64) -> bool {
        now_secs >= self.expires_at()
    }

    /// Remaining lease time at the given instant (zero if expired).
    #[must_use]
    pub const fn remaining_at(&self, now_secs: u64) -> Duration {
        Duration::from_secs(self.expires_at().saturating_sub(now_secs))
    }
}
