//! Durable claim namespace with atomic stake semantics.
//!
//! This module provides the mutual-exclusion primitive the rest of the
//! kernel is built on. A claim grants exclusive, time-bounded ownership of
//! one resource URI; there is no refresh, no notification, and no reaper.
//!
//! # Lifecycle
//!
//! ```text
//! stake (atomic check-and-set) --> Claim (held)
//!                                   |
//!              release by owner ----+---- ttl elapses
//!                     v                        v
//!                  (absent)          (absent, implicitly)
//! ```
//!
//! # Key Concepts
//!
//! - **Stake**: creates a claim if and only if no unexpired claim exists -
//!   the first successful stake wins, with no fairness among contenders
//! - **Expiry**: `staked_at + ttl`, immutable once staked; an expired claim
//!   is indistinguishable from one that was never staked
//! - **Outcome, not error**: `Conflict`/`NotOwner`/`NotFound` are values;
//!   only a store failure is an `Err`

mod error;
mod state;
mod store;


pub use error::StoreError;
pub use state::{Claim, MAX_MEMO_LEN, MAX_OWNER_LEN};
pub use store::{
    ClaimStore, InMemoryClaimStore, ListFilter, MAX_LIST_CLAIMS, ReleaseOutcome, SqliteClaimStore,
    StakeOutcome,
};
