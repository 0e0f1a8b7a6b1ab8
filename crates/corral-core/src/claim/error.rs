//! Claim store error types.
//!
//! The error surface is deliberately narrow: contention outcomes
//! (`Conflict`, `NotOwner`, `NotFound`) are ordinary return *values* on the
//! store operations, not errors - they drive retry/skip logic in the
//! higher-level protocols and never surface to users as failures. The only
//! `Err` a store operation produces is [`StoreError`]: the durable store
//! could not be reached or gave an inconsistent answer. That error always
//! propagates; no component guesses a claim's state when the store is
//! unavailable.

use thiserror::Error;

use crate::uri::UriError;

/// Errors indicating the claim store itself failed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The underlying durable store could not be reached or the operation
    /// failed at the storage layer.
    #[error("claim store unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),

    /// A store row held a URI outside the closed taxonomy.
    ///
    /// Only possible if the database was written by something other than
    /// this kernel; treated as a store failure rather than silently
    /// skipping the row.
    #[error("claim store holds a malformed resource uri: {0}")]
    CorruptUri(#[from] UriError),

    /// A store row held an out-of-range numeric field.
    #[error("claim store holds an invalid {field} value")]
    CorruptField {
        /// The column that was out of range.
        field: &'static str,
    },

    /// The in-process store mutex was poisoned by a panicking holder.
    #[error("claim store lock poisoned")]
    Poisoned,

    /// Owner identity or memo exceeded its length bound.
    #[error("invalid {field}: {reason}")]
    InvalidInput {
        /// The field name.
        field: &'static str,
        /// The reason it is invalid.
        reason: String,
    },
}
