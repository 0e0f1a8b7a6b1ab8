//! Idempotency gate for at-least-once delivered events.
//!
//! The trigger channel is unordered and may redeliver: the same event can
//! arrive more than once, concurrently or minutes apart. Any handler runs
//! its event through [`IdempotencyGate::admit`] before doing work; the gate
//! stakes `message://<project>/<event_id>`, so exactly one delivery wins
//! the stake and every other delivery observes a conflict and becomes a
//! no-op.
//!
//! "Already handled" is a success condition, not a failure - callers must
//! exit cleanly on [`GateDecision::AlreadyHandled`], never report an error.
//! The marker's TTL only needs to outlast plausible redelivery.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::claim::{ClaimStore, StakeOutcome, StoreError};
use crate::uri::{ResourceUri, UriError};

/// Errors from the idempotency gate.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GateError {
    /// The event id could not form a valid `message://` URI.
    #[error(transparent)]
    Uri(#[from] UriError),

    /// The claim store failed; the caller must not guess whether the event
    /// was handled.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Decision for one event delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// First delivery to win the stake: proceed with the side effects.
    Proceed,

    /// The event was already claimed by this or another handler instance:
    /// become a no-op and exit successfully.
    AlreadyHandled {
        /// The handler instance that holds the marker.
        holder: String,
    },
}

impl GateDecision {
    /// Returns `true` if this delivery should perform the work.
    #[must_use]
    pub const fn should_proceed(&self) -> bool {
        matches!(self, Self::Proceed)
    }
}

/// Deduplicates at-least-once deliveries into at-most-once side effects.
pub struct IdempotencyGate {
    store: Arc<dyn ClaimStore>,
    project: String,
    ttl: Duration,
}

impl std::fmt::Debug for IdempotencyGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyGate")
            .field("project", &self.project)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl IdempotencyGate {
    /// Creates a gate for one project with the given marker TTL.
    #[must_use]
    pub fn new(store: Arc<dyn ClaimStore>, project: &str, ttl: Duration) -> Self {
        Self {
            store,
            project: project.to_string(),
            ttl,
        }
    }

    /// Admits or rejects one delivery of `event_id`.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Store`] if the store is unreachable - the
    /// caller must fail the delivery (and let the channel redeliver) rather
    /// than assume either outcome.
    pub fn admit(&self, event_id: &str, handler: &str) -> Result<GateDecision, GateError> {
        let uri = ResourceUri::message(&self.project, event_id)?;
        match self.store.stake(&uri, handler, self.ttl, None)? {
            StakeOutcome::Staked(_) => {
                debug!(event_id, handler, "event admitted");
                Ok(GateDecision::Proceed)
            },
            StakeOutcome::Conflict { holder, .. } => {
                debug!(event_id, holder = %holder, "duplicate delivery suppressed");
                Ok(GateDecision::AlreadyHandled { holder })
            },
        }
    }
}
