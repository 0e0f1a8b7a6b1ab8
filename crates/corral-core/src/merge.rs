//! Merge mutex protocol for trunk integration.
//!
//! Many agents edit isolated working copies in parallel; the one step that
//! cannot be parallelized is integrating a change set into the shared
//! trunk (concurrent squash-merges would corrupt history). This module
//! serializes that critical section with a single well-known claim:
//! `workspace://<project>/default`.
//!
//! # State Machine
//!
//! ```text
//! Idle --> Preflight --> Acquiring --> Held --> Released (terminal)
//!                          ^    |
//!                          |    v
//!                          Waiting (backoff + jitter, bounded)
//! ```
//!
//! - **Preflight**: speculative rebase outside the lock. Best-effort; it
//!   shortens the held section but a rival may merge before we acquire.
//! - **Acquiring/Waiting**: stake the trunk claim; on conflict, sleep with
//!   exponential backoff and jitter, waking early if a peer broadcasts
//!   merge completion. Bounded by `wait_timeout`; the lock is never
//!   force-stolen.
//! - **Held**: authoritative rebase and integration, then broadcast
//!   completion so waiting peers re-check immediately.
//! - **Released**: the lock is released unconditionally in the cleanup
//!   path, integration success or not. TTL expiry is the backstop if the
//!   process dies before release.
//!
//! The version-control mechanics live behind [`TrunkIntegrator`]; the
//! completion broadcast lives behind [`MergeSignal`]. Both are external
//! collaborators of the kernel.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::claim::{ClaimStore, ReleaseOutcome, StakeOutcome, StoreError};
use crate::clock::Clock;
use crate::config::MergeConfig;
use crate::uri::{ResourceUri, UriError};

/// Phase of the merge protocol, for diagnostics and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePhase {
    /// Not merging.
    Idle,
    /// Speculative rebase outside the lock.
    Preflight,
    /// Staking the trunk claim.
    Acquiring,
    /// Backing off after a conflict.
    Waiting,
    /// Trunk claim held; integrating.
    Held,
    /// Terminal: the claim has been released (or left to expire).
    Released,
}

impl fmt::Display for MergePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Preflight => "preflight",
            Self::Acquiring => "acquiring",
            Self::Waiting => "waiting",
            Self::Held => "held",
            Self::Released => "released",
        };
        f.write_str(s)
    }
}

/// Failure reported by the version-control collaborator.
#[derive(Debug, Error)]
#[error("{phase} failed: {message}")]
pub struct IntegrationError {
    /// The protocol phase the failure occurred in.
    pub phase: MergePhase,
    /// Collaborator-supplied description.
    pub message: String,
}

/// The version-control seam: rebase and integrate an isolated change set.
///
/// The kernel never touches working copies itself; implementations wrap
/// whatever merge machinery the deployment uses.
pub trait TrunkIntegrator {
    /// Best-effort speculative rebase onto the current trunk tip, run
    /// outside the lock. Not authoritative - a rival may merge afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrationError`] if the rebase fails; the protocol
    /// logs it and continues, since the authoritative rebase under the
    /// lock decides the merge.
    fn preflight_rebase(&mut self) -> Result<(), IntegrationError>;

    /// Authoritative rebase and integration, run while the trunk claim is
    /// held.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrationError`] if integration fails; the protocol
    /// still releases the lock before propagating.
    fn integrate(&mut self) -> Result<(), IntegrationError>;
}

/// The completion-broadcast seam.
///
/// Lets a finishing merger nudge waiting peers to re-check the lock ahead
/// of their backoff schedule. Purely an optimization: correctness never
/// depends on the broadcast being delivered.
pub trait MergeSignal: Send + Sync {
    /// Announces that a merge just completed.
    fn announce_merged(&self);

    /// Blocks up to `timeout` waiting for a completion broadcast. Returns
    /// `true` if woken early by a broadcast.
    fn wait_for_merge(&self, timeout: Duration) -> bool;
}

/// Default signal: no broadcast channel, plain bounded sleep.
#[derive(Debug, Clone, Copy, Default)]
pub struct SleepSignal;

impl MergeSignal for SleepSignal {
    fn announce_merged(&self) {}

    fn wait_for_merge(&self, timeout: Duration) -> bool {
        std::thread::sleep(timeout);
        false
    }
}

/// Errors from the merge protocol.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MergeError {
    /// The project name could not form the trunk URI.
    #[error(transparent)]
    Uri(#[from] UriError),

    /// The claim store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Integration failed while the lock was held. The lock has already
    /// been released (or left to its TTL backstop) by the time this
    /// propagates.
    #[error(transparent)]
    Integration(#[from] IntegrationError),
}

/// Result of a completed merge attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The change set was integrated into the trunk.
    Merged {
        /// Stake attempts it took to win the lock.
        attempts: u32,
    },

    /// The wait budget ran out before the lock was won. The merge is
    /// abandoned; the caller returns to other work and may retry later.
    TimedOut {
        /// Who held the lock when we gave up.
        holder: String,
        /// How long we waited, in seconds.
        waited_secs: u64,
        /// Stake attempts made before giving up.
        attempts: u32,
    },
}

/// Drives the merge mutex protocol for one agent.
pub struct MergeCoordinator {
    store: Arc<dyn ClaimStore>,
    clock: Arc<dyn Clock>,
    project: String,
    owner: String,
    config: MergeConfig,
}

impl fmt::Debug for MergeCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeCoordinator")
            .field("project", &self.project)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

impl MergeCoordinator {
    /// Creates a coordinator for one agent identity.
    #[must_use]
    pub fn new(
        store: Arc<dyn ClaimStore>,
        clock: Arc<dyn Clock>,
        project: &str,
        owner: &str,
        config: MergeConfig,
    ) -> Self {
        Self {
            store,
            clock,
            project: project.to_string(),
            owner: owner.to_string(),
            config,
        }
    }

    /// Runs the full protocol: preflight, bounded acquisition,
    /// integration under the lock, release in cleanup.
    ///
    /// # Errors
    ///
    /// - [`MergeError::Store`] if the claim store fails; the caller must
    ///   not assume anything about lock state.
    /// - [`MergeError::Integration`] if the authoritative integration
    ///   fails; the lock has been released before this returns.
    pub fn merge(
        &self,
        integrator: &mut dyn TrunkIntegrator,
        signal: &dyn MergeSignal,
    ) -> Result<MergeOutcome, MergeError> {
        let trunk = ResourceUri::trunk(&self.project)?;

        // Preflight: shrink the held section. A failure here is not
        // authoritative; the rebase under the lock decides.
        debug!(owner = %self.owner, phase = %MergePhase::Preflight, "speculative rebase");
        if let Err(err) = integrator.preflight_rebase() {
            warn!(owner = %self.owner, error = %err, "preflight rebase failed; continuing");
        }

        let started = self.clock.now_secs();
        let deadline = started.saturating_add(self.config.wait_timeout.as_secs());
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            debug!(owner = %self.owner, phase = %MergePhase::Acquiring, attempts, "staking trunk");
            match self.store.stake(&trunk, &self.owner, self.config.ttl, None)? {
                StakeOutcome::Staked(_) => break,
                StakeOutcome::Conflict { holder, remaining } => {
                    let now = self.clock.now_secs();
                    if now >= deadline {
                        let waited_secs = now.saturating_sub(started);
                        info!(
                            owner = %self.owner,
                            holder = %holder,
                            waited_secs,
                            "merge abandoned: wait budget exhausted"
                        );
                        return Ok(MergeOutcome::TimedOut {
                            holder,
                            waited_secs,
                            attempts,
                        });
                    }

                    let delay = self
                        .config
                        .backoff
                        .jittered_delay_for_attempt(attempts, self.config.jitter)
                        .min(Duration::from_secs(deadline.saturating_sub(now)))
                        .min(remaining.max(Duration::from_secs(1)));
                    debug!(
                        owner = %self.owner,
                        phase = %MergePhase::Waiting,
                        holder = %holder,
                        delay_secs = delay.as_secs(),
                        "trunk held; backing off"
                    );
                    if signal.wait_for_merge(delay) {
                        debug!(owner = %self.owner, "woken early by merge broadcast");
                    }
                },
            }
        }

        info!(owner = %self.owner, phase = %MergePhase::Held, attempts, "trunk lock held");
        let integration = integrator.integrate();

        // Cleanup path: release no matter how integration went. If the
        // release itself fails (store down, lease lapsed) the TTL is the
        // backstop; a merge that already integrated is still a success.
        match self.store.release(&trunk, &self.owner) {
            Ok(ReleaseOutcome::Released) => {
                debug!(owner = %self.owner, phase = %MergePhase::Released, "trunk lock released");
            },
            Ok(ReleaseOutcome::NotOwner { holder }) => {
                warn!(
                    owner = %self.owner,
                    holder = %holder,
                    "trunk lease lapsed during merge and was re-staked"
                );
            },
            Ok(ReleaseOutcome::NotFound) => {
                warn!(owner = %self.owner, "trunk lease expired before release");
            },
            Err(err) => {
                warn!(owner = %self.owner, error = %err, "trunk release failed; ttl is the backstop");
            },
        }

        integration?;
        signal.announce_merged();
        info!(owner = %self.owner, attempts, "merge complete");
        Ok(MergeOutcome::Merged { attempts })
    }
}
