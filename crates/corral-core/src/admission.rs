//! Admission controller for orchestrator slots.
//!
//! Bounds the number of concurrently running orchestrator processes per
//! project. A candidate probes slot indices `0..max_leads` in order and
//! stakes the first free `agent://` claim; losing every probe means the
//! project is at capacity. The winning index becomes the orchestrator's
//! identity suffix (`lead` probing slot 2 becomes `lead-2`), so every
//! dependent claim it later stakes - tasks it owns, workers it spawns - is
//! discoverable with a single owner-prefix query.
//!
//! Slots are pure admission control: there is no data behind them. A
//! crashed orchestrator's slot frees itself at TTL expiry.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::claim::{ClaimStore, ListFilter, ReleaseOutcome, StakeOutcome, StoreError};
use crate::uri::{ResourceClass, ResourceUri, UriError};

/// Errors from slot acquisition.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AdmissionError {
    /// The project name could not form a valid `agent://` URI.
    #[error(transparent)]
    Uri(#[from] UriError),

    /// The claim store failed mid-probe.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A held orchestrator slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeadSlot {
    /// The slot index (dense from 0, below `max_leads`).
    pub index: u32,
    /// The identity staked on the slot, `<base>-<index>`. All of this
    /// orchestrator's dependent claims use this string (or a
    /// `<base>-<index>/…` extension of it) as their owner.
    pub owner: String,
    /// The staked slot URI.
    pub uri: ResourceUri,
}

/// An occupied slot observed while probing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotOccupant {
    /// The slot index.
    pub index: u32,
    /// Who holds it.
    pub owner: String,
}

/// Result of a slot acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// A slot was won; the caller runs under this identity until it
    /// releases the slot or the lease expires.
    Admitted(LeadSlot),

    /// Every slot is held. The caller reports this and exits or defers -
    /// it is an expected outcome, not an error.
    AtCapacity {
        /// Who holds each slot, for conflict diagnosis.
        occupants: Vec<SlotOccupant>,
    },
}

/// First-come-first-served allocator for the bounded lead-slot pool.
pub struct SlotAllocator {
    store: Arc<dyn ClaimStore>,
    project: String,
    max_leads: u32,
    session_ttl: Duration,
}

impl std::fmt::Debug for SlotAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotAllocator")
            .field("project", &self.project)
            .field("max_leads", &self.max_leads)
            .field("session_ttl", &self.session_ttl)
            .finish_non_exhaustive()
    }
}

impl SlotAllocator {
    /// Creates an allocator for one project.
    #[must_use]
    pub fn new(
        store: Arc<dyn ClaimStore>,
        project: &str,
        max_leads: u32,
        session_ttl: Duration,
    ) -> Self {
        Self {
            store,
            project: project.to_string(),
            max_leads,
            session_ttl,
        }
    }

    /// Attempts to win a slot for an orchestrator named `base`.
    ///
    /// Probes indices `0..max_leads` in order; the first successful stake
    /// wins. No fairness among concurrent candidates - ties go to whoever
    /// stakes first.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Store`] if the store fails mid-probe.
    /// Capacity exhaustion is reported via
    /// [`AdmissionOutcome::AtCapacity`], never as an error.
    pub fn acquire(&self, base: &str) -> Result<AdmissionOutcome, AdmissionError> {
        let mut occupants = Vec::with_capacity(self.max_leads as usize);
        for index in 0..self.max_leads {
            let uri = ResourceUri::agent_slot(&self.project, index)?;
            let owner = format!("{base}-{index}");
            match self.store.stake(&uri, &owner, self.session_ttl, None)? {
                StakeOutcome::Staked(_) => {
                    info!(project = %self.project, index, owner = %owner, "lead slot acquired");
                    return Ok(AdmissionOutcome::Admitted(LeadSlot { index, owner, uri }));
                },
                StakeOutcome::Conflict { holder, .. } => {
                    debug!(index, holder = %holder, "slot occupied, probing next");
                    occupants.push(SlotOccupant {
                        index,
                        owner: holder,
                    });
                },
            }
        }
        info!(
            project = %self.project,
            max_leads = self.max_leads,
            "at capacity: every lead slot is held"
        );
        Ok(AdmissionOutcome::AtCapacity { occupants })
    }

    /// Releases a held slot during clean shutdown.
    ///
    /// A [`ReleaseOutcome::NotFound`] means the lease already expired -
    /// harmless, the slot is free either way.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store is unreachable; the TTL then
    /// frees the slot on its own.
    pub fn release(&self, slot: &LeadSlot) -> Result<ReleaseOutcome, StoreError> {
        self.store.release(&slot.uri, &slot.owner)
    }

    /// Lists the currently held slots for this project.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store is unreachable.
    pub fn occupancy(&self) -> Result<Vec<SlotOccupant>, StoreError> {
        let claims = self.store.list(
            &ListFilter::all()
                .with_class(ResourceClass::AgentSlot)
                .with_project(&self.project),
        )?;
        let mut occupants: Vec<SlotOccupant> = claims
            .into_iter()
            .filter_map(|c| match c.uri {
                ResourceUri::AgentSlot { slot, .. } => Some(SlotOccupant {
                    index: slot,
                    owner: c.owner,
                }),
                _ => None,
            })
            .collect();
        occupants.sort_by_key(|o| o.index);
        Ok(occupants)
    }
}
