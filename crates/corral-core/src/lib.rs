//! Claim-based coordination kernel.
//!
//! `corral-core` lets many independent, crash-prone worker processes
//! safely share a small set of contended resources - one mergeable trunk,
//! a set of task records, a bounded pool of orchestrator slots, and an
//! at-least-once event stream - with no lock manager beyond a shared,
//! crash-durable claim store.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │  merge mutex   admission   idempotency   auditor    │
//! │  (trunk lock)  (lead slots) (event gate) (recovery) │
//! ├─────────────────────────────────────────────────────┤
//! │        resource uri taxonomy (closed, 4 classes)    │
//! ├─────────────────────────────────────────────────────┤
//! │  claim store: atomic stake / release / check / list │
//! │          (SQLite, shared by all processes)          │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Every protocol reduces to the store's one synchronized operation:
//! `stake`, an atomic "claim if absent". Success grants ownership until an
//! explicit release or lease expiry; conflict means someone else owns it,
//! and the caller waits (merge), probes the next candidate (slots), or
//! skips the work entirely (events). There are no callbacks, no refresh,
//! and no reaper - absence after expiry is the only signal.
//!
//! # Key Concepts
//!
//! - **Claim**: exclusive, time-bounded ownership of one resource URI
//! - **Stake**: the atomic check-and-set primitive everything reduces to
//! - **Merge mutex**: the trunk workspace claim serializing integration
//! - **Lead slot**: bounded admission for orchestrator processes
//! - **Idempotency gate**: at-least-once deliveries, at-most-once effects
//! - **Auditor**: read-only crash-recovery scan with narrow auto-release

pub mod admission;
pub mod audit;
pub mod backoff;
pub mod claim;
pub mod clock;
pub mod config;
pub mod gate;
pub mod merge;
pub mod uri;

pub use admission::{AdmissionOutcome, LeadSlot, SlotAllocator, SlotOccupant};
pub use audit::{
    AuditFinding, AuditReport, InvariantAuditor, TaskLiveness, TaskStateSource, WorkspaceCatalog,
};
pub use claim::{
    Claim, ClaimStore, InMemoryClaimStore, ListFilter, ReleaseOutcome, SqliteClaimStore,
    StakeOutcome, StoreError,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{KernelConfig, MergeConfig, TtlConfig};
pub use gate::{GateDecision, IdempotencyGate};
pub use merge::{
    MergeCoordinator, MergeOutcome, MergePhase, MergeSignal, SleepSignal, TrunkIntegrator,
};
pub use uri::{ResourceClass, ResourceUri, TRUNK_WORKSPACE};
