//! End-to-end kernel scenarios over the durable store.
//!
//! Each test drives the public API the way cooperating agent processes
//! would: one shared SQLite claim store on disk, independent store handles
//! per "process", and a manual clock where determinism matters.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use corral_core::audit::{CollaboratorError, TaskLiveness, TaskStateSource, WorkspaceCatalog};
use corral_core::merge::{IntegrationError, MergeSignal, TrunkIntegrator};
use corral_core::{
    AdmissionOutcome, AuditFinding, ClaimStore, Clock, GateDecision, IdempotencyGate,
    InvariantAuditor, ManualClock, MergeConfig, MergeCoordinator, MergeOutcome, ReleaseOutcome,
    ResourceUri, SlotAllocator, SqliteClaimStore, StakeOutcome,
};
use tempfile::TempDir;

const T0: u64 = 1_700_000_000;

struct Harness {
    clock: Arc<ManualClock>,
    dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self {
            clock: Arc::new(ManualClock::new(T0)),
            dir: TempDir::new().unwrap(),
        }
    }

    /// Opens an independent store handle, as a separate process would.
    fn open_store(&self) -> Arc<SqliteClaimStore> {
        let path = self.dir.path().join("claims.db");
        Arc::new(SqliteClaimStore::open(&path, self.clock.clone()).unwrap())
    }
}

#[test]
fn scenario_basic_exclusion() {
    // Agent A stakes task t1; B conflicts; A releases; B's retry wins.
    let h = Harness::new();
    let store_a = h.open_store();
    let store_b = h.open_store();
    let uri = ResourceUri::task("proj", "t1").unwrap();
    let ttl = Duration::from_secs(3600);

    assert!(store_a.stake(&uri, "agent-a", ttl, None).unwrap().is_staked());

    match store_b.stake(&uri, "agent-b", ttl, None).unwrap() {
        StakeOutcome::Conflict { holder, .. } => assert_eq!(holder, "agent-a"),
        StakeOutcome::Staked(_) => panic!("exclusion violated"),
    }

    assert_eq!(
        store_a.release(&uri, "agent-a").unwrap(),
        ReleaseOutcome::Released
    );
    assert!(store_b.stake(&uri, "agent-b", ttl, None).unwrap().is_staked());
}

#[test]
fn scenario_lease_expiry_determinism() {
    // A claim with ttl=d is indistinguishable from absent at t0+d, with or
    // without release.
    let h = Harness::new();
    let store = h.open_store();
    let uri = ResourceUri::workspace("proj", "ws-1").unwrap();

    store
        .stake(&uri, "agent-a", Duration::from_secs(60), None)
        .unwrap();

    h.clock.set(T0 + 59);
    assert!(!store
        .stake(&uri, "agent-b", Duration::from_secs(60), None)
        .unwrap()
        .is_staked());

    h.clock.set(T0 + 60);
    assert!(store.check(&uri).unwrap().is_none());
    assert!(store
        .stake(&uri, "agent-b", Duration::from_secs(60), None)
        .unwrap()
        .is_staked());
}

#[test]
fn scenario_slot_exhaustion() {
    // maxLeads=2; three candidates race; exactly two win; the loser gets
    // in after a release.
    let h = Harness::new();
    let ttl = Duration::from_secs(8 * 3600);

    let allocators: Vec<SlotAllocator> = (0..3)
        .map(|_| SlotAllocator::new(h.open_store(), "proj", 2, ttl))
        .collect();

    let mut slots = Vec::new();
    let mut capacity_refusals = 0;
    for alloc in &allocators {
        match alloc.acquire("lead").unwrap() {
            AdmissionOutcome::Admitted(slot) => slots.push(slot),
            AdmissionOutcome::AtCapacity { occupants } => {
                capacity_refusals += 1;
                assert_eq!(occupants.len(), 2);
            },
        }
    }
    assert_eq!(slots.len(), 2);
    assert_eq!(capacity_refusals, 1);
    assert_eq!(slots[0].index, 0);
    assert_eq!(slots[1].index, 1);

    // One winner leaves; the refused candidate retries and wins its slot.
    allocators[0].release(&slots[0]).unwrap();
    match allocators[2].acquire("lead").unwrap() {
        AdmissionOutcome::Admitted(slot) => assert_eq!(slot.index, 0),
        AdmissionOutcome::AtCapacity { .. } => panic!("freed slot not reacquired"),
    }
}

#[test]
fn scenario_duplicate_event() {
    // msg-42 delivered twice inside the idempotency ttl: work runs once.
    let h = Harness::new();
    let work_done = AtomicU32::new(0);

    for delivery in 0..2 {
        let gate = IdempotencyGate::new(h.open_store(), "proj", Duration::from_secs(600));
        let handler = format!("handler-{delivery}");
        match gate.admit("msg-42", &handler).unwrap() {
            GateDecision::Proceed => {
                work_done.fetch_add(1, Ordering::SeqCst);
            },
            GateDecision::AlreadyHandled { holder } => {
                // A no-op success, never an error.
                assert_eq!(holder, "handler-0");
            },
        }
    }
    assert_eq!(work_done.load(Ordering::SeqCst), 1);
}

struct StubTasks(HashMap<String, TaskLiveness>);

impl TaskStateSource for StubTasks {
    fn task_liveness(
        &self,
        _project: &str,
        task_id: &str,
    ) -> Result<TaskLiveness, CollaboratorError> {
        Ok(self
            .0
            .get(task_id)
            .copied()
            .unwrap_or(TaskLiveness::Unknown))
    }
}

struct StubWorkspaces(Vec<String>);

impl WorkspaceCatalog for StubWorkspaces {
    fn workspace_exists(&self, _project: &str, name: &str) -> Result<bool, CollaboratorError> {
        Ok(self.0.iter().any(|n| n == name))
    }

    fn list_workspaces(&self, _project: &str) -> Result<Vec<String>, CollaboratorError> {
        Ok(self.0.clone())
    }
}

#[test]
fn scenario_orphaned_claim_detection() {
    // A crashed agent left a claim on a finished task; the auditor flags
    // and releases it; a subsequent check returns absent.
    let h = Harness::new();
    let store = h.open_store();
    let uri = ResourceUri::task("proj", "t-finished").unwrap();
    store
        .stake(&uri, "lead-0", Duration::from_secs(3600), None)
        .unwrap();

    let auditor = InvariantAuditor::new(
        h.open_store(),
        h.clock.clone(),
        "proj",
        2,
        Duration::from_secs(300),
    );
    let tasks = StubTasks(HashMap::from([(
        "t-finished".to_string(),
        TaskLiveness::Terminal,
    )]));
    let report = auditor.run(None, &tasks, &StubWorkspaces(Vec::new())).unwrap();

    assert!(report.findings.iter().any(|f| matches!(
        f,
        AuditFinding::OrphanedTaskClaim { released: true, .. }
    )));
    assert!(store.check(&uri).unwrap().is_none());
}

/// Signal that advances the shared manual clock instead of sleeping.
struct ClockSignal(Arc<ManualClock>);

impl MergeSignal for ClockSignal {
    fn announce_merged(&self) {}

    fn wait_for_merge(&self, timeout: Duration) -> bool {
        self.0.advance(timeout.as_secs().max(1));
        false
    }
}

struct CountingIntegrator(u32);

impl TrunkIntegrator for CountingIntegrator {
    fn preflight_rebase(&mut self) -> Result<(), IntegrationError> {
        Ok(())
    }

    fn integrate(&mut self) -> Result<(), IntegrationError> {
        self.0 += 1;
        Ok(())
    }
}

#[test]
fn scenario_merge_liveness_under_holder_crash() {
    // The holder of the trunk lock dies without releasing; a waiter wins
    // within the holder's ttl, not later.
    let h = Harness::new();
    let crashed = h.open_store();
    let trunk = ResourceUri::trunk("proj").unwrap();
    let config = MergeConfig::default();
    crashed.stake(&trunk, "lead-9", config.ttl, None).unwrap();

    let merger = MergeCoordinator::new(h.open_store(), h.clock.clone(), "proj", "lead-0", config);
    let mut integrator = CountingIntegrator(0);
    let outcome = merger
        .merge(&mut integrator, &ClockSignal(h.clock.clone()))
        .unwrap();

    assert!(matches!(outcome, MergeOutcome::Merged { .. }));
    assert_eq!(integrator.0, 1);
    assert!(
        h.clock.now_secs() <= T0 + MergeConfig::default().ttl.as_secs(),
        "waiter acquired later than the crashed holder's expiry"
    );
    // The waiter released cleanly on its way out.
    assert!(crashed.check(&trunk).unwrap().is_none());
}

#[test]
fn scenario_hierarchical_ownership_discovery() {
    // An orchestrator's dependent claims (its own and its workers') are
    // all discoverable by owner prefix after admission.
    let h = Harness::new();
    let store = h.open_store();
    let ttl = Duration::from_secs(3600);

    let alloc = SlotAllocator::new(store.clone(), "proj", 2, ttl);
    let AdmissionOutcome::Admitted(slot) = alloc.acquire("lead").unwrap() else {
        panic!("empty pool must admit");
    };
    assert_eq!(slot.owner, "lead-0");

    store
        .stake(
            &ResourceUri::task("proj", "t1").unwrap(),
            &slot.owner,
            ttl,
            Some("t1"),
        )
        .unwrap();
    store
        .stake(
            &ResourceUri::workspace("proj", "ws-t1").unwrap(),
            &format!("{}/worker-1", slot.owner),
            ttl,
            Some("t1"),
        )
        .unwrap();

    let mine = store
        .list(&corral_core::ListFilter::all().with_owner_prefix(&slot.owner))
        .unwrap();
    // Slot claim + task claim + the worker's workspace claim.
    assert_eq!(mine.len(), 3);
}
