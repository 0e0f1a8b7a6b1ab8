//! Invariant auditor unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::claim::{InMemoryClaimStore, StakeOutcome};
use crate::clock::ManualClock;

const T0: u64 = 1_700_000_000;
const GRACE: Duration = Duration::from_secs(300);

/// Task tracker stub backed by a map of terminal task ids.
#[derive(Default)]
struct StubTasks {
    liveness: HashMap<String, TaskLiveness>,
}

impl StubTasks {
    fn with(mut self, task_id: &str, liveness: TaskLiveness) -> Self {
        self.liveness.insert(task_id.to_string(), liveness);
        self
    }
}

impl TaskStateSource for StubTasks {
    fn task_liveness(
        &self,
        _project: &str,
        task_id: &str,
    ) -> Result<TaskLiveness, CollaboratorError> {
        Ok(self
            .liveness
            .get(task_id)
            .copied()
            .unwrap_or(TaskLiveness::Unknown))
    }
}

/// Workspace catalog stub backed by a name list.
#[derive(Default)]
struct StubWorkspaces {
    names: Vec<String>,
}

impl StubWorkspaces {
    fn with(mut self, name: &str) -> Self {
        self.names.push(name.to_string());
        self
    }
}

impl WorkspaceCatalog for StubWorkspaces {
    fn workspace_exists(&self, _project: &str, name: &str) -> Result<bool, CollaboratorError> {
        Ok(self.names.iter().any(|n| n == name))
    }

    fn list_workspaces(&self, _project: &str) -> Result<Vec<String>, CollaboratorError> {
        Ok(self.names.clone())
    }
}

struct Fixture {
    store: Arc<InMemoryClaimStore>,
    clock: Arc<ManualClock>,
    auditor: InvariantAuditor,
}

fn fixture() -> Fixture {
    let clock = Arc::new(ManualClock::new(T0));
    let store = Arc::new(InMemoryClaimStore::new(clock.clone()));
    let auditor = InvariantAuditor::new(store.clone(), clock.clone(), "proj", 2, GRACE);
    Fixture {
        store,
        clock,
        auditor,
    }
}

fn stake(store: &InMemoryClaimStore, uri: &ResourceUri, owner: &str, memo: Option<&str>) {
    let outcome = store
        .stake(uri, owner, Duration::from_secs(3600), memo)
        .unwrap();
    assert!(matches!(outcome, StakeOutcome::Staked(_)));
}

#[test]
fn test_clean_store_yields_clean_report() {
    let fx = fixture();
    let report = fx
        .auditor
        .run(None, &StubTasks::default(), &StubWorkspaces::default())
        .unwrap();
    assert!(report.is_clean());
    assert_eq!(report.claims_scanned, 0);
}

#[test]
fn test_resumable_claims_reported_not_released() {
    let fx = fixture();
    let task = ResourceUri::task("proj", "t1").unwrap();
    stake(&fx.store, &task, "lead-0/worker-1", None);
    stake(
        &fx.store,
        &ResourceUri::task("proj", "t2").unwrap(),
        "lead-1",
        None,
    );

    let tasks = StubTasks::default()
        .with("t1", TaskLiveness::Active)
        .with("t2", TaskLiveness::Active);
    let report = fx
        .auditor
        .run(Some("lead-0"), &tasks, &StubWorkspaces::default())
        .unwrap();

    let resumable: Vec<_> = report
        .findings
        .iter()
        .filter(|f| matches!(f, AuditFinding::ResumableClaim { .. }))
        .collect();
    assert_eq!(resumable.len(), 1);
    // Reporting is not releasing.
    assert!(fx.store.check(&task).unwrap().is_some());
}

#[test]
fn test_orphaned_task_claim_released() {
    let fx = fixture();
    let done = ResourceUri::task("proj", "t-done").unwrap();
    let live = ResourceUri::task("proj", "t-live").unwrap();
    stake(&fx.store, &done, "lead-0", None);
    stake(&fx.store, &live, "lead-0", None);

    let tasks = StubTasks::default()
        .with("t-done", TaskLiveness::Terminal)
        .with("t-live", TaskLiveness::Active);
    let report = fx
        .auditor
        .run(None, &tasks, &StubWorkspaces::default())
        .unwrap();

    assert!(report.findings.iter().any(|f| matches!(
        f,
        AuditFinding::OrphanedTaskClaim { released: true, claim } if claim.uri == done
    )));
    // The orphan is gone; a subsequent check sees absent.
    assert!(fx.store.check(&done).unwrap().is_none());
    // The live task's claim is untouched.
    assert!(fx.store.check(&live).unwrap().is_some());
}

#[test]
fn test_stale_workspace_claim_released_and_leak_reported() {
    let fx = fixture();
    let gone = ResourceUri::workspace("proj", "ws-gone").unwrap();
    let real = ResourceUri::workspace("proj", "ws-real").unwrap();
    stake(&fx.store, &gone, "lead-0", None);
    stake(&fx.store, &real, "lead-0", None);

    // "ws-real" exists and is claimed; "ws-leak" exists unclaimed;
    // "ws-gone" is claimed but does not exist.
    let workspaces = StubWorkspaces::default().with("ws-real").with("ws-leak");
    let report = fx
        .auditor
        .run(None, &StubTasks::default(), &workspaces)
        .unwrap();

    assert!(report.findings.iter().any(|f| matches!(
        f,
        AuditFinding::StaleWorkspaceClaim { released: true, claim } if claim.uri == gone
    )));
    assert!(report.findings.iter().any(|f| matches!(
        f,
        AuditFinding::UnclaimedWorkspace { name, .. } if name == "ws-leak"
    )));
    assert!(fx.store.check(&gone).unwrap().is_none());
    assert!(fx.store.check(&real).unwrap().is_some());
}

#[test]
fn test_trunk_claim_exempt_from_stale_scan() {
    let fx = fixture();
    let trunk = ResourceUri::trunk("proj").unwrap();
    stake(&fx.store, &trunk, "lead-0", None);

    // The catalog does not list "default"; the trunk claim must survive.
    let report = fx
        .auditor
        .run(None, &StubTasks::default(), &StubWorkspaces::default())
        .unwrap();
    assert!(report.is_clean());
    assert!(fx.store.check(&trunk).unwrap().is_some());
}

#[test]
fn test_unpaired_claim_reported_after_grace() {
    let fx = fixture();
    let task = ResourceUri::task("proj", "t1").unwrap();
    stake(&fx.store, &task, "lead-0", Some("t1"));

    let tasks = StubTasks::default().with("t1", TaskLiveness::Active);

    // Inside the grace window: silence.
    let report = fx
        .auditor
        .run(None, &tasks, &StubWorkspaces::default())
        .unwrap();
    assert!(report.is_clean());

    // Beyond it: the missing workspace half is flagged.
    fx.clock.advance(GRACE.as_secs() + 1);
    let report = fx
        .auditor
        .run(None, &tasks, &StubWorkspaces::default())
        .unwrap();
    assert!(report.findings.iter().any(|f| matches!(
        f,
        AuditFinding::UnpairedClaim {
            missing: ResourceClass::Workspace,
            ..
        }
    )));
}

#[test]
fn test_paired_claims_are_silent() {
    let fx = fixture();
    stake(
        &fx.store,
        &ResourceUri::task("proj", "t1").unwrap(),
        "lead-0",
        Some("t1"),
    );
    stake(
        &fx.store,
        &ResourceUri::workspace("proj", "ws-t1").unwrap(),
        "lead-0",
        Some("t1"),
    );
    fx.clock.advance(GRACE.as_secs() * 2);

    let tasks = StubTasks::default().with("t1", TaskLiveness::Active);
    let workspaces = StubWorkspaces::default().with("ws-t1");
    let report = fx.auditor.run(None, &tasks, &workspaces).unwrap();
    assert!(report.is_clean(), "findings: {:?}", report.findings);
}

#[test]
fn test_slot_beyond_capacity_flagged() {
    let fx = fixture();
    // max_leads is 2; slot 5 should never exist.
    stake(
        &fx.store,
        &ResourceUri::agent_slot("proj", 0).unwrap(),
        "lead-0",
        None,
    );
    stake(
        &fx.store,
        &ResourceUri::agent_slot("proj", 5).unwrap(),
        "lead-5",
        None,
    );

    let report = fx
        .auditor
        .run(None, &StubTasks::default(), &StubWorkspaces::default())
        .unwrap();
    assert!(report.findings.iter().any(|f| matches!(
        f,
        AuditFinding::SlotBeyondCapacity { max_leads: 2, claim }
            if matches!(claim.uri, ResourceUri::AgentSlot { slot: 5, .. })
    )));
}

#[test]
fn test_concurrent_recovery_release_race_is_harmless() {
    // Two auditors detect the same orphan; the second release observes
    // NotFound and the scan completes without error.
    let fx = fixture();
    let done = ResourceUri::task("proj", "t-done").unwrap();
    stake(&fx.store, &done, "lead-0", None);

    let tasks = StubTasks::default().with("t-done", TaskLiveness::Terminal);
    let first = fx
        .auditor
        .run(None, &tasks, &StubWorkspaces::default())
        .unwrap();
    assert!(first.findings.iter().any(|f| matches!(
        f,
        AuditFinding::OrphanedTaskClaim { released: true, .. }
    )));

    // The second pass sees nothing left to do.
    let second = fx
        .auditor
        .run(None, &tasks, &StubWorkspaces::default())
        .unwrap();
    assert!(second.is_clean());
}

#[test]
fn test_collaborator_failure_propagates() {
    struct FailingTasks;
    impl TaskStateSource for FailingTasks {
        fn task_liveness(
            &self,
            _project: &str,
            _task_id: &str,
        ) -> Result<TaskLiveness, CollaboratorError> {
            Err(CollaboratorError("tracker offline".to_string()))
        }
    }

    let fx = fixture();
    stake(
        &fx.store,
        &ResourceUri::task("proj", "t1").unwrap(),
        "lead-0",
        None,
    );
    let err = fx
        .auditor
        .run(None, &FailingTasks, &StubWorkspaces::default())
        .unwrap_err();
    assert!(matches!(err, AuditError::Collaborator(_)));
}
