//! Crash recovery / invariant auditor.
//!
//! A read-only scan run at process startup that cross-references every
//! claim in the store against external facts - task state and workspace
//! existence - to surface what a crashed owner left behind:
//!
//! - claims owned by a previous incarnation of the caller, reported as
//!   resumable work instead of starting fresh;
//! - task claims whose task is already terminal (**orphaned claims**,
//!   auto-released);
//! - workspace claims with no underlying workspace (stale, auto-released);
//! - workspaces with no claim (**unclaimed resource leaks**, reported only
//!   - destroying them is a higher-level decision);
//! - task/workspace claim pairs observed unpaired beyond a grace window;
//! - agent-slot claims outside the configured slot range.
//!
//! The auditor mutates nothing except the two narrowly-scoped
//! auto-releases. Releases are idempotent-safe: two recoverers racing on
//! the same orphan both finish cleanly - one observes `Released`, the
//! other a harmless `NotFound`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::claim::{Claim, ClaimStore, ListFilter, ReleaseOutcome, StoreError};
use crate::clock::Clock;
use crate::uri::{ResourceClass, ResourceUri, TRUNK_WORKSPACE};

/// How a task looks to the external task tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskLiveness {
    /// The task is still open; its claim is legitimate.
    Active,
    /// The task reached a terminal state; a surviving claim is orphaned.
    Terminal,
    /// The tracker has no record of the task.
    Unknown,
}

/// Failure reported by an external collaborator during cross-reference.
#[derive(Debug, Error)]
#[error("collaborator query failed: {0}")]
pub struct CollaboratorError(pub String);

/// The task tracker seam. The kernel has no knowledge of task schema; it
/// only asks whether a task is still live.
pub trait TaskStateSource {
    /// Reports the liveness of one task.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] if the tracker cannot be queried.
    fn task_liveness(
        &self,
        project: &str,
        task_id: &str,
    ) -> Result<TaskLiveness, CollaboratorError>;
}

/// The workspace manager seam. Physical existence of working copies is an
/// external fact the auditor queries but does not control.
pub trait WorkspaceCatalog {
    /// Reports whether the named workspace physically exists.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] if the catalog cannot be queried.
    fn workspace_exists(&self, project: &str, name: &str) -> Result<bool, CollaboratorError>;

    /// Lists the workspaces that physically exist for a project.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] if the catalog cannot be queried.
    fn list_workspaces(&self, project: &str) -> Result<Vec<String>, CollaboratorError>;
}

/// Errors from an audit run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuditError {
    /// The claim store failed; the audit cannot say anything.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An external collaborator could not be queried.
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

/// One structured diagnostic from the auditor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditFinding {
    /// A claim owned by a previous incarnation of the caller: resume this
    /// work rather than starting fresh.
    ResumableClaim {
        /// The surviving claim.
        claim: Claim,
    },

    /// A task claim whose task already reached a terminal state. The
    /// owner crashed after finishing but before releasing.
    OrphanedTaskClaim {
        /// The orphaned claim.
        claim: Claim,
        /// Whether this auditor performed the release (`false` means a
        /// concurrent recoverer got there first).
        released: bool,
    },

    /// A workspace claim with no underlying working copy.
    StaleWorkspaceClaim {
        /// The stale claim.
        claim: Claim,
        /// Whether this auditor performed the release.
        released: bool,
    },

    /// A working copy that exists with no claim covering it. Reported,
    /// never destroyed - that requires a higher-level decision.
    UnclaimedWorkspace {
        /// The project.
        project: String,
        /// The workspace name.
        name: String,
    },

    /// A task or workspace claim whose partner (linked by matching memo)
    /// has been missing longer than the grace window - the pair is staked
    /// and released together under normal operation, so a lone half
    /// indicates a crash.
    UnpairedClaim {
        /// The half that exists.
        claim: Claim,
        /// The class the missing partner would have.
        missing: ResourceClass,
        /// How long the claim has been unpaired, in seconds.
        age_secs: u64,
    },

    /// An agent-slot claim at an index at or beyond the configured
    /// maximum - slot numbers must be dense from 0 and bounded.
    SlotBeyondCapacity {
        /// The out-of-range claim.
        claim: Claim,
        /// The configured slot bound.
        max_leads: u32,
    },
}

/// Result of one audit run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    /// Structured findings, in scan order.
    pub findings: Vec<AuditFinding>,
    /// Total unexpired claims examined.
    pub claims_scanned: usize,
}

impl AuditReport {
    /// Returns `true` if the scan found nothing to report.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Read-only invariant auditor over one project's claims.
pub struct InvariantAuditor {
    store: Arc<dyn ClaimStore>,
    clock: Arc<dyn Clock>,
    project: String,
    max_leads: u32,
    pair_grace: Duration,
}

impl std::fmt::Debug for InvariantAuditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvariantAuditor")
            .field("project", &self.project)
            .field("max_leads", &self.max_leads)
            .finish_non_exhaustive()
    }
}

impl InvariantAuditor {
    /// Creates an auditor for one project.
    #[must_use]
    pub fn new(
        store: Arc<dyn ClaimStore>,
        clock: Arc<dyn Clock>,
        project: &str,
        max_leads: u32,
        pair_grace: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            project: project.to_string(),
            max_leads,
            pair_grace,
        }
    }

    /// Runs the scan.
    ///
    /// `self_identity`, when given, is the stable identity of the calling
    /// process; claims under that owner prefix are reported as resumable.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] if the store or a collaborator cannot be
    /// queried; the audit reports nothing rather than guessing.
    pub fn run(
        &self,
        self_identity: Option<&str>,
        tasks: &dyn TaskStateSource,
        workspaces: &dyn WorkspaceCatalog,
    ) -> Result<AuditReport, AuditError> {
        let now = self.clock.now_secs();
        let claims = self
            .store
            .list(&ListFilter::all().with_project(&self.project))?;
        let mut report = AuditReport {
            claims_scanned: claims.len(),
            ..AuditReport::default()
        };

        if let Some(identity) = self_identity {
            for claim in claims.iter().filter(|c| c.owner.starts_with(identity)) {
                debug!(uri = %claim.uri, "resumable claim from a previous incarnation");
                report.findings.push(AuditFinding::ResumableClaim {
                    claim: claim.clone(),
                });
            }
        }

        self.scan_orphaned_tasks(&claims, tasks, &mut report)?;
        self.scan_workspaces(&claims, workspaces, &mut report)?;
        self.scan_unpaired(&claims, now, &mut report);
        self.scan_slots(&claims, &mut report);

        info!(
            project = %self.project,
            scanned = report.claims_scanned,
            findings = report.findings.len(),
            "audit complete"
        );
        Ok(report)
    }

    /// Releases a claim found to violate an invariant, tolerating a
    /// concurrent recoverer having released it first.
    fn auto_release(&self, claim: &Claim) -> Result<bool, StoreError> {
        match self.store.release(&claim.uri, &claim.owner)? {
            ReleaseOutcome::Released => Ok(true),
            ReleaseOutcome::NotFound => {
                debug!(uri = %claim.uri, "already released by a concurrent recoverer");
                Ok(false)
            },
            ReleaseOutcome::NotOwner { holder } => {
                // The resource was re-staked between list and release;
                // the new claim is none of our business.
                debug!(uri = %claim.uri, holder = %holder, "re-staked since scan; leaving alone");
                Ok(false)
            },
        }
    }

    fn scan_orphaned_tasks(
        &self,
        claims: &[Claim],
        tasks: &dyn TaskStateSource,
        report: &mut AuditReport,
    ) -> Result<(), AuditError> {
        for claim in claims {
            let ResourceUri::Task { project, id } = &claim.uri else {
                continue;
            };
            match tasks.task_liveness(project, id)? {
                TaskLiveness::Active => {},
                TaskLiveness::Unknown => {
                    debug!(uri = %claim.uri, "task unknown to tracker; leaving claim alone");
                },
                TaskLiveness::Terminal => {
                    warn!(uri = %claim.uri, owner = %claim.owner, "orphaned task claim");
                    let released = self.auto_release(claim)?;
                    report.findings.push(AuditFinding::OrphanedTaskClaim {
                        claim: claim.clone(),
                        released,
                    });
                },
            }
        }
        Ok(())
    }

    fn scan_workspaces(
        &self,
        claims: &[Claim],
        workspaces: &dyn WorkspaceCatalog,
        report: &mut AuditReport,
    ) -> Result<(), AuditError> {
        let mut claimed: HashSet<&str> = HashSet::new();
        for claim in claims {
            let ResourceUri::Workspace { project, name } = &claim.uri else {
                continue;
            };
            claimed.insert(name.as_str());
            // The trunk always exists; its claim is the merge mutex in
            // flight, not a workspace-ownership record.
            if claim.uri.is_trunk() {
                continue;
            }
            if !workspaces.workspace_exists(project, name)? {
                warn!(uri = %claim.uri, owner = %claim.owner, "stale workspace claim");
                let released = self.auto_release(claim)?;
                report.findings.push(AuditFinding::StaleWorkspaceClaim {
                    claim: claim.clone(),
                    released,
                });
            }
        }

        for name in workspaces.list_workspaces(&self.project)? {
            if name == TRUNK_WORKSPACE || claimed.contains(name.as_str()) {
                continue;
            }
            warn!(project = %self.project, workspace = %name, "unclaimed workspace leak");
            report.findings.push(AuditFinding::UnclaimedWorkspace {
                project: self.project.clone(),
                name,
            });
        }
        Ok(())
    }

    fn scan_unpaired(&self, claims: &[Claim], now: u64, report: &mut AuditReport) {
        let memo_of = |claim: &Claim, class: ResourceClass| -> Option<String> {
            (claim.uri.class() == class && !claim.uri.is_trunk())
                .then(|| claim.memo.clone())
                .flatten()
        };
        let task_memos: HashSet<String> = claims
            .iter()
            .filter_map(|c| memo_of(c, ResourceClass::Task))
            .collect();
        let workspace_memos: HashSet<String> = claims
            .iter()
            .filter_map(|c| memo_of(c, ResourceClass::Workspace))
            .collect();

        for claim in claims {
            let (memo, missing) = if let Some(memo) = memo_of(claim, ResourceClass::Task) {
                (memo, ResourceClass::Workspace)
            } else if let Some(memo) = memo_of(claim, ResourceClass::Workspace) {
                (memo, ResourceClass::Task)
            } else {
                continue;
            };
            let partner_memos = match missing {
                ResourceClass::Workspace => &workspace_memos,
                _ => &task_memos,
            };
            if partner_memos.contains(&memo) {
                continue;
            }
            let age_secs = now.saturating_sub(claim.staked_at);
            if age_secs <= self.pair_grace.as_secs() {
                continue;
            }
            warn!(uri = %claim.uri, age_secs, "claim unpaired beyond grace window");
            report.findings.push(AuditFinding::UnpairedClaim {
                claim: claim.clone(),
                missing,
                age_secs,
            });
        }
    }

    fn scan_slots(&self, claims: &[Claim], report: &mut AuditReport) {
        for claim in claims {
            let ResourceUri::AgentSlot { slot, .. } = &claim.uri else {
                continue;
            };
            if *slot >= self.max_leads {
                warn!(uri = %claim.uri, max_leads = self.max_leads, "slot beyond capacity");
                report.findings.push(AuditFinding::SlotBeyondCapacity {
                    claim: claim.clone(),
                    max_leads: self.max_leads,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests;
