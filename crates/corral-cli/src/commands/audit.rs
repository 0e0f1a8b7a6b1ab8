//! Invariant audit command.
//!
//! Cross-references the claim store against two external facts supplied by
//! the operator: a directory of workspaces (one subdirectory per working
//! copy) and an optional JSON file of task states
//! (`{"t1": "terminal", "t2": "active"}`). Tasks absent from the file are
//! treated as unknown and left alone.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::Args;
use corral_core::audit::{CollaboratorError, TaskLiveness, TaskStateSource, WorkspaceCatalog};
use corral_core::{AuditFinding, InvariantAuditor, SystemClock};

use super::exit_codes;
use crate::context::CliContext;

/// Arguments for `corral audit`.
#[derive(Debug, Args)]
pub struct AuditArgs {
    /// Stable identity of this process; surviving claims under it are
    /// reported as resumable work
    #[arg(long)]
    pub identity: Option<String>,

    /// Directory containing one subdirectory per workspace
    #[arg(long)]
    pub workspace_root: Option<PathBuf>,

    /// JSON file mapping task id to "active" or "terminal"
    #[arg(long)]
    pub tasks_file: Option<PathBuf>,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

/// Task source backed by the operator-supplied JSON file.
struct FileTaskSource {
    states: HashMap<String, String>,
}

impl FileTaskSource {
    fn load(path: Option<&Path>) -> Result<Self> {
        let states = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_json::from_str(&content)
                    .with_context(|| format!("parsing {}", path.display()))?
            },
            None => HashMap::new(),
        };
        Ok(Self { states })
    }
}

impl TaskStateSource for FileTaskSource {
    fn task_liveness(
        &self,
        _project: &str,
        task_id: &str,
    ) -> Result<TaskLiveness, CollaboratorError> {
        match self.states.get(task_id).map(String::as_str) {
            Some("terminal") => Ok(TaskLiveness::Terminal),
            Some("active") => Ok(TaskLiveness::Active),
            Some(other) => Err(CollaboratorError(format!(
                "unrecognized task state for {task_id}: {other}"
            ))),
            None => Ok(TaskLiveness::Unknown),
        }
    }
}

/// Workspace catalog backed by a directory of working copies.
struct DirWorkspaceCatalog {
    root: Option<PathBuf>,
}

impl WorkspaceCatalog for DirWorkspaceCatalog {
    fn workspace_exists(&self, _project: &str, name: &str) -> Result<bool, CollaboratorError> {
        match &self.root {
            // Without a catalog, claims cannot be proven stale.
            None => Ok(true),
            Some(root) => Ok(root.join(name).is_dir()),
        }
    }

    fn list_workspaces(&self, _project: &str) -> Result<Vec<String>, CollaboratorError> {
        let Some(root) = &self.root else {
            return Ok(Vec::new());
        };
        let entries = std::fs::read_dir(root)
            .map_err(|err| CollaboratorError(format!("reading {}: {err}", root.display())))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|err| CollaboratorError(format!("listing workspaces: {err}")))?;
            if entry.path().is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

fn describe(finding: &AuditFinding) -> String {
    match finding {
        AuditFinding::ResumableClaim { claim } => {
            format!("resumable: {} ({})", claim.uri, claim.owner)
        },
        AuditFinding::OrphanedTaskClaim { claim, released } => format!(
            "orphaned task claim: {} ({}){}",
            claim.uri,
            claim.owner,
            if *released { " [released]" } else { "" }
        ),
        AuditFinding::StaleWorkspaceClaim { claim, released } => format!(
            "stale workspace claim: {} ({}){}",
            claim.uri,
            claim.owner,
            if *released { " [released]" } else { "" }
        ),
        AuditFinding::UnclaimedWorkspace { project, name } => {
            format!("unclaimed workspace: {project}/{name} (not destroying)")
        },
        AuditFinding::UnpairedClaim {
            claim,
            missing,
            age_secs,
        } => format!(
            "unpaired claim: {} missing its {missing} partner for {age_secs}s",
            claim.uri
        ),
        AuditFinding::SlotBeyondCapacity { claim, max_leads } => {
            format!("slot beyond capacity: {} (max {max_leads})", claim.uri)
        },
    }
}

/// `corral audit` - exit 0 always; findings are reports, not failures.
pub fn run(ctx: &CliContext, args: &AuditArgs) -> Result<u8> {
    let auditor = InvariantAuditor::new(
        ctx.store(),
        std::sync::Arc::new(SystemClock),
        &ctx.config.project,
        ctx.config.max_leads,
        ctx.config.pair_grace,
    );
    let tasks = FileTaskSource::load(args.tasks_file.as_deref())?;
    let workspaces = DirWorkspaceCatalog {
        root: args.workspace_root.clone(),
    };

    let report = auditor.run(args.identity.as_deref(), &tasks, &workspaces)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.is_clean() {
        println!("clean: {} claims scanned", report.claims_scanned);
    } else {
        println!(
            "{} findings over {} claims:",
            report.findings.len(),
            report.claims_scanned
        );
        for finding in &report.findings {
            println!("  {}", describe(finding));
        }
    }
    Ok(exit_codes::SUCCESS)
}
