//! Claim store implementations.
//!
//! Two implementations back the [`ClaimStore`] trait:
//!
//! - [`SqliteClaimStore`]: durable, crash-safe, shared by independent OS
//!   processes. The `stake` check-and-set runs inside a `BEGIN IMMEDIATE`
//!   transaction, which is the single point of true cross-process
//!   synchronization in the kernel.
//! - [`InMemoryClaimStore`]: process-local, for tests and embedding.
//!
//! # Schema
//!
//! The `claims` table has columns: `uri` (primary key), `owner`,
//! `staked_at`, `ttl_secs`, `memo`. Expiry is never stored - it is computed
//! at read and stake time from `staked_at + ttl_secs`, so an expired row is
//! simply overwritten by the next successful stake and filtered from reads.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::{debug, warn};

use super::error::StoreError;
use super::state::{Claim, MAX_MEMO_LEN, MAX_OWNER_LEN};
use crate::clock::Clock;
use crate::uri::{ResourceClass, ResourceUri};

/// Schema for the claim store.
const CLAIMS_SCHEMA: &str = r"
-- Claim namespace
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA busy_timeout = 5000;

CREATE TABLE IF NOT EXISTS claims (
    uri       TEXT PRIMARY KEY,
    owner     TEXT NOT NULL,
    staked_at INTEGER NOT NULL,
    ttl_secs  INTEGER NOT NULL,
    memo      TEXT
);

CREATE INDEX IF NOT EXISTS idx_claims_owner ON claims(owner);
";

/// Hard cap on rows returned by [`ClaimStore::list`].
///
/// Bounds iteration if the store is corrupted with an unreasonable number
/// of rows; a healthy deployment holds tens of claims, not thousands.
pub const MAX_LIST_CLAIMS: usize = 10_000;

/// Result of a stake attempt.
///
/// `Conflict` is an expected outcome, not an error: callers wait (merge
/// mutex), try the next candidate (slot allocation), or treat the work as
/// already done (idempotency gate).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StakeOutcome {
    /// The claim was created; the caller owns the resource until release
    /// or expiry.
    Staked(Claim),

    /// An unexpired claim by another owner exists.
    Conflict {
        /// The current holder's identity.
        holder: String,
        /// Lease time left on the holder's claim.
        remaining: Duration,
    },
}

impl StakeOutcome {
    /// Returns `true` if the stake succeeded.
    #[must_use]
    pub const fn is_staked(&self) -> bool {
        matches!(self, Self::Staked(_))
    }
}

/// Result of a release attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The claim was removed.
    Released,

    /// The claim exists but belongs to someone else. Either a logic bug or
    /// the caller's lease expired and the resource was re-staked; logged by
    /// callers, never fatal.
    NotOwner {
        /// The actual current holder.
        holder: String,
    },

    /// No unexpired claim exists for the URI. Releasing an already-absent
    /// claim is harmless; concurrent crash recovery depends on this.
    NotFound,
}

/// Filter for [`ClaimStore::list`].
///
/// `owner_prefix` implements hierarchical ownership discovery: an
/// orchestrator named `lead-0` finds its own claims and those of every
/// worker it spawned (`lead-0/worker-1`, …) with a single prefix query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Match claims whose owner starts with this prefix.
    pub owner_prefix: Option<String>,
    /// Match claims of one resource class.
    pub class: Option<ResourceClass>,
    /// Match claims whose URI belongs to this project.
    pub project: Option<String>,
}

impl ListFilter {
    /// A filter matching every claim.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts the filter to an owner prefix.
    #[must_use]
    pub fn with_owner_prefix(mut self, prefix: &str) -> Self {
        self.owner_prefix = Some(prefix.to_string());
        self
    }

    /// Restricts the filter to one resource class.
    #[must_use]
    pub const fn with_class(mut self, class: ResourceClass) -> Self {
        self.class = Some(class);
        self
    }

    /// Restricts the filter to one project.
    #[must_use]
    pub fn with_project(mut self, project: &str) -> Self {
        self.project = Some(project.to_string());
        self
    }

    fn matches(&self, claim: &Claim) -> bool {
        if let Some(prefix) = &self.owner_prefix {
            if !claim.owner.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(class) = self.class {
            if claim.uri.class() != class {
                return false;
            }
        }
        if let Some(project) = &self.project {
            if claim.uri.project() != project {
                return false;
            }
        }
        true
    }
}

/// Durable claim namespace with atomic stake semantics.
///
/// All operations are non-blocking: they return immediately with an
/// outcome, a snapshot, or a [`StoreError`]. The store performs no
/// notification or callback - absence of a claim is the only signal other
/// processes ever observe.
pub trait ClaimStore: Send + Sync {
    /// Atomically stakes a claim if no unexpired claim exists for the URI.
    ///
    /// This is the sole primitive providing mutual exclusion; every
    /// higher-level protocol reduces to repeated calls to this operation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store is unreachable or the inputs
    /// exceed their bounds. Contention is reported via
    /// [`StakeOutcome::Conflict`], never as an error.
    fn stake(
        &self,
        uri: &ResourceUri,
        owner: &str,
        ttl: Duration,
        memo: Option<&str>,
    ) -> Result<StakeOutcome, StoreError>;

    /// Releases the claim on `uri` if `owner` holds it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store is unreachable. Ownership
    /// mismatches are reported via [`ReleaseOutcome`], never as errors.
    fn release(&self, uri: &ResourceUri, owner: &str) -> Result<ReleaseOutcome, StoreError>;

    /// Returns the unexpired claim on `uri`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store is unreachable.
    fn check(&self, uri: &ResourceUri) -> Result<Option<Claim>, StoreError>;

    /// Lists unexpired claims matching the filter.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store is unreachable or a row holds a
    /// URI outside the taxonomy.
    fn list(&self, filter: &ListFilter) -> Result<Vec<Claim>, StoreError>;
}

fn validate_inputs(owner: &str, ttl: Duration, memo: Option<&str>) -> Result<(), StoreError> {
    if owner.is_empty() {
        return Err(StoreError::InvalidInput {
            field: "owner",
            reason: "must not be empty".to_string(),
        });
    }
    if owner.len() > MAX_OWNER_LEN {
        return Err(StoreError::InvalidInput {
            field: "owner",
            reason: format!("exceeds {MAX_OWNER_LEN} bytes"),
        });
    }
    if ttl.as_secs() == 0 {
        return Err(StoreError::InvalidInput {
            field: "ttl",
            reason: "must be at least one second".to_string(),
        });
    }
    if let Some(memo) = memo {
        if memo.len() > MAX_MEMO_LEN {
            return Err(StoreError::InvalidInput {
                field: "memo",
                reason: format!("exceeds {MAX_MEMO_LEN} bytes"),
            });
        }
    }
    Ok(())
}

/// SQLite-backed claim store.
///
/// Safe for concurrent use from multiple processes pointed at the same
/// database file: stakes run under `BEGIN IMMEDIATE`, which takes the
/// write lock before the existence check, so two racing stakes serialize
/// and exactly one wins.
pub struct SqliteClaimStore {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SqliteClaimStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteClaimStore").finish_non_exhaustive()
    }
}

impl SqliteClaimStore {
    /// Opens (creating if necessary) a claim store at the given path.
    ///
    /// Sets WAL journal mode and a busy timeout so short lock contention
    /// between processes resolves inside SQLite rather than surfacing as
    /// spurious [`StoreError::Unavailable`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the database cannot be
    /// opened or migrated.
    pub fn open(path: &Path, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        // Set before the schema batch so concurrent first-opens contend
        // politely instead of failing fast.
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(CLAIMS_SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            clock,
        })
    }

    fn row_to_claim(
        uri: String,
        owner: String,
        staked_at: i64,
        ttl_secs: i64,
        memo: Option<String>,
    ) -> Result<Claim, StoreError> {
        let uri: ResourceUri = uri.parse()?;
        let staked_at =
            u64::try_from(staked_at).map_err(|_| StoreError::CorruptField { field: "staked_at" })?;
        let ttl_secs =
            u64::try_from(ttl_secs).map_err(|_| StoreError::CorruptField { field: "ttl_secs" })?;
        Ok(Claim {
            uri,
            owner,
            staked_at,
            ttl_secs,
            memo,
        })
    }

    fn load_claim(conn: &Connection, uri: &ResourceUri) -> Result<Option<Claim>, StoreError> {
        let row = conn
            .query_row(
                "SELECT uri, owner, staked_at, ttl_secs, memo FROM claims WHERE uri = ?1",
                params![uri.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()?;
        row.map(|(uri, owner, staked_at, ttl_secs, memo)| {
            Self::row_to_claim(uri, owner, staked_at, ttl_secs, memo)
        })
        .transpose()
    }
}

impl ClaimStore for SqliteClaimStore {
    fn stake(
        &self,
        uri: &ResourceUri,
        owner: &str,
        ttl: Duration,
        memo: Option<&str>,
    ) -> Result<StakeOutcome, StoreError> {
        validate_inputs(owner, ttl, memo)?;
        let now = self.clock.now_secs();

        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        // IMMEDIATE takes the write lock up front: the existence check and
        // the insert are one atomic step across processes.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(existing) = Self::load_claim(&tx, uri)? {
            if !existing.is_expired_at(now) {
                debug!(
                    uri = %uri,
                    holder = %existing.owner,
                    contender = %owner,
                    "stake conflict"
                );
                let remaining = existing.remaining_at(now);
                return Ok(StakeOutcome::Conflict {
                    holder: existing.owner,
                    remaining,
                });
            }
        }

        let claim = Claim {
            uri: uri.clone(),
            owner: owner.to_string(),
            staked_at: now,
            ttl_secs: ttl.as_secs(),
            memo: memo.map(str::to_string),
        };
        tx.execute(
            "INSERT OR REPLACE INTO claims (uri, owner, staked_at, ttl_secs, memo)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                claim.uri.to_string(),
                claim.owner,
                i64::try_from(claim.staked_at)
                    .map_err(|_| StoreError::CorruptField { field: "staked_at" })?,
                i64::try_from(claim.ttl_secs)
                    .map_err(|_| StoreError::CorruptField { field: "ttl_secs" })?,
                claim.memo,
            ],
        )?;
        tx.commit()?;

        debug!(uri = %uri, owner = %owner, ttl_secs = claim.ttl_secs, "claim staked");
        Ok(StakeOutcome::Staked(claim))
    }

    fn release(&self, uri: &ResourceUri, owner: &str) -> Result<ReleaseOutcome, StoreError> {
        let now = self.clock.now_secs();

        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(existing) = Self::load_claim(&tx, uri)? else {
            return Ok(ReleaseOutcome::NotFound);
        };
        // An expired claim is indistinguishable from an absent one.
        if existing.is_expired_at(now) {
            return Ok(ReleaseOutcome::NotFound);
        }
        if existing.owner != owner {
            warn!(
                uri = %uri,
                holder = %existing.owner,
                caller = %owner,
                "release refused: caller is not the holder"
            );
            return Ok(ReleaseOutcome::NotOwner {
                holder: existing.owner,
            });
        }

        tx.execute("DELETE FROM claims WHERE uri = ?1", params![uri.to_string()])?;
        tx.commit()?;

        debug!(uri = %uri, owner = %owner, "claim released");
        Ok(ReleaseOutcome::Released)
    }

    fn check(&self, uri: &ResourceUri) -> Result<Option<Claim>, StoreError> {
        let now = self.clock.now_secs();
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let claim = Self::load_claim(&conn, uri)?;
        Ok(claim.filter(|c| !c.is_expired_at(now)))
    }

    fn list(&self, filter: &ListFilter) -> Result<Vec<Claim>, StoreError> {
        let now = self.clock.now_secs();
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare(
            "SELECT uri, owner, staked_at, ttl_secs, memo FROM claims ORDER BY uri LIMIT ?1",
        )?;
        #[allow(clippy::cast_possible_wrap)] // MAX_LIST_CLAIMS fits in i64
        let rows = stmt.query_map(params![MAX_LIST_CLAIMS as i64 + 1], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut claims = Vec::new();
        let mut scanned = 0usize;
        for row in rows {
            scanned += 1;
            if scanned > MAX_LIST_CLAIMS {
                warn!(
                    max = MAX_LIST_CLAIMS,
                    "claim list truncated; store holds more rows than the scan bound"
                );
                break;
            }
            let (uri, owner, staked_at, ttl_secs, memo) = row?;
            let claim = Self::row_to_claim(uri, owner, staked_at, ttl_secs, memo)?;
            if !claim.is_expired_at(now) && filter.matches(&claim) {
                claims.push(claim);
            }
        }
        Ok(claims)
    }
}

/// In-memory claim store for tests and single-process embedding.
///
/// Identical semantics to [`SqliteClaimStore`], minus durability and
/// cross-process visibility.
pub struct InMemoryClaimStore {
    claims: Mutex<HashMap<String, Claim>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for InMemoryClaimStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryClaimStore").finish_non_exhaustive()
    }
}

impl InMemoryClaimStore {
    /// Creates an empty in-memory store using the given clock.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            claims: Mutex::new(HashMap::new()),
            clock,
        }
    }
}

impl ClaimStore for InMemoryClaimStore {
    fn stake(
        &self,
        uri: &ResourceUri,
        owner: &str,
        ttl: Duration,
        memo: Option<&str>,
    ) -> Result<StakeOutcome, StoreError> {
        validate_inputs(owner, ttl, memo)?;
        let now = self.clock.now_secs();
        let mut claims = self.claims.lock().map_err(|_| StoreError::Poisoned)?;

        let key = uri.to_string();
        if let Some(existing) = claims.get(&key) {
            if !existing.is_expired_at(now) {
                return Ok(StakeOutcome::Conflict {
                    holder: existing.owner.clone(),
                    remaining: existing.remaining_at(now),
                });
            }
        }

        let claim = Claim {
            uri: uri.clone(),
            owner: owner.to_string(),
            staked_at: now,
            ttl_secs: ttl.as_secs(),
            memo: memo.map(str::to_string),
        };
        claims.insert(key, claim.clone());
        Ok(StakeOutcome::Staked(claim))
    }

    fn release(&self, uri: &ResourceUri, owner: &str) -> Result<ReleaseOutcome, StoreError> {
        let now = self.clock.now_secs();
        let mut claims = self.claims.lock().map_err(|_| StoreError::Poisoned)?;

        let key = uri.to_string();
        let Some(existing) = claims.get(&key) else {
            return Ok(ReleaseOutcome::NotFound);
        };
        if existing.is_expired_at(now) {
            claims.remove(&key);
            return Ok(ReleaseOutcome::NotFound);
        }
        if existing.owner != owner {
            return Ok(ReleaseOutcome::NotOwner {
                holder: existing.owner.clone(),
            });
        }
        claims.remove(&key);
        Ok(ReleaseOutcome::Released)
    }

    fn check(&self, uri: &ResourceUri) -> Result<Option<Claim>, StoreError> {
        let now = self.clock.now_secs();
        let claims = self.claims.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(claims
            .get(&uri.to_string())
            .filter(|c| !c.is_expired_at(now))
            .cloned())
    }

    fn list(&self, filter: &ListFilter) -> Result<Vec<Claim>, StoreError> {
        let now = self.clock.now_secs();
        let claims = self.claims.lock().map_err(|_| StoreError::Poisoned)?;
        let mut out: Vec<Claim> = claims
            .values()
            .filter(|c| !c.is_expired_at(now) && filter.matches(c))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.uri.to_string().cmp(&b.uri.to_string()));
        Ok(out)
    }
}
