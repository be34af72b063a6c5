//! Fingerprint ledger: the single mutual-exclusion point of the pipeline.
//!
//! The [`Ledger`] trait gates exactly-once classification per content
//! fingerprint. `claim` is a compare-and-set on the fingerprint key: only one
//! caller moves it from unseen (or released, or stale-claimed) to claimed.
//! Several pipeline processes may share one ledger; the SQLite backend makes
//! that linearizable through the database write lock.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`claim`](Ledger::claim) | Take exclusive ownership of a fingerprint |
//! | [`complete`](Ledger::complete) | Record the terminal outcome |
//! | [`release`](Ledger::release) | Give a claim back after a transient failure |
//! | [`is_processed`](Ledger::is_processed) | Terminal outcome recorded? |
//! | [`find`](Ledger::find) | Look up entries by fingerprint prefix |
//! | [`list`](Ledger::list) | Query entries for incremental consumers |

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{Fingerprint, RecordStatus};

pub use memory::InMemoryLedger;
pub use sqlite::SqliteLedger;

/// Lifecycle state of a ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    Claimed,
    Released,
    Completed,
    Failed,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Claimed => "claimed",
            LedgerStatus::Released => "released",
            LedgerStatus::Completed => "completed",
            LedgerStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "claimed" => Some(LedgerStatus::Claimed),
            "released" => Some(LedgerStatus::Released),
            "completed" => Some(LedgerStatus::Completed),
            "failed" => Some(LedgerStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LedgerStatus::Completed | LedgerStatus::Failed)
    }
}

impl std::fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer to a [`Ledger::claim`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The caller now owns the fingerprint. `reclaimed` is true when it took
    /// over a released or stale claim.
    Granted { reclaimed: bool },
    /// A terminal outcome is already recorded.
    AlreadyProcessed(LedgerStatus),
    /// Another live worker holds the claim.
    AlreadyClaimed { owner: String },
}

/// Terminal outcome passed to [`Ledger::complete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// A record with this status was appended to the metadata log.
    Recorded(RecordStatus),
    /// The file reached the archive but could not be recorded.
    Failed(String),
}

impl Completion {
    pub fn status(&self) -> LedgerStatus {
        match self {
            Completion::Recorded(_) => LedgerStatus::Completed,
            Completion::Failed(_) => LedgerStatus::Failed,
        }
    }

    pub fn outcome(&self) -> String {
        match self {
            Completion::Recorded(s) => s.as_str().to_string(),
            Completion::Failed(msg) => msg.clone(),
        }
    }
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub fingerprint: Fingerprint,
    pub status: LedgerStatus,
    pub owner: String,
    pub source_path: String,
    pub destination_path: Option<String>,
    /// Record status or failure message once terminal.
    pub outcome: Option<String>,
    pub attempts: i64,
    /// Unix milliseconds.
    pub claimed_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

/// Filter for [`Ledger::list`].
#[derive(Debug, Clone, Default)]
pub struct LedgerFilter {
    pub status: Option<LedgerStatus>,
    /// Only entries completed at or after this Unix-millisecond instant.
    pub completed_since: Option<i64>,
    pub limit: Option<i64>,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Atomically claim `fp` for `owner`.
    async fn claim(&self, fp: &Fingerprint, owner: &str, source_path: &str)
        -> Result<ClaimOutcome>;

    /// Record the terminal outcome. Fails unless `owner` still holds the
    /// claim, so a worker whose stale claim was taken over learns it lost.
    async fn complete(
        &self,
        fp: &Fingerprint,
        owner: &str,
        completion: &Completion,
        destination_path: Option<&str>,
    ) -> Result<()>;

    /// Hand a claim back so the next cycle (any instance) may retry at once.
    async fn release(&self, fp: &Fingerprint, owner: &str) -> Result<()>;

    async fn is_processed(&self, fp: &Fingerprint) -> Result<bool>;

    /// Entries whose fingerprint starts with `prefix`.
    async fn find(&self, prefix: &str) -> Result<Vec<LedgerEntry>>;

    /// Entries matching `filter`, most recently updated first.
    async fn list(&self, filter: &LedgerFilter) -> Result<Vec<LedgerEntry>>;
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
