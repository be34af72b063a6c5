//! In-memory [`Ledger`] implementation for tests and single-process runs.
//!
//! A `HashMap` behind one `std::sync::Mutex`; holding the lock for the whole
//! check-and-set makes `claim` atomic within the process.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use super::{
    now_ms, ClaimOutcome, Completion, Ledger, LedgerEntry, LedgerFilter, LedgerStatus,
};
use crate::models::Fingerprint;

pub struct InMemoryLedger {
    entries: Mutex<HashMap<String, LedgerEntry>>,
    reclaim_timeout: Duration,
}

impl InMemoryLedger {
    pub fn new(reclaim_timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            reclaim_timeout,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, LedgerEntry>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("in-memory ledger lock poisoned"))
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new(Duration::from_secs(600))
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn claim(
        &self,
        fp: &Fingerprint,
        owner: &str,
        source_path: &str,
    ) -> Result<ClaimOutcome> {
        let now = now_ms();
        let stale_before = now - self.reclaim_timeout.as_millis() as i64;
        let mut entries = self.lock()?;

        match entries.get_mut(fp.as_str()) {
            None => {
                entries.insert(
                    fp.as_str().to_string(),
                    LedgerEntry {
                        fingerprint: fp.clone(),
                        status: LedgerStatus::Claimed,
                        owner: owner.to_string(),
                        source_path: source_path.to_string(),
                        destination_path: None,
                        outcome: None,
                        attempts: 1,
                        claimed_at: now,
                        updated_at: now,
                        completed_at: None,
                    },
                );
                Ok(ClaimOutcome::Granted { reclaimed: false })
            }
            Some(e) if e.status.is_terminal() => Ok(ClaimOutcome::AlreadyProcessed(e.status)),
            Some(e)
                if e.status == LedgerStatus::Released
                    || (e.status == LedgerStatus::Claimed && e.claimed_at <= stale_before) =>
            {
                e.status = LedgerStatus::Claimed;
                e.owner = owner.to_string();
                e.source_path = source_path.to_string();
                e.attempts += 1;
                e.claimed_at = now;
                e.updated_at = now;
                Ok(ClaimOutcome::Granted { reclaimed: true })
            }
            Some(e) => Ok(ClaimOutcome::AlreadyClaimed {
                owner: e.owner.clone(),
            }),
        }
    }

    async fn complete(
        &self,
        fp: &Fingerprint,
        owner: &str,
        completion: &Completion,
        destination_path: Option<&str>,
    ) -> Result<()> {
        let now = now_ms();
        let mut entries = self.lock()?;
        match entries.get_mut(fp.as_str()) {
            Some(e) if e.status == LedgerStatus::Claimed && e.owner == owner => {
                e.status = completion.status();
                e.outcome = Some(completion.outcome());
                e.destination_path = destination_path.map(str::to_string);
                e.updated_at = now;
                e.completed_at = Some(now);
                Ok(())
            }
            _ => bail!("fingerprint {} is not claimed by {}", fp, owner),
        }
    }

    async fn release(&self, fp: &Fingerprint, owner: &str) -> Result<()> {
        let mut entries = self.lock()?;
        if let Some(e) = entries.get_mut(fp.as_str()) {
            if e.status == LedgerStatus::Claimed && e.owner == owner {
                e.status = LedgerStatus::Released;
                e.updated_at = now_ms();
            }
        }
        Ok(())
    }

    async fn is_processed(&self, fp: &Fingerprint) -> Result<bool> {
        Ok(self
            .lock()?
            .get(fp.as_str())
            .is_some_and(|e| e.status.is_terminal()))
    }

    async fn find(&self, prefix: &str) -> Result<Vec<LedgerEntry>> {
        let prefix = prefix.to_ascii_lowercase();
        let mut found: Vec<LedgerEntry> = self
            .lock()?
            .values()
            .filter(|e| e.fingerprint.as_str().starts_with(&prefix))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        found.truncate(50);
        Ok(found)
    }

    async fn list(&self, filter: &LedgerFilter) -> Result<Vec<LedgerEntry>> {
        let mut out: Vec<LedgerEntry> = self
            .lock()?
            .values()
            .filter(|e| filter.status.map_or(true, |s| e.status == s))
            .filter(|e| match filter.completed_since {
                Some(since) => e.completed_at.is_some_and(|c| c >= since),
                None => true,
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });
        if let Some(limit) = filter.limit.filter(|l| *l >= 0) {
            out.truncate(limit as usize);
        }
        Ok(out)
    }
}
