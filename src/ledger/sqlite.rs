//! SQLite-backed [`Ledger`] implementation.
//!
//! Every state transition is a single SQL statement, so SQLite's write lock
//! serializes claims across connections and across processes. Rows are
//! never deleted.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{
    now_ms, ClaimOutcome, Completion, Ledger, LedgerEntry, LedgerFilter, LedgerStatus,
};
use crate::db;
use crate::migrate;
use crate::models::Fingerprint;

pub struct SqliteLedger {
    pool: SqlitePool,
    reclaim_timeout: Duration,
}

impl SqliteLedger {
    /// Open (creating if needed) the ledger database at `path`.
    pub async fn open(path: &Path, reclaim_timeout: Duration) -> Result<Self> {
        let pool = db::connect_path(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool, reclaim_timeout))
    }

    pub fn new(pool: SqlitePool, reclaim_timeout: Duration) -> Self {
        Self {
            pool,
            reclaim_timeout,
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Row counts per ledger status.
    pub async fn counts(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM fingerprints GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("status"), r.get::<i64, _>("n")))
            .collect())
    }
}

const ENTRY_COLUMNS: &str = "fingerprint, status, owner, source_path, destination_path, outcome, \
     attempts, claimed_at, updated_at, completed_at";

fn row_to_entry(row: &SqliteRow) -> Result<LedgerEntry> {
    let status: String = row.get("status");
    let status = match LedgerStatus::parse(&status) {
        Some(s) => s,
        None => bail!("unknown ledger status in database: {}", status),
    };
    Ok(LedgerEntry {
        fingerprint: Fingerprint::from_hex(row.get::<String, _>("fingerprint")),
        status,
        owner: row.get("owner"),
        source_path: row.get("source_path"),
        destination_path: row.get("destination_path"),
        outcome: row.get("outcome"),
        attempts: row.get("attempts"),
        claimed_at: row.get("claimed_at"),
        updated_at: row.get("updated_at"),
        completed_at: row.get("completed_at"),
    })
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn claim(
        &self,
        fp: &Fingerprint,
        owner: &str,
        source_path: &str,
    ) -> Result<ClaimOutcome> {
        let now = now_ms();
        let stale_before = now - self.reclaim_timeout.as_millis() as i64;

        // Compare-and-set: insert when unseen, take over only a released or
        // stale claim. RETURNING yields no row when the WHERE refuses.
        let attempts: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO fingerprints (fingerprint, status, owner, source_path, attempts, claimed_at, updated_at)
            VALUES (?1, 'claimed', ?2, ?3, 1, ?4, ?4)
            ON CONFLICT(fingerprint) DO UPDATE SET
                status = 'claimed',
                owner = excluded.owner,
                source_path = excluded.source_path,
                attempts = fingerprints.attempts + 1,
                claimed_at = excluded.claimed_at,
                updated_at = excluded.updated_at
            WHERE fingerprints.status = 'released'
               OR (fingerprints.status = 'claimed' AND fingerprints.claimed_at <= ?5)
            RETURNING attempts
            "#,
        )
        .bind(fp.as_str())
        .bind(owner)
        .bind(source_path)
        .bind(now)
        .bind(stale_before)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(attempts) = attempts {
            return Ok(ClaimOutcome::Granted {
                reclaimed: attempts > 1,
            });
        }

        let row = sqlx::query("SELECT status, owner FROM fingerprints WHERE fingerprint = ?")
            .bind(fp.as_str())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            bail!("claim refused but no ledger row for {}", fp);
        };
        let status: String = row.get("status");
        match LedgerStatus::parse(&status) {
            Some(s) if s.is_terminal() => Ok(ClaimOutcome::AlreadyProcessed(s)),
            Some(_) => Ok(ClaimOutcome::AlreadyClaimed {
                owner: row.get("owner"),
            }),
            None => bail!("unknown ledger status in database: {}", status),
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
        let result = sqlx::query(
            r#"
            UPDATE fingerprints SET
                status = ?1,
                outcome = ?2,
                destination_path = ?3,
                updated_at = ?4,
                completed_at = ?4
            WHERE fingerprint = ?5 AND status = 'claimed' AND owner = ?6
            "#,
        )
        .bind(completion.status().as_str())
        .bind(completion.outcome())
        .bind(destination_path)
        .bind(now)
        .bind(fp.as_str())
        .bind(owner)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("fingerprint {} is not claimed by {}", fp, owner);
        }
        Ok(())
    }

    async fn release(&self, fp: &Fingerprint, owner: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE fingerprints SET status = 'released', updated_at = ?1
            WHERE fingerprint = ?2 AND status = 'claimed' AND owner = ?3
            "#,
        )
        .bind(now_ms())
        .bind(fp.as_str())
        .bind(owner)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_processed(&self, fp: &Fingerprint) -> Result<bool> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM fingerprints WHERE fingerprint = ? AND status IN ('completed', 'failed')",
        )
        .bind(fp.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(n > 0)
    }

    async fn find(&self, prefix: &str) -> Result<Vec<LedgerEntry>> {
        let pattern = format!("{}%", prefix.to_ascii_lowercase().replace(['%', '_'], ""));
        let rows = sqlx::query(&format!(
            "SELECT {} FROM fingerprints WHERE fingerprint LIKE ? ORDER BY fingerprint LIMIT 50",
            ENTRY_COLUMNS
        ))
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_entry).collect()
    }

    async fn list(&self, filter: &LedgerFilter) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM fingerprints
            WHERE (?1 IS NULL OR status = ?1)
              AND (?2 IS NULL OR completed_at >= ?2)
            ORDER BY updated_at DESC, fingerprint
            LIMIT ?3
            "#,
            ENTRY_COLUMNS
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.completed_since)
        .bind(filter.limit.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_entry).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordStatus;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::of_bytes(s.as_bytes())
    }

    async fn open(tmp: &TempDir, timeout: Duration) -> SqliteLedger {
        SqliteLedger::open(&tmp.path().join("ledger.sqlite"), timeout)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn claim_complete_then_already_processed() {
        let tmp = TempDir::new().unwrap();
        let ledger = open(&tmp, Duration::from_secs(600)).await;
        let f = fp("doc");

        assert_eq!(
            ledger.claim(&f, "w1", "/s/doc.pdf").await.unwrap(),
            ClaimOutcome::Granted { reclaimed: false }
        );
        assert!(!ledger.is_processed(&f).await.unwrap());

        ledger
            .complete(
                &f,
                "w1",
                &Completion::Recorded(RecordStatus::Classified),
                Some("/a/TI/doc.pdf"),
            )
            .await
            .unwrap();
        assert!(ledger.is_processed(&f).await.unwrap());

        assert_eq!(
            ledger.claim(&f, "w2", "/s/doc.pdf").await.unwrap(),
            ClaimOutcome::AlreadyProcessed(LedgerStatus::Completed)
        );

        // A second completion is refused.
        assert!(ledger
            .complete(&f, "w1", &Completion::Recorded(RecordStatus::Classified), None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn live_claim_blocks_other_workers() {
        let tmp = TempDir::new().unwrap();
        let ledger = open(&tmp, Duration::from_secs(600)).await;
        let f = fp("doc");

        ledger.claim(&f, "w1", "/s/doc.pdf").await.unwrap();
        assert_eq!(
            ledger.claim(&f, "w2", "/s/doc.pdf").await.unwrap(),
            ClaimOutcome::AlreadyClaimed {
                owner: "w1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn stale_claim_is_reclaimed() {
        let tmp = TempDir::new().unwrap();
        let ledger = open(&tmp, Duration::ZERO).await;
        let f = fp("doc");

        ledger.claim(&f, "crashed", "/s/doc.pdf").await.unwrap();
        assert_eq!(
            ledger.claim(&f, "w2", "/s/doc.pdf").await.unwrap(),
            ClaimOutcome::Granted { reclaimed: true }
        );
        let entry = ledger.find(f.as_str()).await.unwrap().remove(0);
        assert_eq!(entry.owner, "w2");
        assert_eq!(entry.attempts, 2);
    }

    #[tokio::test]
    async fn reclaimed_fingerprint_cannot_be_completed_by_previous_owner() {
        let tmp = TempDir::new().unwrap();
        let ledger = open(&tmp, Duration::ZERO).await;
        let f = fp("doc");

        ledger.claim(&f, "slow", "/s/doc.pdf").await.unwrap();
        ledger.claim(&f, "new", "/s/doc.pdf").await.unwrap();

        let done = Completion::Recorded(RecordStatus::Classified);
        assert!(ledger.complete(&f, "slow", &done, None).await.is_err());
        ledger.complete(&f, "new", &done, Some("/a/x.pdf")).await.unwrap();

        let entry = ledger.find(f.as_str()).await.unwrap().remove(0);
        assert_eq!(entry.owner, "new");
        assert_eq!(entry.status, LedgerStatus::Completed);
    }

    #[tokio::test]
    async fn released_claim_cannot_be_completed() {
        let tmp = TempDir::new().unwrap();
        let ledger = open(&tmp, Duration::from_secs(600)).await;
        let f = fp("doc");

        ledger.claim(&f, "w1", "/s/doc.pdf").await.unwrap();
        ledger.release(&f, "w1").await.unwrap();
        let done = Completion::Recorded(RecordStatus::Classified);
        assert!(ledger.complete(&f, "w1", &done, None).await.is_err());
        assert!(!ledger.is_processed(&f).await.unwrap());
    }

    #[tokio::test]
    async fn released_claim_is_immediately_claimable() {
        let tmp = TempDir::new().unwrap();
        let ledger = open(&tmp, Duration::from_secs(600)).await;
        let f = fp("doc");

        ledger.claim(&f, "w1", "/s/doc.pdf").await.unwrap();
        ledger.release(&f, "w1").await.unwrap();
        assert_eq!(
            ledger.claim(&f, "w2", "/s/doc.pdf").await.unwrap(),
            ClaimOutcome::Granted { reclaimed: true }
        );
    }

    #[tokio::test]
    async fn release_by_non_owner_is_ignored() {
        let tmp = TempDir::new().unwrap();
        let ledger = open(&tmp, Duration::from_secs(600)).await;
        let f = fp("doc");

        ledger.claim(&f, "w1", "/s/doc.pdf").await.unwrap();
        ledger.release(&f, "intruder").await.unwrap();
        assert!(matches!(
            ledger.claim(&f, "w2", "/s/doc.pdf").await.unwrap(),
            ClaimOutcome::AlreadyClaimed { .. }
        ));
    }

    #[tokio::test]
    async fn concurrent_instances_grant_exactly_one_claim() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ledger.sqlite");
        let timeout = Duration::from_secs(600);
        // Separate pools stand in for separate processes.
        let a = Arc::new(SqliteLedger::open(&path, timeout).await.unwrap());
        let b = Arc::new(SqliteLedger::open(&path, timeout).await.unwrap());

        for i in 0..20 {
            let f = fp(&format!("doc-{}", i));
            let (ra, rb) = tokio::join!(
                a.claim(&f, "instance-a", "/s/x.pdf"),
                b.claim(&f, "instance-b", "/s/x.pdf")
            );
            let granted = [ra.unwrap(), rb.unwrap()]
                .iter()
                .filter(|o| matches!(o, ClaimOutcome::Granted { .. }))
                .count();
            assert_eq!(granted, 1, "fingerprint {} granted {} times", i, granted);
        }
    }

    #[tokio::test]
    async fn list_filters_by_status_and_limit() {
        let tmp = TempDir::new().unwrap();
        let ledger = open(&tmp, Duration::from_secs(600)).await;

        for i in 0..3 {
            let f = fp(&format!("done-{}", i));
            ledger.claim(&f, "w", "/s").await.unwrap();
            ledger
                .complete(&f, "w", &Completion::Recorded(RecordStatus::Classified), None)
                .await
                .unwrap();
        }
        ledger.claim(&fp("pending"), "w", "/s").await.unwrap();

        let done = ledger
            .list(&LedgerFilter {
                status: Some(LedgerStatus::Completed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(done.len(), 3);
        assert!(done.iter().all(|e| e.completed_at.is_some()));

        let all = ledger.list(&LedgerFilter::default()).await.unwrap();
        assert_eq!(all.len(), 4);

        let limited = ledger
            .list(&LedgerFilter {
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);

        let future = ledger
            .list(&LedgerFilter {
                completed_since: Some(now_ms() + 60_000),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(future.is_empty());

        let counts = ledger.counts().await.unwrap();
        assert!(counts.contains(&("completed".to_string(), 3)));
        assert!(counts.contains(&("claimed".to_string(), 1)));
    }
}
