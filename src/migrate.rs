use anyhow::Result;
use sqlx::SqlitePool;

/// Create the ledger schema. Idempotent; safe to run from several processes.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per fingerprint, never deleted. `status` moves
    // claimed -> completed|failed, or claimed -> released -> claimed.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fingerprints (
            fingerprint TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            owner TEXT NOT NULL,
            source_path TEXT NOT NULL,
            destination_path TEXT,
            outcome TEXT,
            attempts INTEGER NOT NULL DEFAULT 1,
            claimed_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            completed_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_fingerprints_status ON fingerprints(status)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_fingerprints_completed_at ON fingerprints(completed_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
