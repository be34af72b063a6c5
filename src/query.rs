//! Ledger queries for operators and downstream consumers.
//!
//! `docsort ledger list` is the "only new files" interface: a knowledge-base
//! indexer remembers when it last ran and asks for everything completed
//! since. `docsort ledger show` joins one ledger entry with every metadata
//! record written for its fingerprint.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;

use crate::config::Config;
use crate::ledger::{Ledger, LedgerEntry, LedgerFilter, LedgerStatus, SqliteLedger};
use crate::models::DocumentRecord;
use crate::recorder::read_records;

/// Parse `YYYY-MM-DD` into Unix milliseconds at 00:00 UTC.
pub fn parse_since(since: &str) -> Result<i64> {
    let date = NaiveDate::parse_from_str(since, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{}', expected YYYY-MM-DD", since))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("invalid date '{}'", since))?;
    Ok(midnight.and_utc().timestamp_millis())
}

pub fn build_filter(
    status: Option<&str>,
    since: Option<&str>,
    limit: Option<i64>,
) -> Result<LedgerFilter> {
    let status = match status {
        Some(s) => match LedgerStatus::parse(s) {
            Some(st) => Some(st),
            None => bail!(
                "unknown status '{}'. Available: claimed, released, completed, failed",
                s
            ),
        },
        None => None,
    };
    let completed_since = since.map(parse_since).transpose()?;
    Ok(LedgerFilter {
        status,
        completed_since,
        limit,
    })
}

async fn open_ledger(config: &Config) -> Result<SqliteLedger> {
    SqliteLedger::open(
        &config.ledger_path(),
        Duration::from_secs(config.ledger.reclaim_timeout_secs),
    )
    .await
}

pub async fn run_list(
    config: &Config,
    status: Option<String>,
    since: Option<String>,
    limit: Option<i64>,
    json: bool,
) -> Result<()> {
    let filter = build_filter(status.as_deref(), since.as_deref(), limit)?;
    let ledger = open_ledger(config).await?;
    let entries = ledger.list(&filter).await?;
    ledger.close().await;

    if json {
        for e in &entries {
            println!("{}", serde_json::to_string(e)?);
        }
        return Ok(());
    }

    if entries.is_empty() {
        println!("No ledger entries.");
        return Ok(());
    }

    println!(
        "{:<14} {:<10} {:<16} {:<17} DESTINATION",
        "FINGERPRINT", "STATUS", "OUTCOME", "UPDATED"
    );
    for e in &entries {
        println!(
            "{:<14} {:<10} {:<16} {:<17} {}",
            e.fingerprint.short(),
            e.status,
            e.outcome.as_deref().unwrap_or("-"),
            format_ms(e.updated_at),
            e.destination_path.as_deref().unwrap_or("-")
        );
    }
    println!();
    println!("{} entr{}", entries.len(), if entries.len() == 1 { "y" } else { "ies" });
    Ok(())
}

/// Ledger entry plus its metadata records.
pub struct Shown {
    pub entry: LedgerEntry,
    pub records: Vec<DocumentRecord>,
}

pub async fn show(config: &Config, prefix: &str) -> Result<Shown> {
    if prefix.len() < 4 {
        bail!("fingerprint prefix must be at least 4 characters");
    }
    let ledger = open_ledger(config).await?;
    let mut matches = ledger.find(prefix).await?;
    ledger.close().await;

    let entry = match matches.len() {
        0 => bail!("no ledger entry matches '{}'", prefix),
        1 => matches.remove(0),
        n => bail!("'{}' is ambiguous ({} entries match)", prefix, n),
    };

    let records = read_records(&config.metadata_log_path())?
        .records
        .into_iter()
        .filter(|r| r.fingerprint == entry.fingerprint)
        .collect();

    Ok(Shown { entry, records })
}

pub async fn run_show(config: &Config, prefix: &str) -> Result<()> {
    let Shown { entry, records } = show(config, prefix).await?;

    println!("--- Ledger ---");
    println!("fingerprint:  {}", entry.fingerprint);
    println!("status:       {}", entry.status);
    println!("owner:        {}", entry.owner);
    println!("attempts:     {}", entry.attempts);
    println!("source:       {}", entry.source_path);
    if let Some(ref dest) = entry.destination_path {
        println!("destination:  {}", dest);
    }
    if let Some(ref outcome) = entry.outcome {
        println!("outcome:      {}", outcome);
    }
    println!("claimed_at:   {}", format_ms(entry.claimed_at));
    if let Some(done) = entry.completed_at {
        println!("completed_at: {}", format_ms(done));
    }

    println!();
    println!("--- Records ({}) ---", records.len());
    for r in &records {
        println!();
        println!("status:       {}", r.status);
        println!(
            "labels:       {} / {} / {} / {}",
            r.vendor, r.document_type, r.topic, r.topology
        );
        println!("confidence:   {:.3}", r.aggregate_confidence);
        println!("title:        {}", r.title_guess);
        println!("pages:        {}", r.page_count);
        println!("destination:  {}", r.destination_path);
        println!("lexicon:      {}", r.lexicon_version);
        if let Some(ref err) = r.error {
            println!("error:        {}", err);
        }
        println!("processed_at: {}", r.processed_at.format("%Y-%m-%d %H:%M:%S"));
    }

    Ok(())
}

pub(crate) fn format_ms(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn since_is_start_of_day_utc() {
        assert_eq!(parse_since("1970-01-02").unwrap(), 86_400_000);
        assert!(parse_since("02/01/1970").is_err());
    }

    #[test]
    fn filter_rejects_unknown_status() {
        assert!(build_filter(Some("done"), None, None).is_err());
        let f = build_filter(Some("completed"), Some("2024-01-01"), Some(5)).unwrap();
        assert_eq!(f.status, Some(LedgerStatus::Completed));
        assert_eq!(f.limit, Some(5));
        assert!(f.completed_since.is_some());
    }
}
