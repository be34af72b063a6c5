//! Consistency audit of the metadata log against the ledger.
//!
//! Anomalies reported:
//! - more than one primary (`classified`/`low_confidence`/`extraction_error`)
//!   record for one fingerprint, the rare crash-recovery duplicate;
//! - malformed lines in the log;
//! - ledger entries marked `failed` (archived, but the record never landed).

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;

use crate::config::Config;
use crate::ledger::{Ledger, LedgerEntry, LedgerFilter, LedgerStatus, SqliteLedger};
use crate::models::Fingerprint;
use crate::recorder::{read_records, RecordLog};

#[derive(Debug, Default)]
pub struct AuditReport {
    pub records: usize,
    /// Fingerprints with their primary record count, where the count is > 1.
    pub duplicate_primaries: Vec<(Fingerprint, usize)>,
    pub malformed_lines: Vec<usize>,
    pub torn_tail: bool,
    pub failed_entries: Vec<LedgerEntry>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.duplicate_primaries.is_empty()
            && self.malformed_lines.is_empty()
            && self.failed_entries.is_empty()
    }
}

pub fn audit_log(log: &RecordLog) -> AuditReport {
    let mut primaries: BTreeMap<&Fingerprint, usize> = BTreeMap::new();
    for r in log.records.iter().filter(|r| r.status.is_primary()) {
        *primaries.entry(&r.fingerprint).or_default() += 1;
    }

    AuditReport {
        records: log.records.len(),
        duplicate_primaries: primaries
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(fp, n)| (fp.clone(), n))
            .collect(),
        malformed_lines: log.malformed.clone(),
        torn_tail: log.torn_tail,
        failed_entries: Vec::new(),
    }
}

pub async fn audit(config: &Config) -> Result<AuditReport> {
    let log = read_records(&config.metadata_log_path())?;
    let mut report = audit_log(&log);

    let ledger = SqliteLedger::open(
        &config.ledger_path(),
        Duration::from_secs(config.ledger.reclaim_timeout_secs),
    )
    .await?;
    report.failed_entries = ledger
        .list(&LedgerFilter {
            status: Some(LedgerStatus::Failed),
            ..Default::default()
        })
        .await?;
    ledger.close().await;

    Ok(report)
}

/// Print the audit. Returns `false` when anomalies were found.
pub async fn run_audit(config: &Config) -> Result<bool> {
    let report = audit(config).await?;

    println!("audit {}", config.metadata_log_path().display());
    println!("  records: {}", report.records);
    println!("  duplicate classifications: {}", report.duplicate_primaries.len());
    for (fp, n) in &report.duplicate_primaries {
        println!("    {} ({} records)", fp, n);
    }
    println!("  malformed lines: {}", report.malformed_lines.len());
    for line in &report.malformed_lines {
        println!("    line {}", line);
    }
    if report.torn_tail {
        println!("  torn final line: yes (ignored)");
    }
    println!("  failed ledger entries: {}", report.failed_entries.len());
    for e in &report.failed_entries {
        println!(
            "    {} {} ({})",
            e.fingerprint.short(),
            e.destination_path.as_deref().unwrap_or("-"),
            e.outcome.as_deref().unwrap_or("-")
        );
    }

    if report.is_clean() {
        println!("ok");
    } else {
        println!("anomalies found");
    }
    Ok(report.is_clean())
}
