//! Archive statistics and health overview.
//!
//! Provides a quick summary of what has been processed: ledger counts per
//! status, metadata records per status and vendor, and the archive's size on
//! disk. Used by `docsort stats` to confirm the loop is making progress.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use walkdir::WalkDir;

use crate::config::Config;
use crate::ledger::SqliteLedger;
use crate::models::{DocumentRecord, RecordStatus};
use crate::recorder::read_records;

/// Per-vendor breakdown of primary records.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VendorStats {
    pub classified: usize,
    pub low_confidence: usize,
}

/// Record counts derived from the metadata log.
#[derive(Debug, Default)]
pub struct RecordStats {
    pub by_status: BTreeMap<&'static str, usize>,
    pub by_vendor: BTreeMap<String, VendorStats>,
    pub last_processed: Option<i64>,
}

pub fn summarize_records(records: &[DocumentRecord]) -> RecordStats {
    let mut stats = RecordStats::default();
    for r in records {
        *stats.by_status.entry(r.status.as_str()).or_default() += 1;

        let vendor = stats.by_vendor.entry(r.vendor.clone());
        match r.status {
            RecordStatus::Classified => vendor.or_default().classified += 1,
            RecordStatus::LowConfidence => vendor.or_default().low_confidence += 1,
            _ => {}
        }

        let ts = r.processed_at.timestamp();
        stats.last_processed = Some(stats.last_processed.map_or(ts, |prev| prev.max(ts)));
    }
    stats
}

/// Run the stats command: read the ledger and log, print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let ledger_path = config.ledger_path();
    let ledger = SqliteLedger::open(
        &ledger_path,
        Duration::from_secs(config.ledger.reclaim_timeout_secs),
    )
    .await?;
    let ledger_counts = ledger.counts().await?;
    ledger.close().await;

    let log = read_records(&config.metadata_log_path())?;
    let stats = summarize_records(&log.records);
    let (archive_files, archive_bytes) = archive_usage(&config.paths.archive);
    let ledger_size = std::fs::metadata(&ledger_path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("docsort — Archive Stats");
    println!("=======================");
    println!();
    println!("  Archive:     {}", config.paths.archive.display());
    println!("  Files:       {}", archive_files);
    println!("  Size:        {}", format_bytes(archive_bytes));
    println!("  Ledger:      {} ({})", ledger_path.display(), format_bytes(ledger_size));
    println!(
        "  Last run:    {}",
        stats
            .last_processed
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );

    println!();
    println!("  Ledger:");
    if ledger_counts.is_empty() {
        println!("    (empty)");
    }
    for (status, n) in &ledger_counts {
        println!("    {:<18} {:>6}", status, n);
    }

    println!();
    println!("  Records:");
    for (status, n) in &stats.by_status {
        println!("    {:<18} {:>6}", status, n);
    }
    if !log.malformed.is_empty() {
        println!("    {:<18} {:>6}", "malformed lines", log.malformed.len());
    }

    let vendors: Vec<_> = stats
        .by_vendor
        .iter()
        .filter(|(_, v)| v.classified + v.low_confidence > 0)
        .collect();
    if !vendors.is_empty() {
        println!();
        println!("  By vendor:");
        println!("  {:<24} {:>10} {:>14}", "VENDOR", "CLASSIFIED", "LOW CONFIDENCE");
        println!("  {}", "-".repeat(50));
        for (vendor, v) in vendors {
            println!(
                "  {:<24} {:>10} {:>14}",
                vendor, v.classified, v.low_confidence
            );
        }
    }

    println!();
    Ok(())
}

/// File count and total bytes under the archive, excluding docsort's own state.
fn archive_usage(root: &Path) -> (u64, u64) {
    let mut files = 0;
    let mut bytes = 0;
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let hidden = entry
            .path()
            .strip_prefix(root)
            .map(|rel| {
                rel.components()
                    .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
            })
            .unwrap_or(false);
        if hidden || entry.file_name() == "metadata.jsonl" {
            continue;
        }
        files += 1;
        bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
    }
    (files, bytes)
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
