use std::path::Path;

use anyhow::Result;

use crate::config::Config;
use crate::lexicon::Lexicon;

/// One row of the `docsort check` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRow {
    pub component: &'static str,
    pub status: String,
    pub healthy: bool,
}

fn dir_status(path: &Path) -> (String, bool) {
    if path.is_dir() {
        ("OK".to_string(), true)
    } else if path.exists() {
        ("NOT A DIRECTORY".to_string(), false)
    } else {
        ("MISSING (run `docsort init`)".to_string(), false)
    }
}

pub fn check_rows(config: &Config) -> Vec<CheckRow> {
    let mut rows = Vec::new();

    let (status, healthy) = dir_status(&config.paths.staging);
    rows.push(CheckRow {
        component: "staging",
        status,
        healthy,
    });

    let (status, healthy) = dir_status(&config.paths.archive);
    rows.push(CheckRow {
        component: "archive",
        status,
        healthy,
    });

    let ledger = config.ledger_path();
    let (status, healthy) = if ledger.is_file() {
        ("OK".to_string(), true)
    } else {
        ("NOT INITIALIZED".to_string(), false)
    };
    rows.push(CheckRow {
        component: "ledger",
        status,
        healthy,
    });

    let (status, healthy) = match Lexicon::load_or_builtin(config.paths.lexicon.as_deref()) {
        Ok(lex) => {
            let source = if config.paths.lexicon.is_some() {
                "file"
            } else {
                "built-in"
            };
            (format!("OK ({} {})", source, lex.version()), true)
        }
        Err(e) => (format!("INVALID: {:#}", e), false),
    };
    rows.push(CheckRow {
        component: "lexicon",
        status,
        healthy,
    });

    rows
}

/// Print the health table. Returns `true` when every component is healthy.
pub fn run_check(config: &Config) -> Result<bool> {
    let rows = check_rows(config);

    println!("{:<12} {:<8} STATUS", "COMPONENT", "HEALTHY");
    for row in &rows {
        println!("{:<12} {:<8} {}", row.component, row.healthy, row.status);
    }

    Ok(rows.iter().all(|r| r.healthy))
}
