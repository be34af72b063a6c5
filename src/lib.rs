//! # docsort
//!
//! Content-deduplicating document classifier and archiver.
//!
//! docsort watches a staging directory fed by download tooling, waits until
//! each file has stopped changing, deduplicates it by SHA-256 fingerprint,
//! classifies its leading pages along four independent dimensions (vendor,
//! document type, topic, topology) and moves it into a browsable archive
//! tree, appending one self-contained record per document to a JSON Lines
//! metadata log.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐  ┌───────────┐  ┌──────────┐  ┌──────────┐  ┌──────────┐
//! │ Staging │─▶│ Stability │─▶│  Ledger  │─▶│ Extract  │─▶│ Classify │
//! │  scan   │  │   gate    │  │  claim   │  │ (lopdf)  │  │ (lexicon)│
//! └─────────┘  └───────────┘  └────┬─────┘  └──────────┘  └────┬─────┘
//!                                  │ complete                  ▼
//!                             ┌────┴─────┐  ┌──────────┐  ┌──────────┐
//!                             │  SQLite  │◀─│ Metadata │◀─│  Router  │
//!                             │  ledger  │  │   log    │  │ (rename) │
//!                             └──────────┘  └──────────┘  └──────────┘
//! ```
//!
//! The ledger's `claim` is the only synchronization point, so several
//! `docsort run` processes may share one staging area, ledger and archive.
//!
//! ## Quick Start
//!
//! ```bash
//! docsort init                   # create archive, staging and ledger
//! docsort run                    # watch staging until Ctrl-C
//! docsort run --once --dry-run   # show where staged files would go
//! docsort ledger list --since 2025-01-01 --json
//! docsort audit
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Per-file error taxonomy |
//! | [`models`] | Fingerprints, classification results, records |
//! | [`lexicon`] | Versioned keyword tables |
//! | [`classify`] | Multi-dimension keyword classifier |
//! | [`extract`] | Leading-page text extraction |
//! | [`stability`] | Stability gate for partially written files |
//! | [`staging`] | Staging directory scan |
//! | [`ledger`] | Fingerprint ledger (SQLite and in-memory) |
//! | [`router`] | Destination layout and atomic placement |
//! | [`recorder`] | Append-only metadata log |
//! | [`pipeline`] | Per-file pipeline and loop controller |
//! | [`db`] | Database connection |
//! | [`migrate`] | Ledger schema |
//! | [`query`] | `ledger list` / `ledger show` |
//! | [`stats`] | Archive and ledger totals |
//! | [`audit`] | Metadata log anomaly check |
//! | [`check`] | Component health table |
//! | [`classify_cmd`] | One-off classification |

pub mod audit;
pub mod check;
pub mod classify;
pub mod classify_cmd;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod ledger;
pub mod lexicon;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod query;
pub mod recorder;
pub mod router;
pub mod stability;
pub mod staging;
pub mod stats;
