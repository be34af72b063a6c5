//! Error taxonomy for per-file processing.
//!
//! The CLI and orchestration layers use `anyhow`. Everything that can go
//! wrong while a single staged file moves through the pipeline is expressed
//! here instead, so the loop controller can decide per kind whether to skip,
//! record, or retry, without ever aborting the scan cycle.

use serde::{Deserialize, Serialize};

/// Category of a pipeline error.
///
/// Only [`ErrorKind::FatalConfig`] ever stops the process, and it does so
/// before any staged file is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// File vanished or a permission race occurred. Skipped, retried next cycle.
    TransientIo,
    /// Corrupt, encrypted or empty document. Routed to the error bucket.
    ExtractionFailure,
    /// Classification succeeded below the threshold. Routed to quarantine.
    LowConfidence,
    /// Another instance holds the claim. Skipped silently.
    LedgerContention,
    /// Missing archive root, unreadable lexicon, invalid option.
    FatalConfig,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransientIo => "transient_io",
            ErrorKind::ExtractionFailure => "extraction_failure",
            ErrorKind::LowConfidence => "low_confidence",
            ErrorKind::LedgerContention => "ledger_contention",
            ErrorKind::FatalConfig => "fatal_config",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text extraction failure. A normal, recorded outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    #[error("corrupt document: {0}")]
    Corrupt(String),
    #[error("document is encrypted")]
    Encrypted,
    #[error("no extractable text")]
    Empty,
}

impl ExtractionError {
    /// Short machine-readable tag written to the metadata log.
    pub fn tag(&self) -> &'static str {
        match self {
            ExtractionError::Corrupt(_) => "corrupt",
            ExtractionError::Encrypted => "encrypted",
            ExtractionError::Empty => "empty",
        }
    }
}

/// A failure that ended one file's processing for this cycle.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger error: {0:#}")]
    Ledger(anyhow::Error),

    #[error("metadata log error: {0:#}")]
    Recorder(anyhow::Error),
}

impl ProcessError {
    pub fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    /// A ledger refused because another process held the database lock past
    /// the busy timeout is contention; everything else here is transient:
    /// the file stays in staging (or its claim goes stale) and a later cycle
    /// picks it up again.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProcessError::Ledger(e) if is_lock_contention(e) => ErrorKind::LedgerContention,
            _ => ErrorKind::TransientIo,
        }
    }

    /// True when the underlying I/O error means the file is simply gone.
    pub fn is_vanished(&self) -> bool {
        matches!(self, ProcessError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// SQLITE_BUSY or SQLITE_LOCKED anywhere in the chain (extended codes too).
fn is_lock_contention(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|c| c.downcast_ref::<sqlx::Error>())
        .any(|e| match e {
            sqlx::Error::Database(db) => db
                .code()
                .and_then(|c| c.parse::<i32>().ok())
                .is_some_and(|code| matches!(code & 0xff, 5 | 6)),
            _ => false,
        })
}

/// Startup failure: invalid configuration, missing archive root, unreadable
/// lexicon or ledger. Always [`ErrorKind::FatalConfig`].
#[derive(Debug, thiserror::Error)]
#[error("{0:#}")]
pub struct StartupError(pub anyhow::Error);

impl StartupError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::FatalConfig
    }
}

impl From<anyhow::Error> for StartupError {
    fn from(e: anyhow::Error) -> Self {
        Self(e)
    }
}
