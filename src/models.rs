//! Core data models used throughout docsort.
//!
//! These types represent the fingerprints, classification results, and
//! metadata records that flow through the acquisition → dedup → classify →
//! route pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ErrorKind;

/// Reserved label used when a dimension has no signal.
pub const UNKNOWN_LABEL: &str = "unknown";

/// SHA-256 content hash of a document's bytes, lower-case hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// Wrap an already-computed hex digest (ledger rows, CLI input).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One of the four independent taxonomic axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Vendor,
    DocumentType,
    Topic,
    Topology,
}

impl Dimension {
    /// Path order: `<vendor>/<document-type>/<topic>/<topology>`.
    pub const ALL: [Dimension; 4] = [
        Dimension::Vendor,
        Dimension::DocumentType,
        Dimension::Topic,
        Dimension::Topology,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Vendor => "vendor",
            Dimension::DocumentType => "document_type",
            Dimension::Topic => "topic",
            Dimension::Topology => "topology",
        }
    }
}

/// Winning label for one dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionResult {
    pub label: String,
    pub confidence: f64,
    pub score: f64,
    /// Matched keywords of the winning label, in lexicon order.
    pub evidence: Vec<String>,
}

impl DimensionResult {
    pub fn unknown() -> Self {
        Self {
            label: UNKNOWN_LABEL.to_string(),
            confidence: 0.0,
            score: 0.0,
            evidence: Vec::new(),
        }
    }
}

/// Output of the classifier: one result per dimension plus the aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub vendor: DimensionResult,
    pub document_type: DimensionResult,
    pub topic: DimensionResult,
    pub topology: DimensionResult,
    /// Minimum of the four per-dimension confidences.
    pub aggregate_confidence: f64,
}

impl ClassificationResult {
    /// Assemble a result; the aggregate is always derived, never supplied.
    pub fn new(
        vendor: DimensionResult,
        document_type: DimensionResult,
        topic: DimensionResult,
        topology: DimensionResult,
    ) -> Self {
        let aggregate_confidence = [
            vendor.confidence,
            document_type.confidence,
            topic.confidence,
            topology.confidence,
        ]
        .into_iter()
        .fold(1.0_f64, f64::min);
        Self {
            vendor,
            document_type,
            topic,
            topology,
            aggregate_confidence,
        }
    }

    /// All four dimensions forced to `unknown` with confidence 0.
    pub fn unknown() -> Self {
        Self::new(
            DimensionResult::unknown(),
            DimensionResult::unknown(),
            DimensionResult::unknown(),
            DimensionResult::unknown(),
        )
    }

    pub fn get(&self, dim: Dimension) -> &DimensionResult {
        match dim {
            Dimension::Vendor => &self.vendor,
            Dimension::DocumentType => &self.document_type,
            Dimension::Topic => &self.topic,
            Dimension::Topology => &self.topology,
        }
    }

    /// Labels in archive path order.
    pub fn labels(&self) -> [&str; 4] {
        [
            self.vendor.label.as_str(),
            self.document_type.label.as_str(),
            self.topic.label.as_str(),
            self.topology.label.as_str(),
        ]
    }
}

/// Terminal status of a processed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Classified,
    LowConfidence,
    ExtractionError,
    Duplicate,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Classified => "classified",
            RecordStatus::LowConfidence => "low_confidence",
            RecordStatus::ExtractionError => "extraction_error",
            RecordStatus::Duplicate => "duplicate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "classified" => Some(RecordStatus::Classified),
            "low_confidence" => Some(RecordStatus::LowConfidence),
            "extraction_error" => Some(RecordStatus::ExtractionError),
            "duplicate" => Some(RecordStatus::Duplicate),
            _ => None,
        }
    }

    /// Taxonomy kind carried by records of this status, if any.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            RecordStatus::LowConfidence => Some(ErrorKind::LowConfidence),
            RecordStatus::ExtractionError => Some(ErrorKind::ExtractionFailure),
            RecordStatus::Classified | RecordStatus::Duplicate => None,
        }
    }

    /// Statuses that represent the one real classification of a fingerprint.
    pub fn is_primary(&self) -> bool {
        !matches!(self, RecordStatus::Duplicate)
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable line of the metadata log.
///
/// Self-contained: a reader needs nothing but this line to interpret it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub fingerprint: Fingerprint,
    pub source_path: String,
    pub destination_path: String,
    pub status: RecordStatus,
    pub vendor: String,
    pub document_type: String,
    pub topic: String,
    pub topology: String,
    pub classification: ClassificationResult,
    pub aggregate_confidence: f64,
    pub title_guess: String,
    pub language_guess: String,
    pub page_count: usize,
    pub size_bytes: u64,
    pub lexicon_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// `corrupt`, `encrypted` or `empty` for extraction failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub worker: String,
    pub processed_at: DateTime<Utc>,
}
