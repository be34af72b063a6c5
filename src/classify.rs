//! Multi-dimension keyword classifier.
//!
//! A pure function over `(text, filename, lexicon)`. Each of the four
//! dimensions is scored independently:
//!
//! 1. Every label scores the sum of `weight × occurrences` of its keywords in
//!    the normalized text, plus `weight × filename_weight × occurrences` in
//!    the normalized filename stem.
//! 2. The highest score wins. Ties go to the label listed first in the
//!    lexicon, so results are reproducible.
//! 3. Confidence is the winning score over the sum of all label scores in
//!    that dimension, clamped to `[0, 1]`. No signal at all yields the
//!    reserved `unknown` label with confidence 0.
//!
//! The aggregate confidence is the minimum of the four dimensions (see
//! [`ClassificationResult::new`]).

use std::path::Path;
use std::sync::Arc;

use crate::lexicon::{normalize, LabelEntry, Lexicon};
use crate::models::{ClassificationResult, Dimension, DimensionResult};

/// Lexicon plus the scoring knobs from `[classifier]`.
#[derive(Debug, Clone)]
pub struct Classifier {
    lexicon: Arc<Lexicon>,
    filename_weight: f64,
}

impl Classifier {
    pub fn new(lexicon: Arc<Lexicon>, filename_weight: f64) -> Self {
        Self {
            lexicon,
            filename_weight,
        }
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    pub fn classify(&self, text: &str, filename: &str) -> ClassificationResult {
        classify(text, filename, &self.lexicon, self.filename_weight)
    }
}

pub fn classify(
    text: &str,
    filename: &str,
    lexicon: &Lexicon,
    filename_weight: f64,
) -> ClassificationResult {
    let text_norm = normalize(text);
    let name_norm = filename_signal(filename);

    let [vendor, document_type, topic, topology] = Dimension::ALL.map(|dim| {
        classify_dimension(&text_norm, &name_norm, lexicon.labels(dim), filename_weight)
    });

    ClassificationResult::new(vendor, document_type, topic, topology)
}

fn classify_dimension(
    text_norm: &str,
    name_norm: &str,
    labels: &[LabelEntry],
    filename_weight: f64,
) -> DimensionResult {
    let mut total = 0.0;
    let mut best: Option<(f64, &LabelEntry, Vec<String>)> = None;

    for entry in labels {
        let mut score = 0.0;
        let mut evidence = Vec::new();

        for kw in &entry.keywords {
            let in_text = kw.count_in(text_norm);
            let in_name = if filename_weight > 0.0 {
                kw.count_in(name_norm)
            } else {
                0
            };
            if in_text + in_name == 0 {
                continue;
            }
            score += kw.weight * in_text as f64 + kw.weight * filename_weight * in_name as f64;
            evidence.push(kw.pattern.clone());
        }

        total += score;

        // Strictly greater: an earlier label keeps a tie.
        let better = match &best {
            Some((best_score, _, _)) => score > *best_score,
            None => score > 0.0,
        };
        if better {
            best = Some((score, entry, evidence));
        }
    }

    match best {
        Some((score, entry, evidence)) if total > 0.0 => DimensionResult {
            label: entry.label.clone(),
            confidence: (score / total).clamp(0.0, 1.0),
            score,
            evidence,
        },
        _ => DimensionResult::unknown(),
    }
}

/// Filename stem with `_` and `.` separators turned into spaces.
fn filename_signal(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    normalize(&stem.replace(['_', '.'], " "))
}
