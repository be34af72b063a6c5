//! Per-dimension keyword tables.
//!
//! A lexicon is versioned, externally loadable TOML data: four ordered lists
//! of labels (`vendor`, `document_type`, `topic`, `topology`), each with a
//! default weight and a list of keyword patterns. The position of a label in
//! its list is its tie-break priority. Lexicons are loaded once at startup and
//! shared read-only by every classification.
//!
//! ```toml
//! version = "2025.1"
//!
//! [[vendor]]
//! label = "TI"
//! keywords = ["ti", "texas instruments", { pattern = "ti.com", weight = 2.0 }]
//! ```

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Deserialize;

use crate::models::{Dimension, UNKNOWN_LABEL};

const BUILTIN_LEXICON: &str = include_str!("../config/lexicon.toml");

#[derive(Debug, Deserialize)]
struct LexiconFile {
    version: String,
    vendor: Vec<LabelSpec>,
    document_type: Vec<LabelSpec>,
    topic: Vec<LabelSpec>,
    topology: Vec<LabelSpec>,
}

#[derive(Debug, Deserialize)]
struct LabelSpec {
    label: String,
    #[serde(default = "default_weight")]
    weight: f64,
    #[serde(default)]
    keywords: Vec<KeywordSpec>,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum KeywordSpec {
    Plain(String),
    Weighted { pattern: String, weight: f64 },
}

/// A compiled keyword pattern.
#[derive(Debug, Clone)]
pub struct Keyword {
    pub pattern: String,
    pub weight: f64,
    regex: Regex,
}

impl Keyword {
    /// Number of occurrences in text already passed through [`normalize`].
    pub fn count_in(&self, normalized: &str) -> usize {
        self.regex.find_iter(normalized).count()
    }
}

/// One label of one dimension.
#[derive(Debug, Clone)]
pub struct LabelEntry {
    pub label: String,
    pub keywords: Vec<Keyword>,
}

#[derive(Debug, Clone)]
pub struct Lexicon {
    version: String,
    vendor: Vec<LabelEntry>,
    document_type: Vec<LabelEntry>,
    topic: Vec<LabelEntry>,
    topology: Vec<LabelEntry>,
}

impl Lexicon {
    /// The built-in power-electronics lexicon.
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_LEXICON).context("built-in lexicon is invalid")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read lexicon file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid lexicon file: {}", path.display()))
    }

    /// Load from `path` when configured, otherwise fall back to the built-in.
    pub fn load_or_builtin(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Self::builtin(),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: LexiconFile = toml::from_str(content).context("Failed to parse lexicon")?;

        if file.version.trim().is_empty() {
            bail!("lexicon version must not be empty");
        }

        Ok(Self {
            version: file.version,
            vendor: compile_dimension(Dimension::Vendor, file.vendor)?,
            document_type: compile_dimension(Dimension::DocumentType, file.document_type)?,
            topic: compile_dimension(Dimension::Topic, file.topic)?,
            topology: compile_dimension(Dimension::Topology, file.topology)?,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Labels of `dim` in priority order.
    pub fn labels(&self, dim: Dimension) -> &[LabelEntry] {
        match dim {
            Dimension::Vendor => &self.vendor,
            Dimension::DocumentType => &self.document_type,
            Dimension::Topic => &self.topic,
            Dimension::Topology => &self.topology,
        }
    }
}

fn compile_dimension(dim: Dimension, specs: Vec<LabelSpec>) -> Result<Vec<LabelEntry>> {
    if specs.is_empty() {
        bail!("lexicon dimension '{}' has no labels", dim.as_str());
    }

    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(specs.len());

    for spec in specs {
        let label = spec.label.trim().to_string();
        if label.is_empty() {
            bail!("empty label in dimension '{}'", dim.as_str());
        }
        if label.eq_ignore_ascii_case(UNKNOWN_LABEL) {
            bail!(
                "label '{}' in dimension '{}' is reserved",
                label,
                dim.as_str()
            );
        }
        if label.contains(['/', '\\']) || label == "." || label == ".." {
            bail!("label '{}' is not usable as a path component", label);
        }
        if !seen.insert(label.clone()) {
            bail!("duplicate label '{}' in dimension '{}'", label, dim.as_str());
        }
        check_weight(spec.weight, &label)?;

        let mut keywords = Vec::with_capacity(spec.keywords.len());
        for kw in spec.keywords {
            let (pattern, weight) = match kw {
                KeywordSpec::Plain(p) => (p, spec.weight),
                KeywordSpec::Weighted { pattern, weight } => (pattern, weight),
            };
            check_weight(weight, &label)?;
            let regex = compile_keyword(&pattern)
                .with_context(|| format!("bad keyword '{}' for label '{}'", pattern, label))?;
            keywords.push(Keyword {
                pattern,
                weight,
                regex,
            });
        }

        entries.push(LabelEntry { label, keywords });
    }

    Ok(entries)
}

fn check_weight(weight: f64, label: &str) -> Result<()> {
    if !weight.is_finite() || weight <= 0.0 {
        bail!("weight for label '{}' must be a finite number > 0", label);
    }
    Ok(())
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Keywords match whole words: a boundary is required on each side where the
/// keyword itself begins or ends with a word character.
fn compile_keyword(pattern: &str) -> Result<Regex> {
    let norm = normalize(pattern);
    if norm.is_empty() {
        bail!("keyword is empty");
    }

    let body = norm
        .split(' ')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+");

    let starts_word = norm.chars().next().is_some_and(is_word_char);
    let ends_word = norm.chars().last().is_some_and(is_word_char);

    let re = format!(
        "{}{}{}",
        if starts_word { r"\b" } else { "" },
        body,
        if ends_word { r"\b" } else { "" }
    );
    Ok(Regex::new(&re)?)
}

/// Lower-case and collapse all whitespace runs to a single space.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: &str = r#"
        version = "test-1"

        [[vendor]]
        label = "TI"
        keywords = ["ti", "texas instruments", { pattern = "ti.com", weight = 2.5 }]

        [[vendor]]
        label = "Others"
        weight = 0.5
        keywords = []

        [[document_type]]
        label = "datasheet"
        keywords = ["electrical characteristics"]

        [[topic]]
        label = "power_ic"
        keywords = ["converter"]

        [[topology]]
        label = "buck"
        keywords = ["buck", "step-down"]
    "#;

    #[test]
    fn builtin_lexicon_loads() {
        let lex = Lexicon::builtin().unwrap();
        assert!(!lex.version().is_empty());
        for dim in Dimension::ALL {
            assert!(!lex.labels(dim).is_empty(), "{} empty", dim.as_str());
        }
        assert_eq!(lex.labels(Dimension::Vendor)[0].label, "TI");
    }

    #[test]
    fn keyword_weights_inherit_or_override() {
        let lex = Lexicon::from_toml_str(SMALL).unwrap();
        let ti = &lex.labels(Dimension::Vendor)[0];
        assert_eq!(ti.keywords[0].weight, 1.0);
        assert_eq!(ti.keywords[2].pattern, "ti.com");
        assert_eq!(ti.keywords[2].weight, 2.5);
        assert!(lex.labels(Dimension::Vendor)[1].keywords.is_empty());
    }

    #[test]
    fn keywords_match_whole_words_only() {
        let lex = Lexicon::from_toml_str(SMALL).unwrap();
        let ti = &lex.labels(Dimension::Vendor)[0].keywords[0];
        assert_eq!(ti.count_in(&normalize("TI makes parts. ti again")), 2);
        assert_eq!(ti.count_in(&normalize("utility title")), 0);

        let step = &lex.labels(Dimension::Topology)[0].keywords[1];
        assert_eq!(step.count_in(&normalize("A Step-Down converter")), 1);
    }

    #[test]
    fn multiword_keyword_spans_whitespace() {
        let lex = Lexicon::from_toml_str(SMALL).unwrap();
        let ec = &lex.labels(Dimension::DocumentType)[0].keywords[0];
        assert_eq!(ec.count_in(&normalize("Electrical\n   Characteristics")), 1);
    }

    #[test]
    fn reserved_label_rejected() {
        let bad = SMALL.replace("label = \"Others\"", "label = \"Unknown\"");
        let err = Lexicon::from_toml_str(&bad).unwrap_err();
        assert!(format!("{:#}", err).contains("reserved"));
    }

    #[test]
    fn duplicate_label_rejected() {
        let bad = SMALL.replace("label = \"Others\"", "label = \"TI\"");
        let err = Lexicon::from_toml_str(&bad).unwrap_err();
        assert!(format!("{:#}", err).contains("duplicate"));
    }

    #[test]
    fn non_positive_weight_rejected() {
        let bad = SMALL.replace("weight = 0.5", "weight = 0.0");
        assert!(Lexicon::from_toml_str(&bad).is_err());
    }

    #[test]
    fn empty_dimension_rejected() {
        let bad = r#"
            version = "x"
            vendor = []
            document_type = []
            topic = []
            topology = []
        "#;
        assert!(Lexicon::from_toml_str(bad).is_err());
    }

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(normalize("  Hello\t\nWORLD  "), "hello world");
    }
}
