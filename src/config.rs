use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub paths: PathsConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    pub staging: PathBuf,
    pub archive: PathBuf,
    #[serde(default)]
    pub ledger: Option<PathBuf>,
    #[serde(default)]
    pub metadata_log: Option<PathBuf>,
    #[serde(default)]
    pub lexicon: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    #[serde(default = "default_stable_secs")]
    pub stable_secs: u64,
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            stable_secs: default_stable_secs(),
            scan_interval_secs: default_scan_interval_secs(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            workers: default_workers(),
        }
    }
}

fn default_stable_secs() -> u64 {
    15
}
fn default_scan_interval_secs() -> u64 {
    30
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.pdf".to_string()]
}
fn default_workers() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    #[serde(default = "default_head_pages")]
    pub head_pages: usize,
    #[serde(default = "default_threshold")]
    pub low_confidence_threshold: f64,
    #[serde(default = "default_filename_weight")]
    pub filename_weight: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            head_pages: default_head_pages(),
            low_confidence_threshold: default_threshold(),
            filename_weight: default_filename_weight(),
        }
    }
}

fn default_head_pages() -> usize {
    3
}
fn default_threshold() -> f64 {
    0.6
}
fn default_filename_weight() -> f64 {
    3.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    #[serde(default = "default_reclaim_timeout_secs")]
    pub reclaim_timeout_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            reclaim_timeout_secs: default_reclaim_timeout_secs(),
        }
    }
}

fn default_reclaim_timeout_secs() -> u64 {
    600
}

/// How a staged file reaches the archive.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// Atomic rename out of staging (copy + rename across filesystems).
    #[default]
    Move,
    /// Leave the staged file in place and archive a copy.
    Copy,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ArchiveConfig {
    #[serde(default)]
    pub transfer: TransferMode,
}

impl Config {
    /// Build a config in code, with every optional section at its default.
    pub fn new(staging: impl Into<PathBuf>, archive: impl Into<PathBuf>) -> Self {
        Self {
            paths: PathsConfig {
                staging: staging.into(),
                archive: archive.into(),
                ledger: None,
                metadata_log: None,
                lexicon: None,
            },
            watch: WatchConfig::default(),
            classifier: ClassifierConfig::default(),
            ledger: LedgerConfig::default(),
            archive: ArchiveConfig::default(),
        }
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.paths
            .ledger
            .clone()
            .unwrap_or_else(|| self.paths.archive.join(".docsort").join("ledger.sqlite"))
    }

    pub fn metadata_log_path(&self) -> PathBuf {
        self.paths
            .metadata_log
            .clone()
            .unwrap_or_else(|| self.paths.archive.join("metadata.jsonl"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.classifier.head_pages == 0 {
            bail!("classifier.head_pages must be > 0");
        }

        if !(0.0..=1.0).contains(&self.classifier.low_confidence_threshold) {
            bail!("classifier.low_confidence_threshold must be in [0.0, 1.0]");
        }

        if !self.classifier.filename_weight.is_finite() || self.classifier.filename_weight < 0.0 {
            bail!("classifier.filename_weight must be a finite number >= 0");
        }

        if self.watch.workers == 0 {
            bail!("watch.workers must be >= 1");
        }

        if self.watch.include_globs.is_empty() {
            bail!("watch.include_globs must not be empty");
        }

        for pattern in self
            .watch
            .include_globs
            .iter()
            .chain(&self.watch.exclude_globs)
        {
            globset::Glob::new(pattern)
                .with_context(|| format!("invalid glob in [watch]: {}", pattern))?;
        }

        if self.paths.staging == self.paths.archive {
            bail!("paths.staging and paths.archive must differ");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
