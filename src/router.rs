//! Router / archiver: compute a destination and place the file there.
//!
//! Layout under the archive root:
//!
//! ```text
//! <vendor>/<document_type>/<topic>/<topology>/<file>        classified
//! Unknown/LowConfidence/<vendor>/<...>/<topology>/<file>     below threshold
//! Unknown/ErrorFiles/<file>                                  extraction failed
//! Unknown/Duplicates/<file>                                  fingerprint already archived
//! ```
//!
//! Placement never overwrites. A destination name is reserved with an
//! exclusive-create marker before the file is renamed into place, so two
//! instances routing the same name concurrently get `name.pdf` and
//! `name_1.pdf`. The rename itself is atomic; across filesystems the file is
//! copied to a hidden `.partial` sibling, synced, then renamed, so a reader
//! never sees a partial file at the destination.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::config::{Config, TransferMode};
use crate::models::{ClassificationResult, RecordStatus, UNKNOWN_LABEL};

pub const UNKNOWN_DIR: &str = "Unknown";
pub const LOW_CONFIDENCE_DIR: &str = "LowConfidence";
pub const ERROR_DIR: &str = "ErrorFiles";
pub const DUPLICATE_DIR: &str = "Duplicates";

const MAX_COLLISION_SUFFIX: u32 = 10_000;

#[derive(Debug, Clone)]
pub struct Router {
    archive_root: PathBuf,
    threshold: f64,
    transfer: TransferMode,
}

impl Router {
    pub fn new(archive_root: impl Into<PathBuf>, threshold: f64, transfer: TransferMode) -> Self {
        Self {
            archive_root: archive_root.into(),
            threshold,
            transfer,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.paths.archive.clone(),
            config.classifier.low_confidence_threshold,
            config.archive.transfer,
        )
    }

    pub fn transfer(&self) -> TransferMode {
        self.transfer
    }

    /// `classified` at or above the threshold, `low_confidence` below it.
    pub fn status_for(&self, result: &ClassificationResult) -> RecordStatus {
        if result.aggregate_confidence >= self.threshold {
            RecordStatus::Classified
        } else {
            RecordStatus::LowConfidence
        }
    }

    /// Planned destination, before collision resolution.
    pub fn destination(
        &self,
        status: RecordStatus,
        result: &ClassificationResult,
        file_name: &str,
    ) -> PathBuf {
        let mut dir = self.archive_root.clone();
        match status {
            RecordStatus::Classified => {
                dir.extend(result.labels().map(sanitize_component));
            }
            RecordStatus::LowConfidence => {
                dir.push(UNKNOWN_DIR);
                dir.push(LOW_CONFIDENCE_DIR);
                dir.extend(result.labels().map(sanitize_component));
            }
            RecordStatus::ExtractionError => {
                dir.push(UNKNOWN_DIR);
                dir.push(ERROR_DIR);
            }
            RecordStatus::Duplicate => {
                dir.push(UNKNOWN_DIR);
                dir.push(DUPLICATE_DIR);
            }
        }
        dir.join(sanitize_file_name(file_name))
    }

    /// Transfer `source` to `planned` (or the first free `_N` variant of it)
    /// and return the final path.
    pub fn place(&self, source: &Path, planned: &Path) -> io::Result<PathBuf> {
        let dir = planned
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "destination has no parent"))?;
        fs::create_dir_all(dir)?;

        // Fail fast on a vanished source before reserving anything.
        fs::metadata(source)?;

        for n in 0..MAX_COLLISION_SUFFIX {
            let candidate = with_counter(planned, n);
            let Some(_reservation) = Reservation::acquire(&candidate)? else {
                continue;
            };
            if fs::symlink_metadata(&candidate).is_ok() {
                continue;
            }
            match self.transfer {
                TransferMode::Move => move_file(source, &candidate)?,
                TransferMode::Copy => copy_into_place(source, &candidate)?,
            }
            return Ok(candidate);
        }

        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free name for {}", planned.display()),
        ))
    }
}

/// Exclusive-create marker next to a destination name; removed on drop.
struct Reservation(PathBuf);

impl Reservation {
    fn acquire(target: &Path) -> io::Result<Option<Self>> {
        let marker = sibling(target, "reserve");
        match OpenOptions::new().write(true).create_new(true).open(&marker) {
            Ok(_) => Ok(Some(Reservation(marker))),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

fn move_file(source: &Path, dest: &Path) -> io::Result<()> {
    move_file_with(source, dest, |from, to| fs::rename(from, to))
}

fn move_file_with(
    source: &Path,
    dest: &Path,
    rename: impl Fn(&Path, &Path) -> io::Result<()>,
) -> io::Result<()> {
    match rename(source, dest) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(e),
        Err(e) => {
            // Most likely a cross-device rename.
            tracing::debug!(error = %e, "rename failed, falling back to copy");
            copy_into_place(source, dest)?;
            fs::remove_file(source)
        }
    }
}

fn copy_into_place(source: &Path, dest: &Path) -> io::Result<()> {
    let partial = sibling(dest, "partial");
    let result = (|| {
        fs::copy(source, &partial)?;
        fs::File::open(&partial)?.sync_all()?;
        fs::rename(&partial, dest)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result
}

/// `.name.ext.<suffix>` in the same directory as `path`.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}", name, suffix))
}

/// `name.pdf` for 0, `name_N.pdf` otherwise.
fn with_counter(path: &Path, n: u32) -> PathBuf {
    if n == 0 {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, n, ext.to_string_lossy()),
        None => format!("{}_{}", stem, n),
    };
    path.with_file_name(name)
}

/// Make a label safe as a single path component.
pub fn sanitize_component(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if trimmed.is_empty() {
        UNKNOWN_LABEL.to_string()
    } else {
        trimmed.to_string()
    }
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned = sanitize_component(name);
    // A leading dot would hide the file from the next staging scan and from
    // most browsers of the archive.
    cleaned.trim_start_matches('.').to_string()
}
