//! Staging directory scan.
//!
//! Walks the staging root and returns candidate files in a stable order.
//! Reading the file, fingerprinting and the stability check happen later in
//! the pipeline; a scan only lists paths.

use anyhow::{bail, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;

/// Suffixes of our own in-flight files inside the archive or staging tree.
const TEMP_SUFFIXES: [&str; 2] = [".partial", ".reserve"];

/// A file found in staging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub path: PathBuf,
    /// Path relative to the staging root, `/`-separated for glob matching.
    pub relative: String,
}

impl StagedFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

pub fn scan_staging(config: &Config) -> Result<Vec<StagedFile>> {
    let root = &config.paths.staging;
    if !root.is_dir() {
        bail!("Staging directory does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.watch.include_globs)?;

    let mut default_excludes = vec!["**/.git/**".to_string(), "**/.docsort/**".to_string()];
    default_excludes.extend(config.watch.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    // The archive may be nested under staging; never feed it back in.
    let archive = config
        .paths
        .archive
        .canonicalize()
        .unwrap_or_else(|_| config.paths.archive.clone());

    let mut files = Vec::new();

    let walker = WalkDir::new(root).follow_links(config.watch.follow_symlinks);
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            // A directory removed mid-walk is not an error worth failing the cycle.
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable staging entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if is_hidden_or_temp(path) || is_within(path, &archive) {
            continue;
        }

        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        files.push(StagedFile {
            path: path.to_path_buf(),
            relative: rel_str,
        });
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.relative.cmp(&b.relative));

    Ok(files)
}

fn is_hidden_or_temp(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.starts_with('.') || TEMP_SUFFIXES.iter().any(|s| name.ends_with(s))
}

fn is_within(path: &Path, dir: &Path) -> bool {
    path.canonicalize()
        .map(|p| p.starts_with(dir))
        .unwrap_or(false)
}

pub(crate) fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(GlobBuilder::new(pattern).case_insensitive(true).build()?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Config) {
        let tmp = TempDir::new().unwrap();
        let staging = tmp.path().join("staging");
        let archive = tmp.path().join("archive");
        fs::create_dir_all(&staging).unwrap();
        fs::create_dir_all(&archive).unwrap();
        let config = Config::new(staging, archive);
        (tmp, config)
    }

    #[test]
    fn lists_matching_files_sorted() {
        let (_tmp, config) = setup();
        let s = &config.paths.staging;
        fs::create_dir_all(s.join("sub")).unwrap();
        fs::write(s.join("b.pdf"), b"x").unwrap();
        fs::write(s.join("sub/a.PDF"), b"x").unwrap();
        fs::write(s.join("a.pdf"), b"x").unwrap();
        fs::write(s.join("notes.txt"), b"x").unwrap();

        let files = scan_staging(&config).unwrap();
        let rels: Vec<&str> = files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(rels, vec!["a.pdf", "b.pdf", "sub/a.PDF"]);
    }

    #[test]
    fn skips_hidden_and_in_flight_files() {
        let (_tmp, config) = setup();
        let s = &config.paths.staging;
        fs::write(s.join(".x.pdf"), b"x").unwrap();
        fs::write(s.join("y.pdf.partial"), b"x").unwrap();
        fs::write(s.join("z.pdf"), b"x").unwrap();

        let files = scan_staging(&config).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_name(), "z.pdf");
    }

    #[test]
    fn honors_exclude_globs() {
        let (_tmp, mut config) = setup();
        let s = config.paths.staging.clone();
        fs::create_dir_all(s.join("drafts")).unwrap();
        fs::write(s.join("drafts/d.pdf"), b"x").unwrap();
        fs::write(s.join("k.pdf"), b"x").unwrap();
        config.watch.exclude_globs = vec!["drafts/**".to_string()];

        let files = scan_staging(&config).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative, "k.pdf");
    }

    #[test]
    fn ignores_archive_nested_in_staging() {
        let tmp = TempDir::new().unwrap();
        let staging = tmp.path().join("staging");
        let archive = staging.join("archive");
        fs::create_dir_all(archive.join("TI")).unwrap();
        fs::write(archive.join("TI/done.pdf"), b"x").unwrap();
        fs::write(staging.join("new.pdf"), b"x").unwrap();
        let config = Config::new(staging, archive);

        let files = scan_staging(&config).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative, "new.pdf");
    }

    #[test]
    fn missing_staging_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let config = Config::new(tmp.path().join("nope"), tmp.path().join("archive"));
        assert!(scan_staging(&config).is_err());
    }
}
