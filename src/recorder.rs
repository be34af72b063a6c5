//! Metadata recorder: the append-only JSON Lines log.
//!
//! One [`DocumentRecord`] per line, written with a single `write_all` on a
//! file opened in append mode and synced before returning. Every line is
//! self-contained, so a reader can start at any line boundary. A crash can
//! at worst leave one torn final line, which [`read_records`] skips; the
//! next append terminates it first so the new record starts a fresh line.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::models::DocumentRecord;

#[derive(Debug, Clone)]
pub struct MetadataRecorder {
    path: PathBuf,
}

impl MetadataRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &DocumentRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record).context("Failed to serialize record")?;
        line.push(b'\n');

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open metadata log: {}", self.path.display()))?;
        if ends_torn(&mut file)? {
            line.insert(0, b'\n');
        }
        file.write_all(&line)
            .with_context(|| format!("Failed to append to {}", self.path.display()))?;
        file.sync_data()?;
        Ok(())
    }
}

/// True when the log is non-empty and its last byte is not a newline.
fn ends_torn(file: &mut fs::File) -> Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// Parsed contents of a metadata log.
#[derive(Debug, Default)]
pub struct RecordLog {
    pub records: Vec<DocumentRecord>,
    /// Lines that were not valid records (excluding a torn final line).
    pub malformed: Vec<usize>,
    /// The last line had no newline and did not parse.
    pub torn_tail: bool,
}

/// Read every record. A missing log is an empty log.
pub fn read_records(path: &Path) -> Result<RecordLog> {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(RecordLog::default()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to open {}", path.display()));
        }
    };

    let mut log = RecordLog::default();
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    let mut line_no = 0;

    // Bytes, not str: a torn multi-byte character must not fail the read.
    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            break;
        }
        line_no += 1;
        let complete = buf.last() == Some(&b'\n');
        if buf.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<DocumentRecord>(&buf) {
            Ok(rec) => log.records.push(rec),
            Err(_) if !complete => log.torn_tail = true,
            Err(e) => {
                tracing::debug!(line = line_no, error = %e, "malformed metadata line");
                log.malformed.push(line_no);
            }
        }
    }

    Ok(log)
}
