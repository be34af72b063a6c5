//! Stability gate: admit a staged file only once it has stopped changing.
//!
//! A file is `Ready` when its size and modification time are identical
//! across two observations at least `min_interval` apart. The gate never
//! sleeps; it remembers the last observation per path and answers on the
//! next scan cycle, so no ledger claim is held while waiting.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotYet,
    Vanished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Signature {
    size: u64,
    modified: Option<SystemTime>,
}

#[derive(Debug, Clone, Copy)]
struct Observation {
    signature: Signature,
    /// When this signature was first seen unchanged.
    since: Instant,
}

#[derive(Debug)]
pub struct StabilityGate {
    min_interval: Duration,
    seen: HashMap<PathBuf, Observation>,
}

impl StabilityGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            seen: HashMap::new(),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn observe(&mut self, path: &Path) -> Readiness {
        self.observe_at(path, Instant::now())
    }

    fn observe_at(&mut self, path: &Path, now: Instant) -> Readiness {
        let meta = match std::fs::metadata(path) {
            Ok(m) if m.is_file() => m,
            _ => {
                self.seen.remove(path);
                return Readiness::Vanished;
            }
        };

        let signature = Signature {
            size: meta.len(),
            modified: meta.modified().ok(),
        };

        match self.seen.get_mut(path) {
            Some(prev) if prev.signature == signature => {
                if now.duration_since(prev.since) >= self.min_interval {
                    Readiness::Ready
                } else {
                    Readiness::NotYet
                }
            }
            Some(prev) => {
                prev.signature = signature;
                prev.since = now;
                Readiness::NotYet
            }
            None => {
                self.seen.insert(
                    path.to_path_buf(),
                    Observation {
                        signature,
                        since: now,
                    },
                );
                Readiness::NotYet
            }
        }
    }

    /// Drop the observation for a path that has left staging.
    pub fn forget(&mut self, path: &Path) {
        self.seen.remove(path);
    }

    /// Keep only observations for paths seen in the latest scan.
    pub fn retain_paths(&mut self, current: &[PathBuf]) {
        let keep: std::collections::HashSet<&PathBuf> = current.iter().collect();
        self.seen.retain(|p, _| keep.contains(p));
    }

    pub fn tracked(&self) -> usize {
        self.seen.len()
    }
}
