//! Retention and quota enforcement
//!
//! Three passes run in a fixed order on every cycle:
//! 1. delete recordings older than the retention horizon
//! 2. evict oldest recordings until the total fits the storage quota
//! 3. reset the service log once it grows past its cap
//!
//! Passes are isolated: a failing pass is logged and the next one still runs.
//! Within a pass, a file that cannot be deleted is logged and skipped.

use chrono::{DateTime, Local};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::scan::{scan_recordings, RecordingFile, RECORDING_EXTENSION};

/// Line written into a freshly reset service log
pub const LOG_RESET_MARKER: &str = "Log reset due to size";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Storage limits enforced by the cleanup engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Maximum age of a recording file
    pub retention: Duration,
    /// Upper bound on the total size of recording files
    pub max_storage_bytes: u64,
    /// Size past which the service log is reset
    pub max_log_bytes: u64,
}

/// Outcome of a single deletion pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassOutcome {
    pub deleted_files: usize,
    pub deleted_bytes: u64,
    pub failures: usize,
}

/// Outcome of a full cleanup cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// `None` if the pass could not run at all
    pub expired: Option<PassOutcome>,
    pub evicted: Option<PassOutcome>,
    pub log_reset: bool,
}

pub struct CleanupEngine {
    root: PathBuf,
    log_file: PathBuf,
    policy: RetentionPolicy,
}

impl CleanupEngine {
    pub fn new(root: impl Into<PathBuf>, log_file: impl Into<PathBuf>, policy: RetentionPolicy) -> Self {
        Self {
            root: root.into(),
            log_file: log_file.into(),
            policy,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Run all three passes. Never fails; errors are logged per pass.
    pub fn run(&self, now: DateTime<Local>) -> CleanupReport {
        let expired = match self.purge_expired(SystemTime::from(now)) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!("retention cleanup error: {}", e);
                None
            }
        };

        let evicted = match self.enforce_quota() {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!("storage cleanup error: {}", e);
                None
            }
        };

        // The log cannot report its own failure
        let log_reset = self.cap_log(now).unwrap_or(false);

        CleanupReport {
            expired,
            evicted,
            log_reset,
        }
    }

    /// Delete every recording last modified before `now - retention`
    pub fn purge_expired(&self, now: SystemTime) -> Result<PassOutcome> {
        let Some(cutoff) = now.checked_sub(self.policy.retention) else {
            return Ok(PassOutcome::default());
        };

        let files = scan_recordings(&self.root, RECORDING_EXTENSION)?;
        Ok(delete_expired(&files, cutoff))
    }

    /// Delete recordings oldest first until their total size fits the quota
    pub fn enforce_quota(&self) -> Result<PassOutcome> {
        let files = scan_recordings(&self.root, RECORDING_EXTENSION)?;
        Ok(evict_oldest(files, self.policy.max_storage_bytes))
    }

    /// Replace the service log with a single marker line once it exceeds its cap.
    /// Returns whether the log was reset.
    ///
    /// The marker is written to a sibling temporary file that is then renamed
    /// over the log, so a concurrent writer never lands ahead of the marker.
    pub fn cap_log(&self, now: DateTime<Local>) -> Result<bool> {
        let len = match fs::metadata(&self.log_file) {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        if len <= self.policy.max_log_bytes {
            return Ok(false);
        }

        let dir = match self.log_file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut fresh = NamedTempFile::new_in(dir)?;
        writeln!(fresh, "[{}] {}", now.format(TIMESTAMP_FORMAT), LOG_RESET_MARKER)?;
        fresh.persist(&self.log_file).map_err(|e| e.error)?;

        Ok(true)
    }
}

fn delete_expired(files: &[RecordingFile], cutoff: SystemTime) -> PassOutcome {
    let mut outcome = PassOutcome::default();

    for file in files.iter().filter(|f| f.modified < cutoff) {
        match fs::remove_file(&file.path) {
            Ok(()) => {
                info!("deleted old file: {:?}", file.path);
                outcome.deleted_files += 1;
                outcome.deleted_bytes += file.size;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{:?} already gone", file.path);
            }
            Err(e) => {
                warn!("failed to delete old file {:?}: {}", file.path, e);
                outcome.failures += 1;
            }
        }
    }

    outcome
}

/// A file that cannot be deleted keeps counting toward the total
fn evict_oldest(mut files: Vec<RecordingFile>, max_bytes: u64) -> PassOutcome {
    let mut outcome = PassOutcome::default();
    files.sort_by(|a, b| a.age_order(b));

    let mut total: u64 = files.iter().map(|f| f.size).sum();
    if total <= max_bytes {
        return outcome;
    }

    info!(
        "storage over quota ({} / {} bytes), evicting oldest recordings",
        total, max_bytes
    );

    for file in &files {
        if total <= max_bytes {
            break;
        }

        match fs::remove_file(&file.path) {
            Ok(()) => {
                info!("deleted (storage limit) {:?}", file.path);
                total -= file.size;
                outcome.deleted_files += 1;
                outcome.deleted_bytes += file.size;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{:?} disappeared before eviction", file.path);
                total -= file.size;
            }
            Err(e) => {
                warn!("failed to evict {:?}: {}", file.path, e);
                outcome.failures += 1;
            }
        }
    }

    if total > max_bytes {
        warn!(
            "storage still over quota after eviction ({} / {} bytes)",
            total, max_bytes
        );
    }

    outcome
}
