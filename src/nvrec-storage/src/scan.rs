//! Recording file discovery

use std::cmp::Ordering;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::warn;
use walkdir::WalkDir;

use crate::error::{CleanupError, Result};

/// Extension of recording files produced by the capture layer
pub const RECORDING_EXTENSION: &str = "dav";

/// A recording file found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

impl RecordingFile {
    /// Oldest first; ties broken by path
    pub fn age_order(&self, other: &Self) -> Ordering {
        self.modified
            .cmp(&other.modified)
            .then_with(|| self.path.cmp(&other.path))
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case(extension))
}

/// Recursively list recording files under `root`.
///
/// A missing root yields an empty list. Entries that cannot be read are
/// skipped with a warning; only a failure to open `root` itself is an error.
pub fn scan_recordings(root: &Path, extension: &str) -> Result<Vec<RecordingFile>> {
    match fs::metadata(root) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    }

    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(CleanupError::Scan {
                    root: root.to_path_buf(),
                    source: e,
                })
            }
            Err(e) => {
                warn!("skipping unreadable entry under {:?}: {}", root, e);
                continue;
            }
        };

        if !entry.file_type().is_file() || !has_extension(entry.path(), extension) {
            continue;
        }

        match entry.metadata() {
            Ok(metadata) => files.push(RecordingFile {
                path: entry.into_path(),
                size: metadata.len(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            }),
            Err(e) => warn!("skipping {:?}: {}", entry.path(), e),
        }
    }

    Ok(files)
}

/// Aggregate usage of recording files under a root
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageUsage {
    pub files: usize,
    pub bytes: u64,
}

pub fn storage_usage(root: &Path, extension: &str) -> Result<StorageUsage> {
    let files = scan_recordings(root, extension)?;
    Ok(StorageUsage {
        files: files.len(),
        bytes: files.iter().map(|f| f.size).sum(),
    })
}
