//! Cleanup error types

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CleanupError {
    #[error("failed to scan {root:?}: {source}")]
    Scan {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CleanupError>;
