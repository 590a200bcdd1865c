//! nvrec-storage - Storage retention for nvrec
//!
//! Scans the recording tree and keeps it within its age and size limits.

pub mod cleanup;
pub mod error;
pub mod scan;

pub use cleanup::{CleanupEngine, CleanupReport, PassOutcome, RetentionPolicy, LOG_RESET_MARKER};
pub use error::CleanupError;
pub use scan::{scan_recordings, storage_usage, RecordingFile, StorageUsage, RECORDING_EXTENSION};
