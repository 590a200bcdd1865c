//! Capture error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    /// Failure reported by the capture device layer, with its last-error code.
    #[error("capture sdk error {code}: {message}")]
    Sdk { code: i32, message: String },

    #[error("capture client not initialized")]
    NotInitialized,

    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    #[error("save already open on stream {0}")]
    AlreadySaving(u64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    pub fn sdk(code: i32, message: impl Into<String>) -> Self {
        Self::Sdk {
            code,
            message: message.into(),
        }
    }

    /// Last-error code, if the failure came from the device layer
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Sdk { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;
