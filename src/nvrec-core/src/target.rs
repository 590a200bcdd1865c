//! Recording targets
//!
//! One target per recorded channel, in either operating mode. A target owns
//! its live stream guard; the open save lives inside that guard, so a target
//! can only be saving while its stream (and therefore its login) is valid.

use chrono::{DateTime, Local};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

use nvrec_capture::{CaptureError, Connection, LiveStream};
use nvrec_storage::RECORDING_EXTENSION;

const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Stable key of a target within the running set
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetIdentity {
    HubChannel(u32),
    Camera { address: String, channel: u32 },
}

impl fmt::Display for TargetIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HubChannel(channel) => write!(f, "ch{}", channel),
            Self::Camera { address, channel } => write!(f, "{} ch{}", address, channel),
        }
    }
}

pub struct RecordingTarget {
    identity: TargetIdentity,
    channel: u32,
    output_folder: PathBuf,
    /// Standalone cameras own their login; hub channels share the hub's
    owns_login: bool,
    connection: Option<Arc<Connection>>,
    stream: Option<LiveStream>,
}

impl RecordingTarget {
    pub fn hub_channel(channel: u32, output_folder: PathBuf, hub: &Arc<Connection>) -> Self {
        Self {
            identity: TargetIdentity::HubChannel(channel),
            channel,
            output_folder,
            owns_login: false,
            connection: Some(Arc::clone(hub)),
            stream: None,
        }
    }

    pub fn camera(channel: u32, output_folder: PathBuf, connection: Arc<Connection>) -> Self {
        Self {
            identity: TargetIdentity::Camera {
                address: connection.address().to_string(),
                channel,
            },
            channel,
            output_folder,
            owns_login: true,
            connection: Some(connection),
            stream: None,
        }
    }

    pub fn identity(&self) -> &TargetIdentity {
        &self.identity
    }

    pub fn channel(&self) -> u32 {
        self.channel
    }

    pub fn output_folder(&self) -> &Path {
        &self.output_folder
    }

    pub fn owns_login(&self) -> bool {
        self.owns_login
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    pub fn is_saving(&self) -> bool {
        self.stream.as_ref().map_or(false, LiveStream::is_saving)
    }

    /// Path of the file currently being written
    pub fn current_file(&self) -> Option<&Path> {
        self.stream.as_ref().and_then(LiveStream::save_path)
    }

    pub fn start_stream(&mut self) -> Result<(), CaptureError> {
        let connection = self
            .connection
            .as_ref()
            .ok_or_else(|| CaptureError::InvalidHandle(format!("{} is not logged in", self.identity)))?;
        if self.stream.is_none() {
            self.stream = Some(LiveStream::start(connection, self.channel)?);
        }
        Ok(())
    }

    /// Open a save into a freshly named file in the output folder
    pub fn open_save(&mut self, now: DateTime<Local>) -> Result<PathBuf, CaptureError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| CaptureError::InvalidHandle(format!("{} has no live stream", self.identity)))?;

        std::fs::create_dir_all(&self.output_folder)?;
        let path = recording_file_path(&self.output_folder, self.channel, now);
        stream.start_saving(&path)?;
        Ok(path)
    }

    /// Close the open save; the target is not saving afterwards either way
    pub fn close_save(&mut self) -> Result<Option<PathBuf>, CaptureError> {
        match self.stream.as_mut() {
            Some(stream) => stream.stop_saving(),
            None => Ok(None),
        }
    }

    /// Close the save, stop the stream and, for standalone cameras, log out.
    /// Calling it on a stopped target does nothing.
    pub fn stop(&mut self) {
        if let Err(e) = self.close_save() {
            warn!("stop save {} failed: {}", self.identity, e);
        }
        self.stream = None;
        if self.owns_login {
            self.connection = None;
        }
    }
}

impl fmt::Debug for RecordingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingTarget")
            .field("identity", &self.identity)
            .field("output_folder", &self.output_folder)
            .field("connected", &self.is_connected())
            .field("streaming", &self.has_stream())
            .field("saving", &self.is_saving())
            .finish()
    }
}

/// `<folder>/ch<N>_<YYYYmmdd_HHMMSS>.dav`, suffixed `_<k>` if that name is taken
pub fn recording_file_path(folder: &Path, channel: u32, now: DateTime<Local>) -> PathBuf {
    let stem = format!("ch{}_{}", channel, now.format(FILE_TIMESTAMP_FORMAT));
    let path = folder.join(format!("{}.{}", stem, RECORDING_EXTENSION));
    if !path.exists() {
        return path;
    }

    (1u32..)
        .map(|k| folder.join(format!("{}_{}.{}", stem, k, RECORDING_EXTENSION)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(path)
}

/// Folder name for a standalone camera, derived from its address
pub fn camera_folder_name(address: &str) -> String {
    let sanitized: String = address
        .trim()
        .chars()
        .map(|c| match c {
            '.' | ':' | '\\' | '/' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            '\0'..='\x1f' => '_',
            _ => c,
        })
        .collect();

    if sanitized.is_empty() {
        "camera".to_string()
    } else {
        sanitized
    }
}
