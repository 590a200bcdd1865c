//! Configuration management
//!
//! TOML-based service configuration. Sections fall back to defaults when
//! omitted; `validate` rejects combinations the service cannot run with.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use nvrec_capture::Credentials;
use nvrec_storage::RetentionPolicy;

/// Default configuration file name, resolved against the working directory
pub const DEFAULT_CONFIG_FILE: &str = "nvrec.toml";

/// Service log file name inside the output root
pub const SERVICE_LOG_FILE: &str = "service.log";

const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;
const BYTES_PER_MB: u64 = 1024 * 1024;
const SECS_PER_DAY: u64 = 24 * 60 * 60;
const MINUTES_PER_DAY: u64 = 24 * 60;

/// Where the recordings come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// One recording hub exposing several channels
    Hub,
    /// Independent cameras, each with its own login
    MultiCamera,
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mode: Mode,

    /// Root folder for recordings and the service log
    pub output_root: PathBuf,

    pub hub: Option<HubConfig>,

    /// Camera specs, "address:port:user:pass:channel"
    #[serde(default)]
    pub cameras: Vec<String>,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Hub connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    pub address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub username: String,

    pub password: String,

    /// Channels to record
    pub channels: Vec<u32>,
}

/// Recording window and rotation cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// First hour (local time) at which recording is allowed
    #[serde(default)]
    pub start_hour: u32,

    /// Hour (local time, exclusive) at which recording stops
    #[serde(default = "default_end_hour")]
    pub end_hour: u32,

    /// Minutes between file rotations
    #[serde(default = "default_rotate_minutes")]
    pub rotate_minutes: u64,
}

/// Storage limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,

    #[serde(default = "default_max_storage_gb")]
    pub max_storage_gb: u64,

    #[serde(default = "default_max_log_mb")]
    pub max_log_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_port() -> u16 { 37777 }
fn default_end_hour() -> u32 { 24 }
fn default_rotate_minutes() -> u64 { 30 }
fn default_retention_days() -> u64 { 30 }
fn default_max_storage_gb() -> u64 { 100 }
fn default_max_log_mb() -> u64 { 10 }
fn default_log_level() -> String { "info".to_string() }

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            start_hour: 0,
            end_hour: default_end_hour(),
            rotate_minutes: default_rotate_minutes(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            max_storage_gb: default_max_storage_gb(),
            max_log_mb: default_max_log_mb(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// A standalone camera to record from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSpec {
    pub address: String,
    pub port: u16,
    pub credentials: Credentials,
    pub channel: u32,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CameraSpecError {
    #[error("expected address:port:user:pass:channel, got {0} field(s)")]
    FieldCount(usize),

    #[error("empty address")]
    EmptyAddress,

    #[error("invalid port {0:?}")]
    Port(String),

    #[error("invalid channel {0:?}")]
    Channel(String),
}

impl FromStr for CameraSpec {
    type Err = CameraSpecError;

    /// The password may itself contain ':'; the channel is always the last field.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() < 5 {
            return Err(CameraSpecError::FieldCount(parts.len()));
        }

        let address = parts[0].trim();
        if address.is_empty() {
            return Err(CameraSpecError::EmptyAddress);
        }
        let port = parts[1]
            .trim()
            .parse::<u16>()
            .map_err(|_| CameraSpecError::Port(parts[1].to_string()))?;
        let last = parts[parts.len() - 1];
        let channel = last
            .trim()
            .parse::<u32>()
            .map_err(|_| CameraSpecError::Channel(last.to_string()))?;

        Ok(Self {
            address: address.to_string(),
            port,
            credentials: Credentials::new(parts[2], parts[3..parts.len() - 1].join(":")),
            channel,
        })
    }
}

/// Daily local-time interval `[start_hour, end_hour)` during which saving is allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl RecordingWindow {
    pub fn contains(&self, hour: u32) -> bool {
        hour >= self.start_hour && hour < self.end_hour
    }
}

impl fmt::Display for RecordingWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:00-{:02}:00", self.start_hour, self.end_hour)
    }
}

/// Timing and limits read by every tick; fixed after load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceClock {
    pub window: RecordingWindow,
    pub rotation_interval: Duration,
    pub retention: Duration,
    pub max_storage_bytes: u64,
    pub max_log_bytes: u64,
}

impl ServiceClock {
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            retention: self.retention,
            max_storage_bytes: self.max_storage_bytes,
            max_log_bytes: self.max_log_bytes,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config TOML")
    }

    /// Check the configuration can drive the service
    pub fn validate(&self) -> Result<()> {
        let schedule = &self.schedule;
        if schedule.end_hour > 24 {
            bail!("end_hour must be at most 24, got {}", schedule.end_hour);
        }
        if schedule.start_hour >= schedule.end_hour {
            bail!(
                "start_hour ({}) must be before end_hour ({})",
                schedule.start_hour,
                schedule.end_hour
            );
        }
        if schedule.rotate_minutes == 0 {
            bail!("rotate_minutes must be greater than zero");
        }
        if schedule.rotate_minutes > MINUTES_PER_DAY {
            bail!(
                "rotate_minutes must be at most {} (one day), got {}",
                MINUTES_PER_DAY,
                schedule.rotate_minutes
            );
        }
        if self.retention.retention_days == 0 {
            bail!("retention_days must be greater than zero");
        }
        if self.output_root.as_os_str().is_empty() {
            bail!("output_root must not be empty");
        }

        match self.mode {
            Mode::Hub => {
                let hub = self
                    .hub
                    .as_ref()
                    .context("hub mode requires a [hub] section")?;
                if hub.address.trim().is_empty() {
                    bail!("hub address must not be empty");
                }
                if hub.channels.is_empty() {
                    bail!("hub mode requires at least one channel");
                }
                let mut seen = HashSet::new();
                for channel in &hub.channels {
                    if !seen.insert(channel) {
                        bail!("channel {} listed more than once", channel);
                    }
                }
            }
            Mode::MultiCamera => {
                let specs = self.camera_specs();
                if specs.is_empty() {
                    bail!("multi-camera mode requires at least one valid camera");
                }
                let mut seen = HashSet::new();
                for spec in &specs {
                    if !seen.insert((spec.address.as_str(), spec.channel)) {
                        bail!("camera {} ch{} listed more than once", spec.address, spec.channel);
                    }
                }
            }
        }

        Ok(())
    }

    /// Parse the camera list, skipping malformed entries with a warning
    pub fn camera_specs(&self) -> Vec<CameraSpec> {
        self.cameras
            .iter()
            .filter(|entry| !entry.trim().is_empty())
            .filter_map(|entry| match entry.parse::<CameraSpec>() {
                Ok(spec) => Some(spec),
                Err(e) => {
                    warn!("ignoring camera entry {:?}: {}", redact_spec(entry), e);
                    None
                }
            })
            .collect()
    }

    pub fn clock(&self) -> ServiceClock {
        ServiceClock {
            window: RecordingWindow {
                start_hour: self.schedule.start_hour,
                end_hour: self.schedule.end_hour,
            },
            rotation_interval: Duration::from_secs(self.schedule.rotate_minutes.saturating_mul(60)),
            retention: Duration::from_secs(self.retention.retention_days.saturating_mul(SECS_PER_DAY)),
            max_storage_bytes: self.retention.max_storage_gb.saturating_mul(BYTES_PER_GB),
            max_log_bytes: self.retention.max_log_mb.saturating_mul(BYTES_PER_MB),
        }
    }

    pub fn log_file(&self) -> PathBuf {
        self.output_root.join(SERVICE_LOG_FILE)
    }
}

/// Hide the password field of a raw camera entry
fn redact_spec(entry: &str) -> String {
    let parts: Vec<&str> = entry.trim().split(':').collect();
    if parts.len() >= 4 {
        format!("{}:{}:{}:***", parts[0], parts[1], parts[2])
    } else {
        entry.trim().to_string()
    }
}
