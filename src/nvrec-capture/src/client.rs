//! Capture client capability
//!
//! The device layer (authentication, live stream negotiation, stream-to-file
//! saving) is consumed through [`CaptureClient`]. Handles are opaque ids; the
//! guards in [`crate::handle`] own them and release them on drop.

use std::fmt;
use std::path::Path;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::Result;

/// Opaque id of an authenticated device session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoginId(pub u64);

/// Opaque id of a live stream subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub u64);

impl fmt::Display for LoginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "login#{}", self.0)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

/// Metadata returned by a successful login
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub channel_count: u32,
    pub serial: String,
}

/// Login credentials for a device
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Connection notifications delivered by the device layer outside the tick cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Disconnected {
        login: LoginId,
        address: String,
        port: u16,
    },
    Reconnected {
        login: LoginId,
        address: String,
        port: u16,
    },
}

/// Blocking interface to the capture device layer.
///
/// Every failing call returns the device layer's last error at the time of
/// failure. Implementations must be usable from the scheduler thread and
/// from handle guards dropped on any thread.
pub trait CaptureClient: Send + Sync {
    /// Global initialization. Disconnect and reconnect notifications are sent
    /// on `events` from whatever thread the device layer uses.
    fn initialize(&self, events: UnboundedSender<CaptureEvent>) -> Result<()>;

    fn login(
        &self,
        address: &str,
        port: u16,
        credentials: &Credentials,
    ) -> Result<(LoginId, DeviceInfo)>;

    fn logout(&self, login: LoginId) -> Result<()>;

    fn start_live_stream(&self, login: LoginId, channel: u32) -> Result<StreamId>;

    fn stop_live_stream(&self, stream: StreamId) -> Result<()>;

    fn start_save_to_file(&self, stream: StreamId, path: &Path) -> Result<()>;

    fn stop_save_to_file(&self, stream: StreamId) -> Result<()>;

    /// Global teardown, called once after every handle has been released
    fn shutdown(&self);
}
