//! Ownership guards for device handles
//!
//! A [`Connection`] logs out when the last reference goes away. A
//! [`LiveStream`] keeps its connection alive, owns the optional open save,
//! and tears both down on drop (save first, then the stream).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::client::{CaptureClient, Credentials, DeviceInfo, LoginId, StreamId};
use crate::error::{CaptureError, Result};

/// Authenticated session with a device
pub struct Connection {
    client: Arc<dyn CaptureClient>,
    id: LoginId,
    address: String,
    port: u16,
    device: DeviceInfo,
}

impl Connection {
    pub fn open(
        client: &Arc<dyn CaptureClient>,
        address: &str,
        port: u16,
        credentials: &Credentials,
    ) -> Result<Arc<Self>> {
        let (id, device) = client.login(address, port, credentials)?;
        debug!("logged in to {}:{} as {}", address, port, id);

        Ok(Arc::new(Self {
            client: Arc::clone(client),
            id,
            address: address.to_string(),
            port,
            device,
        }))
    }

    pub fn id(&self) -> LoginId {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        match self.client.logout(self.id) {
            Ok(()) => debug!("logged out of {}:{} ({})", self.address, self.port, self.id),
            Err(e) => warn!("logout {}:{} failed: {}", self.address, self.port, e),
        }
    }
}

/// Live stream subscription, optionally saving to a file
pub struct LiveStream {
    connection: Arc<Connection>,
    id: StreamId,
    channel: u32,
    save_path: Option<PathBuf>,
}

impl LiveStream {
    pub fn start(connection: &Arc<Connection>, channel: u32) -> Result<Self> {
        let id = connection.client.start_live_stream(connection.id, channel)?;
        debug!("started {} for ch{} on {}", id, channel, connection.address);

        Ok(Self {
            connection: Arc::clone(connection),
            id,
            channel,
            save_path: None,
        })
    }

    /// Open a stream-to-file save. At most one save is open at a time.
    pub fn start_saving(&mut self, path: &Path) -> Result<()> {
        if self.save_path.is_some() {
            return Err(CaptureError::AlreadySaving(self.id.0));
        }

        self.connection.client.start_save_to_file(self.id, path)?;
        self.save_path = Some(path.to_path_buf());
        Ok(())
    }

    /// Close the open save, if any. The stream is no longer saving afterwards
    /// even when the device layer reports an error.
    pub fn stop_saving(&mut self) -> Result<Option<PathBuf>> {
        match self.save_path.take() {
            Some(path) => {
                self.connection.client.stop_save_to_file(self.id)?;
                Ok(Some(path))
            }
            None => Ok(None),
        }
    }

    pub fn is_saving(&self) -> bool {
        self.save_path.is_some()
    }

    pub fn save_path(&self) -> Option<&Path> {
        self.save_path.as_deref()
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn channel(&self) -> u32 {
        self.channel
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }
}

impl Drop for LiveStream {
    fn drop(&mut self) {
        if let Err(e) = self.stop_saving() {
            warn!("stop save on {} failed: {}", self.id, e);
        }
        if let Err(e) = self.connection.client.stop_live_stream(self.id) {
            warn!("stop {} failed: {}", self.id, e);
        }
    }
}
