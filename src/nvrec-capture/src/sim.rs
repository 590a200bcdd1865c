//! In-process simulated capture device
//!
//! Accepts any credentials, hands out sequential handle ids, and creates the
//! output file when a save opens. Individual logins, streams and saves can be
//! made to fail per address/channel. With [`SimulatedClient::with_journal`]
//! every call is also recorded for inspection.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::client::{CaptureClient, CaptureEvent, Credentials, DeviceInfo, LoginId, StreamId};
use crate::error::{CaptureError, Result};

/// Device layer error codes reported by the simulator
pub const ERR_LOGIN_REFUSED: i32 = 100;
pub const ERR_NO_SUCH_CHANNEL: i32 = 101;
pub const ERR_STREAM_REFUSED: i32 = 102;
pub const ERR_SAVE_REFUSED: i32 = 103;
pub const ERR_NO_SUCH_HANDLE: i32 = 104;
pub const ERR_SAVE_FOLDER_MISSING: i32 = 105;

/// Marker written at the start of every simulated recording file
const FILE_HEADER: &[u8] = b"DHAV";

const DEFAULT_CHANNEL_COUNT: u32 = 16;

/// Journal entry for one client call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCall {
    Initialize,
    Login { address: String, port: u16 },
    Logout(LoginId),
    StartStream { login: LoginId, channel: u32 },
    StopStream(StreamId),
    StartSave(StreamId, PathBuf),
    StopSave(StreamId),
    Shutdown,
}

struct SimLogin {
    address: String,
    port: u16,
}

struct SimStream {
    login: LoginId,
    channel: u32,
    save: Option<PathBuf>,
}

#[derive(Default)]
struct Failures {
    login: HashSet<String>,
    stream: HashSet<(String, u32)>,
    save: HashSet<(String, u32)>,
    stop_save: HashSet<(String, u32)>,
}

#[derive(Default)]
struct SimState {
    events: Option<UnboundedSender<CaptureEvent>>,
    next_id: u64,
    logins: HashMap<LoginId, SimLogin>,
    streams: HashMap<StreamId, SimStream>,
    failures: Failures,
    /// Call journal; `None` unless enabled
    calls: Option<Vec<SimCall>>,
}

impl SimState {
    fn record(&mut self, call: SimCall) {
        if let Some(calls) = self.calls.as_mut() {
            calls.push(call);
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn stream_key(&self, stream: StreamId) -> Result<(String, u32)> {
        let s = self
            .streams
            .get(&stream)
            .ok_or_else(|| CaptureError::sdk(ERR_NO_SUCH_HANDLE, format!("unknown {}", stream)))?;
        let address = self
            .logins
            .get(&s.login)
            .map(|l| l.address.clone())
            .unwrap_or_default();
        Ok((address, s.channel))
    }

    fn require_initialized(&self) -> Result<()> {
        if self.events.is_some() {
            Ok(())
        } else {
            Err(CaptureError::NotInitialized)
        }
    }
}

/// Simulated capture backend
pub struct SimulatedClient {
    channel_count: u32,
    state: Mutex<SimState>,
}

impl Default for SimulatedClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedClient {
    pub fn new() -> Self {
        Self::with_channel_count(DEFAULT_CHANNEL_COUNT)
    }

    pub fn with_channel_count(channel_count: u32) -> Self {
        Self {
            channel_count,
            state: Mutex::new(SimState::default()),
        }
    }

    /// Record every client call, see [`SimulatedClient::calls`]
    pub fn with_journal(self) -> Self {
        self.state().calls = Some(Vec::new());
        self
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Refuse logins to `address`
    pub fn fail_login(&self, address: &str) {
        self.state().failures.login.insert(address.to_string());
    }

    /// Refuse live streams on `address`/`channel`
    pub fn fail_stream(&self, address: &str, channel: u32) {
        self.state().failures.stream.insert((address.to_string(), channel));
    }

    /// Refuse saves on `address`/`channel`
    pub fn fail_save(&self, address: &str, channel: u32) {
        self.state().failures.save.insert((address.to_string(), channel));
    }

    /// Report an error when closing a save on `address`/`channel`
    pub fn fail_stop_save(&self, address: &str, channel: u32) {
        self.state().failures.stop_save.insert((address.to_string(), channel));
    }

    pub fn clear_failures(&self) {
        self.state().failures = Failures::default();
    }

    pub fn open_logins(&self) -> usize {
        self.state().logins.len()
    }

    pub fn open_streams(&self) -> usize {
        self.state().streams.len()
    }

    /// Paths of all saves currently open, sorted
    pub fn open_saves(&self) -> Vec<PathBuf> {
        let mut saves: Vec<PathBuf> = self
            .state()
            .streams
            .values()
            .filter_map(|s| s.save.clone())
            .collect();
        saves.sort();
        saves
    }

    /// Journaled calls so far; always empty without [`SimulatedClient::with_journal`]
    pub fn calls(&self) -> Vec<SimCall> {
        self.state().calls.clone().unwrap_or_default()
    }

    /// Emit a disconnect notification for an open login
    pub fn disconnect(&self, login: LoginId) -> bool {
        self.notify(login, false)
    }

    /// Emit a reconnect notification for an open login
    pub fn reconnect(&self, login: LoginId) -> bool {
        self.notify(login, true)
    }

    fn notify(&self, login: LoginId, reconnected: bool) -> bool {
        let state = self.state();
        let (Some(events), Some(l)) = (state.events.as_ref(), state.logins.get(&login)) else {
            return false;
        };

        let address = l.address.clone();
        let port = l.port;
        let event = if reconnected {
            CaptureEvent::Reconnected { login, address, port }
        } else {
            CaptureEvent::Disconnected { login, address, port }
        };
        events.send(event).is_ok()
    }
}

impl CaptureClient for SimulatedClient {
    fn initialize(&self, events: UnboundedSender<CaptureEvent>) -> Result<()> {
        let mut state = self.state();
        state.record(SimCall::Initialize);
        state.events = Some(events);
        Ok(())
    }

    fn login(
        &self,
        address: &str,
        port: u16,
        credentials: &Credentials,
    ) -> Result<(LoginId, DeviceInfo)> {
        let mut state = self.state();
        state.record(SimCall::Login {
            address: address.to_string(),
            port,
        });
        state.require_initialized()?;

        if state.failures.login.contains(address) {
            return Err(CaptureError::sdk(
                ERR_LOGIN_REFUSED,
                format!("login refused for {}@{}:{}", credentials.username, address, port),
            ));
        }

        let id = LoginId(state.next_id());
        state.logins.insert(
            id,
            SimLogin {
                address: address.to_string(),
                port,
            },
        );

        let device = DeviceInfo {
            channel_count: self.channel_count,
            serial: format!("SIM-{}", address.replace('.', "")),
        };
        Ok((id, device))
    }

    fn logout(&self, login: LoginId) -> Result<()> {
        let mut state = self.state();
        state.record(SimCall::Logout(login));
        state
            .logins
            .remove(&login)
            .map(|_| ())
            .ok_or_else(|| CaptureError::sdk(ERR_NO_SUCH_HANDLE, format!("unknown {}", login)))
    }

    fn start_live_stream(&self, login: LoginId, channel: u32) -> Result<StreamId> {
        let mut state = self.state();
        state.record(SimCall::StartStream { login, channel });
        state.require_initialized()?;

        let address = state
            .logins
            .get(&login)
            .map(|l| l.address.clone())
            .ok_or_else(|| CaptureError::sdk(ERR_NO_SUCH_HANDLE, format!("unknown {}", login)))?;

        if channel >= self.channel_count {
            return Err(CaptureError::sdk(
                ERR_NO_SUCH_CHANNEL,
                format!("{} has no channel {}", address, channel),
            ));
        }
        if state.failures.stream.contains(&(address.clone(), channel)) {
            return Err(CaptureError::sdk(
                ERR_STREAM_REFUSED,
                format!("stream refused for {} ch{}", address, channel),
            ));
        }

        let id = StreamId(state.next_id());
        state.streams.insert(
            id,
            SimStream {
                login,
                channel,
                save: None,
            },
        );
        Ok(id)
    }

    fn stop_live_stream(&self, stream: StreamId) -> Result<()> {
        let mut state = self.state();
        state.record(SimCall::StopStream(stream));
        state
            .streams
            .remove(&stream)
            .map(|_| ())
            .ok_or_else(|| CaptureError::sdk(ERR_NO_SUCH_HANDLE, format!("unknown {}", stream)))
    }

    fn start_save_to_file(&self, stream: StreamId, path: &Path) -> Result<()> {
        let mut state = self.state();
        state.record(SimCall::StartSave(stream, path.to_path_buf()));
        state.require_initialized()?;

        let key = state.stream_key(stream)?;
        if state.failures.save.contains(&key) {
            return Err(CaptureError::sdk(
                ERR_SAVE_REFUSED,
                format!("save refused for {} ch{}", key.0, key.1),
            ));
        }
        if path.parent().map_or(true, |p| !p.is_dir()) {
            return Err(CaptureError::sdk(
                ERR_SAVE_FOLDER_MISSING,
                format!("folder for {:?} does not exist", path),
            ));
        }

        let mut file = File::create(path)?;
        file.write_all(FILE_HEADER)?;
        debug!("simulated save opened at {:?}", path);

        if let Some(s) = state.streams.get_mut(&stream) {
            s.save = Some(path.to_path_buf());
        }
        Ok(())
    }

    fn stop_save_to_file(&self, stream: StreamId) -> Result<()> {
        let mut state = self.state();
        state.record(SimCall::StopSave(stream));

        let key = state.stream_key(stream)?;
        if let Some(s) = state.streams.get_mut(&stream) {
            s.save = None;
        }
        if state.failures.stop_save.contains(&key) {
            return Err(CaptureError::sdk(
                ERR_SAVE_REFUSED,
                format!("stop save failed for {} ch{}", key.0, key.1),
            ));
        }
        Ok(())
    }

    fn shutdown(&self) {
        let mut state = self.state();
        state.record(SimCall::Shutdown);
        state.events = None;
    }
}
