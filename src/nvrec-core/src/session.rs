//! Session management
//!
//! Turns the configured sources into live, saving recording targets and tears
//! them down again. Bring-up is best effort: a channel or camera that fails
//! to log in or stream is logged and left out of the active set.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use nvrec_capture::{CaptureClient, Connection, Credentials};

use crate::config::{CameraSpec, Config, Mode};
use crate::target::{camera_folder_name, RecordingTarget, TargetIdentity};

/// What to bring up, derived once from configuration
#[derive(Debug, Clone)]
pub enum SessionPlan {
    Hub {
        address: String,
        port: u16,
        credentials: Credentials,
        channels: Vec<u32>,
    },
    MultiCamera(Vec<CameraSpec>),
}

impl SessionPlan {
    pub fn from_config(config: &Config) -> Result<Self> {
        match config.mode {
            Mode::Hub => {
                let hub = config
                    .hub
                    .as_ref()
                    .context("hub mode requires a [hub] section")?;
                Ok(Self::Hub {
                    address: hub.address.clone(),
                    port: hub.port,
                    credentials: Credentials::new(&hub.username, &hub.password),
                    channels: hub.channels.clone(),
                })
            }
            Mode::MultiCamera => Ok(Self::MultiCamera(config.camera_specs())),
        }
    }
}

pub struct SessionManager {
    client: Arc<dyn CaptureClient>,
    plan: SessionPlan,
    output_root: PathBuf,
    /// Shared hub login, kept across `stop_all`
    hub: Option<Arc<Connection>>,
    targets: Vec<RecordingTarget>,
}

impl SessionManager {
    pub fn new(client: Arc<dyn CaptureClient>, plan: SessionPlan, output_root: impl Into<PathBuf>) -> Self {
        Self {
            client,
            plan,
            output_root: output_root.into(),
            hub: None,
            targets: Vec::new(),
        }
    }

    pub fn targets(&self) -> &[RecordingTarget] {
        &self.targets
    }

    pub fn targets_mut(&mut self) -> &mut [RecordingTarget] {
        &mut self.targets
    }

    pub fn hub_connection(&self) -> Option<&Arc<Connection>> {
        self.hub.as_ref()
    }

    /// Rebuild the active set from the plan, replacing any previous targets
    pub fn bring_up(&mut self, now: DateTime<Local>) {
        self.stop_all();
        self.targets.clear();

        match self.plan.clone() {
            SessionPlan::Hub {
                address,
                port,
                credentials,
                channels,
            } => self.initialize_hub_mode(&address, port, &credentials, &channels, now),
            SessionPlan::MultiCamera(specs) => self.initialize_multi_camera_mode(&specs, now),
        }

        info!("{} recording target(s) active", self.targets.len());
    }

    /// Log in to the hub once, then stream and save each listed channel
    pub fn initialize_hub_mode(
        &mut self,
        address: &str,
        port: u16,
        credentials: &Credentials,
        channels: &[u32],
        now: DateTime<Local>,
    ) {
        let hub = match self.hub.clone() {
            Some(hub) => hub,
            None => match Connection::open(&self.client, address, port, credentials) {
                Ok(hub) => {
                    info!(
                        "hub login success {}:{}, channels={}",
                        address,
                        port,
                        hub.device().channel_count
                    );
                    self.hub = Some(Arc::clone(&hub));
                    hub
                }
                Err(e) => {
                    error!("hub login {}:{} failed: {}", address, port, e);
                    return;
                }
            },
        };

        let folder = self.output_root.clone();
        for &channel in channels {
            let identity = TargetIdentity::HubChannel(channel);
            if self.contains(&identity) {
                warn!("channel {} listed more than once, skipping", channel);
                continue;
            }

            let mut target = RecordingTarget::hub_channel(channel, folder.clone(), &hub);
            if let Err(e) = target.start_stream() {
                error!("live stream ch{} failed: {}", channel, e);
                continue;
            }
            open_initial_save(&mut target, now);
            self.targets.push(target);
        }
    }

    /// Log in to, stream and save each camera independently
    pub fn initialize_multi_camera_mode(&mut self, specs: &[CameraSpec], now: DateTime<Local>) {
        for spec in specs {
            let identity = TargetIdentity::Camera {
                address: spec.address.clone(),
                channel: spec.channel,
            };
            if self.contains(&identity) {
                warn!("camera {} listed more than once, skipping", identity);
                continue;
            }

            let connection = match Connection::open(&self.client, &spec.address, spec.port, &spec.credentials) {
                Ok(connection) => connection,
                Err(e) => {
                    error!("login {}:{} failed: {}", spec.address, spec.port, e);
                    continue;
                }
            };
            info!("login {}:{} success", spec.address, spec.port);

            let folder = self.output_root.join(camera_folder_name(&spec.address));
            let mut target = RecordingTarget::camera(spec.channel, folder, connection);
            if let Err(e) = target.start_stream() {
                // Dropping the target logs the camera back out
                error!("live stream {} failed: {}", identity, e);
                continue;
            }
            open_initial_save(&mut target, now);
            self.targets.push(target);
        }
    }

    /// Stop every save and stream; standalone cameras are also logged out.
    /// The hub login stays open. Safe to call repeatedly.
    pub fn stop_all(&mut self) {
        for target in &mut self.targets {
            target.stop();
        }
    }

    /// Final teardown: stop everything, drop the targets and the hub login
    pub fn release(&mut self) {
        self.stop_all();
        self.targets.clear();
        if self.hub.take().is_some() {
            info!("hub connection released");
        }
    }

    fn contains(&self, identity: &TargetIdentity) -> bool {
        self.targets.iter().any(|t| t.identity() == identity)
    }

    /// Identities of the current set, for diagnostics
    pub fn identities(&self) -> HashSet<TargetIdentity> {
        self.targets.iter().map(|t| t.identity().clone()).collect()
    }
}

fn open_initial_save(target: &mut RecordingTarget, now: DateTime<Local>) {
    match target.open_save(now) {
        Ok(path) => info!("saving {}", path.display()),
        Err(e) => error!("save fail {}: {}", target.identity(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use nvrec_capture::{SimCall, SimulatedClient};

    fn at(h: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 1, h, 0, 0).unwrap()
    }

    fn sim() -> (Arc<SimulatedClient>, Arc<dyn CaptureClient>) {
        let sim = Arc::new(SimulatedClient::new().with_journal());
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        sim.initialize(tx).unwrap();
        let client: Arc<dyn CaptureClient> = sim.clone();
        (sim, client)
    }

    fn hub_plan(channels: Vec<u32>) -> SessionPlan {
        SessionPlan::Hub {
            address: "10.0.0.1".to_string(),
            port: 37777,
            credentials: Credentials::new("admin", "pw"),
            channels,
        }
    }

    fn cam(address: &str, channel: u32) -> CameraSpec {
        CameraSpec {
            address: address.to_string(),
            port: 37777,
            credentials: Credentials::new("admin", "pw"),
            channel,
        }
    }

    #[test]
    fn test_hub_bring_up_saves_every_channel_into_root() {
        let dir = tempfile::tempdir().unwrap();
        let (sim, client) = sim();
        let mut sessions = SessionManager::new(client, hub_plan(vec![0, 1, 2]), dir.path());

        sessions.bring_up(at(9));

        assert_eq!(sessions.targets().len(), 3);
        assert!(sessions.targets().iter().all(RecordingTarget::is_saving));
        assert_eq!(sim.open_logins(), 1);
        assert!(sim.open_saves().iter().all(|p| p.parent() == Some(dir.path())));
    }

    #[test]
    fn test_hub_stream_failure_excludes_channel() {
        let dir = tempfile::tempdir().unwrap();
        let (sim, client) = sim();
        sim.fail_stream("10.0.0.1", 1);
        let mut sessions = SessionManager::new(client, hub_plan(vec![0, 1, 2]), dir.path());

        sessions.bring_up(at(9));

        let ids = sessions.identities();
        assert_eq!(ids.len(), 2);
        assert!(!ids.contains(&TargetIdentity::HubChannel(1)));
    }

    #[test]
    fn test_hub_login_failure_leaves_no_targets() {
        let dir = tempfile::tempdir().unwrap();
        let (sim, client) = sim();
        sim.fail_login("10.0.0.1");
        let mut sessions = SessionManager::new(client, hub_plan(vec![0, 1]), dir.path());

        sessions.bring_up(at(9));

        assert!(sessions.targets().is_empty());
        assert!(sessions.hub_connection().is_none());
    }

    #[test]
    fn test_hub_save_failure_keeps_target_for_retry() {
        let dir = tempfile::tempdir().unwrap();
        let (sim, client) = sim();
        sim.fail_save("10.0.0.1", 0);
        let mut sessions = SessionManager::new(client, hub_plan(vec![0, 1]), dir.path());

        sessions.bring_up(at(9));

        assert_eq!(sessions.targets().len(), 2);
        let saving: Vec<bool> = sessions.targets().iter().map(|t| t.is_saving()).collect();
        assert_eq!(saving, vec![false, true]);
    }

    #[test]
    fn test_one_of_three_camera_logins_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (sim, client) = sim();
        sim.fail_login("10.0.0.12");
        let plan = SessionPlan::MultiCamera(vec![
            cam("10.0.0.11", 0),
            cam("10.0.0.12", 0),
            cam("10.0.0.13", 0),
        ]);
        let mut sessions = SessionManager::new(client, plan, dir.path());

        sessions.bring_up(at(9));

        assert_eq!(sessions.targets().len(), 2);
        assert!(sessions.targets().iter().all(RecordingTarget::is_saving));
        assert!(dir.path().join("10_0_0_11").is_dir());
        assert!(!dir.path().join("10_0_0_12").exists());
        assert!(dir.path().join("10_0_0_13").is_dir());
    }

    #[test]
    fn test_camera_stream_failure_logs_out() {
        let dir = tempfile::tempdir().unwrap();
        let (sim, client) = sim();
        sim.fail_stream("10.0.0.11", 0);
        let plan = SessionPlan::MultiCamera(vec![cam("10.0.0.11", 0)]);
        let mut sessions = SessionManager::new(client, plan, dir.path());

        sessions.bring_up(at(9));

        assert!(sessions.targets().is_empty());
        assert_eq!(sim.open_logins(), 0);
    }

    #[test]
    fn test_duplicate_camera_identity_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (_sim, client) = sim();
        let plan = SessionPlan::MultiCamera(vec![cam("10.0.0.11", 0), cam("10.0.0.11", 0), cam("10.0.0.11", 1)]);
        let mut sessions = SessionManager::new(client, plan, dir.path());

        sessions.bring_up(at(9));

        assert_eq!(sessions.targets().len(), 2);
    }

    #[test]
    fn test_stop_all_hub_keeps_login_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (sim, client) = sim();
        let mut sessions = SessionManager::new(client, hub_plan(vec![0, 1]), dir.path());
        sessions.bring_up(at(9));

        sessions.stop_all();
        assert!(sessions.targets().iter().all(|t| !t.is_saving() && !t.has_stream()));
        assert_eq!(sim.open_streams(), 0);
        assert_eq!(sim.open_logins(), 1);

        let calls = sim.calls().len();
        sessions.stop_all();
        assert_eq!(sim.calls().len(), calls);
    }

    #[test]
    fn test_stop_all_cameras_logs_out() {
        let dir = tempfile::tempdir().unwrap();
        let (sim, client) = sim();
        let plan = SessionPlan::MultiCamera(vec![cam("10.0.0.11", 0), cam("10.0.0.12", 0)]);
        let mut sessions = SessionManager::new(client, plan, dir.path());
        sessions.bring_up(at(9));
        assert_eq!(sim.open_logins(), 2);

        sessions.stop_all();

        assert_eq!(sim.open_logins(), 0);
        assert_eq!(sim.open_streams(), 0);
        assert!(sim.open_saves().is_empty());
    }

    #[test]
    fn test_bring_up_again_reuses_hub_login() {
        let dir = tempfile::tempdir().unwrap();
        let (sim, client) = sim();
        let mut sessions = SessionManager::new(client, hub_plan(vec![0]), dir.path());
        sessions.bring_up(at(9));
        sessions.stop_all();

        sessions.bring_up(at(10));

        let logins = sim
            .calls()
            .iter()
            .filter(|c| matches!(c, SimCall::Login { .. }))
            .count();
        assert_eq!(logins, 1);
        assert!(sessions.targets()[0].is_saving());
    }

    #[test]
    fn test_release_logs_out_of_hub() {
        let dir = tempfile::tempdir().unwrap();
        let (sim, client) = sim();
        let mut sessions = SessionManager::new(client, hub_plan(vec![0, 1]), dir.path());
        sessions.bring_up(at(9));

        sessions.release();

        assert!(sessions.targets().is_empty());
        assert_eq!(sim.open_logins(), 0);
        assert_eq!(sim.open_streams(), 0);
    }
}
