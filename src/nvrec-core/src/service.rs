//! Service lifecycle
//!
//! Wires the capture client, session manager, cleanup engine and rotation
//! scheduler together and runs them until the shutdown flag is raised.

use anyhow::{Context, Result};
use chrono::Local;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{error, info, warn};

use nvrec_capture::{CaptureClient, CaptureEvent};
use nvrec_storage::CleanupEngine;

use crate::config::Config;
use crate::scheduler::RotationScheduler;
use crate::session::{SessionManager, SessionPlan};

const SHUTDOWN_POLL: Duration = Duration::from_millis(100);
const EVENT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Service {
    config: Config,
    client: Arc<dyn CaptureClient>,
    shutdown: Arc<AtomicBool>,
}

impl Service {
    pub fn new(config: Config, client: Arc<dyn CaptureClient>) -> Self {
        Self {
            config,
            client,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops the service once set
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Run until shutdown; every handle is released before this returns
    pub async fn run(self) -> Result<()> {
        let clock = self.config.clock();
        let root = self.config.output_root.clone();
        info!("starting nvrec service, output root {}", root.display());

        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create output root {:?}", root))?;

        let plan = SessionPlan::from_config(&self.config)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        if let Err(e) = self.client.initialize(events_tx) {
            error!("capture client initialization failed: {}", e);
            return Err(e).context("Failed to initialize capture client");
        }
        let events = tokio::spawn(log_capture_events(events_rx));

        let sessions = SessionManager::new(self.client.clone(), plan, &root);
        let cleanup = CleanupEngine::new(&root, self.config.log_file(), clock.retention_policy());
        let scheduler = RotationScheduler::new(sessions, cleanup, clock.window);

        let handle = self.spawn_scheduler_thread(scheduler, clock.rotation_interval)?;

        while !self.shutdown.load(Ordering::SeqCst) {
            tokio::time::sleep(SHUTDOWN_POLL).await;
        }
        info!("shutdown requested, waiting for the current tick to finish");

        let joined = tokio::task::spawn_blocking(move || handle.join())
            .await
            .context("Failed to join scheduler thread")?;
        match joined {
            Ok(scheduler) => scheduler.shutdown(),
            Err(_) => warn!("scheduler thread panicked"),
        }

        self.client.shutdown();
        if tokio::time::timeout(EVENT_DRAIN_TIMEOUT, events).await.is_err() {
            warn!("capture event channel still open after client shutdown");
        }

        info!("service stopped");
        Ok(())
    }

    /// Bring targets up and run the scheduler on its own thread, keeping the
    /// blocking capture calls off the runtime. The thread hands the scheduler
    /// back when done.
    fn spawn_scheduler_thread(
        &self,
        mut scheduler: RotationScheduler,
        period: Duration,
    ) -> Result<thread::JoinHandle<RotationScheduler>> {
        let shutdown = self.shutdown.clone();

        thread::Builder::new()
            .name("nvrec-scheduler".to_string())
            .spawn(move || {
                scheduler.start(Local::now());
                scheduler.run(period, &shutdown);
                info!("scheduler stopped");
                scheduler
            })
            .context("Failed to spawn scheduler thread")
    }
}

/// Log connection events until the client drops its sender
async fn log_capture_events(mut events: UnboundedReceiver<CaptureEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            CaptureEvent::Disconnected { login, address, port } => {
                warn!("{} disconnected from {}:{}", login, address, port);
            }
            CaptureEvent::Reconnected { login, address, port } => {
                info!("{} reconnected to {}:{}", login, address, port);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use nvrec_capture::{
        Credentials, DeviceInfo, LoginId, SimCall, SimulatedClient, StreamId,
    };
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;

    /// Counts logins made from inside a tokio runtime context
    struct RuntimeAwareClient {
        inner: SimulatedClient,
        logins: AtomicUsize,
        logins_on_runtime: AtomicUsize,
    }

    impl CaptureClient for RuntimeAwareClient {
        fn initialize(&self, events: mpsc::UnboundedSender<CaptureEvent>) -> nvrec_capture::Result<()> {
            self.inner.initialize(events)
        }

        fn login(
            &self,
            address: &str,
            port: u16,
            credentials: &Credentials,
        ) -> nvrec_capture::Result<(LoginId, DeviceInfo)> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            if tokio::runtime::Handle::try_current().is_ok() {
                self.logins_on_runtime.fetch_add(1, Ordering::SeqCst);
            }
            self.inner.login(address, port, credentials)
        }

        fn logout(&self, login: LoginId) -> nvrec_capture::Result<()> {
            self.inner.logout(login)
        }

        fn start_live_stream(&self, login: LoginId, channel: u32) -> nvrec_capture::Result<StreamId> {
            self.inner.start_live_stream(login, channel)
        }

        fn stop_live_stream(&self, stream: StreamId) -> nvrec_capture::Result<()> {
            self.inner.stop_live_stream(stream)
        }

        fn start_save_to_file(&self, stream: StreamId, path: &Path) -> nvrec_capture::Result<()> {
            self.inner.start_save_to_file(stream, path)
        }

        fn stop_save_to_file(&self, stream: StreamId) -> nvrec_capture::Result<()> {
            self.inner.stop_save_to_file(stream)
        }

        fn shutdown(&self) {
            self.inner.shutdown()
        }
    }

    fn hub_config(root: &std::path::Path) -> Config {
        let mut config = Config::from_toml(
            r#"
            mode = "hub"
            output_root = "unused"

            [hub]
            address = "10.0.0.1"
            username = "admin"
            password = "secret"
            channels = [1, 2]
            "#,
        )
        .unwrap();
        config.output_root = root.join("recordings");
        config
    }

    #[tokio::test]
    async fn test_run_until_shutdown_releases_everything() {
        let dir = tempfile::tempdir().unwrap();
        let config = hub_config(dir.path());
        assert_eq!(config.mode, Mode::Hub);
        let root = config.output_root.clone();

        let sim = Arc::new(SimulatedClient::new().with_journal());
        let service = Service::new(config, sim.clone());
        let flag = service.shutdown_flag();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            flag.store(true, Ordering::SeqCst);
        });

        service.run().await.unwrap();

        assert!(root.is_dir());
        assert_eq!(sim.open_logins(), 0);
        assert_eq!(sim.open_streams(), 0);
        assert!(sim.open_saves().is_empty());

        let calls = sim.calls();
        assert_eq!(calls.first(), Some(&SimCall::Initialize));
        assert_eq!(calls.last(), Some(&SimCall::Shutdown));
        let saves = calls
            .iter()
            .filter(|c| matches!(c, SimCall::StartSave(..)))
            .count();
        assert_eq!(saves, 2);
    }

    #[tokio::test]
    async fn test_bring_up_runs_off_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let config = hub_config(dir.path());

        let client = Arc::new(RuntimeAwareClient {
            inner: SimulatedClient::new(),
            logins: AtomicUsize::new(0),
            logins_on_runtime: AtomicUsize::new(0),
        });
        let service = Service::new(config, client.clone());
        let flag = service.shutdown_flag();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            flag.store(true, Ordering::SeqCst);
        });

        service.run().await.unwrap();

        assert_eq!(client.logins.load(Ordering::SeqCst), 1);
        assert_eq!(client.logins_on_runtime.load(Ordering::SeqCst), 0);
        assert_eq!(client.inner.open_logins(), 0);
    }

    #[tokio::test]
    async fn test_run_fails_when_output_root_unusable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let mut config = hub_config(dir.path());
        config.output_root = blocker.join("recordings");

        let sim = Arc::new(SimulatedClient::new().with_journal());
        let service = Service::new(config, sim.clone());

        assert!(service.run().await.is_err());
        assert!(sim.calls().is_empty());
    }
}
