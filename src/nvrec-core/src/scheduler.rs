//! Rotation scheduling
//!
//! A single loop owns the session set. Each tick checks the recording window,
//! then either stops everything or rotates every target into a new file and
//! runs the cleanup engine. Ticks run to completion before the next one is
//! considered, so they never overlap.

use chrono::{DateTime, Local, Timelike};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use nvrec_storage::CleanupEngine;

use crate::config::RecordingWindow;
use crate::session::SessionManager;

/// Longest sleep between shutdown flag checks
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Fixed-period deadline tracker.
///
/// The first deadline is one period after creation. Each fire schedules the
/// next one a full period after the fire started, so fires are never closer
/// than one period; a tick that overruns just delays the next fire.
#[derive(Debug, Clone, Copy)]
pub struct Ticker {
    period: Duration,
    next: Instant,
}

impl Ticker {
    pub fn new(period: Duration, now: Instant) -> Self {
        Self {
            period,
            next: now + period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Time left until the next fire, `None` when due
    pub fn until_due(&self, now: Instant) -> Option<Duration> {
        if now >= self.next {
            None
        } else {
            Some(self.next - now)
        }
    }

    /// Record a fire that started at `started`
    pub fn fired(&mut self, started: Instant) {
        self.next = started + self.period;
    }
}

/// What a tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Outside the window; every target stopped
    Stopped,
    /// Window (re)opened; sessions brought up from scratch
    BroughtUp { active: usize },
    /// Every target rotated into a new file
    Rotated { rotated: usize, failed: usize },
}

pub struct RotationScheduler {
    sessions: SessionManager,
    cleanup: CleanupEngine,
    window: RecordingWindow,
    /// Sessions are up; false before the first bring-up and after the window closes
    active: bool,
}

impl RotationScheduler {
    pub fn new(sessions: SessionManager, cleanup: CleanupEngine, window: RecordingWindow) -> Self {
        Self {
            sessions,
            cleanup,
            window,
            active: false,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Initial bring-up, deferred to the first in-window tick when started outside the window
    pub fn start(&mut self, now: DateTime<Local>) {
        if self.window.contains(now.hour()) {
            self.sessions.bring_up(now);
            self.active = true;
        } else {
            info!(
                "outside recording window {}, waiting for it to open",
                self.window
            );
        }
    }

    pub fn tick(&mut self, now: DateTime<Local>) -> TickOutcome {
        if !self.window.contains(now.hour()) {
            if self.active {
                info!("recording window {} closed, stopping all targets", self.window);
            }
            self.sessions.stop_all();
            self.active = false;
            return TickOutcome::Stopped;
        }

        let outcome = if self.active {
            self.rotate_all(now)
        } else {
            info!("recording window {} open, bringing sessions up", self.window);
            self.sessions.bring_up(now);
            self.active = true;
            TickOutcome::BroughtUp {
                active: self.sessions.targets().len(),
            }
        };

        let report = self.cleanup.run(now);
        if report.log_reset {
            info!("service log reset after exceeding its size cap");
        }
        debug!("cleanup finished: {:?}", report);

        outcome
    }

    fn rotate_all(&mut self, now: DateTime<Local>) -> TickOutcome {
        let mut rotated = 0;
        let mut failed = 0;

        for target in self.sessions.targets_mut() {
            if target.is_saving() {
                if let Err(e) = target.close_save() {
                    warn!("stop save {} failed: {}", target.identity(), e);
                }
            }

            match target.open_save(now) {
                Ok(path) => {
                    info!("saving {}", path.display());
                    rotated += 1;
                }
                Err(e) => {
                    error!("save fail {}: {}", target.identity(), e);
                    failed += 1;
                }
            }
        }

        TickOutcome::Rotated { rotated, failed }
    }

    /// Tick every `period` until `shutdown` is set. An in-flight tick always
    /// completes before this returns.
    pub fn run(&mut self, period: Duration, shutdown: &AtomicBool) {
        let mut ticker = Ticker::new(period, Instant::now());
        info!("rotation every {:?}, window {}", ticker.period(), self.window);

        while !shutdown.load(Ordering::SeqCst) {
            match ticker.until_due(Instant::now()) {
                Some(wait) => thread::sleep(wait.min(SHUTDOWN_POLL)),
                None => {
                    ticker.fired(Instant::now());
                    let outcome = self.tick(Local::now());
                    debug!("tick: {:?}", outcome);
                }
            }
        }
    }

    /// Final teardown of every session, including the hub login
    pub fn shutdown(mut self) {
        self.sessions.release();
        self.active = false;
    }
}
