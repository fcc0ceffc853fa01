//! Shell controller
//!
//! Owns the one window/backend pairing for the lifetime of the process.
//! Every lifecycle transition goes through this type; no other code holds
//! the backend process.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::backend::{BackendLauncher, BackendProcess};
use crate::config::{LaunchConfig, PackagingMode};
use crate::error::{LauncherError, Result};
use crate::window::{WindowHost, WindowSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Starting,
    Running,
    ShuttingDown,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    AllWindowsClosed,
    TerminateSignal,
    AppExit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownOutcome {
    /// A termination request was sent to a backend.
    pub backend_stopped: bool,
    pub exit_app: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub mode: PackagingMode,
    pub state: LifecycleState,
    pub url: String,
    pub pid: Option<u32>,
}

/// Identifies one launch. Work started for an older launch must not touch
/// the window of a newer one.
#[derive(Debug, Clone)]
pub struct LaunchTicket {
    generation: u64,
    current: Arc<AtomicU64>,
}

impl LaunchTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::Acquire) == self.generation
    }
}

pub struct Controller<H: WindowHost, L: BackendLauncher> {
    config: LaunchConfig,
    host: H,
    launcher: L,
    backend: Option<L::Process>,
    state: LifecycleState,
    keep_alive_without_windows: bool,
    generation: Arc<AtomicU64>,
}

impl<H: WindowHost, L: BackendLauncher> Controller<H, L> {
    pub fn new(config: LaunchConfig, host: H, launcher: L) -> Self {
        Self {
            config,
            host,
            launcher,
            backend: None,
            state: LifecycleState::Idle,
            keep_alive_without_windows: cfg!(target_os = "macos"),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Whether closing the last window leaves the application running.
    #[cfg(test)]
    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive_without_windows = keep_alive;
        self
    }

    #[cfg(test)]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn status(&self) -> BackendStatus {
        BackendStatus {
            mode: self.config.mode,
            state: self.state,
            url: self.config.backend_url.clone(),
            pid: self.backend.as_ref().map(|p| p.id()),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    /// Retire every outstanding ticket.
    fn invalidate_launch(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn live_backend(&self) -> Option<&L::Process> {
        self.backend
            .as_ref()
            .filter(|p| !p.exit_watch().has_exited())
    }

    /// Start the backend (unless one is already live) and open the window.
    pub fn launch(&mut self) -> Result<()> {
        if self.state == LifecycleState::Terminated {
            return Err(LauncherError::ShutDown);
        }

        let existing = self.live_backend().map(|p| (p.id(), p.exit_watch()));
        let (watch, spawned) = match existing {
            Some((pid, watch)) => {
                log::info!("Backend (pid {}) already running; reusing it", pid);
                (watch, false)
            }
            None => {
                log::info!(
                    "Starting backend in {} mode: {}",
                    self.config.mode,
                    self.config.plan.describe()
                );
                let process = self.launcher.spawn(&self.config.plan)?;
                let watch = process.exit_watch();
                self.backend = Some(process);
                (watch, true)
            }
        };
        self.state = LifecycleState::Starting;
        let ticket = LaunchTicket {
            generation: self.invalidate_launch(),
            current: Arc::clone(&self.generation),
        };

        let spec = WindowSpec::for_config(&self.config);
        if let Err(e) = self.host.open_window(&spec, watch, ticket) {
            log::error!("Failed to open window: {}", e);
            self.invalidate_launch();
            // a backend reused from an earlier launch keeps running
            if spawned {
                self.stop_backend();
            }
            self.state = LifecycleState::Idle;
            return Err(e);
        }
        Ok(())
    }

    /// The readiness probe for launch `generation` succeeded and its window
    /// is showing the backend.
    pub fn mark_running(&mut self, generation: u64) {
        if !self.is_current(generation) {
            log::debug!("Ignoring readiness of superseded launch {}", generation);
            return;
        }
        if self.state == LifecycleState::Starting {
            self.state = LifecycleState::Running;
            log::info!("Shell running against {}", self.config.backend_url);
        }
    }

    pub fn shutdown(&mut self, reason: ShutdownReason) -> ShutdownOutcome {
        let exit_app = match reason {
            ShutdownReason::AllWindowsClosed => !self.keep_alive_without_windows,
            ShutdownReason::TerminateSignal | ShutdownReason::AppExit => true,
        };
        if self.state == LifecycleState::Terminated {
            return ShutdownOutcome {
                backend_stopped: false,
                exit_app: true,
            };
        }

        log::info!("Shutting down ({:?})", reason);
        self.state = LifecycleState::ShuttingDown;
        self.invalidate_launch();
        let backend_stopped = self.stop_backend();
        self.state = if exit_app {
            LifecycleState::Terminated
        } else {
            LifecycleState::Idle
        };
        ShutdownOutcome {
            backend_stopped,
            exit_app,
        }
    }

    /// Relaunch when the app is activated with no windows open. Returns
    /// whether a launch happened.
    pub fn reactivate(&mut self) -> Result<bool> {
        if self.host.window_count() > 0 {
            return Ok(false);
        }
        self.launch()?;
        Ok(true)
    }

    fn stop_backend(&mut self) -> bool {
        let Some(mut process) = self.backend.take() else {
            return false;
        };
        match process.terminate(self.config.stop_grace) {
            Ok(outcome) => log::info!("Backend (pid {}) stop: {:?}", process.id(), outcome),
            Err(e) => log::warn!("Backend stop failed: {}", e),
        }
        true
    }
}
