//! Backend process management
//!
//! Spawns the backend as a child process, forwards its output to the log,
//! watches for it to exit, and stops it with a bounded wait.

use std::io::ErrorKind;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::LaunchPlan;
use crate::error::{LauncherError, Result};
use crate::logging::{self, LineSink, StreamKind};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(200);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shared "has the backend exited" flag. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ExitWatch(Arc<AtomicBool>);

impl ExitWatch {
    pub fn has_exited(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn mark_exited(&self) {
        self.0.store(true, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    AlreadyExited,
    Graceful,
    Killed,
}

pub trait BackendProcess: Send {
    fn id(&self) -> u32;
    fn exit_watch(&self) -> ExitWatch;
    /// Ask the process to stop, wait up to `grace`, then kill it.
    fn terminate(&mut self, grace: Duration) -> Result<StopOutcome>;
}

pub trait BackendLauncher {
    type Process: BackendProcess;
    fn spawn(&self, plan: &LaunchPlan) -> Result<Self::Process>;
}

/// Launches real OS processes.
pub struct ProcessLauncher {
    sink: LineSink,
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self::with_sink(logging::backend_log_sink())
    }

    pub fn with_sink(sink: LineSink) -> Self {
        Self { sink }
    }
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendLauncher for ProcessLauncher {
    type Process = ChildProcess;

    fn spawn(&self, plan: &LaunchPlan) -> Result<ChildProcess> {
        let mut last_error = None;
        for program in &plan.programs {
            let mut cmd = Command::new(program);
            cmd.args(&plan.args);
            if let Some(cwd) = &plan.cwd {
                cmd.current_dir(cwd);
            }
            cmd.stdin(Stdio::null());
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());

            #[cfg(target_os = "windows")]
            {
                use std::os::windows::process::CommandExt;
                cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
            }

            match cmd.spawn() {
                Ok(child) => {
                    log::info!(
                        "Launched backend {} (pid {})",
                        program.to_string_lossy(),
                        child.id()
                    );
                    return Ok(ChildProcess::attach(child, &self.sink));
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    log::debug!("Backend program {} not found", program.to_string_lossy());
                    last_error = Some(LauncherError::Spawn {
                        program: program.to_string_lossy().into_owned(),
                        source: e,
                    });
                }
                Err(e) => {
                    return Err(LauncherError::Spawn {
                        program: program.to_string_lossy().into_owned(),
                        source: e,
                    });
                }
            }
        }
        Err(last_error.unwrap_or(LauncherError::NoProgram))
    }
}

pub struct ChildProcess {
    child: Arc<Mutex<Child>>,
    pid: u32,
    watch: ExitWatch,
    monitor_stop: Arc<AtomicBool>,
}

impl ChildProcess {
    fn attach(mut child: Child, sink: &LineSink) -> Self {
        if let Some(stdout) = child.stdout.take() {
            let sink = Arc::clone(sink);
            std::thread::spawn(move || logging::forward_lines(stdout, StreamKind::Stdout, &sink));
        }
        if let Some(stderr) = child.stderr.take() {
            let sink = Arc::clone(sink);
            std::thread::spawn(move || logging::forward_lines(stderr, StreamKind::Stderr, &sink));
        }

        let pid = child.id();
        let process = Self {
            child: Arc::new(Mutex::new(child)),
            pid,
            watch: ExitWatch::default(),
            monitor_stop: Arc::new(AtomicBool::new(false)),
        };
        process.start_exit_monitor();
        process
    }

    /// Logs the exit code once the process ends on its own. Exit is
    /// informational only; nothing restarts the backend.
    fn start_exit_monitor(&self) {
        let child = Arc::clone(&self.child);
        let watch = self.watch.clone();
        let stop = Arc::clone(&self.monitor_stop);
        let pid = self.pid;

        let spawned = std::thread::Builder::new()
            .name("backend-exit-monitor".into())
            .spawn(move || loop {
                if stop.load(Ordering::Acquire) {
                    break;
                }
                let status = match child.lock() {
                    Ok(mut guard) => guard.try_wait(),
                    Err(_) => break,
                };
                match status {
                    Ok(Some(status)) => {
                        watch.mark_exited();
                        match status.code() {
                            Some(0) => log::info!("Backend (pid {}) exited cleanly", pid),
                            Some(code) => {
                                log::error!("Backend (pid {}) exited with code {}", pid, code)
                            }
                            None => {
                                log::error!("Backend (pid {}) exited by signal ({})", pid, status)
                            }
                        }
                        break;
                    }
                    Ok(None) => std::thread::sleep(EXIT_POLL_INTERVAL),
                    Err(e) => {
                        log::warn!("Could not poll backend (pid {}): {}", pid, e);
                        break;
                    }
                }
            });
        if let Err(e) = spawned {
            log::warn!("Failed to spawn backend exit monitor: {}", e);
        }
    }
}

#[cfg(not(target_os = "windows"))]
fn request_stop(child: &mut Child) -> std::io::Result<()> {
    // SIGTERM lets the backend run its own cleanup first.
    let status = Command::new("kill")
        .args(["-TERM", &child.id().to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    if status.success() {
        Ok(())
    } else {
        child.kill()
    }
}

#[cfg(target_os = "windows")]
fn request_stop(child: &mut Child) -> std::io::Result<()> {
    child.kill()
}

impl BackendProcess for ChildProcess {
    fn id(&self) -> u32 {
        self.pid
    }

    fn exit_watch(&self) -> ExitWatch {
        self.watch.clone()
    }

    fn terminate(&mut self, grace: Duration) -> Result<StopOutcome> {
        self.monitor_stop.store(true, Ordering::Release);
        let pid = self.pid;
        let stop_err = |source: std::io::Error| LauncherError::Stop { pid, source };

        let mut child = match self.child.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if child.try_wait().map_err(stop_err)?.is_some() {
            self.watch.mark_exited();
            return Ok(StopOutcome::AlreadyExited);
        }

        log::info!("Stopping backend (pid {})...", pid);
        request_stop(&mut child).map_err(stop_err)?;

        let start = Instant::now();
        while start.elapsed() < grace {
            if child.try_wait().map_err(stop_err)?.is_some() {
                self.watch.mark_exited();
                log::info!("Backend (pid {}) stopped", pid);
                return Ok(StopOutcome::Graceful);
            }
            std::thread::sleep(STOP_POLL_INTERVAL);
        }

        log::warn!("Backend (pid {}) still running after {:?}, killing", pid, grace);
        if let Err(e) = child.kill() {
            // already gone between the last poll and the kill
            if e.kind() != ErrorKind::InvalidInput {
                return Err(stop_err(e));
            }
        }
        child.wait().map_err(stop_err)?;
        self.watch.mark_exited();
        Ok(StopOutcome::Killed)
    }
}
