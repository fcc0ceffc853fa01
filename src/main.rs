// Prevents additional console window on Windows in release, DO NOT REMOVE!!
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod backend;
mod commands;
mod config;
mod controller;
mod error;
mod logging;
mod readiness;
mod window;

use std::path::PathBuf;
use std::sync::Mutex;

use tauri::{AppHandle, Manager, RunEvent};

use backend::ProcessLauncher;
use config::{LaunchConfig, PackagingMode};
use controller::{Controller, ShutdownOutcome, ShutdownReason};
use window::TauriWindowHost;

type ShellController = Controller<TauriWindowHost, ProcessLauncher>;

pub(crate) struct ShellState {
    pub(crate) controller: Mutex<ShellController>,
}

fn with_controller<T>(app: &AppHandle, f: impl FnOnce(&mut ShellController) -> T) -> Option<T> {
    let state = app.try_state::<ShellState>()?;
    let mut guard = match state.controller.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let result = f(&mut guard);
    Some(result)
}

pub(crate) fn mark_backend_running(app: &AppHandle, generation: u64) {
    with_controller(app, |controller| controller.mark_running(generation));
}

fn shutdown(app: &AppHandle, reason: ShutdownReason) -> ShutdownOutcome {
    let outcome = with_controller(app, |controller| controller.shutdown(reason)).unwrap_or(
        ShutdownOutcome {
            backend_stopped: false,
            exit_app: true,
        },
    );
    if outcome.backend_stopped {
        log::info!("Backend stopped ({:?})", reason);
    }
    outcome
}

#[cfg(target_os = "macos")]
fn reactivate(app: &AppHandle) {
    match with_controller(app, |controller| controller.reactivate()) {
        Some(Ok(true)) => log::info!("Reactivated with a fresh window"),
        Some(Ok(false)) | None => {}
        Some(Err(e)) => log::error!("Failed to reactivate: {}", e),
    }
}

#[cfg(unix)]
async fn termination_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate = signal(SignalKind::terminate())?;
    terminate.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn termination_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Stop the backend and exit when the OS asks the shell to terminate.
fn listen_for_termination(app: AppHandle) {
    tauri::async_runtime::spawn(async move {
        if let Err(e) = termination_signal().await {
            log::warn!("Termination signal handler unavailable: {}", e);
            return;
        }
        log::info!("Termination signal received");
        let handle = app.clone();
        let stopped = tauri::async_runtime::spawn_blocking(move || {
            shutdown(&handle, ShutdownReason::TerminateSignal)
        })
        .await;
        if let Err(e) = stopped {
            log::warn!("Shutdown task failed: {}", e);
        }
        app.exit(0);
    });
}

fn main() {
    tauri::Builder::default()
        .plugin(logging::plugin())
        .plugin(tauri_plugin_notification::init())
        .setup(|app| {
            let mode = PackagingMode::from_args(std::env::args().skip(1));
            log::info!("PrintDesk is starting ({} mode)", mode);

            let resource_dir = app.path().resource_dir().ok();
            // development runs start from the project root, like `python flask-app/app.py`
            let project_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            let config = LaunchConfig::resolve(mode, resource_dir.as_deref(), &project_dir)?;
            let host = TauriWindowHost::new(app.handle().clone(), config.readiness);
            app.manage(ShellState {
                controller: Mutex::new(Controller::new(config, host, ProcessLauncher::new())),
            });

            let launched = with_controller(app.handle(), |controller| controller.launch());
            if let Some(launched) = launched {
                launched?;
            }

            listen_for_termination(app.handle().clone());
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![commands::backend_status])
        .build(tauri::generate_context!())
        .expect("error while building tauri application")
        .run(|app, event| match event {
            RunEvent::ExitRequested { code, api, .. } => {
                let reason = if code.is_none() {
                    ShutdownReason::AllWindowsClosed
                } else {
                    ShutdownReason::AppExit
                };
                if !shutdown(app, reason).exit_app {
                    api.prevent_exit();
                }
            }
            RunEvent::Exit => {
                shutdown(app, ShutdownReason::AppExit);
            }
            #[cfg(target_os = "macos")]
            RunEvent::Reopen {
                has_visible_windows,
                ..
            } => {
                if !has_visible_windows {
                    reactivate(app);
                }
            }
            _ => {}
        });
}
