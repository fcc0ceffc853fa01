//! Main window management
//!
//! The window opens on the bundled loading page, then navigates to the
//! backend once the readiness probe succeeds. If the backend never comes up
//! the loading page switches to an error state instead.

use std::path::{Path, PathBuf};

use tauri::image::Image;
use tauri::{AppHandle, Manager, Url, WebviewUrl, WebviewWindow, WebviewWindowBuilder};
use tauri_plugin_notification::NotificationExt;

use crate::backend::ExitWatch;
use crate::config::{
    LaunchConfig, CONTENT_SECURITY_POLICY, MAIN_WINDOW_LABEL, WINDOW_HEIGHT, WINDOW_TITLE,
    WINDOW_WIDTH,
};
use crate::controller::LaunchTicket;
use crate::error::{LauncherError, Result};
use crate::readiness::{self, ReadinessPolicy, ReadyReport};

const LOADING_PAGE: &str = "index.html";

/// Everything needed to build the main window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSpec {
    pub label: String,
    pub title: String,
    pub width: f64,
    pub height: f64,
    pub url: String,
    pub icon_path: PathBuf,
    pub preload_path: PathBuf,
    pub content_security_policy: &'static str,
    pub devtools: bool,
    pub web_security: bool,
}

impl WindowSpec {
    pub fn for_config(config: &LaunchConfig) -> Self {
        Self {
            label: MAIN_WINDOW_LABEL.to_string(),
            title: WINDOW_TITLE.to_string(),
            width: WINDOW_WIDTH,
            height: WINDOW_HEIGHT,
            url: config.backend_url.clone(),
            icon_path: config.icon_path.clone(),
            preload_path: config.preload_path.clone(),
            content_security_policy: CONTENT_SECURITY_POLICY,
            devtools: config.mode.opens_devtools(),
            web_security: config.mode.web_security_enabled(),
        }
    }
}

pub trait WindowHost {
    fn window_count(&self) -> usize;
    /// Open the window and start waiting for the backend on its behalf.
    /// Nothing may touch the window once `ticket` is no longer current.
    fn open_window(
        &self,
        spec: &WindowSpec,
        backend: ExitWatch,
        ticket: LaunchTicket,
    ) -> Result<()>;
}

/// What the readiness thread does with its window once waiting ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NavigatorStep {
    Navigate,
    ShowError,
    Abandon,
}

pub(crate) fn navigator_step(
    ticket: &LaunchTicket,
    outcome: &Result<ReadyReport>,
) -> NavigatorStep {
    if !ticket.is_current() {
        NavigatorStep::Abandon
    } else if outcome.is_ok() {
        NavigatorStep::Navigate
    } else {
        NavigatorStep::ShowError
    }
}

/// Script installed before any page script runs: the CSP as a meta tag,
/// followed by the preload asset when there is one.
pub fn initialization_script(csp: &str, preload: Option<&str>) -> String {
    let csp_literal = serde_json::to_string(csp).unwrap_or_else(|_| "\"\"".to_string());
    let mut script = format!(
        r#"(function () {{
  var csp = {csp_literal};
  function applyCsp() {{
    if (document.querySelector('meta[http-equiv="Content-Security-Policy"]')) {{ return; }}
    var meta = document.createElement("meta");
    meta.httpEquiv = "Content-Security-Policy";
    meta.content = csp;
    (document.head || document.documentElement).prepend(meta);
  }}
  if (document.readyState === "loading") {{
    document.addEventListener("DOMContentLoaded", applyCsp);
  }} else {{
    applyCsp();
  }}
}})();
"#
    );
    if let Some(preload) = preload {
        script.push_str(preload);
        if !preload.ends_with('\n') {
            script.push('\n');
        }
    }
    script
}

pub fn read_preload(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) => {
            log::warn!("Preload script {} unavailable: {}", path.display(), e);
            None
        }
    }
}

fn load_icon(path: &Path) -> Option<Image<'static>> {
    match Image::from_path(path) {
        Ok(icon) => Some(icon),
        Err(e) => {
            log::warn!("Window icon {} unavailable: {}", path.display(), e);
            None
        }
    }
}

pub struct TauriWindowHost {
    app: AppHandle,
    readiness: ReadinessPolicy,
}

impl TauriWindowHost {
    pub fn new(app: AppHandle, readiness: ReadinessPolicy) -> Self {
        Self { app, readiness }
    }

    /// Waits for the backend, then drives the window this launch built. The
    /// label is reused across launches, so the window is never looked up by it.
    fn spawn_navigator(
        &self,
        window: WebviewWindow,
        url: String,
        backend: ExitWatch,
        ticket: LaunchTicket,
    ) {
        let app = self.app.clone();
        let policy = self.readiness;
        let spawned = std::thread::Builder::new()
            .name("backend-readiness".into())
            .spawn(move || {
                let outcome = readiness::wait_until_serving(&url, &policy, || {
                    ticket.is_current() && !backend.has_exited()
                });
                match navigator_step(&ticket, &outcome) {
                    NavigatorStep::Abandon => {
                        log::debug!(
                            "Launch {} was superseded; leaving its window",
                            ticket.generation()
                        );
                    }
                    NavigatorStep::Navigate => {
                        if let Ok(report) = &outcome {
                            log::info!(
                                "Backend ready after {} attempt(s) in {:?}",
                                report.attempts,
                                report.elapsed
                            );
                        }
                        match Url::parse(&url) {
                            Ok(target) => {
                                if let Err(e) = window.navigate(target) {
                                    log::error!("Failed to navigate to {}: {}", url, e);
                                    return;
                                }
                                crate::mark_backend_running(&app, ticket.generation());
                            }
                            Err(e) => log::error!("Backend url {} is invalid: {}", url, e),
                        }
                    }
                    NavigatorStep::ShowError => {
                        if let Err(e) = outcome {
                            log::error!("Backend did not become ready: {}", e);
                            show_startup_error(&app, &window, &e);
                        }
                    }
                }
            });
        if let Err(e) = spawned {
            log::error!("Failed to spawn readiness thread: {}", e);
        }
    }
}

fn show_startup_error(app: &AppHandle, window: &WebviewWindow, error: &LauncherError) {
    let message = error.to_string();
    let literal = serde_json::to_string(&message).unwrap_or_else(|_| "\"\"".to_string());
    if let Err(e) = window.eval(&format!(
        "window.showStartupError && window.showStartupError({})",
        literal
    )) {
        log::warn!("Failed to show startup error in window: {}", e);
    }
    if let Err(e) = app
        .notification()
        .builder()
        .title("PrintDesk could not start")
        .body(&message)
        .show()
    {
        log::warn!("Failed to show startup notification: {}", e);
    }
}

#[cfg(target_os = "windows")]
fn relax_web_security<'a>(
    builder: WebviewWindowBuilder<'a, tauri::Wry, AppHandle>,
) -> WebviewWindowBuilder<'a, tauri::Wry, AppHandle> {
    // Replacing the browser args drops WebView2's defaults, so they are repeated here.
    builder.additional_browser_args(
        "--disable-features=msWebOOUI,msPdfOOUI,msSmartScreenProtection --disable-web-security",
    )
}

#[cfg(not(target_os = "windows"))]
fn relax_web_security<'a>(
    builder: WebviewWindowBuilder<'a, tauri::Wry, AppHandle>,
) -> WebviewWindowBuilder<'a, tauri::Wry, AppHandle> {
    log::debug!("Relaxed web security is only available with WebView2");
    builder
}

impl WindowHost for TauriWindowHost {
    fn window_count(&self) -> usize {
        self.app.webview_windows().len()
    }

    fn open_window(
        &self,
        spec: &WindowSpec,
        backend: ExitWatch,
        ticket: LaunchTicket,
    ) -> Result<()> {
        let preload = read_preload(&spec.preload_path);
        let script = initialization_script(spec.content_security_policy, preload.as_deref());

        let loading = WebviewUrl::App(LOADING_PAGE.into());
        let mut builder = WebviewWindowBuilder::new(&self.app, &spec.label, loading)
            .title(&spec.title)
            .inner_size(spec.width, spec.height)
            .initialization_script(&script);
        if let Some(icon) = load_icon(&spec.icon_path) {
            builder = builder.icon(icon)?;
        }
        if !spec.web_security {
            builder = relax_web_security(builder);
        }

        let window = builder.build()?;
        log::info!("Opened window {} ({}x{})", spec.label, spec.width, spec.height);

        if spec.devtools {
            window.open_devtools();
        }

        self.spawn_navigator(window, spec.url.clone(), backend, ticket);
        Ok(())
    }
}
