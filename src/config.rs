//! Launch configuration
//!
//! Everything the shell needs to know is resolved once at startup into a
//! [`LaunchConfig`] and handed to the controller. Nothing here reads global
//! state after construction.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::error::{LauncherError, Result};
use crate::readiness::ReadinessPolicy;

pub const BACKEND_URL: &str = "http://localhost:5000";
pub const CONTENT_SECURITY_POLICY: &str = "default-src 'self' 'unsafe-inline'";
pub const PACKAGED_FLAG: &str = "--packaged";

pub const MAIN_WINDOW_LABEL: &str = "main";
pub const WINDOW_TITLE: &str = "PrintDesk";
pub const WINDOW_WIDTH: f64 = 1200.0;
pub const WINDOW_HEIGHT: f64 = 800.0;

const PACKAGED_BACKEND_NAME: &str = "app";
const DEV_BACKEND_SCRIPT: &str = "flask-app/app.py";
const DEV_INTERPRETERS: [&str; 2] = ["python3", "python"];
const ICON_ASSET: &str = "assets/icon.png";
const PRELOAD_ASSET: &str = "assets/preload.js";

const READY_TIMEOUT_ENV: &str = "PRINTDESK_BACKEND_READY_TIMEOUT_MS";
const DEFAULT_READY_TIMEOUT_MS: u64 = 30_000;
const READY_TIMEOUT_MIN_MS: u64 = 1_000;
const READY_TIMEOUT_MAX_MS: u64 = 10 * 60 * 1000;

const STOP_TIMEOUT_ENV: &str = "PRINTDESK_BACKEND_STOP_TIMEOUT_MS";
const DEFAULT_STOP_TIMEOUT_MS: u64 = 5_000;
const STOP_TIMEOUT_MIN_MS: u64 = 100;
const STOP_TIMEOUT_MAX_MS: u64 = 60_000;

/// Where the backend comes from. Fixed for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackagingMode {
    Development,
    Packaged,
}

impl PackagingMode {
    /// Only `--packaged` is recognized; anything else on the command line is ignored.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if args.into_iter().any(|arg| arg.as_ref() == PACKAGED_FLAG) {
            PackagingMode::Packaged
        } else {
            PackagingMode::Development
        }
    }

    pub fn is_packaged(self) -> bool {
        matches!(self, PackagingMode::Packaged)
    }

    pub fn opens_devtools(self) -> bool {
        !self.is_packaged()
    }

    /// Relaxed web security is a development convenience and never ships.
    pub fn web_security_enabled(self) -> bool {
        self.is_packaged()
    }
}

impl fmt::Display for PackagingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackagingMode::Development => f.write_str("development"),
            PackagingMode::Packaged => f.write_str("packaged"),
        }
    }
}

/// How to start the backend process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    /// Tried in order; the next one is used only when the previous is not found.
    pub programs: Vec<OsString>,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
}

impl LaunchPlan {
    pub fn packaged(resource_dir: &Path) -> Self {
        let binary = resource_dir.join(format!(
            "{}{}",
            PACKAGED_BACKEND_NAME,
            std::env::consts::EXE_SUFFIX
        ));
        Self {
            programs: vec![binary.into_os_string()],
            args: Vec::new(),
            cwd: Some(resource_dir.to_path_buf()),
        }
    }

    pub fn development(project_dir: &Path) -> Self {
        Self {
            programs: DEV_INTERPRETERS.iter().map(OsString::from).collect(),
            args: vec![project_dir.join(DEV_BACKEND_SCRIPT).into_os_string()],
            cwd: None,
        }
    }

    pub fn describe(&self) -> String {
        let mut parts: Vec<String> = self
            .programs
            .first()
            .map(|p| p.to_string_lossy().into_owned())
            .into_iter()
            .collect();
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().into_owned()));
        parts.join(" ")
    }
}

#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub mode: PackagingMode,
    pub backend_url: String,
    pub plan: LaunchPlan,
    pub icon_path: PathBuf,
    pub preload_path: PathBuf,
    pub readiness: ReadinessPolicy,
    pub stop_grace: Duration,
}

impl LaunchConfig {
    /// `project_dir` anchors the development paths; packaged builds resolve
    /// everything against the bundle's resource directory.
    pub fn resolve(
        mode: PackagingMode,
        resource_dir: Option<&Path>,
        project_dir: &Path,
    ) -> Result<Self> {
        let (plan, asset_root) = match mode {
            PackagingMode::Packaged => {
                let resource_dir = resource_dir.ok_or(LauncherError::ResourceDirUnavailable)?;
                (LaunchPlan::packaged(resource_dir), resource_dir.to_path_buf())
            }
            PackagingMode::Development => {
                (LaunchPlan::development(project_dir), project_dir.to_path_buf())
            }
        };

        let ready_timeout = duration_from_env(
            READY_TIMEOUT_ENV,
            DEFAULT_READY_TIMEOUT_MS,
            READY_TIMEOUT_MIN_MS,
            READY_TIMEOUT_MAX_MS,
        );
        let stop_grace = duration_from_env(
            STOP_TIMEOUT_ENV,
            DEFAULT_STOP_TIMEOUT_MS,
            STOP_TIMEOUT_MIN_MS,
            STOP_TIMEOUT_MAX_MS,
        );

        Ok(Self {
            mode,
            backend_url: BACKEND_URL.to_string(),
            plan,
            icon_path: asset_root.join(ICON_ASSET),
            preload_path: asset_root.join(PRELOAD_ASSET),
            readiness: ReadinessPolicy {
                timeout: ready_timeout,
                ..ReadinessPolicy::default()
            },
            stop_grace,
        })
    }
}

fn duration_from_env(name: &str, default_ms: u64, min_ms: u64, max_ms: u64) -> Duration {
    let raw = std::env::var(name).ok();
    let ms = parse_clamped_ms(raw.as_deref(), default_ms, min_ms, max_ms);
    if raw.is_some() {
        log::debug!("{} resolved to {}ms", name, ms);
    }
    Duration::from_millis(ms)
}

fn parse_clamped_ms(raw: Option<&str>, default_ms: u64, min_ms: u64, max_ms: u64) -> u64 {
    let Some(raw) = raw else {
        return default_ms;
    };
    match raw.trim().parse::<u64>() {
        Ok(value) => value.clamp(min_ms, max_ms),
        Err(_) => {
            log::warn!("Ignoring invalid millisecond value {:?}", raw);
            default_ms
        }
    }
}
