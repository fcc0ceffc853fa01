use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum LauncherError {
    #[error("resource directory is unavailable; cannot locate the packaged backend")]
    ResourceDirUnavailable,

    #[error("backend launch plan has no program to run")]
    NoProgram,

    #[error("failed to spawn backend `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to stop backend (pid {pid}): {source}")]
    Stop {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid backend url `{0}`")]
    InvalidUrl(String),

    #[error("backend exited before it started serving {url}")]
    BackendExited { url: String },

    #[error("backend at {url} was not serving after {waited:?}")]
    BackendNotReady { url: String, waited: Duration },

    #[error("window error: {0}")]
    Window(#[from] tauri::Error),

    #[error("the shell has already shut down")]
    ShutDown,
}

pub type Result<T> = std::result::Result<T, LauncherError>;
