use crate::controller::BackendStatus;
use crate::ShellState;

/// Lifecycle snapshot for the bundled loading page.
#[tauri::command]
pub fn backend_status(state: tauri::State<'_, ShellState>) -> Result<BackendStatus, String> {
    state
        .controller
        .lock()
        .map(|controller| controller.status())
        .map_err(|e| e.to_string())
}
