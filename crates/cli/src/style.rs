//! Shared styling utilities for terminal output.

use console::Style;

use vaultsync_core::coordinator::TriggerResponse;

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create an error-styled string (red with cross).
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

/// Create a header-styled string (bold, white).
pub fn header(msg: &str) -> String {
    let style = Style::new().bold();
    style.apply_to(msg).to_string()
}

/// Create a dim-styled string.
pub fn dim(msg: &str) -> String {
    let style = Style::new().dim();
    style.apply_to(msg).to_string()
}

/// Status indicator: a cycle is running (yellow dot).
pub fn status_syncing() -> String {
    let style = Style::new().yellow();
    format!("{} Syncing", style.apply_to("●"))
}

/// Status indicator: idle (green dot).
pub fn status_idle() -> String {
    let style = Style::new().green();
    format!("{} Idle", style.apply_to("●"))
}

/// One line for a coordinator response, styled by how it went.
pub fn response(response: &TriggerResponse) -> String {
    let message = response.message();
    match response {
        TriggerResponse::Completed(outcome) if outcome.conflict => warn(&message),
        TriggerResponse::Completed(_) | TriggerResponse::Status(_) => success(&message),
        TriggerResponse::Validation(report) if report.valid => success(&message),
        TriggerResponse::Failed(_) | TriggerResponse::Validation(_) => error(&message),
        TriggerResponse::Busy | TriggerResponse::Suspended => warn(&message),
        TriggerResponse::Debounced | TriggerResponse::NotDue | TriggerResponse::Disabled => {
            dim(&message)
        }
    }
}
