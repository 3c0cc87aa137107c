//! Progress reporters: interactive for people, JSON lines for tools

mod interactive;
mod json;
pub mod render;

use crossterm::tty::IsTty;

use readyup_core::config::OutputMode;
use readyup_core::model::ServiceId;
use readyup_core::reporter::ProgressReporter;

pub use interactive::InteractiveReporter;
pub use json::{JsonReporter, preflight_record};

/// Output mode with `Auto` resolved against stdout
pub fn resolve_mode(mode: OutputMode) -> OutputMode {
    match mode {
        OutputMode::Auto if std::io::stdout().is_tty() => OutputMode::Interactive,
        OutputMode::Auto => OutputMode::Json,
        other => other,
    }
}

/// Build the reporter for a mode. `order` is the display order of services.
pub fn for_mode(mode: OutputMode, order: Vec<ServiceId>) -> Box<dyn ProgressReporter> {
    let stdout = std::io::stdout();
    match resolve_mode(mode) {
        OutputMode::Json => Box::new(JsonReporter::new(stdout)),
        _ => {
            let tty = stdout.is_tty();
            let color = tty && std::env::var_os("NO_COLOR").is_none();
            Box::new(InteractiveReporter::new(stdout, order, tty, color))
        }
    }
}
