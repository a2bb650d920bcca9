//! Status reporting toward the user-facing collaborator
//!
//! The window itself lives outside this crate. Everything the engine wants to
//! show goes through [`StatusSink`].

pub mod console;

use serde::Serialize;

use crate::session::ConnectionState;

pub use console::ConsoleStatus;

/// Severity tier of a status line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Notifications consumed by the status window
pub trait StatusSink: Send + Sync {
    fn set_status(&self, text: &str, severity: Severity);

    fn set_connected(&self, connected: bool);

    /// Inbound audio arrived; the sink owns the decay of the indicator
    fn indicate_speaking(&self);

    /// One call per supervisor state transition
    fn phase_changed(&self, state: &ConnectionState, text: &str, severity: Severity) {
        let _ = state;
        self.set_status(text, severity);
    }
}
