//! Headless status sink that reports through `tracing`

use parking_lot::Mutex;
use std::time::{Duration, Instant};

use crate::session::ConnectionState;
use crate::ui::{Severity, StatusSink};

#[derive(Debug, Default)]
struct ConsoleState {
    connected: bool,
    speaking_until: Option<Instant>,
    last_status: Option<(String, Severity)>,
    last_phase: Option<ConnectionState>,
}

/// Logs status changes and tracks the speaking indicator
pub struct ConsoleStatus {
    state: Mutex<ConsoleState>,
    speaking_decay: Duration,
}

impl ConsoleStatus {
    pub fn new(speaking_decay: Duration) -> Self {
        Self {
            state: Mutex::new(ConsoleState::default()),
            speaking_decay,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Whether inbound audio arrived within the decay window
    pub fn is_speaking(&self) -> bool {
        let state = self.state.lock();
        state.connected && state.speaking_until.is_some_and(|until| Instant::now() < until)
    }

    pub fn last_status(&self) -> Option<(String, Severity)> {
        self.state.lock().last_status.clone()
    }

    pub fn last_phase(&self) -> Option<ConnectionState> {
        self.state.lock().last_phase
    }
}

impl StatusSink for ConsoleStatus {
    fn set_status(&self, text: &str, severity: Severity) {
        match severity {
            Severity::Info => tracing::info!(target: "status", "{}", text),
            Severity::Warning => tracing::warn!(target: "status", "{}", text),
            Severity::Error => tracing::error!(target: "status", "{}", text),
        }
        self.state.lock().last_status = Some((text.to_string(), severity));
    }

    fn set_connected(&self, connected: bool) {
        let mut state = self.state.lock();
        state.connected = connected;
        if !connected {
            state.speaking_until = None;
        }
    }

    fn indicate_speaking(&self) {
        let mut state = self.state.lock();
        if !state.connected {
            return;
        }
        let now = Instant::now();
        let was_speaking = state.speaking_until.is_some_and(|until| now < until);
        state.speaking_until = Some(now + self.speaking_decay);
        drop(state);

        if !was_speaking {
            tracing::debug!(target: "status", "Remote speaking");
        }
    }

    fn phase_changed(&self, state: &ConnectionState, text: &str, severity: Severity) {
        self.state.lock().last_phase = Some(*state);
        self.set_status(text, severity);
    }
}
