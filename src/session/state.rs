//! Connection state and per-session data

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Why an attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Try again after the backoff delay
    Retryable,
    /// Do not try again
    Fatal,
    /// Too many consecutive failures
    Exhausted,
}

/// Supervisor state, observed through `StatusSink::phase_changed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "state", content = "kind", rename_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Authenticating,
    Streaming,
    Closing,
    Failed(FailureKind),
}

impl ConnectionState {
    /// States the supervisor never leaves
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::Failed(FailureKind::Fatal) | ConnectionState::Failed(FailureKind::Exhausted)
        )
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, ConnectionState::Streaming)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Authenticating => write!(f, "authenticating"),
            ConnectionState::Streaming => write!(f, "streaming"),
            ConnectionState::Closing => write!(f, "closing"),
            ConnectionState::Failed(kind) => write!(f, "failed ({:?})", kind),
        }
    }
}

/// One authenticated streaming attempt. Never reused across connects.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub started_at: DateTime<Local>,
    pub authenticated: bool,
    pub recording_path: Option<PathBuf>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Local::now(),
            authenticated: false,
            recording_path: None,
        }
    }

    /// Wall-clock time since the connect succeeded
    pub fn uptime(&self) -> chrono::Duration {
        Local::now() - self.started_at
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// How a session attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Explicit stop requested
    Stopped,
    Retryable(String),
    Fatal(FatalReason),
}

/// Failures that end the supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatalReason {
    AuthRejected(String),
    CredentialMissing,
}

impl fmt::Display for FatalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalReason::AuthRejected(reason) => write!(f, "authentication rejected: {}", reason),
            FatalReason::CredentialMissing => write!(f, "no credential available"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(ConnectionState::Failed(FailureKind::Fatal).is_terminal());
        assert!(ConnectionState::Failed(FailureKind::Exhausted).is_terminal());
        assert!(!ConnectionState::Failed(FailureKind::Retryable).is_terminal());
        assert!(!ConnectionState::Streaming.is_terminal());
    }

    #[test]
    fn test_sessions_are_distinct() {
        let a = Session::new();
        let b = Session::new();
        assert_ne!(a.id, b.id);
        assert!(!a.authenticated);
        assert!(a.recording_path.is_none());
    }

    #[test]
    fn test_state_serializes_for_status_consumers() {
        let json = serde_json::to_string(&ConnectionState::Failed(FailureKind::Retryable)).unwrap();
        assert_eq!(json, r#"{"state":"failed","kind":"retryable"}"#);
        let json = serde_json::to_string(&ConnectionState::Streaming).unwrap();
        assert_eq!(json, r#"{"state":"streaming"}"#);
    }
}
