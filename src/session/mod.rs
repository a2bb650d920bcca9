//! Session lifecycle: state, reconnect policy and the supervisor

pub mod backoff;
pub mod state;
pub mod supervisor;

pub use backoff::{BackoffPolicy, ReconnectTracker, RetryDecision};
pub use state::{ConnectionState, FailureKind, FatalReason, Session, SessionEnd};
pub use supervisor::{SessionSupervisor, SupervisorExit};
