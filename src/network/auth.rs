//! Post-connect authentication handshake

use std::time::Duration;

use crate::error::TransportError;
use crate::network::protocol::{classify_auth_reply, AuthReply, ClientMessage};
use crate::network::transport::{Transport, WireMessage};

/// Result of one handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Accepted,
    /// Explicit rejection; the credential is no good
    Rejected(String),
    /// No reply within the timeout
    TimedOut,
    /// Reply was not a JSON object
    Malformed(String),
    /// The connection failed mid-handshake
    Transport(TransportError),
}

impl AuthOutcome {
    /// Only an explicit rejection ends the supervisor
    pub fn is_fatal(&self) -> bool {
        matches!(self, AuthOutcome::Rejected(_))
    }
}

/// Sends the auth request and classifies the single reply
#[derive(Debug, Clone)]
pub struct AuthGate {
    timeout: Duration,
}

impl AuthGate {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the handshake. Reads at most one application frame.
    pub async fn authenticate(&self, transport: &mut Transport, token: &str) -> AuthOutcome {
        let request = ClientMessage::Auth { token }.to_json();
        if let Err(e) = transport.sink.send(WireMessage::Text(request)).await {
            return AuthOutcome::Transport(e);
        }

        match tokio::time::timeout(self.timeout, next_reply(transport)).await {
            Err(_) => {
                tracing::warn!("Authentication timed out after {:?}", self.timeout);
                AuthOutcome::TimedOut
            }
            Ok(Err(e)) => AuthOutcome::Transport(e),
            Ok(Ok(WireMessage::Text(text))) => match classify_auth_reply(&text) {
                AuthReply::Accepted => {
                    tracing::info!("Authenticated");
                    AuthOutcome::Accepted
                }
                AuthReply::Rejected(reason) => {
                    tracing::warn!("Authentication rejected: {}", reason);
                    AuthOutcome::Rejected(reason)
                }
                AuthReply::Malformed(reason) => AuthOutcome::Malformed(reason),
            },
            Ok(Ok(WireMessage::Binary(_))) => {
                AuthOutcome::Malformed("binary frame in place of auth reply".to_string())
            }
            Ok(Ok(other)) => AuthOutcome::Malformed(format!("unexpected {:?} during auth", other)),
        }
    }
}

/// Next text or binary frame, skipping keep-alive traffic
async fn next_reply(transport: &mut Transport) -> Result<WireMessage, TransportError> {
    loop {
        match transport.source.recv().await {
            None | Some(Ok(WireMessage::Close)) => return Err(TransportError::Closed),
            Some(Err(e)) => return Err(e),
            Some(Ok(WireMessage::Ping(_))) | Some(Ok(WireMessage::Pong(_))) => continue,
            Some(Ok(msg)) => return Ok(msg),
        }
    }
}
