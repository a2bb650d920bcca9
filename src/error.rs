//! Error types for the voice session client

use thiserror::Error;

/// Main error type for the client
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Playback buffer overflow ({0} samples dropped)")]
    BufferOverflow(usize),

    #[error("Stream is not running")]
    NotRunning,

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Transport errors.
///
/// Only this type crosses the `network::transport` boundary; the WebSocket
/// library's own errors are flattened into strings here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Connection timed out after {0} ms")]
    ConnectTimeout(u64),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Connection closed by peer")]
    Closed,

    #[error("Heartbeat timed out")]
    HeartbeatTimeout,
}

/// Recording file errors
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Failed to create recording {path}: {reason}")]
    Create { path: String, reason: String },

    #[error("Failed to write recording: {0}")]
    Write(String),

    #[error("Failed to finalize recording: {0}")]
    Finalize(String),
}

impl From<hound::Error> for RecordingError {
    fn from(err: hound::Error) -> Self {
        RecordingError::Write(err.to_string())
    }
}

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type alias for the client
pub type Result<T> = std::result::Result<T, Error>;
