//! Application configuration
//!
//! Everything tunable lives in [`AppConfig`], which is loaded once from TOML
//! and handed to the supervisor by value. Missing keys fall back to defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::ConfigError;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub reconnect: ReconnectConfig,
    pub auth: AuthConfig,
    pub audio: AudioConfig,
    pub buffer: BufferConfig,
    pub pipe: PipeConfig,
    pub recording: RecordingConfig,
    pub monitor: MonitorConfig,
    pub status: StatusConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: AppConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise use defaults
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Reject settings that would break the flow-control invariants
    pub fn validate(&self) -> Result<(), ConfigError> {
        let b = &self.buffer;
        if b.min_block_size == 0 || b.min_block_size > b.max_block_size {
            return Err(ConfigError::Invalid(format!(
                "buffer bounds [{}, {}] are inverted or empty",
                b.min_block_size, b.max_block_size
            )));
        }
        if b.min_block_size < MIN_BLOCK_SIZE || b.max_block_size > MAX_BLOCK_SIZE {
            return Err(ConfigError::Invalid(format!(
                "buffer bounds [{}, {}] must lie within [{}, {}]",
                b.min_block_size, b.max_block_size, MIN_BLOCK_SIZE, MAX_BLOCK_SIZE
            )));
        }
        if b.initial_block_size < b.min_block_size || b.initial_block_size > b.max_block_size {
            return Err(ConfigError::Invalid(format!(
                "initial block size {} outside [{}, {}]",
                b.initial_block_size, b.min_block_size, b.max_block_size
            )));
        }
        if b.step == 0 {
            return Err(ConfigError::Invalid("buffer step must be non-zero".into()));
        }
        if b.low_latency_ms >= b.high_latency_ms {
            return Err(ConfigError::Invalid(format!(
                "latency band {}..{} ms is empty",
                b.low_latency_ms, b.high_latency_ms
            )));
        }
        if b.window == 0 || b.window > LATENCY_WINDOW {
            return Err(ConfigError::Invalid(format!(
                "latency window {} outside 1..={}",
                b.window, LATENCY_WINDOW
            )));
        }
        if self.pipe.queue_capacity == 0 {
            return Err(ConfigError::Invalid("capture queue capacity must be non-zero".into()));
        }
        if self.reconnect.max_attempts == 0 {
            return Err(ConfigError::Invalid("max reconnect attempts must be non-zero".into()));
        }
        if self.recording.flush_every_frames == 0 {
            return Err(ConfigError::Invalid("recording flush interval must be non-zero".into()));
        }
        if !self.server.url.starts_with("ws://") && !self.server.url.starts_with("wss://") {
            return Err(ConfigError::Invalid(format!(
                "server url must be ws:// or wss://, got {}",
                self.server.url
            )));
        }
        Ok(())
    }
}

pub fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("io", "voicelink", "voice-client")
}

/// Remote service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// WebSocket endpoint
    pub url: String,
    pub connect_timeout_ms: u64,
    /// Heartbeat ping period
    pub ping_interval_ms: u64,
    /// Extra silence tolerated after a missed ping before the link is dead
    pub ping_timeout_ms: u64,
    pub max_message_size: usize,
}

impl ServerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Longest gap between inbound messages before the connection counts as lost
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms + self.ping_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SERVER_URL.to_string(),
            connect_timeout_ms: 10_000,
            ping_interval_ms: 20_000,
            ping_timeout_ms: 15_000,
            max_message_size: 8_000_000,
        }
    }
}

/// Which reconnect delay policy to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// `min(base * 2^n, cap)`
    Exponential,
    /// Fixed list of delays, last one repeated
    Schedule,
}

/// Reconnect policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub kind: BackoffKind,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Delays for [`BackoffKind::Schedule`]
    pub schedule_ms: Vec<u64>,
    /// Consecutive failures before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            kind: BackoffKind::Exponential,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            schedule_ms: vec![1_000, 2_000, 5_000, 10_000, 30_000],
            max_attempts: 10,
        }
    }
}

/// Authentication handshake settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub timeout_ms: u64,
}

impl AuthConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { timeout_ms: 10_000 }
    }
}

/// Audio device settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub channels: u16,
    /// Substring matched against output device names
    pub output_device_name: String,
    /// Use the system default output when the named device is missing
    pub fallback_to_default_output: bool,
    pub device_open_attempts: u32,
    pub device_retry_delay_ms: u64,
    /// Seconds of audio the playback queue can hold
    pub playback_buffer_secs: u32,
}

impl AudioConfig {
    pub fn device_retry_delay(&self) -> Duration {
        Duration::from_millis(self.device_retry_delay_ms)
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: DEFAULT_INPUT_SAMPLE_RATE,
            output_sample_rate: DEFAULT_OUTPUT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            output_device_name: DEFAULT_OUTPUT_DEVICE.to_string(),
            fallback_to_default_output: false,
            device_open_attempts: 3,
            device_retry_delay_ms: 500,
            playback_buffer_secs: 4,
        }
    }
}

/// Adaptive capture block size settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub min_block_size: u32,
    pub max_block_size: u32,
    pub initial_block_size: u32,
    pub step: u32,
    pub high_latency_ms: f64,
    pub low_latency_ms: f64,
    /// Number of latency samples averaged
    pub window: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            min_block_size: MIN_BLOCK_SIZE,
            max_block_size: MAX_BLOCK_SIZE,
            initial_block_size: MIN_BLOCK_SIZE,
            step: BLOCK_SIZE_STEP,
            high_latency_ms: 200.0,
            low_latency_ms: 50.0,
            window: LATENCY_WINDOW,
        }
    }
}

/// What to do when the capture queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the frame being pushed
    #[default]
    DropNewest,
    /// Evict the oldest queued frame to make room
    DropOldest,
}

/// Outbound pipe settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipeConfig {
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    /// Idle wait on the queue before the loop re-checks its state
    pub idle_timeout_ms: u64,
}

impl PipeConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: CAPTURE_QUEUE_CAPACITY,
            overflow: OverflowPolicy::DropNewest,
            idle_timeout_ms: 1_500,
        }
    }
}

/// Inbound recording settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub enabled: bool,
    pub directory: PathBuf,
    pub flush_every_frames: u32,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        let directory = project_dirs()
            .map(|dirs| dirs.data_dir().join("recordings"))
            .unwrap_or_else(|| PathBuf::from("recordings"));
        Self {
            enabled: true,
            directory,
            flush_every_frames: 50,
        }
    }
}

/// Device monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_ms: u64,
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
        }
    }
}

/// Status presentation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// How long the speaking indicator stays lit after the last inbound frame
    pub speaking_decay_ms: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            speaking_decay_ms: 800,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipe.queue_capacity, 25);
        assert_eq!(config.buffer.min_block_size, 480);
        assert_eq!(config.buffer.max_block_size, 1920);
        assert_eq!(config.reconnect.max_attempts, 10);
        assert_eq!(config.server.liveness_window(), Duration::from_secs(35));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let text = r#"
            [server]
            url = "ws://localhost:8000/ws"

            [pipe]
            queue_capacity = 5
            overflow = "drop_oldest"
        "#;
        let config: AppConfig = toml::from_str(text).unwrap();
        assert_eq!(config.server.url, "ws://localhost:8000/ws");
        assert_eq!(config.server.ping_interval_ms, 20_000);
        assert_eq!(config.pipe.queue_capacity, 5);
        assert_eq!(config.pipe.overflow, OverflowPolicy::DropOldest);
        assert_eq!(config.auth.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let mut config = AppConfig::default();
        config.buffer.min_block_size = 2000;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AppConfig::default();
        config.buffer.low_latency_ms = 300.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.pipe.queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.url = "http://example.com".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_buffer() {
        let mut config = AppConfig::default();
        config.buffer.min_block_size = 64;
        config.buffer.initial_block_size = 64;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AppConfig::default();
        config.buffer.max_block_size = 8192;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.buffer.window = LATENCY_WINDOW + 1;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.buffer.window = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.buffer.min_block_size = 960;
        config.buffer.max_block_size = 1440;
        config.buffer.initial_block_size = 960;
        config.buffer.window = 5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[reconnect]\nkind = \"schedule\"\nmax_attempts = 3").unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.reconnect.kind, BackoffKind::Schedule);
        assert_eq!(config.reconnect.max_attempts, 3);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_default(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.audio.output_sample_rate, 24_000);
    }
}
