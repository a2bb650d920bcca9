//! # Voice Link Client
//!
//! Keeps an authenticated, bidirectional voice session open with a remote
//! speech service: microphone audio goes out with adaptive flow control,
//! synthesized audio comes back to a virtual output device and a recording.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                     SessionSupervisor (session::supervisor)              │
//! │   Idle → Connecting → Authenticating → Streaming → Closing → Idle        │
//! │                 ╲               ╲                                        │
//! │                  Failed(Retryable | Fatal | Exhausted)                   │
//! └───────┬───────────────────────┬─────────────────────────┬────────────────┘
//!         │                       │                         │
//!         ▼                       ▼                         ▼
//! ┌───────────────┐      ┌─────────────────┐      ┌───────────────────┐
//! │  Microphone   │      │    AuthGate     │      │  DeviceMonitor    │
//! │ (cpal thread) │      │ (network::auth) │      │ (audio::monitor)  │
//! └──────┬────────┘      └─────────────────┘      └───────────────────┘
//!        │ AudioFrame (i16 LE)
//!        ▼
//! ┌───────────────┐   send task    ┌─────────────────────────────────────┐
//! │ CaptureQueue  │ ─────────────▶ │  OutboundAudioPipe (network::sender)│
//! │ (ArrayQueue)  │                │  send latency → AdaptiveBufferManager│
//! └───────────────┘                └──────────────────┬──────────────────┘
//!                                                     │ binary / ping
//!                                                     ▼
//!                                        ┌─────────────────────────┐
//!                                        │  WebSocket transport    │
//!                                        └────────────┬────────────┘
//!                                                     │ binary / text
//!                                                     ▼
//!                                   ┌─────────────────────────────────────┐
//!                                   │ InboundAudioSink (network::receiver)│
//!                                   └──────┬──────────────┬───────────────┘
//!                                          ▼              ▼
//!                                 ┌──────────────┐ ┌────────────────────┐
//!                                 │ Virtual out  │ │ SessionRecorder    │
//!                                 │ (cpal thread)│ │ YYYY-MM-DD/*.wav   │
//!                                 └──────────────┘ └────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod credentials;
pub mod error;
pub mod flow;
pub mod network;
pub mod recording;
pub mod session;
pub mod ui;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Speech service endpoint
    pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8000/ws";

    /// Microphone sample rate
    pub const DEFAULT_INPUT_SAMPLE_RATE: u32 = 16_000;

    /// Synthesized audio sample rate
    pub const DEFAULT_OUTPUT_SAMPLE_RATE: u32 = 24_000;

    /// Mono in both directions
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Virtual cable the synthesized voice is played into
    #[cfg(target_os = "macos")]
    pub const DEFAULT_OUTPUT_DEVICE: &str = "BlackHole 2ch";
    #[cfg(not(target_os = "macos"))]
    pub const DEFAULT_OUTPUT_DEVICE: &str = "CABLE Input";

    /// Capture block size bounds, in samples
    pub const MIN_BLOCK_SIZE: u32 = 480;
    pub const MAX_BLOCK_SIZE: u32 = 1920;
    pub const BLOCK_SIZE_STEP: u32 = 240;

    /// Send-latency samples averaged by the buffer manager
    pub const LATENCY_WINDOW: usize = 10;

    /// Capture queue capacity (in frames)
    pub const CAPTURE_QUEUE_CAPACITY: usize = 25;
}
