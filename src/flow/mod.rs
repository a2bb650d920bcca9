//! Outbound flow control: latency smoothing and adaptive block sizing

pub mod adaptive;
pub mod latency;

pub use adaptive::{AdaptiveBufferManager, BufferAdjustment};
pub use latency::{LatencySample, LatencyTracker};
