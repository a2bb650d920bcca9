//! Adaptive capture block sizing
//!
//! Slow sends grow the capture block so fewer, larger frames go out; fast
//! sends shrink it back toward the low-latency minimum. Between the two
//! thresholds nothing changes, which keeps the size from oscillating.

use std::time::Duration;

use crate::config::BufferConfig;
use crate::flow::latency::LatencyTracker;

/// Outcome of a latency update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferAdjustment {
    Grew { from: u32, to: u32 },
    Shrank { from: u32, to: u32 },
    Held(u32),
}

impl BufferAdjustment {
    pub fn size(&self) -> u32 {
        match *self {
            BufferAdjustment::Grew { to, .. } | BufferAdjustment::Shrank { to, .. } => to,
            BufferAdjustment::Held(size) => size,
        }
    }
}

/// Maps smoothed send latency to a target capture block size
#[derive(Debug, Clone)]
pub struct AdaptiveBufferManager {
    tracker: LatencyTracker,
    current_size: u32,
    min_size: u32,
    max_size: u32,
    step: u32,
    high_latency_ms: f64,
    low_latency_ms: f64,
}

impl AdaptiveBufferManager {
    pub fn new(config: &BufferConfig) -> Self {
        Self {
            tracker: LatencyTracker::new(config.window),
            current_size: config
                .initial_block_size
                .clamp(config.min_block_size, config.max_block_size),
            min_size: config.min_block_size,
            max_size: config.max_block_size,
            step: config.step,
            high_latency_ms: config.high_latency_ms,
            low_latency_ms: config.low_latency_ms,
        }
    }

    /// Feed one observed send latency
    pub fn update_latency(&mut self, latency: Duration) -> BufferAdjustment {
        self.update_latency_ms(latency.as_secs_f64() * 1000.0)
    }

    pub fn update_latency_ms(&mut self, latency_ms: f64) -> BufferAdjustment {
        let avg = self.tracker.record_ms(latency_ms);
        let from = self.current_size;

        let adjustment = if avg > self.high_latency_ms {
            self.current_size = from.saturating_add(self.step).min(self.max_size);
            BufferAdjustment::Grew { from, to: self.current_size }
        } else if avg < self.low_latency_ms {
            self.current_size = from.saturating_sub(self.step).max(self.min_size);
            BufferAdjustment::Shrank { from, to: self.current_size }
        } else {
            BufferAdjustment::Held(from)
        };

        if self.current_size != from {
            tracing::debug!(
                "Buffer size adjusted {} -> {} (latency: {:.1}ms)",
                from,
                self.current_size,
                avg
            );
            adjustment
        } else {
            BufferAdjustment::Held(from)
        }
    }

    /// Block size to use the next time the capture stream is opened
    pub fn get_buffer_size(&self) -> u32 {
        self.current_size
    }

    pub fn smoothed_latency_ms(&self) -> f64 {
        self.tracker.mean_ms()
    }

    pub fn bounds(&self) -> (u32, u32) {
        (self.min_size, self.max_size)
    }

    pub fn step(&self) -> u32 {
        self.step
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn manager() -> AdaptiveBufferManager {
        AdaptiveBufferManager::new(&BufferConfig::default())
    }

    #[test]
    fn test_starts_at_initial_size() {
        let m = manager();
        assert_eq!(m.get_buffer_size(), 480);
        assert_eq!(m.bounds(), (480, 1920));
    }

    #[test]
    fn test_high_latency_grows_to_max() {
        let mut m = manager();
        let mut last = m.get_buffer_size();
        for _ in 0..20 {
            m.update_latency(Duration::from_millis(350));
            let size = m.get_buffer_size();
            assert!(size >= last);
            last = size;
        }
        assert_eq!(m.get_buffer_size(), 1920);
    }

    #[test]
    fn test_low_latency_clamps_at_min() {
        let mut m = manager();
        let adj = m.update_latency_ms(5.0);
        assert_eq!(adj, BufferAdjustment::Held(480));
        assert_eq!(m.get_buffer_size(), 480);
    }

    #[test]
    fn test_hysteresis_band_holds() {
        let mut m = manager();
        for _ in 0..3 {
            m.update_latency_ms(400.0);
        }
        assert_eq!(m.get_buffer_size(), 480 + 3 * 240);

        // Flood the window with in-band samples; the mean settles at 100ms
        for _ in 0..10 {
            m.update_latency_ms(100.0);
        }
        let settled = m.get_buffer_size();
        for _ in 0..10 {
            assert_eq!(m.update_latency_ms(100.0), BufferAdjustment::Held(settled));
        }
    }

    #[test]
    fn test_shrinks_after_recovery() {
        let mut m = manager();
        for _ in 0..10 {
            m.update_latency_ms(500.0);
        }
        assert_eq!(m.get_buffer_size(), 1920);
        for _ in 0..30 {
            m.update_latency_ms(1.0);
        }
        assert_eq!(m.get_buffer_size(), 480);
    }

    proptest! {
        #[test]
        fn prop_size_stays_in_bounds_and_moves_in_steps(
            latencies in proptest::collection::vec(0.0f64..2000.0, 1..200)
        ) {
            let mut m = manager();
            let mut prev = m.get_buffer_size();
            for latency in latencies {
                m.update_latency_ms(latency);
                let size = m.get_buffer_size();
                prop_assert!((480..=1920).contains(&size));
                prop_assert!((size as i64 - prev as i64).abs() == 0
                    || (size as i64 - prev as i64).abs() == 240);
                prop_assert_eq!((size - 480) % 240, 0);
                prev = size;
            }
        }

        #[test]
        fn prop_sustained_high_latency_never_shrinks(
            latencies in proptest::collection::vec(200.5f64..5000.0, 1..100)
        ) {
            let mut m = manager();
            let mut prev = m.get_buffer_size();
            for latency in latencies {
                m.update_latency_ms(latency);
                prop_assert!(m.get_buffer_size() >= prev);
                prev = m.get_buffer_size();
            }
        }
    }
}
