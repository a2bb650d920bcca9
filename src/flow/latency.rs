//! Send-latency smoothing

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A single observed send latency
#[derive(Debug, Clone, Copy)]
pub struct LatencySample {
    pub latency_ms: f64,
    pub observed_at: Instant,
}

/// Fixed-capacity ring of recent latency samples with a moving average
#[derive(Debug, Clone)]
pub struct LatencyTracker {
    samples: VecDeque<LatencySample>,
    capacity: usize,
}

impl LatencyTracker {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a sample, evicting the oldest once the ring is full.
    /// Returns the new mean in milliseconds.
    pub fn record(&mut self, latency: Duration) -> f64 {
        self.record_ms(latency.as_secs_f64() * 1000.0)
    }

    pub fn record_ms(&mut self, latency_ms: f64) -> f64 {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(LatencySample {
            latency_ms,
            observed_at: Instant::now(),
        });
        self.mean_ms()
    }

    /// Mean of the retained samples, 0.0 when empty
    pub fn mean_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.latency_ms).sum::<f64>() / self.samples.len() as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&LatencySample> {
        self.samples.back()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_of_partial_window() {
        let mut tracker = LatencyTracker::new(10);
        assert_eq!(tracker.mean_ms(), 0.0);

        tracker.record_ms(10.0);
        let mean = tracker.record_ms(30.0);
        assert!((mean - 20.0).abs() < f64::EPSILON);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let mut tracker = LatencyTracker::new(10);
        for _ in 0..10 {
            tracker.record_ms(1000.0);
        }
        for _ in 0..10 {
            tracker.record_ms(10.0);
        }
        assert_eq!(tracker.len(), 10);
        assert!((tracker.mean_ms() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_record_duration() {
        let mut tracker = LatencyTracker::new(3);
        let mean = tracker.record(Duration::from_millis(250));
        assert!((mean - 250.0).abs() < 1e-6);
        assert!(tracker.latest().is_some());
    }
}
