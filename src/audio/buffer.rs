//! Lock-free capture queue
//!
//! A single-producer single-consumer bounded queue between the real-time
//! capture callback and the async send task. The producer side never blocks
//! and never allocates beyond the frame itself; on a full queue the frame is
//! dropped according to the configured [`OverflowPolicy`].

use bytes::Bytes;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::config::OverflowPolicy;

/// Immutable chunk of interleaved 16-bit little-endian PCM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Raw payload as it goes on (or came off) the wire
    pub data: Bytes,
    /// Samples across all channels
    pub sample_count: usize,
    /// Capture order within the session
    pub sequence: u64,
}

impl AudioFrame {
    pub fn new(data: Bytes, sample_count: usize, sequence: u64) -> Self {
        Self {
            data,
            sample_count,
            sequence,
        }
    }

    /// Build a frame from f32 samples, converting to i16 LE
    pub fn from_f32(samples: &[f32], sequence: u64) -> Self {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for &s in samples {
            let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            data.extend_from_slice(&v.to_le_bytes());
        }
        Self::new(Bytes::from(data), samples.len(), sequence)
    }

    pub fn len_bytes(&self) -> usize {
        self.data.len()
    }
}

/// Result of a non-blocking push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queue was full; the incoming frame was discarded
    DroppedNewest,
    /// Queue was full; the oldest queued frame was evicted
    DroppedOldest,
}

/// Bounded capture queue shared by the capture callback and the send task
pub struct CaptureQueue {
    queue: ArrayQueue<AudioFrame>,
    policy: OverflowPolicy,
    ready: Notify,
    pushed: AtomicU64,
    dropped: AtomicU64,
}

impl CaptureQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            policy,
            ready: Notify::new(),
            pushed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Push without blocking. Safe to call from the audio callback.
    pub fn push(&self, frame: AudioFrame) -> PushOutcome {
        self.pushed.fetch_add(1, Ordering::Relaxed);
        let outcome = match self.policy {
            OverflowPolicy::DropNewest => match self.queue.push(frame) {
                Ok(()) => PushOutcome::Queued,
                Err(_rejected) => PushOutcome::DroppedNewest,
            },
            OverflowPolicy::DropOldest => match self.queue.force_push(frame) {
                None => PushOutcome::Queued,
                Some(_evicted) => PushOutcome::DroppedOldest,
            },
        };

        if outcome == PushOutcome::Queued || outcome == PushOutcome::DroppedOldest {
            self.ready.notify_one();
        }
        if outcome != PushOutcome::Queued {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    pub fn try_pop(&self) -> Option<AudioFrame> {
        self.queue.pop()
    }

    /// Wait up to `timeout` for the next frame.
    ///
    /// Cancel-safe: dropping the future never loses a queued frame.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<AudioFrame> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(frame) = self.queue.pop() {
                return Some(frame);
            }
            if tokio::time::timeout_at(deadline, self.ready.notified())
                .await
                .is_err()
            {
                return self.queue.pop();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn pushed_count(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Discard everything queued (used on teardown)
    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }
}

/// Thread-safe handle to a capture queue
pub type SharedCaptureQueue = Arc<CaptureQueue>;

/// Create a new shared capture queue
pub fn create_capture_queue(capacity: usize, policy: OverflowPolicy) -> SharedCaptureQueue {
    Arc::new(CaptureQueue::new(capacity, policy))
}
