//! Outbound audio: capture queue → socket
//!
//! The send loop is the only consumer of the capture queue. Each send is
//! timed and the duration fed to the adaptive buffer manager, which the
//! supervisor gets back when the loop ends.

use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::audio::buffer::SharedCaptureQueue;
use crate::config::PipeConfig;
use crate::error::TransportError;
use crate::flow::{AdaptiveBufferManager, BufferAdjustment};
use crate::network::transport::{FrameSink, WireMessage};

/// Lower bound for the heartbeat period; `tokio::time::interval` rejects zero
const MIN_PING_INTERVAL: Duration = Duration::from_millis(10);

/// Outbound pipe statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub pings_sent: u64,
    pub idle_waits: u64,
    pub buffer_adjustments: u64,
}

/// What the send loop hands back when it ends
pub struct PipeReport {
    pub buffer: AdaptiveBufferManager,
    pub stats: SenderStats,
    /// `Ok` when stopped by cancellation, `Err` when the transport failed
    pub result: Result<(), TransportError>,
}

/// Owns the capture queue consumer side and the socket write half
pub struct OutboundAudioPipe {
    queue: SharedCaptureQueue,
    buffer: AdaptiveBufferManager,
    idle_timeout: Duration,
    ping_interval: Duration,
    stats: SenderStats,
}

impl OutboundAudioPipe {
    pub fn new(
        queue: SharedCaptureQueue,
        buffer: AdaptiveBufferManager,
        config: &PipeConfig,
        ping_interval: Duration,
    ) -> Self {
        Self {
            queue,
            buffer,
            idle_timeout: config.idle_timeout(),
            ping_interval: ping_interval.max(MIN_PING_INTERVAL),
            stats: SenderStats::default(),
        }
    }

    pub fn queue(&self) -> SharedCaptureQueue {
        self.queue.clone()
    }

    /// Drain the queue into `sink` until cancelled or a write fails.
    /// The sink is closed on the way out.
    pub async fn run(mut self, mut sink: Box<dyn FrameSink>, cancel: CancellationToken) -> PipeReport {
        let start = tokio::time::Instant::now() + self.ping_interval;
        let mut heartbeat = tokio::time::interval_at(start, self.ping_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let result = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                _ = heartbeat.tick() => {
                    match send_or_cancel(sink.as_mut(), WireMessage::Ping(Vec::new()), &cancel).await {
                        Some(Ok(())) => self.stats.pings_sent += 1,
                        Some(Err(e)) => break Err(e),
                        None => break Ok(()),
                    }
                }
                frame = self.queue.pop_timeout(self.idle_timeout) => {
                    let Some(frame) = frame else {
                        self.stats.idle_waits += 1;
                        continue;
                    };

                    let bytes = frame.data.len() as u64;
                    let started = Instant::now();
                    match send_or_cancel(sink.as_mut(), WireMessage::Binary(frame.data), &cancel).await {
                        Some(Ok(())) => {
                            self.stats.frames_sent += 1;
                            self.stats.bytes_sent += bytes;
                            if !matches!(self.buffer.update_latency(started.elapsed()), BufferAdjustment::Held(_)) {
                                self.stats.buffer_adjustments += 1;
                            }
                        }
                        Some(Err(e)) => break Err(e),
                        None => break Ok(()),
                    }
                }
            }
        };

        match &result {
            Ok(()) => tracing::debug!("Send loop stopped"),
            Err(e) => tracing::error!("Sender error: {}", e),
        }
        if let Err(e) = sink.close().await {
            tracing::debug!("Closing write half failed: {}", e);
        }
        self.queue.clear();

        tracing::info!(
            "Send loop finished: {} frames, {:.1} KB, next block size {}",
            self.stats.frames_sent,
            self.stats.bytes_sent as f64 / 1024.0,
            self.buffer.get_buffer_size()
        );

        PipeReport {
            buffer: self.buffer,
            stats: self.stats,
            result,
        }
    }
}

/// `None` when cancelled before the write completed
async fn send_or_cancel(
    sink: &mut dyn FrameSink,
    msg: WireMessage,
    cancel: &CancellationToken,
) -> Option<Result<(), TransportError>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = sink.send(msg) => Some(result),
    }
}
