//! Output device playback
//!
//! Inbound PCM is written into a lock-free sample queue that the cpal output
//! callback drains. An empty queue plays silence; a full queue drops the
//! excess and reports it to the writer.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam::queue::ArrayQueue;
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::backend::PlaybackSink;
use crate::audio::device::find_output_device;
use crate::error::AudioError;

const STREAM_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Playback to a named output device
pub struct AudioPlayback {
    samples: Arc<ArrayQueue<i16>>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Receiver<AudioError>,
    underruns: Arc<AtomicU64>,
    /// Odd trailing byte carried to the next write
    pending_byte: Option<u8>,
}

impl AudioPlayback {
    /// Open the output device matching `device_pattern` and start the stream
    pub fn start(
        device_pattern: &str,
        fallback_to_default: bool,
        sample_rate: u32,
        channels: u16,
        buffer_secs: u32,
    ) -> Result<Self, AudioError> {
        let capacity = (sample_rate as usize * channels as usize * buffer_secs.max(1) as usize).max(1);
        let samples = Arc::new(ArrayQueue::<i16>::new(capacity));
        let running = Arc::new(AtomicBool::new(true));
        let underruns = Arc::new(AtomicU64::new(0));
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let pattern = device_pattern.to_string();
        let source = samples.clone();
        let running_for_loop = running.clone();
        let underrun_counter = underruns.clone();

        let handle = thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || {
                let device = match find_output_device(&pattern, fallback_to_default) {
                    Ok(d) => d,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let stream = device.build_output_stream(
                    &config,
                    move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut starved = false;
                        for slot in out.iter_mut() {
                            *slot = match source.pop() {
                                Some(s) => s as f32 / i16::MAX as f32,
                                None => {
                                    starved = true;
                                    0.0
                                }
                            };
                        }
                        if starved {
                            underrun_counter.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    move |err| {
                        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let ready = ready_rx
            .recv_timeout(STREAM_READY_TIMEOUT)
            .unwrap_or_else(|_| Err(AudioError::StreamError("playback thread did not start".into())));

        if let Err(e) = ready {
            running.store(false, Ordering::SeqCst);
            let _ = handle.join();
            return Err(e);
        }

        tracing::info!("Audio output started on '{}' ({} Hz)", device_pattern, sample_rate);

        Ok(Self {
            samples,
            running,
            thread_handle: Some(handle),
            error_rx,
            underruns,
            pending_byte: None,
        })
    }

    pub fn underrun_count(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn queued_samples(&self) -> usize {
        self.samples.len()
    }
}

impl PlaybackSink for AudioPlayback {
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(AudioError::NotRunning);
        }
        if let Ok(err) = self.error_rx.try_recv() {
            return Err(err);
        }

        let dropped = push_pcm(&self.samples, &mut self.pending_byte, pcm);
        if dropped > 0 {
            return Err(AudioError::BufferOverflow(dropped));
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!("Audio output closed ({} underruns)", self.underrun_count());
        }
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Split little-endian PCM bytes into samples and queue them.
/// Returns how many samples did not fit.
fn push_pcm(queue: &ArrayQueue<i16>, pending: &mut Option<u8>, pcm: &[u8]) -> usize {
    let mut dropped = 0;
    let mut bytes = pcm;

    if let Some(lo) = pending.take() {
        match bytes.split_first() {
            Some((&hi, rest)) => {
                if queue.push(i16::from_le_bytes([lo, hi])).is_err() {
                    dropped += 1;
                }
                bytes = rest;
            }
            None => {
                *pending = Some(lo);
                return 0;
            }
        }
    }

    let mut chunks = bytes.chunks_exact(2);
    for pair in &mut chunks {
        if queue.push(i16::from_le_bytes([pair[0], pair[1]])).is_err() {
            dropped += 1;
        }
    }
    if let [last] = chunks.remainder() {
        *pending = Some(*last);
    }
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(queue: &ArrayQueue<i16>) -> Vec<i16> {
        std::iter::from_fn(|| queue.pop()).collect()
    }

    #[test]
    fn test_push_pcm_decodes_le_samples() {
        let queue = ArrayQueue::new(16);
        let mut pending = None;
        let mut pcm = Vec::new();
        for s in [1i16, -2, 300] {
            pcm.extend_from_slice(&s.to_le_bytes());
        }
        assert_eq!(push_pcm(&queue, &mut pending, &pcm), 0);
        assert_eq!(drain(&queue), vec![1, -2, 300]);
        assert!(pending.is_none());
    }

    #[test]
    fn test_push_pcm_carries_odd_byte() {
        let queue = ArrayQueue::new(16);
        let mut pending = None;
        let bytes = 0x1234i16.to_le_bytes();

        push_pcm(&queue, &mut pending, &[bytes[0]]);
        assert!(queue.is_empty());
        assert_eq!(pending, Some(bytes[0]));

        push_pcm(&queue, &mut pending, &[bytes[1]]);
        assert_eq!(drain(&queue), vec![0x1234]);
        assert!(pending.is_none());
    }

    #[test]
    fn test_push_pcm_reports_overflow() {
        let queue = ArrayQueue::new(2);
        let mut pending = None;
        let pcm = [0u8; 8];
        assert_eq!(push_pcm(&queue, &mut pending, &pcm), 2);
        assert_eq!(queue.len(), 2);
    }
}
