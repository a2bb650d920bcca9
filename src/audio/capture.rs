//! Microphone capture
//!
//! The cpal stream lives on its own thread because it is not `Send` on every
//! host. The input callback converts each block to 16-bit PCM and pushes it
//! into the capture queue without ever blocking.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::backend::CaptureStream;
use crate::audio::buffer::{AudioFrame, SharedCaptureQueue};
use crate::audio::device::default_input_device;
use crate::error::AudioError;

/// How long to wait for the capture thread to report that the stream is live
const STREAM_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Live capture from the default input device
pub struct AudioCapture {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Receiver<AudioError>,
    frames_captured: Arc<AtomicU64>,
    config: StreamConfig,
}

impl AudioCapture {
    /// Open the default input device and start pushing frames into `queue`.
    ///
    /// `block_size` is fixed for the lifetime of the stream; a new size needs
    /// a new `AudioCapture`.
    pub fn start(
        sample_rate: u32,
        channels: u16,
        block_size: u32,
        queue: SharedCaptureQueue,
    ) -> Result<Self, AudioError> {
        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Fixed(block_size),
        };

        let running = Arc::new(AtomicBool::new(true));
        let frames_captured = Arc::new(AtomicU64::new(0));
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let running_for_loop = running.clone();
        let running_for_callback = running.clone();
        let counter = frames_captured.clone();
        let stream_config = config.clone();

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let device = match default_input_device() {
                    Ok(d) => d,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let mut sequence: u64 = 0;
                let stream = device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !running_for_callback.load(Ordering::Relaxed) {
                            return;
                        }
                        let frame = AudioFrame::from_f32(data, sequence);
                        sequence = sequence.wrapping_add(1);
                        counter.fetch_add(1, Ordering::Relaxed);
                        // Full queue is resolved by the queue's overflow policy
                        let _ = queue.push(frame);
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
                // Stream is dropped here, stopping capture
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let ready = ready_rx
            .recv_timeout(STREAM_READY_TIMEOUT)
            .unwrap_or_else(|_| Err(AudioError::StreamError("capture thread did not start".into())));

        if let Err(e) = ready {
            running.store(false, Ordering::SeqCst);
            let _ = handle.join();
            return Err(e);
        }

        tracing::info!(
            "Microphone input stream started ({} Hz, {} ch, block {})",
            sample_rate,
            channels,
            block_size
        );

        Ok(Self {
            running,
            thread_handle: Some(handle),
            error_rx,
            frames_captured,
            config,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }
}

impl CaptureStream for AudioCapture {
    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!("Microphone stream closed after {} blocks", self.frames_captured());
        }
    }

    fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.try_recv().ok()
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
