//! Audio backend abstraction
//!
//! The supervisor only talks to these traits, so sessions can run against
//! real hardware ([`CpalBackend`]) or against in-memory fakes in tests.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::audio::buffer::SharedCaptureQueue;
use crate::audio::capture::AudioCapture;
use crate::audio::device::device_names;
use crate::audio::playback::AudioPlayback;
use crate::config::AudioConfig;
use crate::error::AudioError;

/// Source of device names for the device monitor
pub trait DeviceEnumerator: Send + Sync {
    fn device_names(&self) -> Vec<String>;
}

/// A running capture stream feeding the capture queue
pub trait CaptureStream: Send {
    /// Stop the stream and release the device. Idempotent.
    fn stop(&mut self);

    /// Next asynchronous stream error, if any
    fn check_errors(&self) -> Option<AudioError>;
}

/// A running playback stream accepting 16-bit LE PCM
pub trait PlaybackSink: Send {
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError>;

    /// Stop the stream and release the device. Idempotent.
    fn stop(&mut self);
}

/// Opens the devices a session needs
pub trait AudioBackend: DeviceEnumerator {
    fn open_capture(
        &self,
        block_size: u32,
        queue: SharedCaptureQueue,
    ) -> Result<Box<dyn CaptureStream>, AudioError>;

    fn open_playback(&self) -> Result<Box<dyn PlaybackSink>, AudioError>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// Hardware backend built on cpal
pub struct CpalBackend {
    config: AudioConfig,
}

impl CpalBackend {
    pub fn new(config: AudioConfig) -> Self {
        Self { config }
    }
}

impl DeviceEnumerator for CpalBackend {
    fn device_names(&self) -> Vec<String> {
        device_names()
    }
}

impl AudioBackend for CpalBackend {
    fn open_capture(
        &self,
        block_size: u32,
        queue: SharedCaptureQueue,
    ) -> Result<Box<dyn CaptureStream>, AudioError> {
        let capture = AudioCapture::start(
            self.config.input_sample_rate,
            self.config.channels,
            block_size,
            queue,
        )?;
        Ok(Box::new(capture))
    }

    fn open_playback(&self) -> Result<Box<dyn PlaybackSink>, AudioError> {
        let playback = AudioPlayback::start(
            &self.config.output_device_name,
            self.config.fallback_to_default_output,
            self.config.output_sample_rate,
            self.config.channels,
            self.config.playback_buffer_secs,
        )?;
        Ok(Box::new(playback))
    }

    fn name(&self) -> &str {
        "cpal"
    }
}

/// Run `open` on the blocking pool up to `attempts` times, sleeping
/// `delay` between failures.
///
/// Returns `Ok(None)` as soon as `cancel` fires. An open still in flight at
/// that point finishes on its own and its stream is dropped.
pub async fn open_with_retry<T, F>(
    what: &str,
    attempts: u32,
    delay: Duration,
    cancel: &CancellationToken,
    open: F,
) -> Result<Option<T>, AudioError>
where
    F: Fn() -> Result<T, AudioError> + Send + Sync + 'static,
    T: Send + 'static,
{
    let open = Arc::new(open);
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        let task = {
            let open = open.clone();
            tokio::task::spawn_blocking(move || (*open)())
        };
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            joined = task => joined.unwrap_or_else(|e| {
                Err(AudioError::StreamError(format!("{} open task failed: {}", what, e)))
            }),
        };

        match result {
            Ok(value) => return Ok(Some(value)),
            Err(e) => {
                tracing::error!("Cannot open {} (attempt {}/{}): {}", what, attempt, attempts, e);
                if attempt >= attempts {
                    return Err(e);
                }
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}
