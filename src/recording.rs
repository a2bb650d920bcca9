//! Session recording of inbound audio to WAV

use chrono::Local;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::error::RecordingError;

/// Totals for a finished recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSummary {
    pub path: PathBuf,
    pub frames: u64,
    pub samples: u64,
    /// PCM bytes received, including any dangling half sample
    pub bytes: u64,
    /// Trailing byte that never got its pair (0 or 1)
    pub discarded_bytes: u64,
}

/// Appends 16-bit PCM frames to `<dir>/<YYYY-MM-DD>/voice_<HHMMSS>.wav`.
///
/// The header is rewritten every `flush_every` frames so a crash leaves a
/// readable file. Dropping the recorder finalizes it.
///
/// A 16-bit WAV holds whole samples only, so when the stream ends on an odd
/// byte count the final byte is not written. [`RecordingSummary`] reports it.
pub struct SessionRecorder {
    writer: Option<WavWriter<BufWriter<File>>>,
    path: PathBuf,
    flush_every: u64,
    frames: u64,
    samples: u64,
    bytes: u64,
    carry: Option<u8>,
}

impl SessionRecorder {
    pub fn create(
        dir: &Path,
        sample_rate: u32,
        channels: u16,
        flush_every: u64,
    ) -> Result<Self, RecordingError> {
        let now = Local::now();
        let day_dir = dir.join(now.format("%Y-%m-%d").to_string());
        std::fs::create_dir_all(&day_dir).map_err(|e| RecordingError::Create {
            path: day_dir.display().to_string(),
            reason: e.to_string(),
        })?;

        let path = unique_path(&day_dir, &format!("voice_{}", now.format("%H%M%S")));
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(&path, spec).map_err(|e| RecordingError::Create {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        tracing::info!("Recording to {}", path.display());
        Ok(Self {
            writer: Some(writer),
            path,
            flush_every: flush_every.max(1),
            frames: 0,
            samples: 0,
            bytes: 0,
            carry: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Append one frame of little-endian i16 PCM. A trailing odd byte is
    /// held until the next frame.
    pub fn write_frame(&mut self, pcm: &[u8]) -> Result<(), RecordingError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| RecordingError::Write("recording already finished".to_string()))?;
        self.bytes += pcm.len() as u64;

        let mut bytes = pcm;
        if let Some(low) = self.carry.take() {
            let Some((&high, rest)) = bytes.split_first() else {
                self.carry = Some(low);
                return Ok(());
            };
            writer.write_sample(i16::from_le_bytes([low, high]))?;
            self.samples += 1;
            bytes = rest;
        }

        let mut chunks = bytes.chunks_exact(2);
        for pair in &mut chunks {
            writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
            self.samples += 1;
        }
        if let [odd] = chunks.remainder() {
            self.carry = Some(*odd);
        }

        self.frames += 1;
        if self.frames % self.flush_every == 0 {
            writer.flush()?;
        }
        Ok(())
    }

    /// Finalize the header and close the file
    pub fn finish(mut self) -> Result<RecordingSummary, RecordingError> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| RecordingError::Finalize(e.to_string()))?;
        }
        let discarded_bytes = u64::from(self.carry.is_some());
        if discarded_bytes > 0 {
            tracing::warn!(
                "Recording received {} bytes, an odd count; last byte discarded",
                self.bytes
            );
        }
        tracing::info!(
            "Recording saved: {} ({} frames, {} samples)",
            self.path.display(),
            self.frames,
            self.samples
        );
        Ok(RecordingSummary {
            path: self.path.clone(),
            frames: self.frames,
            samples: self.samples,
            bytes: self.bytes,
            discarded_bytes,
        })
    }
}

impl Drop for SessionRecorder {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                tracing::error!("Failed to finalize {}: {}", self.path.display(), e);
            }
        }
    }
}

fn unique_path(dir: &Path, stem: &str) -> PathBuf {
    let first = dir.join(format!("{stem}.wav"));
    if !first.exists() {
        return first;
    }
    (1..)
        .map(|n| dir.join(format!("{stem}_{n}.wav")))
        .find(|p| !p.exists())
        .unwrap_or(first)
}
