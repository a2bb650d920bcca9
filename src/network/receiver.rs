//! Inbound traffic: socket → playback, recording and status

use std::sync::Arc;

use crate::audio::backend::PlaybackSink;
use crate::network::protocol::ServerMessage;
use crate::network::transport::WireMessage;
use crate::recording::{RecordingSummary, SessionRecorder};
use crate::ui::{Severity, StatusSink};

/// Inbound statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub audio_frames: u64,
    pub audio_bytes: u64,
    pub text_messages: u64,
    pub ignored_messages: u64,
    pub playback_errors: u64,
    pub recording_errors: u64,
}

/// What the caller should do after a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    /// Peer sent a close frame
    Closed,
}

/// Routes server messages for one session.
///
/// Audio goes to playback and the recorder in arrival order. A failure in
/// either is logged and the frame is still offered to the other.
pub struct InboundAudioSink {
    status: Arc<dyn StatusSink>,
    playback: Option<Box<dyn PlaybackSink>>,
    recorder: Option<SessionRecorder>,
    stats: ReceiverStats,
}

impl InboundAudioSink {
    pub fn new(
        status: Arc<dyn StatusSink>,
        playback: Option<Box<dyn PlaybackSink>>,
        recorder: Option<SessionRecorder>,
    ) -> Self {
        Self {
            status,
            playback,
            recorder,
            stats: ReceiverStats::default(),
        }
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    pub fn handle(&mut self, msg: WireMessage) -> Disposition {
        match msg {
            WireMessage::Binary(data) => {
                self.stats.audio_frames += 1;
                self.stats.audio_bytes += data.len() as u64;
                self.status.indicate_speaking();

                if let Some(playback) = self.playback.as_mut() {
                    if let Err(e) = playback.write(&data) {
                        self.stats.playback_errors += 1;
                        tracing::warn!("Playback error: {}", e);
                    }
                }
                if let Some(recorder) = self.recorder.as_mut() {
                    if let Err(e) = recorder.write_frame(&data) {
                        self.stats.recording_errors += 1;
                        tracing::error!("Recording error: {}", e);
                    }
                }
            }
            WireMessage::Text(text) => self.handle_text(&text),
            // Keep-alive traffic only refreshes liveness
            WireMessage::Ping(_) | WireMessage::Pong(_) => {}
            WireMessage::Close => return Disposition::Closed,
        }
        Disposition::Continue
    }

    fn handle_text(&mut self, text: &str) {
        match ServerMessage::parse(text) {
            Some(ServerMessage::Text { content }) => {
                self.stats.text_messages += 1;
                self.status.set_status(&content, Severity::Info);
            }
            Some(ServerMessage::Error { message }) => {
                self.stats.text_messages += 1;
                let message = message.unwrap_or_else(|| "server error".to_string());
                tracing::warn!("Server error message: {}", message);
                self.status.set_status(&message, Severity::Warning);
            }
            Some(ServerMessage::Other) => {
                self.stats.ignored_messages += 1;
                tracing::debug!("Ignoring server message: {}", text);
            }
            None => {
                self.stats.ignored_messages += 1;
                tracing::debug!("Ignoring malformed text frame ({} bytes)", text.len());
            }
        }
    }

    /// Stop playback and finalize the recording
    pub fn close(mut self) -> (ReceiverStats, Option<RecordingSummary>) {
        if let Some(mut playback) = self.playback.take() {
            playback.stop();
        }
        let summary = self.recorder.take().and_then(|recorder| match recorder.finish() {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::error!("{}", e);
                None
            }
        });
        tracing::info!(
            "Receive side closed: {} audio frames, {} text messages",
            self.stats.audio_frames,
            self.stats.text_messages
        );
        (self.stats, summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeAudio, RecordingStatus};
    use crate::audio::backend::AudioBackend;
    use bytes::Bytes;

    fn frame(byte: u8) -> WireMessage {
        WireMessage::Binary(Bytes::from(vec![byte; 64]))
    }

    #[test]
    fn test_audio_reaches_playback_and_recorder_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let audio = FakeAudio::new(&["Mic"]);
        let status = Arc::new(RecordingStatus::default());
        let recorder = SessionRecorder::create(dir.path(), 24_000, 1, 50).unwrap();
        let mut sink = InboundAudioSink::new(status.clone(), Some(audio.open_playback().unwrap()), Some(recorder));

        for b in 1..=3 {
            assert_eq!(sink.handle(frame(b)), Disposition::Continue);
        }
        let (stats, summary) = sink.close();

        assert_eq!(stats.audio_frames, 3);
        assert_eq!(status.speaking_count(), 3);
        let played = audio.played();
        assert_eq!(played.len(), 192);
        assert_eq!(&played[..64], &[1u8; 64][..]);
        assert_eq!(&played[128..], &[3u8; 64][..]);
        assert_eq!(summary.unwrap().samples, 96);
        assert_eq!(audio.playbacks_stopped(), 1);
    }

    #[test]
    fn test_playback_failure_still_records() {
        let dir = tempfile::tempdir().unwrap();
        let audio = FakeAudio::new(&["Mic"]);
        audio.fail_playback_writes(true);
        let status = Arc::new(RecordingStatus::default());
        let recorder = SessionRecorder::create(dir.path(), 24_000, 1, 50).unwrap();
        let mut sink = InboundAudioSink::new(status, Some(audio.open_playback().unwrap()), Some(recorder));

        sink.handle(frame(7));
        assert_eq!(sink.stats().playback_errors, 1);
        let (_, summary) = sink.close();
        assert_eq!(summary.unwrap().frames, 1);
    }

    #[test]
    fn test_text_messages_update_status() {
        let status = Arc::new(RecordingStatus::default());
        let mut sink = InboundAudioSink::new(status.clone(), None, None);

        sink.handle(WireMessage::Text(r#"{"type":"text","content":"hello there"}"#.into()));
        sink.handle(WireMessage::Text(r#"{"type":"error","message":"quota"}"#.into()));
        sink.handle(WireMessage::Text("{{{".into()));
        sink.handle(WireMessage::Text(r#"{"type":"metrics"}"#.into()));

        assert_eq!(
            status.statuses(),
            vec![
                ("hello there".to_string(), Severity::Info),
                ("quota".to_string(), Severity::Warning),
            ]
        );
        assert_eq!(sink.stats().ignored_messages, 2);
    }

    #[test]
    fn test_close_frame_and_keepalive() {
        let status = Arc::new(RecordingStatus::default());
        let mut sink = InboundAudioSink::new(status.clone(), None, None);
        assert_eq!(sink.handle(WireMessage::Pong(vec![])), Disposition::Continue);
        assert_eq!(sink.handle(WireMessage::Close), Disposition::Closed);
        assert_eq!(status.speaking_count(), 0);
    }
}
