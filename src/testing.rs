//! In-memory collaborators for unit tests

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::audio::backend::{AudioBackend, CaptureStream, DeviceEnumerator, PlaybackSink};
use crate::audio::buffer::SharedCaptureQueue;
use crate::config::AppConfig;
use crate::credentials::CredentialStore;
use crate::error::{AudioError, TransportError};
use crate::network::transport::{Connector, FrameSink, FrameSource, Transport, WireMessage};
use crate::session::ConnectionState;
use crate::ui::{Severity, StatusSink};

const WAIT: Duration = Duration::from_secs(5);

/// Fast timings, recordings under `dir`
pub(crate) fn test_config(dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.server.connect_timeout_ms = 500;
    config.server.ping_interval_ms = 60_000;
    config.server.ping_timeout_ms = 60_000;
    config.reconnect.base_delay_ms = 1;
    config.reconnect.max_delay_ms = 4;
    config.auth.timeout_ms = 500;
    config.audio.device_retry_delay_ms = 1;
    config.pipe.idle_timeout_ms = 20;
    config.monitor.poll_interval_ms = 10;
    config.recording.directory = dir.to_path_buf();
    config
}

// --- transport -------------------------------------------------------------

/// Server side of an in-memory connection
pub(crate) struct ServerEnd {
    sent: mpsc::UnboundedReceiver<WireMessage>,
    replies: mpsc::UnboundedSender<Result<WireMessage, TransportError>>,
    closed: Arc<AtomicBool>,
}

impl ServerEnd {
    pub(crate) fn reply(&self, msg: WireMessage) {
        let _ = self.replies.send(Ok(msg));
    }

    pub(crate) fn reply_text(&self, text: &str) {
        self.reply(WireMessage::Text(text.to_string()));
    }

    /// Whether the client closed its write half
    pub(crate) fn client_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Next message the client wrote
    pub(crate) async fn next_sent(&mut self) -> Option<WireMessage> {
        tokio::time::timeout(WAIT, self.sent.recv()).await.ok().flatten()
    }

    /// Next binary payload, skipping control traffic
    pub(crate) async fn next_audio(&mut self) -> Option<Bytes> {
        loop {
            match self.next_sent().await? {
                WireMessage::Binary(data) => return Some(data),
                _ => continue,
            }
        }
    }
}

struct ChannelSink {
    tx: mpsc::UnboundedSender<WireMessage>,
    fail_after: Option<usize>,
    panic_on_audio: bool,
    sent: usize,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, msg: WireMessage) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.panic_on_audio && matches!(msg, WireMessage::Binary(_)) {
            panic!("sink blew up on an audio frame");
        }
        if self.fail_after.is_some_and(|limit| self.sent >= limit) {
            return Err(TransportError::SendFailed("connection reset".into()));
        }
        self.tx.send(msg).map_err(|_| TransportError::Closed)?;
        self.sent += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct ChannelSource {
    rx: mpsc::UnboundedReceiver<Result<WireMessage, TransportError>>,
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn recv(&mut self) -> Option<Result<WireMessage, TransportError>> {
        self.rx.recv().await
    }
}

fn transport_pair(fail_after: Option<usize>, panic_on_audio: bool) -> (Transport, ServerEnd) {
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    let transport = Transport::new(
        Box::new(ChannelSink {
            tx: sent_tx,
            fail_after,
            panic_on_audio,
            sent: 0,
            closed: closed.clone(),
        }),
        Box::new(ChannelSource { rx: reply_rx }),
    );
    (
        transport,
        ServerEnd {
            sent: sent_rx,
            replies: reply_tx,
            closed,
        },
    )
}

/// Dropping the server end closes the client's read half
pub(crate) fn memory_transport() -> (Transport, ServerEnd) {
    transport_pair(None, false)
}

/// Writes fail once `n` messages went through
pub(crate) fn memory_transport_failing_after(n: usize) -> (Transport, ServerEnd) {
    transport_pair(Some(n), false)
}

/// Outcome of one scripted connect
pub(crate) enum ConnectPlan {
    Refuse,
    /// Never completes
    Hang,
    /// Connect and pre-queue these server messages
    Accept(Vec<WireMessage>),
    /// Like `Accept`, but the client's sink panics on its first audio frame
    AcceptPanickingSink(Vec<WireMessage>),
}

impl ConnectPlan {
    pub(crate) fn accept_auth() -> Self {
        ConnectPlan::Accept(vec![WireMessage::Text(r#"{"type":"auth_ok"}"#.into())])
    }

    pub(crate) fn reject_auth(message: &str) -> Self {
        let reply = serde_json::json!({ "type": "error", "message": message });
        ConnectPlan::Accept(vec![WireMessage::Text(reply.to_string())])
    }
}

/// Connector following a script; refuses once the script runs out
pub(crate) struct MemoryConnector {
    plans: Mutex<VecDeque<ConnectPlan>>,
    servers: mpsc::UnboundedSender<ServerEnd>,
    attempts: AtomicUsize,
}

impl MemoryConnector {
    pub(crate) fn new(plans: Vec<ConnectPlan>) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            plans: Mutex::new(plans.into()),
            servers: tx,
            attempts: AtomicUsize::new(0),
        });
        (connector, rx)
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Transport, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let plan = self.plans.lock().pop_front().unwrap_or(ConnectPlan::Refuse);
        match plan {
            ConnectPlan::Refuse => Err(TransportError::ConnectFailed("connection refused".into())),
            ConnectPlan::Hang => std::future::pending().await,
            ConnectPlan::Accept(replies) => self.accept(replies, false),
            ConnectPlan::AcceptPanickingSink(replies) => self.accept(replies, true),
        }
    }
}

impl MemoryConnector {
    fn accept(&self, replies: Vec<WireMessage>, panic_on_audio: bool) -> Result<Transport, TransportError> {
        let (transport, server) = transport_pair(None, panic_on_audio);
        for reply in replies {
            server.reply(reply);
        }
        let _ = self.servers.send(server);
        Ok(transport)
    }
}

// --- status ----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StatusEvent {
    Phase(ConnectionState, String, Severity),
    Status(String, Severity),
    Connected(bool),
    Speaking,
}

/// Status sink that remembers every call
#[derive(Default)]
pub(crate) struct RecordingStatus {
    events: Mutex<Vec<StatusEvent>>,
}

impl RecordingStatus {
    pub(crate) fn phases(&self) -> Vec<ConnectionState> {
        self.phase_texts().into_iter().map(|(state, _, _)| state).collect()
    }

    pub(crate) fn phase_texts(&self) -> Vec<(ConnectionState, String, Severity)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                StatusEvent::Phase(state, text, severity) => Some((*state, text.clone(), *severity)),
                _ => None,
            })
            .collect()
    }

    /// `set_status` calls outside of phase changes
    pub(crate) fn statuses(&self) -> Vec<(String, Severity)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                StatusEvent::Status(text, severity) => Some((text.clone(), *severity)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn connected_events(&self) -> Vec<bool> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                StatusEvent::Connected(c) => Some(*c),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn speaking_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, StatusEvent::Speaking))
            .count()
    }

    /// Wait until `state` has been entered `times` times
    pub(crate) async fn wait_for_phase(&self, state: ConnectionState, times: usize) {
        self.wait_until(|| self.phases().iter().filter(|s| **s == state).count() >= times)
            .await
            .unwrap_or_else(|_| panic!("never reached {state:?} x{times}; saw {:?}", self.phases()));
    }

    pub(crate) async fn wait_for_status(&self, text: &str) {
        self.wait_until(|| self.statuses().iter().any(|(t, _)| t == text))
            .await
            .unwrap_or_else(|_| panic!("status {text:?} never shown; saw {:?}", self.statuses()));
    }

    async fn wait_until(&self, done: impl Fn() -> bool) -> Result<(), tokio::time::error::Elapsed> {
        tokio::time::timeout(WAIT, async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
    }
}

impl StatusSink for RecordingStatus {
    fn set_status(&self, text: &str, severity: Severity) {
        self.events.lock().push(StatusEvent::Status(text.to_string(), severity));
    }

    fn set_connected(&self, connected: bool) {
        self.events.lock().push(StatusEvent::Connected(connected));
    }

    fn indicate_speaking(&self) {
        self.events.lock().push(StatusEvent::Speaking);
    }

    fn phase_changed(&self, state: &ConnectionState, text: &str, severity: Severity) {
        self.events
            .lock()
            .push(StatusEvent::Phase(*state, text.to_string(), severity));
    }
}

// --- audio -----------------------------------------------------------------

/// Audio backend with scripted devices and failure injection
#[derive(Default)]
pub(crate) struct FakeAudio {
    devices: Mutex<Vec<String>>,
    playback_failures: AtomicUsize,
    playback_opens: AtomicUsize,
    fail_writes: Arc<AtomicBool>,
    played: Arc<Mutex<Vec<u8>>>,
    queue: Mutex<Option<SharedCaptureQueue>>,
    block_sizes: Mutex<Vec<u32>>,
    captures_stopped: Arc<AtomicUsize>,
    playbacks_stopped: Arc<AtomicUsize>,
}

impl FakeAudio {
    pub(crate) fn new(devices: &[&str]) -> Arc<Self> {
        let audio = Self::default();
        audio.set_devices(devices);
        Arc::new(audio)
    }

    pub(crate) fn set_devices(&self, devices: &[&str]) {
        *self.devices.lock() = devices.iter().map(|d| d.to_string()).collect();
    }

    /// The next `n` playback opens fail
    pub(crate) fn fail_playback_opens(&self, n: usize) {
        self.playback_failures.store(n, Ordering::SeqCst);
    }

    pub(crate) fn fail_playback_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn played(&self) -> Vec<u8> {
        self.played.lock().clone()
    }

    pub(crate) fn block_sizes(&self) -> Vec<u32> {
        self.block_sizes.lock().clone()
    }

    pub(crate) fn playback_opens(&self) -> usize {
        self.playback_opens.load(Ordering::SeqCst)
    }

    pub(crate) fn captures_stopped(&self) -> usize {
        self.captures_stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn playbacks_stopped(&self) -> usize {
        self.playbacks_stopped.load(Ordering::SeqCst)
    }

    /// Queue handed to the most recent capture stream
    pub(crate) async fn wait_for_capture_queue(&self) -> SharedCaptureQueue {
        tokio::time::timeout(WAIT, async {
            loop {
                if let Some(queue) = self.queue.lock().clone() {
                    return queue;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("capture never opened")
    }
}

impl DeviceEnumerator for FakeAudio {
    fn device_names(&self) -> Vec<String> {
        self.devices.lock().clone()
    }
}

impl AudioBackend for FakeAudio {
    fn open_capture(
        &self,
        block_size: u32,
        queue: SharedCaptureQueue,
    ) -> Result<Box<dyn CaptureStream>, AudioError> {
        self.block_sizes.lock().push(block_size);
        *self.queue.lock() = Some(queue);
        Ok(Box::new(FakeCapture {
            stopped: self.captures_stopped.clone(),
            done: false,
        }))
    }

    fn open_playback(&self) -> Result<Box<dyn PlaybackSink>, AudioError> {
        self.playback_opens.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .playback_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AudioError::DeviceNotFound("CABLE Input".into()));
        }
        Ok(Box::new(FakePlayback {
            played: self.played.clone(),
            fail_writes: self.fail_writes.clone(),
            stopped: self.playbacks_stopped.clone(),
            done: false,
        }))
    }

    fn name(&self) -> &str {
        "fake"
    }
}

struct FakeCapture {
    stopped: Arc<AtomicUsize>,
    done: bool,
}

impl CaptureStream for FakeCapture {
    fn stop(&mut self) {
        if !self.done {
            self.done = true;
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn check_errors(&self) -> Option<AudioError> {
        None
    }
}

struct FakePlayback {
    played: Arc<Mutex<Vec<u8>>>,
    fail_writes: Arc<AtomicBool>,
    stopped: Arc<AtomicUsize>,
    done: bool,
}

impl PlaybackSink for FakePlayback {
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AudioError::StreamError("device unplugged".into()));
        }
        self.played.lock().extend_from_slice(pcm);
        Ok(())
    }

    fn stop(&mut self) {
        if !self.done {
            self.done = true;
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// --- credentials -----------------------------------------------------------

pub(crate) struct FakeCredentials {
    token: Mutex<Option<String>>,
    invalidations: AtomicUsize,
}

impl FakeCredentials {
    pub(crate) fn new(token: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            token: Mutex::new(token.map(str::to_string)),
            invalidations: AtomicUsize::new(0),
        })
    }

    pub(crate) fn clear(&self) {
        *self.token.lock() = None;
    }

    pub(crate) fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }
}

impl CredentialStore for FakeCredentials {
    fn get_token(&self) -> Option<String> {
        self.token.lock().clone()
    }

    fn invalidate(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        *self.token.lock() = None;
    }
}
