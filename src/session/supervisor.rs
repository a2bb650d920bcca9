//! Session supervisor
//!
//! Drives one session at a time through
//! `Idle → Connecting → Authenticating → Streaming → Closing → Idle`, with
//! `Failed(..)` on the way back to `Idle` when an attempt fails before
//! streaming. Each transition is reported exactly once to the status sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::audio::backend::{open_with_retry, AudioBackend, CaptureStream, DeviceEnumerator};
use crate::audio::buffer::{create_capture_queue, SharedCaptureQueue};
use crate::audio::monitor::{DeviceChangeListener, DeviceMonitor, DeviceSnapshot};
use crate::config::AppConfig;
use crate::credentials::CredentialStore;
use crate::error::TransportError;
use crate::flow::AdaptiveBufferManager;
use crate::network::auth::{AuthGate, AuthOutcome};
use crate::network::receiver::{Disposition, InboundAudioSink};
use crate::network::sender::{OutboundAudioPipe, PipeReport};
use crate::network::transport::{Connector, FrameSource, Transport};
use crate::recording::SessionRecorder;
use crate::session::backoff::{ReconnectTracker, RetryDecision};
use crate::session::state::{ConnectionState, FailureKind, FatalReason, Session, SessionEnd};
use crate::ui::{Severity, StatusSink};

/// Why [`SessionSupervisor::run`] returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorExit {
    Stopped,
    AuthRejected(String),
    CredentialMissing,
    RetriesExhausted { attempts: u32 },
}

/// Lets the device monitor enumerate through the audio backend
struct BackendDevices(Arc<dyn AudioBackend>);

impl DeviceEnumerator for BackendDevices {
    fn device_names(&self) -> Vec<String> {
        self.0.device_names()
    }
}

/// Owns the connection state machine and everything a session needs
pub struct SessionSupervisor {
    config: AppConfig,
    connector: Arc<dyn Connector>,
    audio: Arc<dyn AudioBackend>,
    credentials: Arc<dyn CredentialStore>,
    status: Arc<dyn StatusSink>,
    auth: AuthGate,
    reconnect: ReconnectTracker,
    /// `None` only while lent to a running send task
    buffer: Option<AdaptiveBufferManager>,
    state: ConnectionState,
    device_listeners: Vec<Arc<dyn DeviceChangeListener>>,
    devices_changed: Arc<AtomicBool>,
    last_session: Option<Session>,
    sessions_started: u64,
}

impl SessionSupervisor {
    pub fn new(
        config: AppConfig,
        connector: Arc<dyn Connector>,
        audio: Arc<dyn AudioBackend>,
        credentials: Arc<dyn CredentialStore>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            auth: AuthGate::new(config.auth.timeout()),
            reconnect: ReconnectTracker::from_config(&config.reconnect),
            buffer: Some(AdaptiveBufferManager::new(&config.buffer)),
            config,
            connector,
            audio,
            credentials,
            status,
            state: ConnectionState::Idle,
            device_listeners: Vec::new(),
            devices_changed: Arc::new(AtomicBool::new(false)),
            last_session: None,
            sessions_started: 0,
        }
    }

    /// Listener attached to every session's device monitor
    pub fn add_device_listener(&mut self, listener: Arc<dyn DeviceChangeListener>) {
        self.device_listeners.push(listener);
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failed attempts since the last successful stream
    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnect.attempt()
    }

    /// Block size the next capture stream will open with
    pub fn buffer_size(&self) -> Option<u32> {
        self.buffer.as_ref().map(|b| b.get_buffer_size())
    }

    pub fn sessions_started(&self) -> u64 {
        self.sessions_started
    }

    pub fn last_session(&self) -> Option<&Session> {
        self.last_session.as_ref()
    }

    /// Keep a session alive until cancelled or a terminal failure
    pub async fn run(&mut self, cancel: CancellationToken) -> SupervisorExit {
        tracing::info!(
            "Session supervisor starting ({} backend, server {})",
            self.audio.name(),
            self.config.server.url
        );

        loop {
            if cancel.is_cancelled() {
                self.enter_idle_stopped();
                return SupervisorExit::Stopped;
            }

            let end = self.attempt(&cancel).await;
            match end {
                SessionEnd::Stopped => {
                    self.enter_idle_stopped();
                    return SupervisorExit::Stopped;
                }
                SessionEnd::Fatal(reason) => {
                    let text = match &reason {
                        FatalReason::AuthRejected(_) => "Authentication failed. Please log in again.".to_string(),
                        FatalReason::CredentialMissing => "Not logged in".to_string(),
                    };
                    tracing::error!("Session failed permanently: {}", reason);
                    self.transition(ConnectionState::Failed(FailureKind::Fatal), &text, Severity::Error);
                    return match reason {
                        FatalReason::AuthRejected(message) => {
                            self.credentials.invalidate();
                            SupervisorExit::AuthRejected(message)
                        }
                        FatalReason::CredentialMissing => SupervisorExit::CredentialMissing,
                    };
                }
                SessionEnd::Retryable(reason) => {
                    let delay = match self.reconnect.record_failure() {
                        RetryDecision::GiveUp => {
                            let attempts = self.reconnect.attempt();
                            tracing::error!("Giving up after {} consecutive failures: {}", attempts, reason);
                            self.transition(
                                ConnectionState::Failed(FailureKind::Exhausted),
                                "Connection failed. Max retries reached.",
                                Severity::Error,
                            );
                            return SupervisorExit::RetriesExhausted { attempts };
                        }
                        RetryDecision::RetryAfter(delay) => delay,
                    };

                    // Streaming sessions already went through Closing
                    if self.state != ConnectionState::Closing {
                        self.transition(
                            ConnectionState::Failed(FailureKind::Retryable),
                            &format!("Connection error: {}", reason),
                            Severity::Warning,
                        );
                    }
                    self.transition(
                        ConnectionState::Idle,
                        &format!(
                            "Reconnecting in {:.1}s ({}/{})",
                            delay.as_secs_f64(),
                            self.reconnect.attempt(),
                            self.reconnect.max_attempts()
                        ),
                        Severity::Warning,
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => {
                            tracing::info!("Stopped during reconnect delay");
                            return SupervisorExit::Stopped;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    fn enter_idle_stopped(&mut self) {
        if self.state != ConnectionState::Idle {
            self.transition(ConnectionState::Idle, "Stopped", Severity::Info);
        }
    }

    fn transition(&mut self, next: ConnectionState, text: &str, severity: Severity) {
        tracing::debug!(from = %self.state, to = %next, "State transition");
        self.state = next;
        self.status.phase_changed(&next, text, severity);
    }

    /// One connect → authenticate → stream cycle
    async fn attempt(&mut self, cancel: &CancellationToken) -> SessionEnd {
        self.transition(ConnectionState::Connecting, "Connecting to server...", Severity::Warning);

        let connect_timeout = self.config.server.connect_timeout();
        let connected = tokio::select! {
            _ = cancel.cancelled() => return SessionEnd::Stopped,
            result = tokio::time::timeout(connect_timeout, self.connector.connect()) => result,
        };
        let mut transport = match connected {
            Ok(Ok(transport)) => transport,
            Ok(Err(e)) => {
                tracing::error!("Connect failed: {}", e);
                return SessionEnd::Retryable(e.to_string());
            }
            Err(_) => {
                let e = TransportError::ConnectTimeout(connect_timeout.as_millis() as u64);
                tracing::error!("Connect failed: {}", e);
                return SessionEnd::Retryable(e.to_string());
            }
        };

        self.transition(ConnectionState::Authenticating, "Authenticating...", Severity::Warning);
        let Some(token) = self.credentials.get_token() else {
            transport.close().await;
            return SessionEnd::Fatal(FatalReason::CredentialMissing);
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                transport.close().await;
                return SessionEnd::Stopped;
            }
            outcome = self.auth.authenticate(&mut transport, &token) => outcome,
        };
        match outcome {
            AuthOutcome::Accepted => {}
            AuthOutcome::Rejected(reason) => {
                transport.close().await;
                return SessionEnd::Fatal(FatalReason::AuthRejected(reason));
            }
            AuthOutcome::TimedOut => {
                transport.close().await;
                return SessionEnd::Retryable("authentication timed out".to_string());
            }
            AuthOutcome::Malformed(reason) => {
                transport.close().await;
                return SessionEnd::Retryable(format!("malformed auth reply: {}", reason));
            }
            AuthOutcome::Transport(e) => {
                transport.close().await;
                return SessionEnd::Retryable(e.to_string());
            }
        }

        let mut session = Session::new();
        session.authenticated = true;
        self.sessions_started += 1;
        self.reconnect.reset();
        tracing::info!(session = %session.id, "Session started");

        self.transition(ConnectionState::Streaming, "Connected", Severity::Info);
        self.status.set_connected(true);

        let end = self.stream(transport, &mut session, cancel).await;

        tracing::info!(
            session = %session.id,
            uptime_secs = session.uptime().num_seconds(),
            "Session ended: {:?}",
            end
        );
        self.last_session = Some(session);
        end
    }

    /// Open devices, run both pipes, then tear everything down
    async fn stream(&mut self, transport: Transport, session: &mut Session, cancel: &CancellationToken) -> SessionEnd {
        let Transport { mut sink, source } = transport;
        let attempts = self.config.audio.device_open_attempts;
        let retry_delay = self.config.audio.device_retry_delay();

        let mut monitor = self.start_monitor();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = sink.close().await;
                return self.close_session(SessionEnd::Stopped, Severity::Info);
            }
            _ = monitor.rebaseline() => {}
        }

        let audio = self.audio.clone();
        let opened = open_with_retry("output device", attempts, retry_delay, cancel, move || audio.open_playback()).await;
        let playback = match opened {
            Ok(Some(p)) => p,
            Ok(None) => {
                let _ = sink.close().await;
                return self.close_session(SessionEnd::Stopped, Severity::Info);
            }
            Err(e) => {
                let _ = sink.close().await;
                return self.close_session(SessionEnd::Retryable(format!("Audio output error: {}", e)), Severity::Error);
            }
        };

        let queue = create_capture_queue(self.config.pipe.queue_capacity, self.config.pipe.overflow);
        let buffer = self
            .buffer
            .take()
            .unwrap_or_else(|| AdaptiveBufferManager::new(&self.config.buffer));
        let block_size = buffer.get_buffer_size();
        let audio = self.audio.clone();
        let capture_queue = queue.clone();
        let opened = open_with_retry("input device", attempts, retry_delay, cancel, move || {
            audio.open_capture(block_size, capture_queue.clone())
        })
        .await;
        let capture = match opened {
            Ok(Some(c)) => c,
            failed => {
                self.buffer = Some(buffer);
                let mut playback = playback;
                playback.stop();
                let _ = sink.close().await;
                let (end, severity) = match failed {
                    Err(e) => (SessionEnd::Retryable(format!("Audio input error: {}", e)), Severity::Error),
                    _ => (SessionEnd::Stopped, Severity::Info),
                };
                return self.close_session(end, severity);
            }
        };
        tracing::info!("Capture opened with block size {}", block_size);

        let recorder = self.open_recorder();
        session.recording_path = recorder.as_ref().map(|r| r.path().to_path_buf());

        let send_cancel = cancel.child_token();
        let queue_handle = queue.clone();
        let pipe = OutboundAudioPipe::new(queue, buffer, &self.config.pipe, self.config.server.ping_interval());
        let send_task = tokio::spawn(pipe.run(sink, send_cancel.clone()));

        let inbound = InboundAudioSink::new(self.status.clone(), Some(playback), recorder);

        let resources = SessionResources {
            queue: queue_handle,
            capture,
            inbound,
            monitor,
            send_task,
            send_cancel,
        };
        self.read_loop(source, resources, cancel).await
    }

    async fn read_loop(
        &mut self,
        mut source: Box<dyn FrameSource>,
        mut res: SessionResources,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        let liveness = self.config.server.liveness_window();
        let poll = self.config.monitor.poll_interval().max(Duration::from_millis(1));
        let mut monitor_tick = tokio::time::interval_at(Instant::now() + poll, poll);
        let mut deadline = Instant::now() + liveness;
        let mut finished: Option<Result<PipeReport, JoinError>> = None;

        let (end, severity) = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break (SessionEnd::Stopped, Severity::Info),
                joined = &mut res.send_task => {
                    let reason = match &joined {
                        Ok(PipeReport { result: Err(e), .. }) => format!("Sender error: {}", e),
                        Ok(_) => "send loop stopped".to_string(),
                        Err(e) => format!("send task failed: {}", e),
                    };
                    finished = Some(joined);
                    break (SessionEnd::Retryable(reason), Severity::Warning);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!("No traffic for {:?}", liveness);
                    break (SessionEnd::Retryable(TransportError::HeartbeatTimeout.to_string()), Severity::Warning);
                }
                _ = monitor_tick.tick() => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break (SessionEnd::Stopped, Severity::Info),
                        _ = res.monitor.poll_blocking() => {}
                    }
                    if let Some(e) = res.capture.check_errors() {
                        break (SessionEnd::Retryable(format!("Audio input error: {}", e)), Severity::Error);
                    }
                }
                msg = source.recv() => match msg {
                    None => break (SessionEnd::Retryable(TransportError::Closed.to_string()), Severity::Warning),
                    Some(Err(e)) => break (SessionEnd::Retryable(e.to_string()), Severity::Warning),
                    Some(Ok(msg)) => {
                        deadline = Instant::now() + liveness;
                        if res.inbound.handle(msg) == Disposition::Closed {
                            break (SessionEnd::Retryable("Connection closed by server".to_string()), Severity::Warning);
                        }
                    }
                },
            }
        };

        let end = self.close_session(end, severity);

        res.send_cancel.cancel();
        let joined = match finished {
            Some(joined) => joined,
            None => res.send_task.await,
        };
        let report = match joined {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!("Send task failed: {}", e);
                None
            }
        };
        match report {
            Some(report) => {
                tracing::info!(
                    "Sent {} frames, {} pings, {} dropped at capture",
                    report.stats.frames_sent,
                    report.stats.pings_sent,
                    res.queue.dropped_count()
                );
                self.buffer = Some(report.buffer);
            }
            None => self.buffer = Some(AdaptiveBufferManager::new(&self.config.buffer)),
        }

        res.capture.stop();
        let (stats, summary) = res.inbound.close();
        drop(source);
        tracing::debug!("Inbound totals: {:?}", stats);
        if let Some(summary) = summary {
            tracing::info!("Recording saved to {}", summary.path.display());
        }
        if self.devices_changed.swap(false, Ordering::Relaxed) {
            tracing::info!("Audio devices changed during the session; the next session reopens them");
        }
        tracing::debug!("Monitor saw {} device changes", res.monitor.changes_seen());
        drop(res.monitor);

        end
    }

    /// Streaming → Closing
    fn close_session(&mut self, end: SessionEnd, severity: Severity) -> SessionEnd {
        let text = match &end {
            SessionEnd::Stopped => "Stopping...".to_string(),
            SessionEnd::Retryable(reason) => reason.clone(),
            SessionEnd::Fatal(reason) => reason.to_string(),
        };
        self.transition(ConnectionState::Closing, &text, severity);
        self.status.set_connected(false);
        end
    }

    fn open_recorder(&self) -> Option<SessionRecorder> {
        let rec = &self.config.recording;
        if !rec.enabled {
            return None;
        }
        match SessionRecorder::create(
            &rec.directory,
            self.config.audio.output_sample_rate,
            self.config.audio.channels,
            u64::from(rec.flush_every_frames),
        ) {
            Ok(recorder) => Some(recorder),
            Err(e) => {
                tracing::error!("Recording disabled for this session: {}", e);
                None
            }
        }
    }

    /// Monitor with the supervisor's listeners; the caller takes the baseline
    fn start_monitor(&self) -> DeviceMonitor {
        let mut monitor = DeviceMonitor::unprimed(Arc::new(BackendDevices(self.audio.clone())));
        let flag = self.devices_changed.clone();
        let status = self.status.clone();
        monitor.register(Arc::new(move |previous: &DeviceSnapshot, current: &DeviceSnapshot| {
            flag.store(true, Ordering::Relaxed);
            let added = current.added_since(previous);
            let removed = previous.added_since(current);
            tracing::info!(?added, ?removed, "Audio devices changed");
            status.set_status("Audio devices changed", Severity::Info);
        }));
        for listener in &self.device_listeners {
            monitor.register(listener.clone());
        }
        monitor
    }
}

/// Everything a streaming session owns, released in `read_loop`
struct SessionResources {
    queue: SharedCaptureQueue,
    capture: Box<dyn CaptureStream>,
    inbound: InboundAudioSink,
    monitor: DeviceMonitor,
    send_task: JoinHandle<PipeReport>,
    send_cancel: CancellationToken,
}
