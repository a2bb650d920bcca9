//! Message transport
//!
//! The session only sees [`FrameSink`] / [`FrameSource`] halves carrying
//! [`WireMessage`]s. [`WsConnector`] provides them over a WebSocket; tests
//! provide them over channels.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};

use crate::config::ServerConfig;
use crate::error::TransportError;

/// One message on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// Opaque audio payload
    Binary(Bytes),
    /// JSON control message
    Text(String),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// Write half of a connection
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, msg: WireMessage) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a connection
#[async_trait]
pub trait FrameSource: Send {
    /// `None` once the peer has gone away
    async fn recv(&mut self) -> Option<Result<WireMessage, TransportError>>;
}

/// An open connection, split into halves
pub struct Transport {
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn FrameSource>,
}

impl Transport {
    pub fn new(sink: Box<dyn FrameSink>, source: Box<dyn FrameSource>) -> Self {
        Self { sink, source }
    }

    /// Best-effort close of the write half
    pub async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            tracing::debug!("Transport close error: {}", e);
        }
    }
}

/// Opens connections to the service
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Transport, TransportError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connector
pub struct WsConnector {
    url: String,
    max_message_size: usize,
}

impl WsConnector {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            url: config.url.clone(),
            max_message_size: config.max_message_size,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Transport, TransportError> {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(self.max_message_size);
        ws_config.max_frame_size = Some(self.max_message_size);

        let (stream, _response) = connect_async_with_config(self.url.as_str(), Some(ws_config), true)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        tracing::info!("WebSocket connected to {}", self.url);
        let (sink, source) = stream.split();
        Ok(Transport::new(
            Box::new(WsSink { inner: sink }),
            Box::new(WsSource { inner: source }),
        ))
    }
}

struct WsSink {
    inner: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, msg: WireMessage) -> Result<(), TransportError> {
        let message = match msg {
            WireMessage::Binary(data) => Message::Binary(data.to_vec()),
            WireMessage::Text(text) => Message::Text(text),
            WireMessage::Ping(data) => Message::Ping(data),
            WireMessage::Pong(data) => Message::Pong(data),
            WireMessage::Close => Message::Close(None),
        };
        self.inner.send(message).await.map_err(map_send_error)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.inner.close().await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::SendFailed(e.to_string())),
        }
    }
}

struct WsSource {
    inner: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn recv(&mut self) -> Option<Result<WireMessage, TransportError>> {
        loop {
            let message = match self.inner.next().await? {
                Ok(m) => m,
                Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                    return Some(Err(TransportError::Closed));
                }
                Err(e) => return Some(Err(TransportError::ReceiveFailed(e.to_string()))),
            };

            return Some(Ok(match message {
                Message::Binary(data) => WireMessage::Binary(Bytes::from(data)),
                Message::Text(text) => WireMessage::Text(text),
                Message::Ping(data) => WireMessage::Ping(data),
                Message::Pong(data) => WireMessage::Pong(data),
                Message::Close(_) => WireMessage::Close,
                // Raw frames never surface while reading
                Message::Frame(_) => continue,
            }));
        }
    }
}

fn map_send_error(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => TransportError::Closed,
        other => TransportError::SendFailed(other.to_string()),
    }
}
