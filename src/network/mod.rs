//! Network layer: transport, auth handshake and the two audio pipes

pub mod auth;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod transport;

pub use auth::{AuthGate, AuthOutcome};
pub use protocol::{AuthReply, ClientMessage, ServerMessage};
pub use receiver::{Disposition, InboundAudioSink, ReceiverStats};
pub use sender::{OutboundAudioPipe, PipeReport, SenderStats};
pub use transport::{Connector, FrameSink, FrameSource, Transport, WireMessage, WsConnector};
