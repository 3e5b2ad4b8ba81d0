//! Reconnecting WebSocket connections.
//!
//! This module provides a connection manager that supports:
//! - Token-authenticated URLs built from the session
//! - An application-level JSON heartbeat
//! - Close-code classification and exponential-backoff reconnects
//! - Recovery of malformed frames into well-formed messages
//! - Signal-based event delivery
//!
//! # Example
//!
//! ```ignore
//! use evalboard_net::config::{ConnectionConfigPatch, SharedConfig};
//! use evalboard_net::session::Session;
//! use evalboard_net::websocket::{ConnectionManager, RealtimeContext};
//!
//! let session = Session::new();
//! session.login(token, user_id);
//! let context = RealtimeContext::new(SharedConfig::default(), session);
//!
//! let manager = ConnectionManager::new(&context, "/ws/notifications", ConnectionConfigPatch::default());
//!
//! manager.signals().connected.connect(|_| {
//!     println!("Connected to server!");
//! });
//!
//! manager.signals().message_received.connect(|message| {
//!     println!("Received: {}", message);
//! });
//!
//! manager.connect();
//! manager.send(&serde_json::json!({ "type": "ping" }));
//! ```

mod frame;
mod manager;
mod message;
mod transport;

pub use frame::{
    DATETIME_SERIALIZATION_ERROR, Decoded, Envelope, FrameKind, MALFORMED_FRAME_ERROR,
    OutboundFrame, QueryData, SuggestData, decode_text,
};
pub use manager::{
    ConnectionManager, ConnectionSignals, ConnectionState, RealtimeContext, build_connection_url,
};
pub use message::{CloseCategory, CloseCode, CloseReason, ConnectionStatus};
pub use transport::{
    Connector, Frame, FrameSink, Link, MemoryConnector, MemoryPeer, Outgoing, TungsteniteConnector,
};
