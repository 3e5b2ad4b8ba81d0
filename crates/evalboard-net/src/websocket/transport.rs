//! Duplex links between a connection manager and a server.
//!
//! A [`Connector`] opens a [`Link`]: a sink of [`Outgoing`] frames and a stream
//! of inbound [`Frame`]s. [`TungsteniteConnector`] speaks real WebSocket;
//! [`MemoryConnector`] hands the server side of each link to the caller, which
//! is how the reconnect logic is exercised without a network.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::{self, BoxFuture};
use futures_util::stream::{self, BoxStream};
use futures_util::{FutureExt, Sink, SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as TungsteniteCloseCode;

use super::message::{CloseCode, CloseReason};
use crate::error::{NetworkError, Result};

/// An inbound event on a link.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// A text frame.
    Text(String),
    /// A binary frame.
    Binary(Bytes),
    /// The server closed the link. `None` when no close frame was sent.
    Close(Option<CloseReason>),
}

/// An outbound frame on a link.
#[derive(Clone, Debug, PartialEq)]
pub enum Outgoing {
    /// A text frame.
    Text(String),
    /// A close frame.
    Close(CloseReason),
}

/// The sending half of a link.
pub type FrameSink = Pin<Box<dyn Sink<Outgoing, Error = NetworkError> + Send>>;

/// An open connection.
pub struct Link {
    /// Frames to the server.
    pub sink: FrameSink,
    /// Frames from the server. Ends when the transport drops.
    pub stream: BoxStream<'static, Result<Frame>>,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

/// Opens links to a URL.
pub trait Connector: Send + Sync + 'static {
    /// Perform the handshake. An error counts as an abnormal closure.
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Link>>;
}

/// A [`Connector`] backed by `tokio-tungstenite`.
#[derive(Clone, Debug, Default)]
pub struct TungsteniteConnector {
    headers: HashMap<String, String>,
}

impl TungsteniteConnector {
    /// Create a connector with no extra handshake headers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a custom header for the WebSocket handshake.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Build the WebSocket request with custom headers.
    fn build_request(
        &self,
        url: &str,
    ) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request> {
        let mut request = url.into_client_request()?;

        let headers = request.headers_mut();
        for (name, value) in &self.headers {
            let header_name = http::header::HeaderName::try_from(name.as_str())?;
            let header_value = http::header::HeaderValue::try_from(value.as_str())?;
            headers.insert(header_name, header_value);
        }

        Ok(request)
    }
}

impl Connector for TungsteniteConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Link>> {
        let request = self.build_request(url);
        async move {
            let (ws_stream, _response) = tokio_tungstenite::connect_async(request?)
                .await
                .map_err(|e| NetworkError::Connection(e.to_string()))?;
            let (write, read) = ws_stream.split();

            let sink = write
                .sink_map_err(NetworkError::from)
                .with(|outgoing: Outgoing| future::ready(Ok::<_, NetworkError>(to_message(outgoing))));

            let stream = read
                .filter_map(|message| {
                    future::ready(match message {
                        Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
                        Ok(Message::Binary(data)) => Some(Ok(Frame::Binary(data))),
                        Ok(Message::Close(frame)) => Some(Ok(Frame::Close(frame.map(from_close_frame)))),
                        // Pong is sent automatically by tungstenite
                        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
                        Err(e) => Some(Err(NetworkError::from(e))),
                    })
                })
                .boxed();

            Ok::<_, NetworkError>(Link {
                sink: Box::pin(sink),
                stream,
            })
        }
        .boxed()
    }
}

fn to_message(outgoing: Outgoing) -> Message {
    match outgoing {
        Outgoing::Text(text) => Message::Text(text.into()),
        Outgoing::Close(reason) => Message::Close(Some(CloseFrame {
            code: TungsteniteCloseCode::from(reason.code.as_u16()),
            reason: reason.reason.unwrap_or_default().into(),
        })),
    }
}

fn from_close_frame(frame: CloseFrame) -> CloseReason {
    let reason = frame.reason.as_str().to_owned();
    CloseReason {
        code: CloseCode::from_u16(u16::from(frame.code)),
        reason: (!reason.is_empty()).then_some(reason),
    }
}

/// The server side of a [`MemoryConnector`] link.
#[derive(Debug)]
pub struct MemoryPeer {
    url: String,
    to_client: mpsc::UnboundedSender<Result<Frame>>,
    from_client: mpsc::UnboundedReceiver<Outgoing>,
}

impl MemoryPeer {
    /// The URL the client connected to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Deliver a text frame. Returns `false` once the client is gone.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client.send(Ok(Frame::Text(text.into()))).is_ok()
    }

    /// Deliver a close frame.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        let reason = CloseReason {
            code: CloseCode::from_u16(code),
            reason: (!reason.is_empty()).then(|| reason.to_string()),
        };
        self.to_client.send(Ok(Frame::Close(Some(reason)))).is_ok()
    }

    /// Wait for the next frame from the client. `None` once it hangs up.
    pub async fn recv(&mut self) -> Option<Outgoing> {
        self.from_client.recv().await
    }

    /// Take a frame the client already sent, without waiting.
    pub fn try_recv(&mut self) -> Option<Outgoing> {
        self.from_client.try_recv().ok()
    }
}

#[derive(Default)]
struct MemoryState {
    attempts: Vec<(tokio::time::Instant, String)>,
    refuse: bool,
}

/// An in-process [`Connector`].
///
/// Every accepted connect yields a [`MemoryPeer`] on the receiver returned by
/// [`MemoryConnector::new`]. Dropping a peer ends the client's stream, which
/// the client sees as an abnormal closure.
#[derive(Clone)]
pub struct MemoryConnector {
    state: Arc<Mutex<MemoryState>>,
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

impl MemoryConnector {
    /// Create a connector and the receiver of its server-side peers.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, accepted) = mpsc::unbounded_channel();
        let connector = Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            peers,
        };
        (connector, accepted)
    }

    /// Make subsequent connects fail (or succeed again).
    pub fn set_refuse(&self, refuse: bool) {
        self.state.lock().refuse = refuse;
    }

    /// Number of connect calls so far.
    pub fn attempt_count(&self) -> usize {
        self.state.lock().attempts.len()
    }

    /// When each connect call happened, on the tokio clock.
    pub fn attempt_times(&self) -> Vec<tokio::time::Instant> {
        self.state.lock().attempts.iter().map(|(at, _)| *at).collect()
    }

    /// The URL of the most recent connect call.
    pub fn last_url(&self) -> Option<String> {
        self.state.lock().attempts.last().map(|(_, url)| url.clone())
    }
}

impl std::fmt::Debug for MemoryConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnector")
            .field("attempts", &self.attempt_count())
            .finish()
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Link>> {
        let refuse = {
            let mut state = self.state.lock();
            state.attempts.push((tokio::time::Instant::now(), url.to_string()));
            state.refuse
        };
        if refuse {
            return future::ready(Err(NetworkError::Connection("connection refused".into()))).boxed();
        }

        let (to_client, client_rx) = mpsc::unbounded_channel();
        let (client_tx, from_client) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            url: url.to_string(),
            to_client,
            from_client,
        };
        if self.peers.send(peer).is_err() {
            return future::ready(Err(NetworkError::Connection("no server listening".into()))).boxed();
        }

        let sink = futures_util::sink::unfold(client_tx, |tx, outgoing: Outgoing| async move {
            tx.send(outgoing)
                .map_err(|_| NetworkError::Connection("peer hung up".into()))?;
            Ok::<_, NetworkError>(tx)
        });
        let stream = stream::unfold(client_rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        })
        .boxed();

        future::ready(Ok(Link {
            sink: Box::pin(sink),
            stream,
        }))
        .boxed()
    }
}
