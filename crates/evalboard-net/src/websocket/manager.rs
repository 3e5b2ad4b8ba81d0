//! Reconnecting WebSocket connection manager.

use std::sync::{Arc, Weak};
use std::time::Duration;

use evalboard_core::Signal;
use evalboard_core::logging::targets;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval};

use super::frame::{Decoded, Envelope, FrameKind, OutboundFrame, decode_text};
use super::message::{CloseCategory, CloseCode, CloseReason, ConnectionStatus};
use super::transport::{Connector, Frame, Link, Outgoing, TungsteniteConnector};
use crate::config::{ConnectionConfig, ConnectionConfigPatch, SharedConfig, is_valid_ws_url};
use crate::error::{NetworkError, Result};
use crate::session::Session;
use crate::status::StatusBoard;

/// Logs at `debug` when the connection's debug flag is on, `trace` otherwise.
macro_rules! chatter {
    ($debug:expr, $($arg:tt)+) => {
        if $debug {
            tracing::debug!(target: targets::WEBSOCKET, $($arg)+);
        } else {
            tracing::trace!(target: targets::WEBSOCKET, $($arg)+);
        }
    };
}

/// Build `{base}{endpoint}/{user_id}?token={token}`.
///
/// A leading `/` is added to the endpoint when missing, `{userId}`
/// placeholders in it are substituted, and a trailing `/` on the base is
/// dropped.
///
/// # Example
///
/// ```
/// use evalboard_net::websocket::build_connection_url;
///
/// let url = build_connection_url(Some("wss://host"), "/ws/notifications", Some("42"), Some("abc"))?;
/// assert_eq!(url, "wss://host/ws/notifications/42?token=abc");
/// # Ok::<(), evalboard_net::NetworkError>(())
/// ```
pub fn build_connection_url(
    base_url: Option<&str>,
    endpoint: &str,
    user_id: Option<&str>,
    token: Option<&str>,
) -> Result<String> {
    let (Some(token), Some(user_id)) = (token, user_id) else {
        return Err(NetworkError::Configuration(
            "user is not logged in or identity is missing".into(),
        ));
    };
    let base_url = base_url
        .filter(|base| !base.is_empty())
        .ok_or_else(|| NetworkError::Configuration("WebSocket base URL is not configured".into()))?;
    if !is_valid_ws_url(base_url) {
        return Err(NetworkError::Configuration(format!(
            "invalid WebSocket base URL: {base_url}"
        )));
    }

    let mut path = endpoint.replace("{userId}", user_id);
    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    let base_url = base_url.strip_suffix('/').unwrap_or(base_url);
    let token = utf8_percent_encode(token, URI_COMPONENT);

    Ok(format!("{base_url}{path}/{user_id}?token={token}"))
}

/// Characters left as-is in a URI component; everything else is escaped.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Dependencies shared by every connection in the application.
#[derive(Clone)]
pub struct RealtimeContext {
    /// Connection options.
    pub config: SharedConfig,
    /// Credentials used to build connection URLs.
    pub session: Session,
    /// Status mirror written by every manager.
    pub status: StatusBoard,
    /// Transport used to open links.
    pub connector: Arc<dyn Connector>,
}

impl RealtimeContext {
    /// Create a context using real WebSocket transport.
    pub fn new(config: SharedConfig, session: Session) -> Self {
        Self {
            config,
            session,
            status: StatusBoard::new(),
            connector: Arc::new(TungsteniteConnector::new()),
        }
    }

    /// Replace the transport.
    pub fn with_connector(mut self, connector: impl Connector) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Share an existing status board.
    pub fn with_status(mut self, status: StatusBoard) -> Self {
        self.status = status;
        self
    }
}

impl std::fmt::Debug for RealtimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeContext")
            .field("config", &self.config)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

/// Observable state of one endpoint's connection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionState {
    /// Current status.
    pub status: ConnectionStatus,
    /// Description of the most recent failure.
    pub last_error: Option<String>,
    /// Reconnect attempts since the last successful open.
    pub reconnect_count: u32,
    /// Inbound frames received.
    pub message_count: u64,
    /// URL of the current or last connection.
    pub endpoint_url: Option<String>,
}

/// Signals emitted by a [`ConnectionManager`].
///
/// Slots run on the connection's tokio task, in delivery order.
#[derive(Default)]
pub struct ConnectionSignals {
    /// Emitted on every status transition.
    pub state_changed: Signal<ConnectionStatus>,
    /// Emitted when a link opens.
    pub connected: Signal<()>,
    /// Emitted when a link closes. `None` when no close frame was received.
    pub disconnected: Signal<Option<CloseReason>>,
    /// Emitted for every inbound message, including synthesized ones.
    /// Heartbeat replies are consumed by the manager.
    pub message_received: Signal<Value>,
    /// Emitted when a connect fails or a link closes unexpectedly.
    pub error: Signal<NetworkError>,
    /// Emitted with the attempt number and delay when a reconnect is scheduled.
    pub reconnect_scheduled: Signal<(u32, Duration)>,
    /// Emitted with the attempt limit when no reconnect attempts remain.
    pub reconnect_exhausted: Signal<u32>,
}

enum Command {
    Send(String),
    Close(CloseReason),
}

#[derive(Default)]
struct Inner {
    state: ConnectionState,
    generation: u64,
    commands: Option<mpsc::UnboundedSender<Command>>,
}

#[derive(Default)]
struct Shared {
    inner: Mutex<Inner>,
    signals: ConnectionSignals,
}

/// Owns one reconnecting WebSocket connection to a fixed endpoint.
///
/// Each connect spawns a driver task that runs the link, the heartbeat and the
/// reconnect timer. Cloning the manager yields another handle to the same
/// connection.
///
/// # Reconnects
///
/// A close with code 1000, or with a reason mentioning "unauthorized", is
/// final. Any other close, and any failed handshake, schedules a reconnect
/// after `reconnect_interval * 1.5^n` (or a fixed interval without backoff)
/// until `reconnect_attempts` is reached. A successful open resets the count;
/// [`reconnect`](Self::reconnect) resets it by hand.
///
/// # Example
///
/// ```ignore
/// let manager = ConnectionManager::new(&context, "/ws/notifications", ConnectionConfigPatch::default());
///
/// manager.signals().message_received.connect(|message| {
///     println!("Received: {message}");
/// });
///
/// manager.connect();
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    endpoint: Arc<str>,
    overrides: ConnectionConfigPatch,
    context: RealtimeContext,
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Create a manager for `endpoint`, applying `overrides` over the shared
    /// config at connect time.
    pub fn new(
        context: &RealtimeContext,
        endpoint: impl Into<String>,
        overrides: ConnectionConfigPatch,
    ) -> Self {
        Self {
            endpoint: Arc::from(endpoint.into()),
            overrides,
            context: context.clone(),
            shared: Arc::new(Shared::default()),
        }
    }

    /// The endpoint path this manager connects to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The signals of this connection.
    pub fn signals(&self) -> &ConnectionSignals {
        &self.shared.signals
    }

    /// A copy of the current state.
    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state.clone()
    }

    /// The current status.
    pub fn status(&self) -> ConnectionStatus {
        self.shared.inner.lock().state.status
    }

    /// Whether a link is open.
    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Whether a handshake is in flight.
    pub fn is_connecting(&self) -> bool {
        self.status() == ConnectionStatus::Connecting
    }

    /// Description of the most recent failure.
    pub fn last_error(&self) -> Option<String> {
        self.shared.inner.lock().state.last_error.clone()
    }

    /// Record a failure raised by a channel built on this connection.
    pub(crate) fn note_error(&self, message: impl Into<String>) {
        self.shared.inner.lock().state.last_error = Some(message.into());
    }

    /// The effective options for this endpoint.
    pub fn settings(&self) -> ConnectionConfig {
        self.context.config.snapshot().merged(&self.overrides)
    }

    /// Whether a driver task is alive, including one waiting to reconnect.
    fn is_active(&self) -> bool {
        let inner = self.shared.inner.lock();
        inner.state.status != ConnectionStatus::Disconnected || inner.commands.is_some()
    }

    /// Open the connection.
    ///
    /// Does nothing while connected or connecting. Fails fast, setting
    /// [`last_error`](Self::last_error) without any network activity, when the
    /// session has no credentials or the base URL is missing or not `ws://` /
    /// `wss://`.
    pub fn connect(&self) {
        if self.status() != ConnectionStatus::Disconnected {
            return;
        }

        let settings = self.settings();
        let session = &self.context.session;
        let url = match build_connection_url(
            settings.base_url.as_deref(),
            &self.endpoint,
            session.user_id().as_deref(),
            session.token().as_deref(),
        ) {
            Ok(url) => url,
            Err(err) => {
                self.fail_fast(err);
                return;
            }
        };

        let (generation, commands) = {
            let mut inner = self.shared.inner.lock();
            if inner.state.status != ConnectionStatus::Disconnected {
                return;
            }
            let (tx, rx) = mpsc::unbounded_channel();
            inner.generation += 1;
            inner.commands = Some(tx);
            inner.state.status = ConnectionStatus::Connecting;
            inner.state.last_error = None;
            inner.state.endpoint_url = Some(url.clone());
            (inner.generation, rx)
        };

        chatter!(settings.debug, endpoint = %self.endpoint, "connecting");
        self.context.status.set_error(None);
        self.context.status.set_connecting(true);
        self.context.status.set_endpoint(url.clone());
        self.shared.signals.state_changed.emit(ConnectionStatus::Connecting);

        let driver = Driver {
            shared: Arc::downgrade(&self.shared),
            config: self.context.config.clone(),
            status: self.context.status.clone(),
            connector: self.context.connector.clone(),
            settings,
            url,
            generation,
        };
        tokio::spawn(driver.run(commands));
    }

    fn fail_fast(&self, err: NetworkError) {
        let message = format!("WebSocket URL build failed: {err}");
        tracing::warn!(target: targets::WEBSOCKET, endpoint = %self.endpoint, "{message}");
        self.shared.inner.lock().state.last_error = Some(message.clone());
        self.context.status.set_connecting(false);
        self.context.status.set_error(Some(message));
        self.shared.signals.error.emit(err);
    }

    /// Close the connection and cancel any pending reconnect or heartbeat.
    ///
    /// The state flips to disconnected before this returns. Calling it again
    /// has no further effect.
    pub fn disconnect(&self) {
        let (was_active, was_open, commands) = {
            let mut inner = self.shared.inner.lock();
            let commands = inner.commands.take();
            let was_open = inner.state.status != ConnectionStatus::Disconnected;
            inner.generation += 1;
            inner.state.status = ConnectionStatus::Disconnected;
            (was_open || commands.is_some(), was_open, commands)
        };

        if let Some(commands) = commands {
            let _ = commands.send(Command::Close(CloseReason::normal()));
        }
        if !was_active {
            return;
        }

        tracing::debug!(target: targets::WEBSOCKET, endpoint = %self.endpoint, "disconnected");
        self.context.status.set_connected(false);
        self.context.status.set_connecting(false);
        if was_open {
            self.shared.signals.state_changed.emit(ConnectionStatus::Disconnected);
            self.shared.signals.disconnected.emit(Some(CloseReason::normal()));
        }
    }

    /// Disconnect, reset the reconnect count and connect again.
    pub fn reconnect(&self) {
        self.disconnect();
        self.shared.inner.lock().state.reconnect_count = 0;
        self.context.status.set_reconnect_count(0);
        self.connect();
    }

    /// Connect or disconnect to match the login state and the enabled flag.
    pub fn reconcile(&self, logged_in: bool) {
        let enabled = self.context.config.is_enabled();
        if logged_in && enabled && !self.is_active() {
            self.connect();
        } else if (!logged_in || !enabled) && self.is_active() {
            self.disconnect();
        }
    }

    /// Send a text frame. Returns `false` when not connected.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        let inner = self.shared.inner.lock();
        if inner.state.status != ConnectionStatus::Connected {
            tracing::debug!(target: targets::WEBSOCKET, endpoint = %self.endpoint, "send while not connected");
            return false;
        }
        inner
            .commands
            .as_ref()
            .is_some_and(|commands| commands.send(Command::Send(text.into())).is_ok())
    }

    /// Serialize `payload` as JSON and send it. Returns `false` when not
    /// connected or when serialization fails.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> bool {
        match serde_json::to_string(payload) {
            Ok(text) => self.send_text(text),
            Err(err) => {
                tracing::warn!(target: targets::WEBSOCKET, error = %err, "failed to serialize outbound frame");
                false
            }
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

/// How a link ended.
enum LinkEnd {
    /// `disconnect()` was called, or the manager was dropped.
    Requested,
    /// The server closed the link or the stream ended.
    Closed(Option<CloseReason>),
    /// The transport failed.
    Failed(NetworkError),
}

/// The task behind one `connect()`.
struct Driver {
    shared: Weak<Shared>,
    config: SharedConfig,
    status: StatusBoard,
    connector: Arc<dyn Connector>,
    settings: ConnectionConfig,
    url: String,
    generation: u64,
}

impl Driver {
    async fn run(self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            let connecting = self.connector.connect(&self.url);
            tokio::pin!(connecting);
            let outcome = loop {
                tokio::select! {
                    result = &mut connecting => break Some(result),
                    command = commands.recv() => match command {
                        Some(Command::Send(_)) => continue,
                        Some(Command::Close(_)) | None => break None,
                    },
                }
            };
            let Some(result) = outcome else { return };

            match result {
                Ok(link) => {
                    if !self.opened() {
                        return;
                    }
                    let close = match self.pump(link, &mut commands).await {
                        LinkEnd::Requested => return,
                        LinkEnd::Closed(reason) => {
                            reason.unwrap_or_else(|| CloseReason::new(CloseCode::Abnormal))
                        }
                        LinkEnd::Failed(err) => {
                            CloseReason::with_reason(CloseCode::Abnormal, err.to_string())
                        }
                    };
                    if !self.closed(&close) {
                        return;
                    }
                }
                // A failed handshake counts as an abnormal closure.
                Err(err) => {
                    if !self.connect_failed(err) {
                        return;
                    }
                }
            }

            if !self.wait_for_reconnect(&mut commands).await {
                return;
            }
        }
    }

    /// Run an open link until it ends.
    async fn pump(&self, link: Link, commands: &mut mpsc::UnboundedReceiver<Command>) -> LinkEnd {
        let Link {
            mut sink,
            mut stream,
        } = link;
        let interval = self.settings.heartbeat_interval;
        let mut heartbeat =
            (!interval.is_zero()).then(|| tokio::time::interval_at(Instant::now() + interval, interval));

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Send(text)) => {
                        if let Err(err) = sink.send(Outgoing::Text(text)).await {
                            return LinkEnd::Failed(err);
                        }
                    }
                    Some(Command::Close(reason)) => {
                        let _ = sink.send(Outgoing::Close(reason)).await;
                        return LinkEnd::Requested;
                    }
                    None => {
                        let _ = sink.send(Outgoing::Close(CloseReason::normal())).await;
                        return LinkEnd::Requested;
                    }
                },
                frame = stream.next() => match frame {
                    Some(Ok(Frame::Text(text))) => {
                        if !self.dispatch(&text) {
                            return LinkEnd::Requested;
                        }
                    }
                    Some(Ok(Frame::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => {
                            if !self.dispatch(text) {
                                return LinkEnd::Requested;
                            }
                        }
                        Err(_) => {
                            chatter!(self.settings.debug, len = data.len(), "ignoring non-UTF-8 binary frame");
                        }
                    },
                    Some(Ok(Frame::Close(reason))) => return LinkEnd::Closed(reason),
                    Some(Err(err)) => return LinkEnd::Failed(err),
                    None => return LinkEnd::Closed(None),
                },
                _ = tick(&mut heartbeat) => {
                    match OutboundFrame::Ping.to_text() {
                        Ok(ping) => {
                            chatter!(self.settings.debug, "sending heartbeat");
                            if let Err(err) = sink.send(Outgoing::Text(ping)).await {
                                return LinkEnd::Failed(err);
                            }
                        }
                        Err(err) => {
                            tracing::warn!(target: targets::WEBSOCKET, error = %err, "failed to encode heartbeat");
                        }
                    }
                }
            }
        }
    }

    /// Run `f` on the shared state if this driver is still current.
    fn with_current<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> Option<R> {
        let shared = self.shared.upgrade()?;
        let mut inner = shared.inner.lock();
        if inner.generation != self.generation {
            return None;
        }
        Some(f(&mut inner))
    }

    fn upgrade(&self) -> Option<Arc<Shared>> {
        self.shared.upgrade()
    }

    /// Returns `false` if this driver is stale.
    fn dispatch(&self, text: &str) -> bool {
        if self
            .with_current(|inner| inner.state.message_count += 1)
            .is_none()
        {
            return false;
        }
        self.status.record_message();

        let message = match decode_text(text) {
            Decoded::Message(value) => {
                if Envelope::from_value(&value).kind == FrameKind::Pong {
                    chatter!(self.settings.debug, "heartbeat acknowledged");
                    return true;
                }
                value
            }
            Decoded::Recovered(value) => {
                tracing::warn!(target: targets::WEBSOCKET, url = %redact(&self.url), "recovered malformed frame");
                value
            }
        };

        if let Some(shared) = self.upgrade() {
            shared.signals.message_received.emit(message);
        }
        true
    }

    /// Returns `false` if this driver is stale.
    fn opened(&self) -> bool {
        let changed = self.with_current(|inner| {
            inner.state.status = ConnectionStatus::Connected;
            inner.state.reconnect_count = 0;
            inner.state.last_error = None;
        });
        if changed.is_none() {
            return false;
        }

        chatter!(self.settings.debug, url = %redact(&self.url), "connection established");
        self.status.set_connected(true);
        self.status.set_reconnect_count(0);
        if let Some(shared) = self.upgrade() {
            shared.signals.state_changed.emit(ConnectionStatus::Connected);
            shared.signals.connected.emit(());
        }
        true
    }

    /// Returns `false` if this driver is stale.
    fn connect_failed(&self, err: NetworkError) -> bool {
        let message = format!("WebSocket connection failed: {err}");
        let changed = self.with_current(|inner| {
            inner.state.status = ConnectionStatus::Disconnected;
            inner.state.last_error = Some(message.clone());
        });
        if changed.is_none() {
            return false;
        }

        tracing::warn!(target: targets::WEBSOCKET, url = %redact(&self.url), error = %err, "connection failed");
        self.status.set_connecting(false);
        self.status.set_error(Some(message));
        if let Some(shared) = self.upgrade() {
            shared.signals.state_changed.emit(ConnectionStatus::Disconnected);
            shared.signals.error.emit(err);
        }
        true
    }

    /// Record a close. Returns `true` if a reconnect should be attempted.
    fn closed(&self, reason: &CloseReason) -> bool {
        let category = reason.category();
        let description = reason.describe();
        let error = match category {
            CloseCategory::Normal => None,
            CloseCategory::Unauthorized => {
                Some("WebSocket closed: authorization failed, please log in again".to_string())
            }
            _ => Some(format!("WebSocket closed: {description}")),
        };

        let was_open = self.with_current(|inner| {
            let was_open = inner.state.status != ConnectionStatus::Disconnected;
            inner.state.status = ConnectionStatus::Disconnected;
            if error.is_some() {
                inner.state.last_error = error.clone();
            }
            was_open
        });
        let Some(was_open) = was_open else {
            return false;
        };

        self.status.set_connected(false);
        self.status.set_connecting(false);
        if let Some(error) = &error {
            self.status.set_error(Some(error.clone()));
        }

        if let Some(shared) = self.upgrade() {
            if was_open {
                shared.signals.state_changed.emit(ConnectionStatus::Disconnected);
            }
            shared.signals.disconnected.emit(Some(reason.clone()));
            match category {
                CloseCategory::Normal => {}
                CloseCategory::Unauthorized => shared
                    .signals
                    .error
                    .emit(NetworkError::Authentication(description.clone())),
                _ => shared.signals.error.emit(NetworkError::ProtocolClose {
                    code: reason.code.as_u16(),
                    reason: description.clone(),
                }),
            }
        }

        if category.reconnects() {
            chatter!(self.settings.debug, close = %description, "connection closed unexpectedly");
            true
        } else {
            tracing::info!(target: targets::WEBSOCKET, close = %description, "connection closed");
            self.release();
            false
        }
    }

    /// Drop the command channel so the manager no longer counts as active.
    fn release(&self) {
        self.with_current(|inner| inner.commands = None);
    }

    /// Sleep until the next attempt. Returns `false` if no attempt should run.
    async fn wait_for_reconnect(&self, commands: &mut mpsc::UnboundedReceiver<Command>) -> bool {
        let limit = self.settings.reconnect_attempts;
        let enabled = self.config.is_enabled();
        let scheduled = self.with_current(|inner| {
            let count = inner.state.reconnect_count;
            (count < limit && enabled).then_some(count)
        });
        let count = match scheduled {
            None => return false,
            Some(None) => {
                if enabled {
                    tracing::warn!(target: targets::WEBSOCKET, attempts = limit, "reconnect attempts exhausted");
                    if let Some(shared) = self.upgrade() {
                        shared.signals.reconnect_exhausted.emit(limit);
                    }
                } else {
                    chatter!(self.settings.debug, "realtime disabled, not reconnecting");
                }
                self.release();
                return false;
            }
            Some(Some(count)) => count,
        };

        let delay = self.settings.reconnect_delay(count);
        chatter!(self.settings.debug, attempt = count + 1, ?delay, "scheduling reconnect");
        if let Some(shared) = self.upgrade() {
            shared.signals.reconnect_scheduled.emit((count + 1, delay));
        }

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                command = commands.recv() => match command {
                    Some(Command::Send(_)) => continue,
                    Some(Command::Close(_)) | None => return false,
                },
            }
        }

        let attempt = self.with_current(|inner| {
            inner.state.reconnect_count += 1;
            inner.state.status = ConnectionStatus::Connecting;
            inner.state.reconnect_count
        });
        let Some(attempt) = attempt else {
            return false;
        };

        self.status.set_reconnect_count(attempt);
        self.status.set_connecting(true);
        if let Some(shared) = self.upgrade() {
            shared.signals.state_changed.emit(ConnectionStatus::Connecting);
        }
        true
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Strip the token from a connection URL for logging.
fn redact(url: &str) -> &str {
    url.split_once('?').map_or(url, |(path, _)| path)
}
