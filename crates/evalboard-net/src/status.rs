//! Process-wide mirror of realtime connection status.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use evalboard_core::Signal;
use parking_lot::RwLock;

/// A copy of the status board at one point in time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// A connection is open.
    pub connected: bool,
    /// A connection attempt is in flight.
    pub connecting: bool,
    /// Description of the most recent failure.
    pub last_error: Option<String>,
    /// URL of the most recent connection, token included.
    pub endpoint: Option<String>,
    /// When a connection last opened.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Reconnect attempts since the last successful open.
    pub reconnect_count: u32,
    /// Inbound messages dispatched since the last reset.
    pub message_count: u64,
}

#[derive(Default)]
struct StatusInner {
    state: RwLock<StatusSnapshot>,
    changed: Signal<StatusSnapshot>,
}

/// Shared status mirror, written by connection managers and read by the UI.
///
/// Several managers may share one board; the last write wins.
#[derive(Clone, Default)]
pub struct StatusBoard {
    inner: Arc<StatusInner>,
}

impl StatusBoard {
    /// Create an empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy out the current status.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.inner.state.read().clone()
    }

    /// Emitted with a fresh snapshot after every write.
    pub fn changed(&self) -> &Signal<StatusSnapshot> {
        &self.inner.changed
    }

    /// Record an open or closed connection. Opening clears the error.
    pub fn set_connected(&self, connected: bool) {
        self.write(|state| {
            state.connected = connected;
            if connected {
                state.connecting = false;
                state.last_error = None;
                state.last_connected_at = Some(Utc::now());
            }
        });
    }

    /// Record whether an attempt is in flight.
    pub fn set_connecting(&self, connecting: bool) {
        self.write(|state| state.connecting = connecting);
    }

    /// Record a failure. Any error marks the board disconnected.
    pub fn set_error(&self, error: Option<String>) {
        self.write(|state| {
            if error.is_some() {
                state.connected = false;
            }
            state.last_error = error;
        });
    }

    /// Record the URL being connected to.
    pub fn set_endpoint(&self, endpoint: impl Into<String>) {
        let endpoint = endpoint.into();
        self.write(|state| state.endpoint = Some(endpoint));
    }

    /// Record the current reconnect attempt count.
    pub fn set_reconnect_count(&self, count: u32) {
        self.write(|state| state.reconnect_count = count);
    }

    /// Count one dispatched inbound message.
    pub fn record_message(&self) {
        self.write(|state| state.message_count += 1);
    }

    /// Clear everything except the last endpoint and open time.
    pub fn reset(&self) {
        self.write(|state| {
            state.connected = false;
            state.connecting = false;
            state.last_error = None;
            state.reconnect_count = 0;
            state.message_count = 0;
        });
    }

    fn write(&self, f: impl FnOnce(&mut StatusSnapshot)) {
        let snapshot = {
            let mut state = self.inner.state.write();
            f(&mut state);
            state.clone()
        };
        self.inner.changed.emit(snapshot);
    }
}

impl std::fmt::Debug for StatusBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StatusBoard").field(&self.snapshot()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_clears_error_and_stamps_time() {
        let board = StatusBoard::new();
        board.set_connecting(true);
        board.set_error(Some("boom".into()));
        board.set_connected(true);

        let snapshot = board.snapshot();
        assert!(snapshot.connected);
        assert!(!snapshot.connecting);
        assert!(snapshot.last_error.is_none());
        assert!(snapshot.last_connected_at.is_some());
    }

    #[test]
    fn test_error_marks_disconnected() {
        let board = StatusBoard::new();
        board.set_connected(true);
        board.set_error(Some("closed".into()));
        assert!(!board.snapshot().connected);
    }

    #[test]
    fn test_reset_keeps_endpoint() {
        let board = StatusBoard::new();
        board.set_endpoint("wss://host/ws/notifications/1?token=t");
        board.record_message();
        board.set_reconnect_count(3);
        board.reset();

        let snapshot = board.snapshot();
        assert_eq!(snapshot.message_count, 0);
        assert_eq!(snapshot.reconnect_count, 0);
        assert!(snapshot.endpoint.is_some());
    }

    #[test]
    fn test_changed_signal_fires_per_write() {
        let board = StatusBoard::new();
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count_clone = count.clone();
        board.changed().connect(move |_| {
            count_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        board.set_connecting(true);
        board.record_message();
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
