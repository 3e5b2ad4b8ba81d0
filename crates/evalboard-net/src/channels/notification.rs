//! The notification channel.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use evalboard_core::logging::targets;
use evalboard_core::{Property, Signal};
use serde::Serialize;
use serde_json::Value;

use crate::config::ConnectionConfigPatch;
use crate::session::Session;
use crate::websocket::{
    ConnectionManager, ConnectionStatus, Envelope, FrameKind, OutboundFrame, RealtimeContext,
};

/// Endpoint path of the notification channel.
pub const NOTIFICATIONS_ENDPOINT: &str = "/ws/notifications";

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(45);
const DEFAULT_TITLE: &str = "New notification";
const DEFAULT_KIND: &str = "system";

/// A notification pushed by the server.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Notification {
    /// Server-side id.
    pub id: i64,
    /// Headline.
    pub title: String,
    /// Body text.
    pub content: String,
    /// Creation time. Defaults to the time of receipt.
    pub created_at: DateTime<Utc>,
    /// Last update time. Defaults to `created_at`.
    pub updated_at: DateTime<Utc>,
    /// Always `false` for a freshly pushed notification.
    pub is_read: bool,
    /// Category such as `system` or `grade`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The user who triggered it, if any.
    pub sender_id: Option<i64>,
}

impl Notification {
    /// Build a notification from a frame payload, filling defaults for
    /// missing fields. Returns `None` when the payload has no usable id.
    pub fn from_payload(data: &Value) -> Option<Self> {
        let id = int_field(data, "id")?;
        let created_at = time_field(data, "created_at").unwrap_or_else(Utc::now);
        let updated_at = time_field(data, "updated_at").unwrap_or(created_at);

        Some(Self {
            id,
            title: str_field(data, "title").unwrap_or(DEFAULT_TITLE).to_owned(),
            content: str_field(data, "content").unwrap_or_default().to_owned(),
            created_at,
            updated_at,
            is_read: false,
            kind: str_field(data, "notification_type")
                .or_else(|| str_field(data, "kind"))
                .unwrap_or(DEFAULT_KIND)
                .to_owned(),
            sender_id: int_field(data, "sender_id"),
        })
    }

    /// Build a notification from a stored record, which carries its read
    /// state as `is_read` (or `isRead`).
    pub fn from_record(data: &Value) -> Option<Self> {
        let mut notification = Self::from_payload(data)?;
        notification.is_read = data
            .get("is_read")
            .or_else(|| data.get("isRead"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Some(notification)
    }

    /// Tag used to collapse repeated desktop popups for one notification.
    pub fn tag(&self) -> String {
        format!("notification-{}", self.id)
    }
}

fn str_field<'a>(data: &'a Value, key: &str) -> Option<&'a str> {
    data.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn int_field(data: &Value, key: &str) -> Option<i64> {
    match data.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn time_field(data: &Value, key: &str) -> Option<DateTime<Utc>> {
    let raw = str_field(data, key)?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

/// The application's notification list, refreshed when a push arrives.
pub trait NotificationStore: Send + Sync + 'static {
    /// Reload the list from the server.
    fn refresh(&self);

    /// Mark one notification as read.
    fn mark_as_read(&self, id: i64);
}

/// Whether desktop popups may be shown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NotificationPermission {
    /// The user has not decided yet.
    #[default]
    Default,
    /// Popups are allowed.
    Granted,
    /// Popups are blocked.
    Denied,
}

/// A desktop popup request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlatformNotification {
    /// Popup title.
    pub title: String,
    /// Popup body.
    pub body: String,
    /// Popups with the same tag replace each other.
    pub tag: String,
}

/// Error reported by a [`PlatformNotifier`].
pub type NotifierError = Box<dyn std::error::Error + Send + Sync>;

/// The host's notification service.
pub trait PlatformNotifier: Send + Sync + 'static {
    /// Current permission.
    fn permission(&self) -> NotificationPermission;

    /// Ask the user for permission and return the outcome.
    fn request_permission(&self) -> NotificationPermission;

    /// Show a popup. `on_click` runs at most once, when the user activates it.
    fn show(
        &self,
        notification: &PlatformNotification,
        on_click: Box<dyn FnOnce() + Send>,
    ) -> Result<(), NotifierError>;
}

/// A notifier for hosts without a notification service.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullNotifier;

impl PlatformNotifier for NullNotifier {
    fn permission(&self) -> NotificationPermission {
        NotificationPermission::Denied
    }

    fn request_permission(&self) -> NotificationPermission {
        NotificationPermission::Denied
    }

    fn show(
        &self,
        _notification: &PlatformNotification,
        _on_click: Box<dyn FnOnce() + Send>,
    ) -> Result<(), NotifierError> {
        Ok(())
    }
}

struct ChannelInner {
    manager: ConnectionManager,
    session: Session,
    store: Arc<dyn NotificationStore>,
    notifier: Arc<dyn PlatformNotifier>,
    latest_notification: Property<Option<Notification>>,
    notification_received: Signal<Notification>,
}

/// Receives pushed notifications on [`NOTIFICATIONS_ENDPOINT`].
///
/// Each notification is published as [`latest_notification`](Self::latest_notification),
/// triggers a store refresh and, when permitted, a desktop popup whose click
/// marks it read.
#[derive(Clone)]
pub struct NotificationChannel {
    inner: Arc<ChannelInner>,
}

impl NotificationChannel {
    /// Create the channel. Nothing connects until [`initialize`](Self::initialize)
    /// or [`manager`](Self::manager)`.connect()`.
    pub fn new(
        context: &RealtimeContext,
        store: Arc<dyn NotificationStore>,
        notifier: Arc<dyn PlatformNotifier>,
    ) -> Self {
        let manager = ConnectionManager::new(
            context,
            NOTIFICATIONS_ENDPOINT,
            ConnectionConfigPatch::default().heartbeat_interval(HEARTBEAT_INTERVAL),
        );
        let inner = Arc::new(ChannelInner {
            manager,
            session: context.session.clone(),
            store,
            notifier,
            latest_notification: Property::new(None),
            notification_received: Signal::new(),
        });

        let weak: Weak<ChannelInner> = Arc::downgrade(&inner);
        inner.manager.signals().message_received.connect(move |message| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_message(message);
            }
        });

        Self { inner }
    }

    /// The underlying connection.
    pub fn manager(&self) -> &ConnectionManager {
        &self.inner.manager
    }

    /// The most recently received notification.
    pub fn latest_notification(&self) -> Option<Notification> {
        self.inner.latest_notification.get()
    }

    /// Emitted for every received notification.
    pub fn notification_received(&self) -> &Signal<Notification> {
        &self.inner.notification_received
    }

    /// Connect if logged in, enabled and idle, then ask for popup permission
    /// if the user has not decided yet.
    pub fn initialize(&self) {
        let manager = &self.inner.manager;
        if self.inner.session.is_logged_in()
            && manager.settings().enabled
            && manager.status() == ConnectionStatus::Disconnected
        {
            manager.connect();
        }
        if self.inner.notifier.permission() == NotificationPermission::Default {
            self.request_permission();
        }
    }

    /// Ask the host for popup permission.
    pub fn request_permission(&self) -> NotificationPermission {
        let permission = self.inner.notifier.request_permission();
        tracing::debug!(target: targets::CHANNEL, ?permission, "notification permission");
        permission
    }

    /// Confirm receipt of a notification. Returns `false` when not connected.
    pub fn send_acknowledge(&self, notification_id: i64) -> bool {
        if !self.inner.manager.is_connected() {
            return false;
        }
        self.inner.manager.send(&OutboundFrame::Ack { notification_id })
    }
}

impl ChannelInner {
    fn handle_message(&self, message: &Value) {
        let envelope = Envelope::from_value(message);
        match envelope.kind {
            FrameKind::Notification => self.handle_notification(&envelope.data),
            FrameKind::Pong => {}
            _ => {
                tracing::debug!(
                    target: targets::CHANNEL,
                    kind = envelope.type_name.as_deref().unwrap_or("<none>"),
                    "notification channel ignoring message"
                );
            }
        }
    }

    fn handle_notification(&self, data: &Value) {
        let Some(notification) = Notification::from_payload(data) else {
            tracing::warn!(target: targets::CHANNEL, "notification without id dropped");
            return;
        };
        tracing::debug!(target: targets::CHANNEL, id = notification.id, "notification received");

        self.latest_notification.set(Some(notification.clone()));
        self.notification_received.emit(notification.clone());
        self.store.refresh();

        if self.notifier.permission() != NotificationPermission::Granted {
            return;
        }
        let popup = PlatformNotification {
            title: notification.title.clone(),
            body: notification.content.clone(),
            tag: notification.tag(),
        };
        let store = self.store.clone();
        let id = notification.id;
        if let Err(err) = self
            .notifier
            .show(&popup, Box::new(move || store.mark_as_read(id)))
        {
            tracing::warn!(target: targets::CHANNEL, error = %err, "failed to show notification");
        }
    }
}

impl fmt::Debug for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationChannel")
            .field("manager", &self.inner.manager)
            .field("latest_notification", &self.inner.latest_notification)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::config::SharedConfig;

    #[derive(Default)]
    struct RecordingStore {
        refreshes: AtomicUsize,
        read: Mutex<Vec<i64>>,
    }

    impl NotificationStore for RecordingStore {
        fn refresh(&self) {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
        }

        fn mark_as_read(&self, id: i64) {
            self.read.lock().push(id);
        }
    }

    /// Grants permission and clicks every popup immediately.
    #[derive(Default)]
    struct ClickingNotifier {
        shown: Mutex<Vec<PlatformNotification>>,
    }

    impl PlatformNotifier for ClickingNotifier {
        fn permission(&self) -> NotificationPermission {
            NotificationPermission::Granted
        }

        fn request_permission(&self) -> NotificationPermission {
            NotificationPermission::Granted
        }

        fn show(
            &self,
            notification: &PlatformNotification,
            on_click: Box<dyn FnOnce() + Send>,
        ) -> Result<(), NotifierError> {
            self.shown.lock().push(notification.clone());
            on_click();
            Ok(())
        }
    }

    fn channel(
        store: Arc<RecordingStore>,
        notifier: Arc<dyn PlatformNotifier>,
    ) -> NotificationChannel {
        let context = RealtimeContext::new(SharedConfig::default(), Session::new());
        NotificationChannel::new(&context, store, notifier)
    }

    #[test]
    fn test_payload_defaults() {
        let notification = Notification::from_payload(&json!({ "id": 3 })).unwrap();
        assert_eq!(notification.title, "New notification");
        assert_eq!(notification.content, "");
        assert_eq!(notification.kind, "system");
        assert!(!notification.is_read);
        assert_eq!(notification.sender_id, None);
        assert_eq!(notification.updated_at, notification.created_at);
    }

    #[test]
    fn test_payload_fields() {
        let notification = Notification::from_payload(&json!({
            "id": "8",
            "title": "Grades posted",
            "content": "Term 2 results are in",
            "created_at": "2024-03-01T08:30:00",
            "updated_at": "2024-03-01T09:00:00Z",
            "notification_type": "grade",
            "sender_id": 11,
        }))
        .unwrap();
        assert_eq!(notification.id, 8);
        assert_eq!(notification.kind, "grade");
        assert_eq!(notification.sender_id, Some(11));
        assert_eq!(notification.created_at.to_rfc3339(), "2024-03-01T08:30:00+00:00");
        assert_eq!(notification.updated_at.to_rfc3339(), "2024-03-01T09:00:00+00:00");
        assert_eq!(notification.tag(), "notification-8");
    }

    #[test]
    fn test_notification_serializes_like_the_server() {
        let notification = Notification::from_payload(&json!({
            "id": 8,
            "title": "Grades posted",
            "created_at": "2024-03-01T08:30:00Z",
            "notification_type": "grade",
        }))
        .unwrap();
        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(value["type"], "grade");
        assert_eq!(value["created_at"], "2024-03-01T08:30:00Z");
        assert_eq!(value["is_read"], false);
        assert_eq!(value["sender_id"], Value::Null);
    }

    #[test]
    fn test_record_keeps_read_state() {
        let record = json!({ "id": 4, "is_read": true });
        assert!(Notification::from_record(&record).unwrap().is_read);
        assert!(!Notification::from_payload(&record).unwrap().is_read);
    }

    #[test]
    fn test_payload_without_id() {
        assert!(Notification::from_payload(&json!({ "title": "x" })).is_none());
        assert!(Notification::from_payload(&Value::Null).is_none());
    }

    #[test]
    fn test_notification_refreshes_and_pops_up() {
        let store = Arc::new(RecordingStore::default());
        let notifier = Arc::new(ClickingNotifier::default());
        let channel = channel(store.clone(), notifier.clone());

        let received = Arc::new(AtomicUsize::new(0));
        let counter = received.clone();
        channel.notification_received().connect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        channel.inner.handle_message(&json!({
            "type": "notification",
            "data": { "id": 5, "title": "Hello", "content": "World" },
        }));

        assert_eq!(received.load(Ordering::SeqCst), 1);
        assert_eq!(store.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(channel.latest_notification().unwrap().id, 5);
        let shown = notifier.shown.lock();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].tag, "notification-5");
        assert_eq!(*store.read.lock(), vec![5]);
    }

    #[test]
    fn test_legacy_flat_notification() {
        let store = Arc::new(RecordingStore::default());
        let channel = channel(store.clone(), Arc::new(NullNotifier));

        channel.inner.handle_message(&json!({
            "type": "notification",
            "id": 9,
            "title": "Flat",
        }));

        let latest = channel.latest_notification().unwrap();
        assert_eq!(latest.id, 9);
        assert_eq!(latest.title, "Flat");
        assert_eq!(store.refreshes.load(Ordering::SeqCst), 1);
        assert!(store.read.lock().is_empty());
    }

    #[test]
    fn test_other_messages_ignored() {
        let store = Arc::new(RecordingStore::default());
        let channel = channel(store.clone(), Arc::new(NullNotifier));

        channel.inner.handle_message(&json!({ "type": "pong" }));
        channel.inner.handle_message(&json!({ "type": "presence", "data": {} }));
        channel.inner.handle_message(&json!({ "type": "notification", "data": { "title": "no id" } }));

        assert!(channel.latest_notification().is_none());
        assert_eq!(store.refreshes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_acknowledge_requires_connection() {
        let channel = channel(Arc::new(RecordingStore::default()), Arc::new(NullNotifier));
        assert!(!channel.send_acknowledge(1));
    }
}
