//! Data-changed flags for dashboard views.

use std::fmt;
use std::sync::{Arc, Weak};

use evalboard_core::logging::targets;
use evalboard_core::{Property, Signal};
use serde_json::Value;

use super::notification::NOTIFICATIONS_ENDPOINT;
use crate::config::{ConnectionConfigPatch, SharedConfig};
use crate::websocket::{ConnectionManager, ConnectionStatus, Envelope, FrameKind, RealtimeContext};

/// What changed on the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    /// A new notification arrived.
    Notifications,
    /// Dashboard statistics changed.
    Dashboard,
    /// The student roster changed.
    Students,
    /// Quantified records changed.
    Records,
    /// Quantified items changed.
    Items,
}

impl UpdateKind {
    /// Map an `update_type` value. Unknown values yield `None`.
    pub fn from_update_type(name: &str) -> Option<Self> {
        match name {
            "dashboard" => Some(Self::Dashboard),
            "students" => Some(Self::Students),
            "records" => Some(Self::Records),
            "items" => Some(Self::Items),
            _ => None,
        }
    }
}

#[derive(Default)]
struct Flags {
    notifications: Property<bool>,
    dashboard: Property<bool>,
    students: Property<bool>,
    records: Property<bool>,
    items: Property<bool>,
}

impl Flags {
    fn get(&self, kind: UpdateKind) -> &Property<bool> {
        match kind {
            UpdateKind::Notifications => &self.notifications,
            UpdateKind::Dashboard => &self.dashboard,
            UpdateKind::Students => &self.students,
            UpdateKind::Records => &self.records,
            UpdateKind::Items => &self.items,
        }
    }
}

struct ChannelInner {
    manager: ConnectionManager,
    config: SharedConfig,
    flags: Flags,
    update_received: Signal<UpdateKind>,
}

/// Tracks which dashboard data is stale.
///
/// Listens on [`NOTIFICATIONS_ENDPOINT`] unless another endpoint is given. A
/// view shows a "new data" hint while its flag is raised and calls
/// [`reset_update_flags`](Self::reset_update_flags) after reloading.
#[derive(Clone)]
pub struct UpdatesChannel {
    inner: Arc<ChannelInner>,
}

impl UpdatesChannel {
    /// Create the channel on the default endpoint without connecting.
    pub fn new(context: &RealtimeContext) -> Self {
        Self::with_endpoint(context, NOTIFICATIONS_ENDPOINT)
    }

    /// Create the channel on `endpoint` without connecting.
    pub fn with_endpoint(context: &RealtimeContext, endpoint: impl Into<String>) -> Self {
        let manager = ConnectionManager::new(context, endpoint, ConnectionConfigPatch::default());
        let inner = Arc::new(ChannelInner {
            manager,
            config: context.config.clone(),
            flags: Flags::default(),
            update_received: Signal::new(),
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

    /// Whether a notification arrived since the last reset.
    pub fn has_new_notifications(&self) -> bool {
        self.has_update(UpdateKind::Notifications)
    }

    /// Whether dashboard statistics changed since the last reset.
    pub fn has_dashboard_update(&self) -> bool {
        self.has_update(UpdateKind::Dashboard)
    }

    /// Whether the roster changed since the last reset.
    pub fn has_students_update(&self) -> bool {
        self.has_update(UpdateKind::Students)
    }

    /// Whether records changed since the last reset.
    pub fn has_records_update(&self) -> bool {
        self.has_update(UpdateKind::Records)
    }

    /// Whether items changed since the last reset.
    pub fn has_items_update(&self) -> bool {
        self.has_update(UpdateKind::Items)
    }

    /// Whether the flag for `kind` is raised.
    pub fn has_update(&self, kind: UpdateKind) -> bool {
        self.inner.flags.get(kind).get()
    }

    /// Emitted whenever a flag is raised.
    pub fn update_received(&self) -> &Signal<UpdateKind> {
        &self.inner.update_received
    }

    /// Lower every flag.
    pub fn reset_update_flags(&self) {
        let flags = &self.inner.flags;
        for flag in [
            &flags.notifications,
            &flags.dashboard,
            &flags.students,
            &flags.records,
            &flags.items,
        ] {
            flag.set(false);
        }
    }

    /// Turn realtime connections on and connect if idle.
    pub fn enable(&self) {
        self.inner.config.set_enabled(true);
        if self.inner.manager.status() == ConnectionStatus::Disconnected {
            self.inner.manager.connect();
        }
    }

    /// Disconnect and turn realtime connections off.
    pub fn disable(&self) {
        self.inner.manager.disconnect();
        self.inner.config.set_enabled(false);
    }
}

impl ChannelInner {
    fn handle_message(&self, message: &Value) {
        let envelope = Envelope::from_value(message);
        let kind = match envelope.kind {
            FrameKind::Notification => UpdateKind::Notifications,
            FrameKind::Update => match envelope.data_str("update_type").and_then(UpdateKind::from_update_type) {
                Some(kind) => kind,
                None => {
                    tracing::debug!(
                        target: targets::CHANNEL,
                        update_type = envelope.data_str("update_type").unwrap_or("<none>"),
                        "ignoring unknown update type"
                    );
                    return;
                }
            },
            _ => return,
        };

        self.flags.get(kind).set(true);
        self.update_received.emit(kind);
    }
}

impl fmt::Debug for UpdatesChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdatesChannel")
            .field("manager", &self.inner.manager)
            .finish_non_exhaustive()
    }
}
