//! Feature channels layered on [`ConnectionManager`](crate::websocket::ConnectionManager).
//!
//! Each channel owns one connection to a fixed endpoint, normalizes the
//! frames it receives and exposes the result as properties and signals:
//!
//! - [`NotificationChannel`]: new notifications, desktop popups, acks
//! - [`AiAssistantChannel`]: one in-flight query at a time, suggestions
//! - [`UpdatesChannel`]: "something changed" flags for dashboard views
//!
//! A malformed payload degrades to a safe default; it never stops a channel.

mod assistant;
mod notification;
mod updates;

pub use assistant::{AI_ASSISTANT_ENDPOINT, AiAssistantChannel, AiResponse};
pub use notification::{
    NOTIFICATIONS_ENDPOINT, Notification, NotificationChannel, NotificationPermission,
    NotificationStore, NotifierError, NullNotifier, PlatformNotification, PlatformNotifier,
};
pub use updates::{UpdateKind, UpdatesChannel};
