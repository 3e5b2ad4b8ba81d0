//! Platform services and system integration.
//!
//! # Notifications
//!
//! With the `notifications` feature (on by default), [`DesktopNotifier`]
//! shows pushed notifications as desktop popups:
//!
//! ```ignore
//! use evalboard::platform::default_notifier;
//!
//! let notifier = default_notifier("Evalboard");
//! let channel = NotificationChannel::new(&context, store, notifier);
//! ```
//!
//! Without the feature, [`default_notifier`] returns a [`NullNotifier`] and
//! notifications are only delivered through signals.

use std::sync::Arc;

#[cfg(feature = "notifications")]
mod notifications;

#[cfg(feature = "notifications")]
pub use notifications::{DesktopNotifier, NotificationError, Timeout, Urgency};

pub use evalboard_net::channels::{
    NotificationPermission, NullNotifier, PlatformNotification, PlatformNotifier,
};

/// The best notifier available in this build.
#[cfg(feature = "notifications")]
pub fn default_notifier(app_name: &str) -> Arc<dyn PlatformNotifier> {
    Arc::new(DesktopNotifier::new(app_name))
}

/// The best notifier available in this build.
#[cfg(not(feature = "notifications"))]
pub fn default_notifier(_app_name: &str) -> Arc<dyn PlatformNotifier> {
    Arc::new(NullNotifier)
}
