//! Desktop popups for pushed notifications.
//!
//! [`DesktopNotifier`] implements [`PlatformNotifier`] on top of the
//! operating system's notification service, so a
//! [`NotificationChannel`](evalboard_net::channels::NotificationChannel) can
//! show each new notification as a popup.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use evalboard::platform::{DesktopNotifier, Timeout};
//!
//! let notifier = DesktopNotifier::new("Evalboard")
//!     .icon("dialog-information")
//!     .timeout(Timeout::Milliseconds(8000));
//!
//! let channel = NotificationChannel::new(&context, store, Arc::new(notifier));
//! channel.initialize();
//! ```
//!
//! # Platform Notes
//!
//! - **Linux**: Clicking a popup runs the channel's click handler, which marks
//!   the notification read
//! - **macOS** and **Windows**: Popups are shown, clicks are not reported

use evalboard_core::Property;
use evalboard_core::logging::targets;
use evalboard_net::channels::{
    NotificationPermission, NotifierError, PlatformNotification, PlatformNotifier,
};

/// Error type for notification operations.
#[derive(Debug, thiserror::Error)]
#[error("notification error: {message}")]
pub struct NotificationError {
    message: String,
}

impl NotificationError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<notify_rust::error::Error> for NotificationError {
    fn from(err: notify_rust::error::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Notification urgency level.
///
/// On platforms that don't support urgency, this is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Urgency {
    /// May be displayed less prominently.
    Low,
    /// Standard display.
    #[default]
    Normal,
    /// Displayed prominently, may require acknowledgment.
    Critical,
}

#[cfg(target_os = "linux")]
impl From<Urgency> for notify_rust::Urgency {
    fn from(urgency: Urgency) -> Self {
        match urgency {
            Urgency::Low => notify_rust::Urgency::Low,
            Urgency::Normal => notify_rust::Urgency::Normal,
            Urgency::Critical => notify_rust::Urgency::Critical,
        }
    }
}

/// How long a popup stays on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
    /// Use the notification server's default.
    #[default]
    Default,
    /// Never auto-dismiss.
    Never,
    /// Dismiss after the specified number of milliseconds.
    Milliseconds(u32),
}

impl From<Timeout> for notify_rust::Timeout {
    fn from(timeout: Timeout) -> Self {
        match timeout {
            Timeout::Default => notify_rust::Timeout::Default,
            Timeout::Never => notify_rust::Timeout::Never,
            Timeout::Milliseconds(ms) => notify_rust::Timeout::Milliseconds(ms),
        }
    }
}

/// A [`PlatformNotifier`] backed by the desktop notification service.
///
/// Desktops have no consent prompt, so an undecided permission becomes
/// [`Granted`](NotificationPermission::Granted) on the first
/// [`request_permission`](PlatformNotifier::request_permission). Use
/// [`set_permission`](Self::set_permission) to honor a user's opt-out.
#[derive(Debug)]
pub struct DesktopNotifier {
    app_name: String,
    icon: Option<String>,
    timeout: Timeout,
    #[cfg_attr(not(target_os = "linux"), allow(dead_code))] // Only Linux has urgency levels
    urgency: Urgency,
    permission: Property<NotificationPermission>,
}

impl DesktopNotifier {
    /// Create a notifier that labels its popups with `app_name`.
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            icon: None,
            timeout: Timeout::Default,
            urgency: Urgency::Normal,
            permission: Property::new(NotificationPermission::Default),
        }
    }

    /// Set the popup icon: an icon-theme name or an image path.
    pub fn icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    /// Set the popup timeout.
    pub fn timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the popup urgency.
    pub fn urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }

    /// Replace the permission, e.g. from a stored user preference.
    /// Returns `true` if it changed.
    pub fn set_permission(&self, permission: NotificationPermission) -> bool {
        self.permission.set(permission)
    }

    fn build_notification(
        &self,
        popup: &PlatformNotification,
    ) -> Result<notify_rust::Notification, NotificationError> {
        if popup.title.is_empty() {
            return Err(NotificationError::new("notification title is required"));
        }

        let mut notification = notify_rust::Notification::new();
        notification
            .summary(&popup.title)
            .body(&popup.body)
            .appname(&self.app_name)
            .timeout(notify_rust::Timeout::from(self.timeout));

        if let Some(ref icon) = self.icon {
            notification.icon(icon);
        }

        // Urgency and click actions are only supported on Linux
        #[cfg(target_os = "linux")]
        {
            notification.urgency(self.urgency.into());
            notification.action("default", "Open");
        }

        Ok(notification)
    }
}

impl PlatformNotifier for DesktopNotifier {
    fn permission(&self) -> NotificationPermission {
        self.permission.get()
    }

    fn request_permission(&self) -> NotificationPermission {
        if self.permission.get() == NotificationPermission::Default {
            self.permission.set(NotificationPermission::Granted);
        }
        self.permission.get()
    }

    fn show(
        &self,
        popup: &PlatformNotification,
        on_click: Box<dyn FnOnce() + Send>,
    ) -> Result<(), NotifierError> {
        if self.permission.get() != NotificationPermission::Granted {
            return Err(NotificationError::new("notification permission not granted").into());
        }
        let notification = self.build_notification(popup)?;
        tracing::debug!(target: targets::PLATFORM, tag = %popup.tag, "showing notification");
        display(notification, on_click)?;
        Ok(())
    }
}

/// Show the popup on a dedicated thread that then blocks until the user
/// clicks or dismisses it. The show result is reported back before waiting.
#[cfg(target_os = "linux")]
fn display(
    notification: notify_rust::Notification,
    on_click: Box<dyn FnOnce() + Send>,
) -> Result<(), NotificationError> {
    let (shown_tx, shown_rx) = std::sync::mpsc::channel();
    std::thread::Builder::new()
        .name("evalboard-notification".into())
        .spawn(move || match notification.show() {
            Ok(handle) => {
                let _ = shown_tx.send(Ok(()));
                handle.wait_for_action(|action| {
                    if action == "default" {
                        on_click();
                    }
                });
            }
            Err(err) => {
                let _ = shown_tx.send(Err(NotificationError::from(err)));
            }
        })
        .map_err(|err| NotificationError::new(err.to_string()))?;

    shown_rx
        .recv()
        .map_err(|_| NotificationError::new("notification thread exited"))?
}

#[cfg(not(target_os = "linux"))]
fn display(
    notification: notify_rust::Notification,
    _on_click: Box<dyn FnOnce() + Send>,
) -> Result<(), NotificationError> {
    notification.show()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn popup(title: &str) -> PlatformNotification {
        PlatformNotification {
            title: title.to_string(),
            body: "Midterm results are available".to_string(),
            tag: "notification-7".to_string(),
        }
    }

    #[test]
    fn test_notifier_defaults() {
        let notifier = DesktopNotifier::new("Evalboard");
        assert_eq!(notifier.app_name, "Evalboard");
        assert!(notifier.icon.is_none());
        assert_eq!(notifier.timeout, Timeout::Default);
        assert_eq!(notifier.urgency, Urgency::Normal);
        assert_eq!(notifier.permission(), NotificationPermission::Default);
    }

    #[test]
    fn test_notifier_builder_chain() {
        let notifier = DesktopNotifier::new("Evalboard")
            .icon("dialog-information")
            .timeout(Timeout::Milliseconds(5000))
            .urgency(Urgency::Critical);

        assert_eq!(notifier.icon.as_deref(), Some("dialog-information"));
        assert_eq!(notifier.timeout, Timeout::Milliseconds(5000));
        assert_eq!(notifier.urgency, Urgency::Critical);
    }

    #[test]
    fn test_request_permission_grants_when_undecided() {
        let notifier = DesktopNotifier::new("Evalboard");
        assert_eq!(notifier.request_permission(), NotificationPermission::Granted);
        assert_eq!(notifier.permission(), NotificationPermission::Granted);
    }

    #[test]
    fn test_opt_out_is_kept() {
        let notifier = DesktopNotifier::new("Evalboard");
        assert!(notifier.set_permission(NotificationPermission::Denied));
        assert!(!notifier.set_permission(NotificationPermission::Denied));
        assert_eq!(notifier.request_permission(), NotificationPermission::Denied);
    }

    #[test]
    fn test_show_requires_permission() {
        let notifier = DesktopNotifier::new("Evalboard");
        let err = notifier.show(&popup("Grades posted"), Box::new(|| {})).unwrap_err();
        assert!(err.to_string().contains("permission not granted"));
    }

    #[test]
    fn test_empty_title_error() {
        let notifier = DesktopNotifier::new("Evalboard");
        let err = notifier.build_notification(&popup("")).unwrap_err();
        assert_eq!(err.to_string(), "notification error: notification title is required");
    }

    #[test]
    fn test_build_notification() {
        let notifier = DesktopNotifier::new("Evalboard");
        assert!(notifier.build_notification(&popup("Grades posted")).is_ok());
    }

    #[test]
    fn test_timeout_conversion() {
        let timeout: notify_rust::Timeout = Timeout::Default.into();
        assert!(matches!(timeout, notify_rust::Timeout::Default));

        let timeout: notify_rust::Timeout = Timeout::Never.into();
        assert!(matches!(timeout, notify_rust::Timeout::Never));

        let timeout: notify_rust::Timeout = Timeout::Milliseconds(5000).into();
        assert!(matches!(timeout, notify_rust::Timeout::Milliseconds(5000)));
    }
}
