//! The dashboard's realtime channels, kept in step with the session.

use std::sync::Arc;

use evalboard_core::ConnectionId;
use evalboard_core::logging::targets;
use evalboard_net::channels::{
    AiAssistantChannel, NotificationChannel, NotificationStore, PlatformNotifier, UpdatesChannel,
};
use evalboard_net::status::StatusSnapshot;
use evalboard_net::websocket::{ConnectionManager, RealtimeContext};

/// Owns the notification, assistant and updates channels of one user session.
///
/// Logging in connects every channel and logging out disconnects them and
/// clears the shared status board. Dropping the hub disconnects everything
/// and detaches it from the session.
pub struct Realtime {
    context: RealtimeContext,
    notifications: NotificationChannel,
    assistant: AiAssistantChannel,
    updates: UpdatesChannel,
    login_slot: ConnectionId,
}

impl Realtime {
    /// Create the channels. Nothing connects until [`start`](Self::start) or
    /// the next login.
    pub fn new(
        context: RealtimeContext,
        store: Arc<dyn NotificationStore>,
        notifier: Arc<dyn PlatformNotifier>,
    ) -> Self {
        let notifications = NotificationChannel::new(&context, store, notifier);
        let assistant = AiAssistantChannel::new(&context);
        let updates = UpdatesChannel::new(&context);

        let managers = [
            notifications.manager().clone(),
            assistant.manager().clone(),
            updates.manager().clone(),
        ];
        let status = context.status.clone();
        let login_slot = context
            .session
            .logged_in_changed()
            .connect(move |&logged_in| {
                tracing::info!(target: targets::REALTIME, logged_in, "session changed");
                for manager in &managers {
                    manager.reconcile(logged_in);
                }
                if !logged_in {
                    status.reset();
                }
            });

        Self {
            context,
            notifications,
            assistant,
            updates,
            login_slot,
        }
    }

    /// Connect what the current session and config allow, and ask for popup
    /// permission if it is undecided.
    pub fn start(&self) {
        self.notifications.initialize();
        self.sync();
    }

    /// Connect or disconnect every channel to match the session and the
    /// enabled flag, e.g. after a config change.
    pub fn sync(&self) {
        let logged_in = self.context.session.is_logged_in();
        for manager in self.managers() {
            manager.reconcile(logged_in);
        }
    }

    /// Disconnect every channel.
    pub fn stop(&self) {
        for manager in self.managers() {
            manager.disconnect();
        }
    }

    /// The shared context.
    pub fn context(&self) -> &RealtimeContext {
        &self.context
    }

    /// The notification channel.
    pub fn notifications(&self) -> &NotificationChannel {
        &self.notifications
    }

    /// The AI-assistant channel.
    pub fn assistant(&self) -> &AiAssistantChannel {
        &self.assistant
    }

    /// The dashboard updates channel.
    pub fn updates(&self) -> &UpdatesChannel {
        &self.updates
    }

    /// A copy of the shared status board.
    pub fn status(&self) -> StatusSnapshot {
        self.context.status.snapshot()
    }

    fn managers(&self) -> [&ConnectionManager; 3] {
        [
            self.notifications.manager(),
            self.assistant.manager(),
            self.updates.manager(),
        ]
    }
}

impl Drop for Realtime {
    fn drop(&mut self) {
        self.context
            .session
            .logged_in_changed()
            .disconnect(self.login_slot);
        self.stop();
    }
}

impl std::fmt::Debug for Realtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Realtime")
            .field("notifications", &self.notifications)
            .field("assistant", &self.assistant)
            .field("updates", &self.updates)
            .finish()
    }
}
