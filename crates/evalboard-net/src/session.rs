//! Credentials of the logged-in user.

use std::sync::Arc;

use evalboard_core::{Property, Signal};

#[derive(Default)]
struct SessionInner {
    token: Property<Option<String>>,
    user_id: Property<Option<String>>,
    logged_in_changed: Signal<bool>,
}

/// A cloneable handle to the current user's token and id.
///
/// Connection managers read the credentials when building their URL, and the
/// REST client attaches the token as a bearer header. A 401 from the API calls
/// [`logout`](Self::logout).
#[derive(Clone, Default)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create an anonymous session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store credentials for a logged-in user.
    pub fn login(&self, token: impl Into<String>, user_id: impl Into<String>) {
        let was_logged_in = self.is_logged_in();
        self.inner.token.set(Some(token.into()));
        self.inner.user_id.set(Some(user_id.into()));
        if !was_logged_in {
            self.inner.logged_in_changed.emit(true);
        }
    }

    /// Drop the credentials.
    pub fn logout(&self) {
        let was_logged_in = self.is_logged_in();
        self.inner.token.set(None);
        self.inner.user_id.set(None);
        if was_logged_in {
            self.inner.logged_in_changed.emit(false);
        }
    }

    /// The bearer token, if logged in.
    pub fn token(&self) -> Option<String> {
        self.inner.token.get()
    }

    /// The user id, if logged in.
    pub fn user_id(&self) -> Option<String> {
        self.inner.user_id.get()
    }

    /// Whether a token is present.
    pub fn is_logged_in(&self) -> bool {
        self.inner.token.with(Option::is_some)
    }

    /// Emitted with the new state when the user logs in or out.
    pub fn logged_in_changed(&self) -> &Signal<bool> {
        &self.inner.logged_in_changed
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id())
            .field("logged_in", &self.is_logged_in())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_login_logout_emits_once_per_transition() {
        let session = Session::new();
        let events = Arc::new(Mutex::new(Vec::new()));

        let events_clone = events.clone();
        session.logged_in_changed().connect(move |&state| {
            events_clone.lock().push(state);
        });

        session.login("abc", "42");
        session.login("def", "42");
        session.logout();
        session.logout();

        assert_eq!(*events.lock(), vec![true, false]);
        assert!(session.token().is_none());
    }

    #[test]
    fn test_debug_hides_token() {
        let session = Session::new();
        session.login("secret-token", "7");
        let rendered = format!("{session:?}");
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains('7'));
    }
}
