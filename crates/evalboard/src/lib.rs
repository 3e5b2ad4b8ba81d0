//! Evalboard - realtime channels and REST access for a classroom dashboard.
//!
//! This is the umbrella crate that re-exports all public APIs and wires the
//! realtime channels to the user's session.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use evalboard::prelude::*;
//!
//! let session = Session::new();
//! let config = SharedConfig::default();
//! config.load_env()?;
//! config.auto_configure(Some(api_url));
//!
//! let client = ApiClient::builder(api_url, session.clone()).build()?;
//! let store = Arc::new(RemoteNotificationStore::new(NotificationsApi::new(client.clone())));
//!
//! let realtime = Realtime::new(
//!     RealtimeContext::new(config, session.clone()),
//!     store,
//!     evalboard::platform::default_notifier("Evalboard"),
//! );
//! realtime.start();
//!
//! // Logging in connects every channel, logging out disconnects them.
//! session.login(token, user_id);
//! ```

pub use evalboard_core::*;

/// Networking: connections, channels and the REST client.
pub mod net {
    pub use evalboard_net::*;
}

pub mod platform;
pub mod prelude;
mod realtime;

pub use realtime::Realtime;
