//! Networking module for Evalboard.
//!
//! This crate provides the realtime and request layers of the dashboard:
//!
//! - **WebSocket**: Reconnecting, token-authenticated connections with a JSON heartbeat
//! - **Channels**: Notifications, AI assistant queries and dashboard update flags
//! - **HTTP Client**: The backend REST client with POST de-duplication
//! - **Configuration**: Layered connection settings shared by every connection
//!
//! # Realtime channels
//!
//! Every connection reads its settings from a [`SharedConfig`](config::SharedConfig)
//! and its credentials from a [`Session`](session::Session). Both live in a
//! [`RealtimeContext`](websocket::RealtimeContext) that is passed to each
//! channel:
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use evalboard_net::channels::{NotificationChannel, NullNotifier};
//! use evalboard_net::config::SharedConfig;
//! use evalboard_net::http::{ApiClient, NotificationsApi, RemoteNotificationStore};
//! use evalboard_net::session::Session;
//! use evalboard_net::websocket::RealtimeContext;
//!
//! let session = Session::new();
//! session.login(token, user_id);
//!
//! let config = SharedConfig::default();
//! config.auto_configure(Some("https://dashboard.example.com/api/v1"));
//! let context = RealtimeContext::new(config, session.clone());
//!
//! let client = ApiClient::builder("https://dashboard.example.com/api/v1", session).build()?;
//! let store = Arc::new(RemoteNotificationStore::new(NotificationsApi::new(client)));
//!
//! let notifications = NotificationChannel::new(&context, store, Arc::new(NullNotifier));
//! notifications.notification_received().connect(|n| println!("{}", n.title));
//! notifications.initialize();
//! ```
//!
//! # HTTP Client
//!
//! ```ignore
//! use evalboard_net::http::ApiClient;
//!
//! let client = ApiClient::builder(api_url, session).build()?;
//! let unread: serde_json::Value = client
//!     .get("/notifications/unread-count")
//!     .json_response()
//!     .await?;
//! ```

pub mod channels;
pub mod config;
mod error;
pub mod http;
pub mod session;
pub mod status;
pub mod websocket;

pub use error::{NetworkError, Result};

// Re-export commonly used types at the crate root
pub use config::{ConnectionConfig, ConnectionConfigPatch, SharedConfig};
pub use http::{ApiClient, ApiClientBuilder, ApiRequest, ApiResponse, Envelope, RequestDeduplicator};
pub use session::Session;
pub use websocket::{ConnectionManager, ConnectionState, RealtimeContext};
