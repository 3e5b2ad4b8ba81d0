//! REST access to the dashboard backend.
//!
//! [`ApiClient`] wraps `reqwest` with the backend's conventions: bearer
//! tokens from the [`Session`](crate::session::Session), a logout on 401,
//! empty results for a few soft-forbidden paths and the `{data, meta}`
//! response envelope. POSTs to chat endpoints pass through a
//! [`RequestDeduplicator`] so a repeated submission shares one request.
//!
//! # Example
//!
//! ```ignore
//! use evalboard_net::http::{ApiClient, Envelope};
//! use evalboard_net::session::Session;
//!
//! let client = ApiClient::builder("https://dashboard.example.com/api/v1", Session::new()).build()?;
//! let students: Envelope<Vec<serde_json::Value>> = client
//!     .get("/students")
//!     .query("page", 1)
//!     .fetch()
//!     .await?;
//! ```

mod assistant;
mod client;
mod dedup;
mod notifications;
mod request;
mod response;

pub use assistant::{
    ANSWER_TIMEOUT, AssistantApi, ChatMessage, FALLBACK_TIMEOUT, MessageOptions, MessageReply,
};
pub use client::{
    ApiClient, ApiClientBuilder, ApiClientConfig, ApiRequestBuilder, DEFAULT_SOFT_FORBIDDEN,
    DEFAULT_TIMEOUT,
};
pub use dedup::{
    DEFAULT_PATTERNS, DUPLICATE_WINDOW, ENTRY_TTL, RequestDeduplicator, SWEEP_INTERVAL,
    fingerprint,
};
pub use notifications::{NotificationPage, NotificationsApi, RemoteNotificationStore};
pub use request::{ApiRequest, HttpMethod, RequestBody};
pub use response::{ApiResponse, Envelope, Meta, Pagination};
