//! Prelude module for Evalboard.
//!
//! ```ignore
//! use evalboard::prelude::*;
//! ```
//!
//! This provides access to:
//! - Signal/slot system (`Signal`, `Property`)
//! - Session and connection configuration
//! - The realtime hub and its channels
//! - The REST client and its response envelope

// ============================================================================
// Signal/Slot and Property System
// ============================================================================

pub use evalboard_core::{ConnectionId, Property, Signal};

// ============================================================================
// Session and Configuration
// ============================================================================

pub use evalboard_net::config::{ConnectionConfig, ConnectionConfigPatch, SharedConfig};
pub use evalboard_net::session::Session;
pub use evalboard_net::status::{StatusBoard, StatusSnapshot};

// ============================================================================
// Realtime
// ============================================================================

pub use crate::Realtime;
pub use evalboard_net::channels::{
    AiAssistantChannel, AiResponse, Notification, NotificationChannel, NotificationStore,
    PlatformNotifier, UpdateKind, UpdatesChannel,
};
pub use evalboard_net::websocket::{ConnectionManager, ConnectionStatus, RealtimeContext};

// ============================================================================
// REST
// ============================================================================

pub use evalboard_net::http::{
    ApiClient, AssistantApi, Envelope, NotificationsApi, RemoteNotificationStore,
};
pub use evalboard_net::{NetworkError, Result};
