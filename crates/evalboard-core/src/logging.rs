//! Logging facilities for Evalboard.
//!
//! Evalboard uses the `tracing` crate for instrumentation and never installs a
//! subscriber itself. To see logs, install one in your application:
//!
//! ```ignore
//! fn main() {
//!     tracing_subscriber::fmt()
//!         .with_env_filter("evalboard_net::websocket=debug")
//!         .init();
//! }
//! ```

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Core crate target.
    pub const CORE: &str = "evalboard_core";
    /// Signal/slot system target.
    pub const SIGNAL: &str = "evalboard_core::signal";
    /// Property system target.
    pub const PROPERTY: &str = "evalboard_core::property";
    /// WebSocket connection manager target.
    pub const WEBSOCKET: &str = "evalboard_net::websocket";
    /// Feature channel target.
    pub const CHANNEL: &str = "evalboard_net::channel";
    /// HTTP client target.
    pub const HTTP: &str = "evalboard_net::http";
    /// Request deduplicator target.
    pub const DEDUP: &str = "evalboard_net::dedup";
    /// Configuration target.
    pub const CONFIG: &str = "evalboard_net::config";
    /// Realtime hub target.
    pub const REALTIME: &str = "evalboard::realtime";
    /// Desktop integration target.
    pub const PLATFORM: &str = "evalboard::platform";
}

#[cfg(test)]
mod tests {
    use super::targets;

    #[test]
    fn test_targets_are_prefixed_by_crate() {
        for target in [targets::SIGNAL, targets::PROPERTY] {
            assert!(target.starts_with(targets::CORE));
        }
        for target in [
            targets::WEBSOCKET,
            targets::CHANNEL,
            targets::HTTP,
            targets::DEDUP,
            targets::CONFIG,
        ] {
            assert!(target.starts_with("evalboard_net::"));
        }
        for target in [targets::REALTIME, targets::PLATFORM] {
            assert!(target.starts_with("evalboard::"));
        }
    }
}
