//! Connection configuration shared by every WebSocket channel.
//!
//! A [`SharedConfig`] is created once by the application and handed to each
//! [`ConnectionManager`](crate::websocket::ConnectionManager). Managers read a
//! snapshot of it at connect time only; changing the config never disturbs a
//! live connection.
//!
//! # Sources
//!
//! Values are layered the usual way:
//!
//! 1. [`ConnectionConfig::default`]
//! 2. `EVALBOARD_WS_*` environment variables ([`SharedConfig::load_env`])
//! 3. The backend's system settings document ([`SharedConfig::load_from_settings`])
//! 4. Runtime patches ([`SharedConfig::update`])
//!
//! # Example
//!
//! ```ignore
//! use evalboard_net::config::{ConnectionConfigPatch, SharedConfig};
//! use std::time::Duration;
//!
//! let config = SharedConfig::default();
//! config.load_env()?;
//! config.update(ConnectionConfigPatch {
//!     heartbeat_interval: Some(Duration::from_secs(45)),
//!     ..Default::default()
//! });
//! ```

use std::sync::Arc;
use std::time::Duration;

use evalboard_core::logging::targets;
use figment::Figment;
use figment::providers::{Env, Serialized};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{NetworkError, Result};

/// Prefix for environment variables read by [`SharedConfig::load_env`].
pub const ENV_PREFIX: &str = "EVALBOARD_WS_";

/// Backoff multiplier applied per reconnect attempt.
pub const BACKOFF_FACTOR: f64 = 1.5;

/// Recognized connection options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Interval between application-level pings. Zero disables the heartbeat.
    #[serde(with = "duration_ms")]
    pub heartbeat_interval: Duration,
    /// Maximum number of automatic reconnect attempts.
    pub reconnect_attempts: u32,
    /// Base delay before a reconnect attempt.
    #[serde(with = "duration_ms")]
    pub reconnect_interval: Duration,
    /// Whether to grow the reconnect delay exponentially.
    pub reconnect_backoff: bool,
    /// Log connection chatter at `debug` instead of `trace`.
    pub debug: bool,
    /// Master switch for realtime connections.
    pub enabled: bool,
    /// WebSocket base address, e.g. `wss://host`.
    pub base_url: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            reconnect_attempts: 10,
            reconnect_interval: Duration::from_secs(5),
            reconnect_backoff: true,
            debug: false,
            enabled: true,
            base_url: None,
        }
    }
}

impl ConnectionConfig {
    /// Return a copy with the patch's fields applied on top.
    pub fn merged(&self, patch: &ConnectionConfigPatch) -> Self {
        let mut config = self.clone();
        config.apply(patch);
        config
    }

    /// Apply the set fields of a patch in place.
    pub fn apply(&mut self, patch: &ConnectionConfigPatch) {
        if let Some(interval) = patch.heartbeat_interval {
            self.heartbeat_interval = interval;
        }
        if let Some(attempts) = patch.reconnect_attempts {
            self.reconnect_attempts = attempts;
        }
        if let Some(interval) = patch.reconnect_interval {
            self.reconnect_interval = interval;
        }
        if let Some(backoff) = patch.reconnect_backoff {
            self.reconnect_backoff = backoff;
        }
        if let Some(debug) = patch.debug {
            self.debug = debug;
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(base_url) = &patch.base_url {
            self.base_url = Some(base_url.clone());
        }
    }

    /// Delay before reconnect attempt number `attempt` (0-indexed).
    ///
    /// With backoff the delay is `reconnect_interval * 1.5^attempt`, otherwise
    /// it is always `reconnect_interval`.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        if !self.reconnect_backoff {
            return self.reconnect_interval;
        }
        let base_ms = self.reconnect_interval.as_millis() as f64;
        let delay_ms = base_ms * BACKOFF_FACTOR.powi(attempt as i32);
        Duration::from_millis(delay_ms.round() as u64)
    }
}

/// A partial update to a [`ConnectionConfig`].
///
/// Also used by feature channels to override options for their endpoint.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionConfigPatch {
    /// Heartbeat interval override.
    pub heartbeat_interval: Option<Duration>,
    /// Reconnect attempt limit override.
    pub reconnect_attempts: Option<u32>,
    /// Base reconnect delay override.
    pub reconnect_interval: Option<Duration>,
    /// Backoff switch override.
    pub reconnect_backoff: Option<bool>,
    /// Debug logging override.
    pub debug: Option<bool>,
    /// Enabled switch override.
    pub enabled: Option<bool>,
    /// Base address override.
    pub base_url: Option<String>,
}

impl ConnectionConfigPatch {
    /// Override the heartbeat interval.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    /// Override the reconnect attempt limit.
    pub fn reconnect_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_attempts = Some(attempts);
        self
    }

    /// Override the base reconnect delay.
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = Some(interval);
        self
    }

    /// Override the base address.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

/// Result of [`check_support`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupportReport {
    /// Whether realtime connections can be used.
    pub supported: bool,
    /// Whether the base address uses `wss://`.
    pub secure: bool,
    /// Whether a base address was configured or derived.
    pub base_url_configured: bool,
    /// Whether the base address has a WebSocket scheme.
    pub base_url_valid: bool,
    /// Why connections are unsupported, if they are.
    pub reason: Option<String>,
}

/// Whether `url` starts with `ws://` or `wss://`.
pub fn is_valid_ws_url(url: &str) -> bool {
    url.starts_with("ws://") || url.starts_with("wss://")
}

/// Derive a WebSocket base address (`{ws|wss}://host[:port]`) from the REST API URL.
///
/// Channel endpoints carry the `/ws/...` prefix themselves.
pub fn derive_ws_base_url(api_url: &str) -> Result<String> {
    let url = url::Url::parse(api_url)?;
    let host = url
        .host_str()
        .ok_or_else(|| NetworkError::InvalidUrl(format!("{api_url} has no host")))?;
    let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
    Ok(match url.port() {
        Some(port) => format!("{scheme}://{host}:{port}"),
        None => format!("{scheme}://{host}"),
    })
}

/// Check whether a base address is usable, deriving one from `api_url` when
/// `base_url` is absent.
pub fn check_support(base_url: Option<&str>, api_url: Option<&str>) -> SupportReport {
    let resolved = match base_url {
        Some(url) if !url.is_empty() => Some(url.to_string()),
        _ => api_url.and_then(|api| derive_ws_base_url(api).ok()),
    };

    let Some(url) = resolved else {
        return SupportReport {
            supported: false,
            secure: false,
            base_url_configured: false,
            base_url_valid: false,
            reason: Some("WebSocket base URL is not configured".into()),
        };
    };

    let valid = is_valid_ws_url(&url);
    SupportReport {
        supported: valid,
        secure: url.starts_with("wss://"),
        base_url_configured: true,
        base_url_valid: valid,
        reason: (!valid).then(|| format!("WebSocket base URL must start with ws:// or wss://: {url}")),
    }
}

/// A cloneable handle to the process-wide connection config.
#[derive(Clone, Debug, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<ConnectionConfig>>,
}

impl SharedConfig {
    /// Create a shared config holding `config`.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Copy out the current config.
    pub fn snapshot(&self) -> ConnectionConfig {
        self.inner.read().clone()
    }

    /// Merge a patch into the current config.
    pub fn update(&self, patch: ConnectionConfigPatch) {
        self.inner.write().apply(&patch);
        tracing::debug!(target: targets::CONFIG, ?patch, "connection config updated");
    }

    /// Enable or disable realtime connections.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.write().enabled = enabled;
    }

    /// Whether realtime connections are enabled.
    pub fn is_enabled(&self) -> bool {
        self.inner.read().enabled
    }

    /// Restore the defaults.
    pub fn reset(&self) {
        *self.inner.write() = ConnectionConfig::default();
    }

    /// Layer `EVALBOARD_WS_*` environment variables over the current values.
    ///
    /// Durations are read in milliseconds, e.g.
    /// `EVALBOARD_WS_HEARTBEAT_INTERVAL=45000`.
    pub fn load_env(&self) -> Result<()> {
        let current = self.snapshot();
        let loaded: ConnectionConfig = Figment::from(Serialized::defaults(current))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()?;
        *self.inner.write() = loaded;
        Ok(())
    }

    /// Apply the backend's system settings document.
    ///
    /// Recognized keys are `websocket_heartbeat_interval` and
    /// `websocket_reconnect_interval` (seconds, defaults 30 and 3),
    /// `websocket_max_reconnect` (default 5) and `enable_websocket`
    /// (default true). Missing or zero values fall back to the defaults.
    pub fn load_from_settings(&self, settings: &Value) {
        let positive = |key: &str| {
            settings
                .get(key)
                .and_then(Value::as_f64)
                .filter(|value| *value > 0.0)
        };

        let heartbeat_secs = positive("websocket_heartbeat_interval").unwrap_or(30.0);
        let attempts = positive("websocket_max_reconnect").unwrap_or(5.0);
        let reconnect_secs = positive("websocket_reconnect_interval").unwrap_or(3.0);
        let enabled = settings
            .get("enable_websocket")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        self.update(ConnectionConfigPatch {
            heartbeat_interval: Some(Duration::from_secs_f64(heartbeat_secs)),
            reconnect_attempts: Some(attempts as u32),
            reconnect_interval: Some(Duration::from_secs_f64(reconnect_secs)),
            enabled: Some(enabled),
            ..Default::default()
        });
    }

    /// Resolve the base address and enable connections only if it is usable.
    ///
    /// An unset base address is derived from `api_url`.
    pub fn auto_configure(&self, api_url: Option<&str>) -> SupportReport {
        let mut config = self.inner.write();
        let report = check_support(config.base_url.as_deref(), api_url);
        if config.base_url.is_none() && report.base_url_configured {
            config.base_url = api_url.and_then(|api| derive_ws_base_url(api).ok());
        }
        config.enabled = report.supported;
        if let Some(reason) = &report.reason {
            tracing::warn!(target: targets::CONFIG, reason = %reason, "realtime connections disabled");
        }
        report
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_millis(30_000));
        assert_eq!(config.reconnect_attempts, 10);
        assert_eq!(config.reconnect_interval, Duration::from_millis(5_000));
        assert!(config.reconnect_backoff);
        assert!(config.enabled);
        assert!(config.base_url.is_none());
    }

    #[test]
    fn test_backoff_delays() {
        let config = ConnectionConfig {
            reconnect_interval: Duration::from_millis(1000),
            ..Default::default()
        };
        assert_eq!(config.reconnect_delay(0), Duration::from_millis(1000));
        assert_eq!(config.reconnect_delay(1), Duration::from_millis(1500));
        assert_eq!(config.reconnect_delay(2), Duration::from_millis(2250));
    }

    #[test]
    fn test_fixed_delay_without_backoff() {
        let config = ConnectionConfig {
            reconnect_interval: Duration::from_millis(800),
            reconnect_backoff: false,
            ..Default::default()
        };
        assert_eq!(config.reconnect_delay(5), Duration::from_millis(800));
    }

    #[test]
    fn test_patch_merges_only_set_fields() {
        let base = ConnectionConfig::default();
        let merged = base.merged(
            &ConnectionConfigPatch::default()
                .heartbeat_interval(Duration::from_secs(60))
                .reconnect_attempts(3),
        );
        assert_eq!(merged.heartbeat_interval, Duration::from_secs(60));
        assert_eq!(merged.reconnect_attempts, 3);
        assert_eq!(merged.reconnect_interval, base.reconnect_interval);
    }

    #[test]
    fn test_load_from_settings() {
        let config = SharedConfig::default();
        config.load_from_settings(&json!({
            "websocket_heartbeat_interval": 20,
            "websocket_max_reconnect": 0,
            "enable_websocket": false,
        }));

        let snapshot = config.snapshot();
        assert_eq!(snapshot.heartbeat_interval, Duration::from_secs(20));
        assert_eq!(snapshot.reconnect_attempts, 5);
        assert_eq!(snapshot.reconnect_interval, Duration::from_secs(3));
        assert!(!snapshot.enabled);
    }

    #[test]
    fn test_reset_restores_defaults() {
        let config = SharedConfig::default();
        config.set_enabled(false);
        config.reset();
        assert_eq!(config.snapshot(), ConnectionConfig::default());
    }

    #[test]
    fn test_load_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("EVALBOARD_WS_RECONNECT_ATTEMPTS", "4");
            jail.set_env("EVALBOARD_WS_HEARTBEAT_INTERVAL", "45000");
            jail.set_env("EVALBOARD_WS_BASE_URL", "wss://school.example");

            let config = SharedConfig::default();
            config.load_env().expect("env should load");

            let snapshot = config.snapshot();
            assert_eq!(snapshot.reconnect_attempts, 4);
            assert_eq!(snapshot.heartbeat_interval, Duration::from_secs(45));
            assert_eq!(snapshot.base_url.as_deref(), Some("wss://school.example"));
            Ok(())
        });
    }

    #[test]
    fn test_derive_ws_base_url() {
        assert_eq!(
            derive_ws_base_url("https://school.example/api/v1").unwrap(),
            "wss://school.example"
        );
        assert_eq!(
            derive_ws_base_url("http://localhost:8000/api/v1").unwrap(),
            "ws://localhost:8000"
        );
        assert!(derive_ws_base_url("not a url").is_err());
    }

    #[test]
    fn test_check_support() {
        let report = check_support(Some("http://host"), None);
        assert!(!report.supported);
        assert!(report.base_url_configured);
        assert!(!report.base_url_valid);

        let report = check_support(None, Some("https://host/api"));
        assert!(report.supported);
        assert!(report.secure);

        let report = check_support(None, None);
        assert!(!report.base_url_configured);
    }

    #[test]
    fn test_auto_configure_derives_base_url() {
        let config = SharedConfig::default();
        let report = config.auto_configure(Some("http://localhost:8000/api/v1"));
        assert!(report.supported);
        let snapshot = config.snapshot();
        assert_eq!(snapshot.base_url.as_deref(), Some("ws://localhost:8000"));
        assert!(snapshot.enabled);
    }
}
