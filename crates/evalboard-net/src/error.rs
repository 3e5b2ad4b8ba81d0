//! Error types for the networking module.

/// Network-specific errors.
///
/// The type is `Clone` so that a single failed request can be replayed to
/// every caller that was de-duplicated onto it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    /// Missing credentials or a malformed base address.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// Handshake or network failure.
    #[error("Connection error: {0}")]
    Connection(String),
    /// The peer closed the connection with a non-normal close code.
    #[error("Connection closed ({code}): {reason}")]
    ProtocolClose {
        /// The numeric close code.
        code: u16,
        /// Human-readable description of the close.
        reason: String,
    },
    /// Request or connection timed out.
    #[error("Request timed out")]
    Timeout,
    /// A payload could not be serialized or parsed.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// The server refused access to the resource (HTTP 403).
    #[error("Permission denied: {0}")]
    Permission(String),
    /// Credentials are missing or expired (HTTP 401, unauthorized close).
    #[error("Authentication error: {0}")]
    Authentication(String),
    /// Invalid URL provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    /// Invalid header name or value.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
    /// HTTP request failed.
    #[error("HTTP request error: {0}")]
    Request(String),
    /// HTTP error status (4xx or 5xx).
    #[error("HTTP {status}{}", .message.as_ref().map(|m| format!(": {m}")).unwrap_or_default())]
    HttpStatus {
        /// The HTTP status code.
        status: u16,
        /// Optional error message from the response body.
        message: Option<String>,
    },
    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl NetworkError {
    /// Whether the error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else if err.is_decode() {
            Self::Serialization(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

impl From<url::ParseError> for NetworkError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<serde_json::Error> for NetworkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for NetworkError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<figment::Error> for NetworkError {
    fn from(err: figment::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<http::header::InvalidHeaderName> for NetworkError {
    fn from(err: http::header::InvalidHeaderName) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for NetworkError {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for NetworkError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

/// A specialized Result type for network operations.
pub type Result<T> = std::result::Result<T, NetworkError>;
