//! Connection status and close-code taxonomy.

/// Current state of a realtime connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Not connected. A reconnect may still be pending.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Open and exchanging frames.
    Connected,
}

/// Standard WebSocket close codes as defined in RFC 6455.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CloseCode {
    /// Normal closure; the connection successfully completed.
    #[default]
    Normal,
    /// Endpoint is going away (e.g., server shutting down).
    Away,
    /// Protocol error occurred.
    Protocol,
    /// Received data type that cannot be accepted.
    Unsupported,
    /// No status code was provided.
    NoStatus,
    /// Connection was closed abnormally (no close frame received).
    Abnormal,
    /// Received data that was not consistent with the message type.
    Invalid,
    /// Policy violation.
    Policy,
    /// Message too big to process.
    TooBig,
    /// Extension negotiation failed.
    Extension,
    /// Unexpected condition prevented the request from being fulfilled.
    Error,
    /// Server is restarting.
    Restart,
    /// Server is too busy; try again later.
    Again,
    /// TLS handshake failed.
    Tls,
    /// Any other code, including application codes 4000-4999.
    Custom(u16),
}

impl CloseCode {
    /// Convert to the numeric close code.
    pub fn as_u16(&self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::Away => 1001,
            Self::Protocol => 1002,
            Self::Unsupported => 1003,
            Self::NoStatus => 1005,
            Self::Abnormal => 1006,
            Self::Invalid => 1007,
            Self::Policy => 1008,
            Self::TooBig => 1009,
            Self::Extension => 1010,
            Self::Error => 1011,
            Self::Restart => 1012,
            Self::Again => 1013,
            Self::Tls => 1015,
            Self::Custom(code) => *code,
        }
    }

    /// Create from a numeric close code.
    pub fn from_u16(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::Away,
            1002 => Self::Protocol,
            1003 => Self::Unsupported,
            1005 => Self::NoStatus,
            1006 => Self::Abnormal,
            1007 => Self::Invalid,
            1008 => Self::Policy,
            1009 => Self::TooBig,
            1010 => Self::Extension,
            1011 => Self::Error,
            1012 => Self::Restart,
            1013 => Self::Again,
            1015 => Self::Tls,
            code => Self::Custom(code),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Normal => "normal closure",
            Self::Away => "endpoint going away",
            Self::Protocol => "protocol error",
            Self::Unsupported => "unsupported data",
            Self::NoStatus => "no status code",
            Self::Abnormal => "abnormal closure",
            Self::Invalid => "invalid payload data",
            Self::Policy => "policy violation",
            Self::TooBig => "message too big",
            Self::Extension => "extension required",
            Self::Error => "internal server error",
            Self::Restart => "service restarting",
            Self::Again => "service overloaded",
            Self::Tls => "TLS handshake failed",
            Self::Custom(_) => "unknown reason",
        }
    }
}

/// Reason for closing a WebSocket connection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CloseReason {
    /// The close status code.
    pub code: CloseCode,
    /// Optional human-readable reason string.
    pub reason: Option<String>,
}

impl CloseReason {
    /// Create a close reason with just a code.
    pub fn new(code: CloseCode) -> Self {
        Self { code, reason: None }
    }

    /// Create a close reason with a code and message.
    pub fn with_reason(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: Some(reason.into()),
        }
    }

    /// The close sent by [`ConnectionManager::disconnect`](super::ConnectionManager::disconnect).
    pub fn normal() -> Self {
        Self::with_reason(CloseCode::Normal, "normal closure")
    }

    /// Classify this close.
    pub fn category(&self) -> CloseCategory {
        CloseCategory::classify(self.code.as_u16(), self.reason.as_deref())
    }

    /// Human-readable description, e.g. `"policy violation: token expired"`.
    pub fn describe(&self) -> String {
        let label = self.code.label();
        let label = match self.code {
            CloseCode::Custom(code) => format!("{label} ({code})"),
            _ => label.to_string(),
        };
        match self.reason.as_deref() {
            Some(reason) if !reason.is_empty() => format!("{label}: {reason}"),
            _ => label,
        }
    }
}

/// Coarse classification of a close, deciding whether to reconnect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseCategory {
    /// Clean shutdown (1000). Never reconnects.
    Normal,
    /// The peer is going away or restarting (1001, 1012).
    GoingAway,
    /// The peer rejected what was sent (1002, 1003, 1007-1010).
    ProtocolError,
    /// The reason mentions "unauthorized". Terminal until re-login.
    Unauthorized,
    /// The link dropped without a proper close (1005, 1006, 1015), or the
    /// handshake failed.
    AbnormalClosure,
    /// The server failed or is too busy (1011, 1013).
    Overloaded,
    /// Anything else.
    Unknown,
}

impl CloseCategory {
    /// Classify a numeric close code and optional reason.
    ///
    /// An "unauthorized" reason wins over the code.
    pub fn classify(code: u16, reason: Option<&str>) -> Self {
        if reason.is_some_and(|r| r.to_ascii_lowercase().contains("unauthorized")) {
            return Self::Unauthorized;
        }
        match code {
            1000 => Self::Normal,
            1001 | 1012 => Self::GoingAway,
            1002 | 1003 | 1007 | 1008 | 1009 | 1010 => Self::ProtocolError,
            1005 | 1006 | 1015 => Self::AbnormalClosure,
            1011 | 1013 => Self::Overloaded,
            _ => Self::Unknown,
        }
    }

    /// Whether a close in this category schedules a reconnect.
    pub fn reconnects(&self) -> bool {
        !matches!(self, Self::Normal | Self::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_roundtrip_known_codes() {
        for code in [1000, 1001, 1002, 1003, 1005, 1006, 1007, 1008, 1009, 1010, 1011, 1012, 1013, 1015] {
            assert_eq!(CloseCode::from_u16(code).as_u16(), code);
        }
        assert_eq!(CloseCode::from_u16(4001), CloseCode::Custom(4001));
    }

    #[test]
    fn test_normal_close_does_not_reconnect() {
        let category = CloseCategory::classify(1000, Some("normal closure"));
        assert_eq!(category, CloseCategory::Normal);
        assert!(!category.reconnects());
    }

    #[test]
    fn test_unauthorized_reason_is_terminal_for_any_code() {
        for code in [1000, 1008, 4001] {
            let category = CloseCategory::classify(code, Some("Unauthorized: token expired"));
            assert_eq!(category, CloseCategory::Unauthorized);
            assert!(!category.reconnects());
        }
    }

    #[test]
    fn test_unexpected_closes_reconnect() {
        assert_eq!(CloseCategory::classify(1006, None), CloseCategory::AbnormalClosure);
        assert_eq!(CloseCategory::classify(1013, None), CloseCategory::Overloaded);
        assert_eq!(CloseCategory::classify(1002, None), CloseCategory::ProtocolError);
        assert_eq!(CloseCategory::classify(1001, None), CloseCategory::GoingAway);
        assert_eq!(CloseCategory::classify(4500, None), CloseCategory::Unknown);
        for code in [1001, 1002, 1006, 1011, 4500] {
            assert!(CloseCategory::classify(code, None).reconnects());
        }
    }

    #[test]
    fn test_describe() {
        assert_eq!(
            CloseReason::with_reason(CloseCode::Policy, "token expired").describe(),
            "policy violation: token expired"
        );
        assert_eq!(CloseReason::new(CloseCode::Abnormal).describe(), "abnormal closure");
        assert_eq!(
            CloseReason::new(CloseCode::Custom(4400)).describe(),
            "unknown reason (4400)"
        );
    }
}
