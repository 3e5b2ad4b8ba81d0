//! JSON wire format of realtime frames.
//!
//! Inbound frames are `{"type": ..., "data": ...}` envelopes. Older servers
//! send flat objects with the payload fields next to `type`; [`Envelope`]
//! accepts both. Outbound frames are modelled by [`OutboundFrame`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::Result;

/// Substrings identifying a server-side datetime serialization failure.
const DATETIME_MARKERS: [&str; 2] = ["datetime is not JSON serializable", "Object of type datetime"];

/// Error code carried by synthesized datetime-failure messages.
pub const DATETIME_SERIALIZATION_ERROR: &str = "datetime_serialization_error";

/// Error code carried by synthesized messages for unparsable frames.
pub const MALFORMED_FRAME_ERROR: &str = "malformed_frame";

/// Known inbound frame types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// Heartbeat request from the server.
    Ping,
    /// Heartbeat reply.
    Pong,
    /// A new notification for the user.
    Notification,
    /// An AI-assistant answer.
    Response,
    /// AI-assistant completion suggestions.
    Suggestions,
    /// A server-side error report.
    Error,
    /// A dashboard data update.
    Update,
    /// Any other type.
    #[serde(other)]
    Unknown,
}

impl FrameKind {
    /// Look up a type name. Unrecognized names map to [`FrameKind::Unknown`].
    pub fn from_name(name: &str) -> Self {
        serde_json::from_value(Value::String(name.to_owned())).unwrap_or(Self::Unknown)
    }
}

/// A normalized inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    /// The frame type.
    pub kind: FrameKind,
    /// The raw `type` string, kept for logging unknown types.
    pub type_name: Option<String>,
    /// The payload. For flat frames this is the whole object minus `type`.
    pub data: Value,
    /// Top-level `message` string, used by error frames.
    pub message: Option<String>,
}

impl Envelope {
    /// Normalize a decoded frame.
    pub fn from_value(value: &Value) -> Self {
        let type_name = value.get("type").and_then(Value::as_str).map(str::to_owned);
        let kind = type_name
            .as_deref()
            .map(FrameKind::from_name)
            .unwrap_or(FrameKind::Unknown);

        let data = match value.get("data") {
            Some(data) if !data.is_null() => data.clone(),
            _ => match value.as_object() {
                Some(object) => {
                    let flat: Map<String, Value> = object
                        .iter()
                        .filter(|(key, _)| key.as_str() != "type")
                        .map(|(key, value)| (key.clone(), value.clone()))
                        .collect();
                    Value::Object(flat)
                }
                None => Value::Null,
            },
        };

        let message = value.get("message").and_then(Value::as_str).map(str::to_owned);

        Self {
            kind,
            type_name,
            data,
            message,
        }
    }

    /// A string field of `data`.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

/// `data` of an outbound query frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueryData {
    /// The user's question.
    pub query_text: String,
    /// Optional page context for the assistant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_data: Option<Value>,
}

/// `data` of an outbound suggestion request.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SuggestData {
    /// Text typed so far.
    pub prefix: String,
}

/// Frames sent to the server.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Heartbeat.
    Ping,
    /// Ask the AI assistant a question.
    Query {
        /// The query payload.
        data: QueryData,
    },
    /// Ask for completion suggestions.
    Suggest {
        /// The suggestion payload.
        data: SuggestData,
    },
    /// Confirm receipt of a notification.
    Ack {
        /// The acknowledged notification.
        notification_id: i64,
    },
}

impl OutboundFrame {
    /// Serialize to the JSON text sent on the wire.
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Outcome of decoding one text frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    /// The frame parsed and is dispatched as-is.
    Message(Value),
    /// The frame was malformed or reported a serialization failure and has
    /// been replaced by a synthetic message.
    Recovered(Value),
}

impl Decoded {
    /// The message to dispatch.
    pub fn into_value(self) -> Value {
        match self {
            Self::Message(value) | Self::Recovered(value) => value,
        }
    }
}

fn has_datetime_marker(text: &str) -> bool {
    DATETIME_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Decode a text frame, rewriting malformed input into a well-formed message.
///
/// - A parsed frame whose `error` string reports a datetime serialization
///   failure becomes an `error` message with code
///   [`DATETIME_SERIALIZATION_ERROR`].
/// - An unparsable frame mentioning the datetime failure becomes a
///   `response` message carrying the same code, so a waiting assistant query
///   completes.
/// - Any other unparsable frame becomes an `error` message with code
///   [`MALFORMED_FRAME_ERROR`].
pub fn decode_text(text: &str) -> Decoded {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => {
            let datetime_error = value
                .get("error")
                .and_then(Value::as_str)
                .filter(|error| error.contains(DATETIME_MARKERS[0]));
            match datetime_error {
                Some(error) => Decoded::Recovered(json!({
                    "type": "error",
                    "data": {
                        "error": DATETIME_SERIALIZATION_ERROR,
                        "response": "The server could not format a date in its reply. Please contact an administrator.",
                        "processing_time": 0,
                        "query_id": null,
                        "details": {
                            "original_error": error,
                            "suggestion": "Check how the backend serializes datetime values",
                        },
                    },
                })),
                None => Decoded::Message(value),
            }
        }
        Err(_) if has_datetime_marker(text) => Decoded::Recovered(json!({
            "type": "response",
            "data": {
                "response": "The full reply could not be shown because of a server date formatting problem. Please contact an administrator.",
                "error": DATETIME_SERIALIZATION_ERROR,
                "query_id": "",
                "processing_time": 0,
                "details": { "original_error": text },
            },
        })),
        Err(parse_error) => Decoded::Recovered(json!({
            "type": "error",
            "message": "Received a malformed message from the server",
            "data": {
                "error": MALFORMED_FRAME_ERROR,
                "details": {
                    "original_error": parse_error.to_string(),
                    "raw": text,
                },
            },
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_kind_from_name() {
        assert_eq!(FrameKind::from_name("notification"), FrameKind::Notification);
        assert_eq!(FrameKind::from_name("suggestions"), FrameKind::Suggestions);
        assert_eq!(FrameKind::from_name("presence"), FrameKind::Unknown);
    }

    #[test]
    fn test_envelope_with_data() {
        let envelope = Envelope::from_value(&json!({
            "type": "update",
            "data": { "update_type": "students" },
        }));
        assert_eq!(envelope.kind, FrameKind::Update);
        assert_eq!(envelope.data_str("update_type"), Some("students"));
    }

    #[test]
    fn test_envelope_flat_legacy_shape() {
        let envelope = Envelope::from_value(&json!({
            "type": "notification",
            "id": 9,
            "title": "Grades posted",
        }));
        assert_eq!(envelope.kind, FrameKind::Notification);
        assert_eq!(envelope.data["id"], 9);
        assert!(envelope.data.get("type").is_none());
    }

    #[test]
    fn test_envelope_without_type() {
        let envelope = Envelope::from_value(&json!({ "hello": "world" }));
        assert_eq!(envelope.kind, FrameKind::Unknown);
        assert!(envelope.type_name.is_none());
    }

    #[test]
    fn test_outbound_frames() {
        assert_eq!(OutboundFrame::Ping.to_text().unwrap(), r#"{"type":"ping"}"#);

        let query = OutboundFrame::Query {
            data: QueryData {
                query_text: "average score?".into(),
                context_data: None,
            },
        };
        assert_eq!(
            serde_json::to_value(&query).unwrap(),
            json!({ "type": "query", "data": { "query_text": "average score?" } })
        );

        let ack = OutboundFrame::Ack { notification_id: 12 };
        assert_eq!(
            serde_json::to_value(&ack).unwrap(),
            json!({ "type": "ack", "notification_id": 12 })
        );
    }

    #[test]
    fn test_valid_frame_passes_through() {
        let decoded = decode_text(r#"{"type":"pong"}"#);
        assert_eq!(decoded, Decoded::Message(json!({ "type": "pong" })));
    }

    #[test]
    fn test_parsed_datetime_error_becomes_error_message() {
        let decoded = decode_text(
            r#"{"error":"Object of type X: datetime is not JSON serializable"}"#,
        );
        let Decoded::Recovered(value) = decoded else {
            panic!("expected a recovered message");
        };
        assert_eq!(value["type"], "error");
        assert_eq!(value["data"]["error"], DATETIME_SERIALIZATION_ERROR);
        assert!(value["data"]["query_id"].is_null());
    }

    #[test]
    fn test_unparsable_datetime_frame_becomes_response() {
        let decoded = decode_text("TypeError: Object of type datetime is not JSON serializable");
        let Decoded::Recovered(value) = decoded else {
            panic!("expected a recovered message");
        };
        assert_eq!(value["type"], "response");
        assert_eq!(value["data"]["query_id"], "");
        assert_eq!(value["data"]["processing_time"], 0);
    }

    #[test]
    fn test_other_garbage_becomes_malformed_error() {
        let value = decode_text("<html>502</html>").into_value();
        assert_eq!(value["type"], "error");
        assert_eq!(value["data"]["error"], MALFORMED_FRAME_ERROR);
        assert_eq!(value["data"]["details"]["raw"], "<html>502</html>");
    }
}
