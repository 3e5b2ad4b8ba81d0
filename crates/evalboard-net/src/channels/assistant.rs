//! The AI-assistant channel.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use evalboard_core::logging::targets;
use evalboard_core::{Property, Signal};
use serde::Serialize;
use serde_json::{Value, json};

use crate::config::ConnectionConfigPatch;
use crate::websocket::{
    ConnectionManager, ConnectionStatus, DATETIME_SERIALIZATION_ERROR, Envelope, FrameKind,
    OutboundFrame, QueryData, RealtimeContext, SuggestData,
};

/// Endpoint path of the AI-assistant channel.
pub const AI_ASSISTANT_ENDPOINT: &str = "/ws/ai-assistant";

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
const RECONNECT_ATTEMPTS: u32 = 3;

const DATETIME_MARKER: &str = "datetime is not JSON serializable";

/// A normalized assistant answer.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AiResponse {
    /// Id of the answered query. Empty when unknown.
    pub query_id: String,
    /// Answer text shown to the user.
    pub response: String,
    /// Server-side processing time in seconds.
    pub processing_time: f64,
    /// Error description, if the answer is a failure.
    pub error: Option<String>,
    /// Extra diagnostic data.
    pub details: Value,
}

impl AiResponse {
    fn from_response(data: &Value) -> Self {
        let mut response = non_empty(data, "response").or_else(|| non_empty(data, "content"));
        let mut error = non_empty(data, "error");

        let datetime_failure = error
            .as_deref()
            .is_some_and(|e| e == DATETIME_SERIALIZATION_ERROR || e.contains(DATETIME_MARKER));
        if response.is_none() && datetime_failure {
            tracing::warn!(target: targets::CHANNEL, "assistant reply hit a datetime serialization error");
            response = Some(
                "The full reply could not be shown because of a server error. Please contact support."
                    .to_owned(),
            );
            error = Some("server response format error (datetime serialization failed)".to_owned());
        }

        Self {
            query_id: non_empty(data, "query_id").unwrap_or_default(),
            response: response.unwrap_or_else(|| "The server returned no valid response".to_owned()),
            processing_time: data.get("processing_time").and_then(Value::as_f64).unwrap_or(0.0),
            error,
            details: data
                .get("details")
                .filter(|details| !details.is_null())
                .cloned()
                .unwrap_or_else(|| json!({})),
        }
    }

    fn from_error(envelope: &Envelope) -> Self {
        let message = envelope
            .message
            .clone()
            .unwrap_or_else(|| "The AI assistant reported an unknown error".to_owned());

        let datetime_failure = envelope.data_str("error") == Some(DATETIME_SERIALIZATION_ERROR)
            || message.contains("datetime");
        if datetime_failure {
            return Self {
                response: "An error occurred while processing the request, please try again later."
                    .to_owned(),
                error: Some("internal server error".to_owned()),
                details: json!({ "original_error": message }),
                ..Self::default()
            };
        }

        Self {
            response: format!("Sorry, the server failed to process the request: {message}"),
            error: Some(message),
            details: match &envelope.data {
                Value::Null => json!({}),
                data => data.clone(),
            },
            ..Self::default()
        }
    }

    fn unrecognized(raw: &Value) -> Self {
        Self {
            response: "Received an unrecognized response format, please try again".to_owned(),
            error: Some("response format error".to_owned()),
            details: json!({ "raw_data": raw }),
            ..Self::default()
        }
    }
}

fn non_empty(data: &Value, key: &str) -> Option<String> {
    data.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

struct ChannelInner {
    manager: ConnectionManager,
    is_processing: Property<bool>,
    latest_response: Property<Option<AiResponse>>,
    latest_suggestions: Property<Vec<String>>,
    response_received: Signal<AiResponse>,
}

/// Question/answer traffic with the AI assistant on [`AI_ASSISTANT_ENDPOINT`].
///
/// At most one query is in flight. The in-flight flag clears when an answer,
/// an error or an unrecognized frame arrives, when sending fails, and when
/// the connection drops.
#[derive(Clone)]
pub struct AiAssistantChannel {
    inner: Arc<ChannelInner>,
}

impl AiAssistantChannel {
    /// Create the channel without connecting.
    pub fn new(context: &RealtimeContext) -> Self {
        let manager = ConnectionManager::new(
            context,
            AI_ASSISTANT_ENDPOINT,
            ConnectionConfigPatch::default()
                .heartbeat_interval(HEARTBEAT_INTERVAL)
                .reconnect_attempts(RECONNECT_ATTEMPTS),
        );
        let inner = Arc::new(ChannelInner {
            manager,
            is_processing: Property::new(false),
            latest_response: Property::new(None),
            latest_suggestions: Property::new(Vec::new()),
            response_received: Signal::new(),
        });

        let weak: Weak<ChannelInner> = Arc::downgrade(&inner);
        inner.manager.signals().message_received.connect(move |message| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_message(message);
            }
        });

        let weak = Arc::downgrade(&inner);
        inner.manager.signals().state_changed.connect(move |status| {
            if *status == ConnectionStatus::Disconnected
                && let Some(inner) = weak.upgrade()
            {
                inner.is_processing.set(false);
            }
        });

        Self { inner }
    }

    /// The underlying connection.
    pub fn manager(&self) -> &ConnectionManager {
        &self.inner.manager
    }

    /// Whether a query is awaiting its answer.
    pub fn is_processing(&self) -> bool {
        self.inner.is_processing.get()
    }

    /// The most recent answer.
    pub fn latest_response(&self) -> Option<AiResponse> {
        self.inner.latest_response.get()
    }

    /// The most recent completion suggestions.
    pub fn latest_suggestions(&self) -> Vec<String> {
        self.inner.latest_suggestions.get()
    }

    /// Emitted for every answer, including synthesized failure answers.
    pub fn response_received(&self) -> &Signal<AiResponse> {
        &self.inner.response_received
    }

    /// Send a question.
    ///
    /// Returns `false` without sending when not connected (recording the
    /// failure as the connection's last error) or while a previous query is
    /// still in flight.
    pub fn send_query(&self, query_text: impl Into<String>, context_data: Option<Value>) -> bool {
        let manager = &self.inner.manager;
        if !manager.is_connected() {
            manager.note_error("WebSocket not connected, cannot send query");
            return false;
        }
        if self.inner.is_processing.replace(true).is_none() {
            tracing::warn!(target: targets::CHANNEL, "a query is already in flight");
            return false;
        }

        let sent = manager.send(&OutboundFrame::Query {
            data: QueryData {
                query_text: query_text.into(),
                context_data,
            },
        });
        if !sent {
            self.inner.is_processing.set(false);
        }
        sent
    }

    /// Ask for completions of `prefix`. Returns `false` when not connected.
    pub fn request_suggestions(&self, prefix: impl Into<String>) -> bool {
        let manager = &self.inner.manager;
        if !manager.is_connected() {
            return false;
        }
        manager.send(&OutboundFrame::Suggest {
            data: SuggestData {
                prefix: prefix.into(),
            },
        })
    }

    /// Forget the last answer and the in-flight flag.
    pub fn clear_response(&self) {
        self.inner.latest_response.set(None);
        self.inner.is_processing.set(false);
    }
}

impl ChannelInner {
    fn handle_message(&self, message: &Value) {
        let envelope = Envelope::from_value(message);
        let response = match envelope.kind {
            FrameKind::Response => AiResponse::from_response(&envelope.data),
            FrameKind::Suggestions => {
                let suggestions = envelope
                    .data
                    .get("suggestions")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_owned)
                            .collect()
                    })
                    .unwrap_or_default();
                self.latest_suggestions.set(suggestions);
                return;
            }
            FrameKind::Error => AiResponse::from_error(&envelope),
            FrameKind::Ping | FrameKind::Pong => return,
            _ => {
                tracing::warn!(
                    target: targets::CHANNEL,
                    kind = envelope.type_name.as_deref().unwrap_or("<none>"),
                    "unrecognized assistant message"
                );
                AiResponse::unrecognized(message)
            }
        };

        self.latest_response.set(Some(response.clone()));
        self.is_processing.set(false);
        self.response_received.emit(response);
    }
}

impl fmt::Debug for AiAssistantChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AiAssistantChannel")
            .field("manager", &self.inner.manager)
            .field("is_processing", &self.inner.is_processing)
            .finish_non_exhaustive()
    }
}
