//! Conversation messages for the AI assistant.

use std::time::Duration;

use chrono::Utc;
use evalboard_core::logging::targets;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};

use super::client::ApiClient;
use crate::error::{NetworkError, Result};

/// How long to wait for the model's answer.
pub const ANSWER_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout of the fallback submission that does not wait for the answer.
pub const FALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

const EMPTY_CONTENT: &str = "(the system returned empty content)";
const TIMEOUT_CONTENT: &str = "**The AI is taking too long to respond.** Your message was sent, but no \
     reply arrived within 60 seconds. The AI keeps working in the background; refresh the \
     conversation later to see the reply.";

/// Model selection sent with each message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageOptions {
    /// Use the locally hosted model instead of the remote API.
    pub use_local_model: bool,
    /// Local model name.
    pub model_name: String,
    /// Ask the model to think before answering.
    pub use_think_mode: bool,
}

impl Default for MessageOptions {
    fn default() -> Self {
        Self {
            use_local_model: true,
            model_name: "gemma3:27".to_owned(),
            use_think_mode: true,
        }
    }
}

/// One message in a conversation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatMessage {
    /// Server id. Negative for placeholders.
    pub id: i64,
    /// `user` or `assistant`.
    pub role: String,
    /// Message text.
    pub content: String,
    /// Creation time as sent by the server.
    pub timestamp: Option<String>,
    /// Owning conversation.
    pub conversation_id: Option<i64>,
    /// Model time in seconds.
    #[serde(deserialize_with = "lenient_seconds")]
    pub processing_time: Option<f64>,
    /// Set on the placeholder answer produced after a timeout.
    pub is_timeout_message: bool,
}

/// Accepts `12.5`, `"12.5"` or null.
fn lenient_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<f64>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// The reply to a posted message: the stored user message plus, when the
/// server waited, the assistant's answer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageReply {
    /// The stored user message.
    #[serde(flatten)]
    pub user_message: ChatMessage,
    /// The assistant's answer.
    #[serde(default)]
    pub ai_message: Option<ChatMessage>,
    /// The answer is a placeholder because the model took too long.
    #[serde(default)]
    pub is_timeout: bool,
    /// The server failed while waiting for the model.
    #[serde(default)]
    pub has_error: bool,
    /// The server-side failure, if any.
    #[serde(default)]
    pub error: Option<String>,
}

impl MessageReply {
    fn normalized(mut self) -> Self {
        if let Some(answer) = &mut self.ai_message
            && answer.content.trim().is_empty()
        {
            tracing::warn!(target: targets::HTTP, "assistant answer has no content");
            answer.content = EMPTY_CONTENT.to_owned();
        }
        self
    }
}

/// Assistant conversation endpoints.
#[derive(Clone, Debug)]
pub struct AssistantApi {
    client: ApiClient,
    options: MessageOptions,
}

impl AssistantApi {
    /// Create the API with default model options.
    pub fn new(client: ApiClient) -> Self {
        Self::with_options(client, MessageOptions::default())
    }

    /// Create the API with explicit model options.
    pub fn with_options(client: ApiClient, options: MessageOptions) -> Self {
        Self { client, options }
    }

    /// The model options sent with each message.
    pub fn options(&self) -> &MessageOptions {
        &self.options
    }

    /// Replace the model options.
    pub fn set_options(&mut self, options: MessageOptions) {
        self.options = options;
    }

    /// Post a user message and wait for the assistant's answer.
    ///
    /// If the answer does not arrive in time the message is submitted once
    /// more without waiting, and a placeholder answer flagged
    /// `is_timeout_message` is returned. If that submission fails too, the
    /// call fails with [`NetworkError::Timeout`].
    pub async fn send_message(&self, conversation_id: i64, content: &str) -> Result<MessageReply> {
        let request_id = request_id();
        let path = format!("/ai-assistant/conversations/{conversation_id}/messages");

        let waited = self
            .client
            .post(&path)
            .header("X-Request-ID", request_id.as_str())
            .header("X-Timestamp", Utc::now().timestamp_millis().to_string())
            .json(&json!({
                "content": content,
                "role": "user",
                "useLocalModel": self.options.use_local_model,
                "modelName": self.options.model_name,
                "useThinkMode": self.options.use_think_mode,
                "waitForResponse": true,
            }))
            .timeout(ANSWER_TIMEOUT)
            .json_response::<MessageReply>()
            .await;

        match waited {
            Ok(reply) => Ok(reply.normalized()),
            Err(err) if is_timeout(&err) => {
                tracing::info!(target: targets::HTTP, %request_id, "assistant answer timed out, submitting without waiting");
                self.submit_without_waiting(conversation_id, content, &path, &request_id)
                    .await
            }
            Err(err) => Err(err),
        }
    }

    async fn submit_without_waiting(
        &self,
        conversation_id: i64,
        content: &str,
        path: &str,
        request_id: &str,
    ) -> Result<MessageReply> {
        let submitted = self
            .client
            .post(path)
            .header("X-Request-ID", format!("{request_id}-fallback"))
            .header("X-Timestamp", Utc::now().timestamp_millis().to_string())
            .multipart_text("content", content)
            .multipart_text("role", "user")
            .multipart_text("useLocalModel", self.options.use_local_model)
            .multipart_text("modelName", &self.options.model_name)
            .multipart_text("useThinkMode", self.options.use_think_mode)
            .multipart_text("waitForResponse", false)
            .timeout(FALLBACK_TIMEOUT)
            .send()
            .await;

        let response = match submitted {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(target: targets::HTTP, %request_id, error = %err, "fallback submission failed");
                return Err(NetworkError::Timeout);
            }
        };

        let user_message = response.json::<ChatMessage>().unwrap_or_default();
        let now = Utc::now();
        Ok(MessageReply {
            user_message,
            ai_message: Some(ChatMessage {
                id: -now.timestamp_millis(),
                role: "assistant".to_owned(),
                content: TIMEOUT_CONTENT.to_owned(),
                timestamp: Some(now.to_rfc3339()),
                conversation_id: Some(conversation_id),
                processing_time: Some(ANSWER_TIMEOUT.as_secs_f64()),
                is_timeout_message: true,
            }),
            is_timeout: true,
            ..MessageReply::default()
        })
    }
}

fn is_timeout(err: &NetworkError) -> bool {
    err.is_timeout() || matches!(err, NetworkError::HttpStatus { status: 408, .. })
}

/// `{millis}-{13 random alphanumerics}`.
fn request_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(13)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!("{}-{suffix}", Utc::now().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_parsing() {
        let reply: MessageReply = serde_json::from_value(json!({
            "id": 10,
            "role": "user",
            "content": "hi",
            "conversation_id": 4,
            "ai_message": {
                "id": 11,
                "role": "assistant",
                "content": "  ",
                "processing_time": "2.5",
            },
        }))
        .unwrap();
        let reply = reply.normalized();

        assert_eq!(reply.user_message.id, 10);
        assert_eq!(reply.user_message.conversation_id, Some(4));
        let answer = reply.ai_message.unwrap();
        assert_eq!(answer.processing_time, Some(2.5));
        assert_eq!(answer.content, EMPTY_CONTENT);
        assert!(!reply.is_timeout);
    }

    #[test]
    fn test_request_id_shape() {
        let id = request_id();
        let (millis, suffix) = id.split_once('-').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(suffix.len(), 13);
    }

    #[test]
    fn test_timeout_detection() {
        assert!(is_timeout(&NetworkError::Timeout));
        assert!(is_timeout(&NetworkError::HttpStatus {
            status: 408,
            message: None
        }));
        assert!(!is_timeout(&NetworkError::Connection("x".into())));
    }
}
