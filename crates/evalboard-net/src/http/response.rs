//! HTTP response types.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{NetworkError, Result};

/// A fully read HTTP response.
///
/// The body is buffered so the response can be cloned and handed to every
/// caller that shared the request.
#[derive(Clone, Debug)]
pub struct ApiResponse {
    status: u16,
    headers: http::HeaderMap,
    body: Bytes,
}

impl ApiResponse {
    /// Create a response from its parts.
    pub fn new(status: u16, headers: http::HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Read a reqwest response to the end.
    pub(crate) async fn read(response: reqwest::Response) -> Result<Self> {
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(Self::new(status, headers, body))
    }

    /// Get the HTTP status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Check if the response indicates success (2xx status).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Get the response headers.
    pub fn headers(&self) -> &http::HeaderMap {
        &self.headers
    }

    /// Get the raw body.
    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    /// Get the body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parse the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Parse the body as the standard `{data, meta}` envelope.
    pub fn envelope<T: DeserializeOwned>(&self) -> Result<Envelope<T>> {
        self.json()
    }

    /// The error message the server put in the body, if any.
    ///
    /// Reads `detail` or `message` from a JSON body, falling back to the
    /// raw text.
    pub fn error_message(&self) -> Option<String> {
        if let Ok(Value::Object(object)) = serde_json::from_slice::<Value>(&self.body) {
            for key in ["detail", "message"] {
                match object.get(key) {
                    Some(Value::String(message)) => return Some(message.clone()),
                    Some(other) if !other.is_null() => return Some(other.to_string()),
                    _ => {}
                }
            }
        }
        let text = self.text();
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_owned())
    }

    /// Turn a non-2xx status into [`NetworkError::HttpStatus`].
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(NetworkError::HttpStatus {
                status: self.status,
                message: self.error_message(),
            })
        }
    }
}

/// Paging information attached to list responses.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Current page, 1-based.
    pub page: Option<u64>,
    /// Page size.
    pub size: Option<u64>,
    /// Total number of items.
    pub total: Option<u64>,
}

/// Response metadata.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// Paging information.
    pub pagination: Option<Pagination>,
    /// Any other metadata.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The backend's response envelope: `{"data": ..., "meta": {...}}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// The payload.
    pub data: T,
    /// Metadata such as pagination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl<T> Envelope<T> {
    /// Wrap a payload without metadata.
    pub fn new(data: T) -> Self {
        Self { data, meta: None }
    }

    /// The pagination block, if present.
    pub fn pagination(&self) -> Option<&Pagination> {
        self.meta.as_ref()?.pagination.as_ref()
    }
}
