//! HTTP request types.

use std::time::Duration;

use evalboard_core::logging::targets;
use serde::Serialize;
use serde_json::Value;

/// HTTP request methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// HTTP GET method.
    Get,
    /// HTTP POST method.
    Post,
    /// HTTP PUT method.
    Put,
    /// HTTP DELETE method.
    Delete,
    /// HTTP PATCH method.
    Patch,
}

impl HttpMethod {
    /// Convert to reqwest method.
    pub(crate) fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Delete => reqwest::Method::DELETE,
            Self::Patch => reqwest::Method::PATCH,
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Put => write!(f, "PUT"),
            Self::Delete => write!(f, "DELETE"),
            Self::Patch => write!(f, "PATCH"),
        }
    }
}

/// The body of an HTTP request.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum RequestBody {
    /// No body.
    #[default]
    None,
    /// JSON body.
    Json(Value),
    /// URL-encoded form data.
    Form(Vec<(String, String)>),
    /// `multipart/form-data` with text fields.
    Multipart(Vec<(String, String)>),
}

/// A request relative to the API base URL.
#[derive(Clone, Debug)]
pub struct ApiRequest {
    /// The HTTP method.
    pub method: HttpMethod,
    /// Path below the base URL, always starting with `/`.
    pub path: String,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// Extra headers.
    pub headers: http::HeaderMap,
    /// Request body.
    pub body: RequestBody,
    /// Timeout override.
    pub timeout: Option<Duration>,
}

impl ApiRequest {
    /// Create a request for `path`.
    ///
    /// A missing leading `/` is added, and a redundant `/api/v1` prefix is
    /// dropped since the base URL already carries it.
    pub fn new(method: HttpMethod, path: impl AsRef<str>) -> Self {
        Self {
            method,
            path: normalize_path(path.as_ref()),
            query: Vec::new(),
            headers: http::HeaderMap::new(),
            body: RequestBody::None,
            timeout: None,
        }
    }

    /// Add a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Add a header. Invalid names or values are ignored.
    pub fn header(
        mut self,
        name: impl TryInto<http::HeaderName>,
        value: impl TryInto<http::HeaderValue>,
    ) -> Self {
        if let (Ok(name), Ok(value)) = (name.try_into(), value.try_into()) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Set a JSON body from a serializable value.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(value) => self.body = RequestBody::Json(value),
            Err(e) => {
                tracing::error!(target: targets::HTTP, "Failed to serialize JSON body: {}", e);
            }
        }
        self
    }

    /// Set a URL-encoded form body.
    pub fn form(mut self, fields: impl IntoIterator<Item = (String, String)>) -> Self {
        self.body = RequestBody::Form(fields.into_iter().collect());
        self
    }

    /// Add a text field to a multipart body, replacing any other body kind.
    pub fn multipart_text(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        let field = (name.into(), value.to_string());
        match &mut self.body {
            RequestBody::Multipart(fields) => fields.push(field),
            body => *body = RequestBody::Multipart(vec![field]),
        }
        self
    }

    /// Set a timeout for this request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

fn normalize_path(path: &str) -> String {
    let path = match path.strip_prefix("/api/v1/") {
        Some(rest) => {
            tracing::warn!(target: targets::HTTP, path, "dropping duplicate /api/v1 prefix");
            rest
        }
        None => path,
    };
    if path.starts_with('/') {
        path.to_owned()
    } else {
        format!("/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_normalization() {
        assert_eq!(ApiRequest::new(HttpMethod::Get, "students").path, "/students");
        assert_eq!(ApiRequest::new(HttpMethod::Get, "/classes").path, "/classes");
        assert_eq!(ApiRequest::new(HttpMethod::Get, "/api/v1/classes").path, "/classes");
    }

    #[test]
    fn test_multipart_fields_accumulate() {
        let request = ApiRequest::new(HttpMethod::Post, "/m")
            .json(&serde_json::json!({ "x": 1 }))
            .multipart_text("content", "hi")
            .multipart_text("waitForResponse", false);
        assert_eq!(
            request.body,
            RequestBody::Multipart(vec![
                ("content".into(), "hi".into()),
                ("waitForResponse".into(), "false".into()),
            ])
        );
    }

    #[test]
    fn test_invalid_header_ignored() {
        let request = ApiRequest::new(HttpMethod::Get, "/x")
            .header("X-Request-ID", "abc")
            .header("bad header", "v");
        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.headers["x-request-id"], "abc");
    }
}
