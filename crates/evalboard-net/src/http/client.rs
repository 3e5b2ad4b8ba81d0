//! The backend REST client.

use std::sync::Arc;
use std::time::Duration;

use evalboard_core::Signal;
use evalboard_core::logging::targets;
use futures_util::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::dedup::RequestDeduplicator;
use super::request::{ApiRequest, HttpMethod, RequestBody};
use super::response::{ApiResponse, Envelope};
use crate::error::{NetworkError, Result};
use crate::session::Session;

/// Default request timeout. Generous because assistant calls wait on a model.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Endpoints whose 403 is answered with an empty list instead of an error.
pub const DEFAULT_SOFT_FORBIDDEN: [&str; 2] = ["/quant-item-categories", "/categories/quant-items"];

/// Configuration for the REST client.
#[derive(Clone, Debug)]
pub struct ApiClientConfig {
    /// Request timeout.
    pub timeout: Duration,
    /// Connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Default user agent.
    pub user_agent: Option<String>,
    /// Path fragments whose 403 yields `{"data": []}`.
    pub soft_forbidden: Vec<String>,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: Some(Duration::from_secs(10)),
            user_agent: Some(format!("Evalboard/{} (Rust)", env!("CARGO_PKG_VERSION"))),
            soft_forbidden: DEFAULT_SOFT_FORBIDDEN.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Builder for an [`ApiClient`].
pub struct ApiClientBuilder {
    base_url: String,
    session: Session,
    config: ApiClientConfig,
    default_headers: http::HeaderMap,
    deduplicator: Option<RequestDeduplicator>,
}

impl ApiClientBuilder {
    /// Create a builder for `base_url`, e.g. `https://host/api/v1`.
    pub fn new(base_url: impl Into<String>, session: Session) -> Self {
        Self {
            base_url: base_url.into(),
            session,
            config: ApiClientConfig::default(),
            default_headers: http::HeaderMap::new(),
            deduplicator: None,
        }
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = Some(timeout);
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(user_agent.into());
        self
    }

    /// Replace the list of endpoints whose 403 yields an empty list.
    pub fn soft_forbidden(mut self, paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.config.soft_forbidden = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Add a default header that will be sent with every request.
    pub fn default_header(
        mut self,
        name: impl TryInto<http::HeaderName>,
        value: impl TryInto<http::HeaderValue>,
    ) -> Result<Self> {
        let name = name
            .try_into()
            .map_err(|_| NetworkError::InvalidHeader("Invalid header name".to_string()))?;
        let value = value
            .try_into()
            .map_err(|_| NetworkError::InvalidHeader("Invalid header value".to_string()))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Use a specific deduplicator, e.g. one shared with another client.
    pub fn deduplicator(mut self, deduplicator: RequestDeduplicator) -> Self {
        self.deduplicator = Some(deduplicator);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<ApiClient> {
        let mut builder = reqwest::Client::builder().timeout(self.config.timeout);
        if let Some(connect_timeout) = self.config.connect_timeout {
            builder = builder.connect_timeout(connect_timeout);
        }
        if let Some(ref ua) = self.config.user_agent {
            builder = builder.user_agent(ua);
        }
        let http = builder.default_headers(self.default_headers).build()?;

        // Fail early on an unusable base URL.
        url::Url::parse(&self.base_url)?;
        let base_url = self.base_url.trim_end_matches('/').to_string();

        Ok(ApiClient {
            inner: Arc::new(ApiClientInner {
                http,
                base_url,
                session: self.session,
                config: self.config,
                deduplicator: self.deduplicator.unwrap_or_default(),
                login_required: Signal::new(),
            }),
        })
    }
}

struct ApiClientInner {
    http: reqwest::Client,
    base_url: String,
    session: Session,
    config: ApiClientConfig,
    deduplicator: RequestDeduplicator,
    login_required: Signal<()>,
}

/// Client for the backend's REST API.
///
/// Every request carries the session's bearer token and goes through the
/// [`RequestDeduplicator`]. Responses are checked centrally:
///
/// - 401 logs the session out, emits [`login_required`](Self::login_required)
///   and fails with [`NetworkError::Authentication`].
/// - 403 on a soft endpoint succeeds with `{"data": []}`; any other 403 fails
///   with [`NetworkError::Permission`].
/// - 408 and transport timeouts fail with [`NetworkError::Timeout`].
/// - Any other non-2xx fails with [`NetworkError::HttpStatus`].
///
/// The client is cheaply cloneable. Clones share the connection pool, the
/// deduplicator and the signal.
///
/// # Example
///
/// ```ignore
/// let client = ApiClient::builder("https://host/api/v1", session).build()?;
///
/// let students: Envelope<Vec<Student>> = client.get("/students").query("page", 1).fetch().await?;
/// ```
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ApiClientInner>,
}

impl ApiClient {
    /// Create a builder for configuring a client.
    pub fn builder(base_url: impl Into<String>, session: Session) -> ApiClientBuilder {
        ApiClientBuilder::new(base_url, session)
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// The session providing the bearer token.
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// The deduplicator requests pass through.
    pub fn deduplicator(&self) -> &RequestDeduplicator {
        &self.inner.deduplicator
    }

    /// Emitted after a 401 has logged the session out.
    pub fn login_required(&self) -> &Signal<()> {
        &self.inner.login_required
    }

    /// Create a GET request builder.
    pub fn get(&self, path: &str) -> ApiRequestBuilder {
        self.request(HttpMethod::Get, path)
    }

    /// Create a POST request builder.
    pub fn post(&self, path: &str) -> ApiRequestBuilder {
        self.request(HttpMethod::Post, path)
    }

    /// Create a PUT request builder.
    pub fn put(&self, path: &str) -> ApiRequestBuilder {
        self.request(HttpMethod::Put, path)
    }

    /// Create a DELETE request builder.
    pub fn delete(&self, path: &str) -> ApiRequestBuilder {
        self.request(HttpMethod::Delete, path)
    }

    /// Create a PATCH request builder.
    pub fn patch(&self, path: &str) -> ApiRequestBuilder {
        self.request(HttpMethod::Patch, path)
    }

    /// Create a request builder with a custom method.
    pub fn request(&self, method: HttpMethod, path: &str) -> ApiRequestBuilder {
        ApiRequestBuilder {
            client: self.clone(),
            request: ApiRequest::new(method, path),
        }
    }

    /// Send a prepared request.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        let client = self.clone();
        let send_request = request.clone();
        self.inner
            .deduplicator
            .execute(&request, move || client.dispatch(send_request).boxed())
            .await
    }

    async fn dispatch(self, mut request: ApiRequest) -> Result<ApiResponse> {
        let inner = &self.inner;
        let mut url = url::Url::parse(&format!("{}{}", inner.base_url, request.path))?;
        for (key, value) in &request.query {
            url.query_pairs_mut().append_pair(key, value);
        }

        let mut builder = inner
            .http
            .request(request.method.to_reqwest(), url)
            .headers(request.headers.clone());
        match inner.session.token() {
            Some(token) => builder = builder.bearer_auth(token),
            None => {
                tracing::debug!(target: targets::HTTP, path = %request.path, "request without token");
            }
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let is_login = request.method == HttpMethod::Post && request.path.ends_with("/auth/login");
        builder = match std::mem::take(&mut request.body) {
            RequestBody::None => builder,
            // The token endpoint only accepts form posts.
            RequestBody::Json(Value::Object(fields)) if is_login => {
                let form: Vec<(String, String)> = fields
                    .into_iter()
                    .map(|(key, value)| match value {
                        Value::String(s) => (key, s),
                        other => (key, other.to_string()),
                    })
                    .collect();
                builder.form(&form)
            }
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Form(fields) => builder.form(&fields),
            RequestBody::Multipart(fields) => {
                let form = fields
                    .into_iter()
                    .fold(reqwest::multipart::Form::new(), |form, (name, value)| {
                        form.text(name, value)
                    });
                builder.multipart(form)
            }
        };

        tracing::debug!(target: targets::HTTP, method = %request.method, path = %request.path, "sending request");
        let response = match builder.send().await {
            Ok(response) => ApiResponse::read(response).await?,
            Err(err) => {
                let err = NetworkError::from(err);
                tracing::warn!(target: targets::HTTP, method = %request.method, path = %request.path, error = %err, "request failed");
                return Err(err);
            }
        };
        self.check(&request, response)
    }

    fn check(&self, request: &ApiRequest, response: ApiResponse) -> Result<ApiResponse> {
        if response.is_success() {
            return Ok(response);
        }

        let status = response.status();
        let message = response.error_message();
        tracing::warn!(
            target: targets::HTTP,
            method = %request.method,
            path = %request.path,
            status,
            message = message.as_deref().unwrap_or(""),
            "request rejected"
        );

        match status {
            401 => {
                self.inner.session.logout();
                self.inner.login_required.emit(());
                Err(NetworkError::Authentication(
                    message.unwrap_or_else(|| "login required".to_owned()),
                ))
            }
            403 if self.is_soft_forbidden(&request.path) => {
                tracing::debug!(target: targets::HTTP, path = %request.path, "answering forbidden list with an empty one");
                Ok(ApiResponse::new(
                    status,
                    response.headers().clone(),
                    r#"{"data":[]}"#,
                ))
            }
            403 => Err(NetworkError::Permission(
                message.unwrap_or_else(|| request.path.clone()),
            )),
            408 => Err(NetworkError::Timeout),
            _ => Err(NetworkError::HttpStatus { status, message }),
        }
    }

    fn is_soft_forbidden(&self, path: &str) -> bool {
        self.inner
            .config
            .soft_forbidden
            .iter()
            .any(|pattern| path.contains(pattern.as_str()))
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.base_url)
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Builder for a request sent through an [`ApiClient`].
pub struct ApiRequestBuilder {
    client: ApiClient,
    request: ApiRequest,
}

impl ApiRequestBuilder {
    /// Add a header to the request.
    pub fn header(
        mut self,
        name: impl TryInto<http::HeaderName>,
        value: impl TryInto<http::HeaderValue>,
    ) -> Self {
        self.request = self.request.header(name, value);
        self
    }

    /// Add a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.request = self.request.query(key, value);
        self
    }

    /// Set a JSON body from a serializable value.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Self {
        self.request = self.request.json(body);
        self
    }

    /// Set a URL-encoded form body.
    pub fn form(mut self, fields: impl IntoIterator<Item = (String, String)>) -> Self {
        self.request = self.request.form(fields);
        self
    }

    /// Add a multipart text field.
    pub fn multipart_text(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.request = self.request.multipart_text(name, value);
        self
    }

    /// Set a timeout for this specific request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.request = self.request.timeout(timeout);
        self
    }

    /// Build the request without sending it.
    pub fn build(self) -> ApiRequest {
        self.request
    }

    /// Send the request and return the response.
    pub async fn send(self) -> Result<ApiResponse> {
        self.client.execute(self.request).await
    }

    /// Send the request and parse the body as JSON.
    pub async fn json_response<T: DeserializeOwned>(self) -> Result<T> {
        self.send().await?.json()
    }

    /// Send the request and parse the `{data, meta}` envelope.
    pub async fn fetch<T: DeserializeOwned>(self) -> Result<Envelope<T>> {
        self.send().await?.envelope()
    }
}
