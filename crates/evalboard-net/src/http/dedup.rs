//! De-duplication of repeated POST requests.
//!
//! A double click on "send" must not post the same chat message twice. The
//! [`RequestDeduplicator`] fingerprints matching requests and lets a repeat
//! within the duplicate window share the first request's outcome instead of
//! going to the network.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use evalboard_core::logging::targets;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::request::{ApiRequest, HttpMethod, RequestBody};
use super::response::ApiResponse;
use crate::error::Result;

/// Paths whose POSTs are de-duplicated by default.
pub const DEFAULT_PATTERNS: [&str; 2] = ["/ai-assistant/conversations", "/messages"];

/// A repeat within this window of the original joins it.
pub const DUPLICATE_WINDOW: Duration = Duration::from_secs(5);

/// Entries older than this are purged by [`RequestDeduplicator::sweep`].
pub const ENTRY_TTL: Duration = Duration::from_secs(10);

/// Period of the background sweeper.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Multipart fields that identify a chat message. File parts and other
/// fields do not contribute to the fingerprint.
const MULTIPART_KEY_FIELDS: [&str; 6] = [
    "content",
    "role",
    "useLocalModel",
    "modelName",
    "useThinkMode",
    "conversation_id",
];

type SharedResponse = Shared<BoxFuture<'static, Result<ApiResponse>>>;

struct PendingEntry {
    id: u64,
    /// Start time while in flight, completion time afterwards.
    timestamp: Instant,
    response: SharedResponse,
}

#[derive(Default)]
struct DedupState {
    entries: HashMap<String, PendingEntry>,
    next_id: u64,
}

struct DedupInner {
    patterns: Vec<String>,
    window: Duration,
    ttl: Duration,
    state: Mutex<DedupState>,
}

/// Shares one network call between identical POSTs.
///
/// Only POSTs whose path contains one of the configured patterns are
/// considered; everything else passes straight through. A request joins an
/// existing entry when that entry was issued, or last completed
/// successfully, less than the duplicate window ago. An older entry is
/// replaced even while still in flight. Failed or cancelled calls are
/// forgotten at once, so a retry goes to the network.
#[derive(Clone)]
pub struct RequestDeduplicator {
    inner: Arc<DedupInner>,
}

impl Default for RequestDeduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_PATTERNS)
    }
}

impl RequestDeduplicator {
    /// Create a deduplicator for the given path patterns.
    pub fn new(patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::with_timing(patterns, DUPLICATE_WINDOW, ENTRY_TTL)
    }

    /// Create a deduplicator with a custom window and TTL.
    pub fn with_timing(
        patterns: impl IntoIterator<Item = impl Into<String>>,
        window: Duration,
        ttl: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(DedupInner {
                patterns: patterns.into_iter().map(Into::into).collect(),
                window,
                ttl,
                state: Mutex::new(DedupState::default()),
            }),
        }
    }

    /// Whether `request` is subject to de-duplication.
    pub fn matches(&self, request: &ApiRequest) -> bool {
        request.method == HttpMethod::Post
            && self
                .inner
                .patterns
                .iter()
                .any(|pattern| request.path.contains(pattern.as_str()))
    }

    /// Number of tracked entries.
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    /// Run `request` through `send`, or join an identical earlier call.
    ///
    /// `send` is only invoked when the request goes to the network.
    pub async fn execute<F>(&self, request: &ApiRequest, send: F) -> Result<ApiResponse>
    where
        F: FnOnce() -> BoxFuture<'static, Result<ApiResponse>>,
    {
        if !self.matches(request) {
            return send().await;
        }

        let key = fingerprint(request);
        let now = Instant::now();
        let (id, response) = {
            let mut state = self.inner.state.lock();
            let joinable = state
                .entries
                .get(&key)
                .filter(|entry| now.duration_since(entry.timestamp) < self.inner.window);
            match joinable {
                Some(entry) => (None, entry.response.clone()),
                None => {
                    state.next_id += 1;
                    let id = state.next_id;
                    let response = send().shared();
                    state.entries.insert(
                        key.clone(),
                        PendingEntry {
                            id,
                            timestamp: now,
                            response: response.clone(),
                        },
                    );
                    (Some(id), response)
                }
            }
        };

        let Some(id) = id else {
            tracing::warn!(
                target: targets::DEDUP,
                method = %request.method,
                path = %request.path,
                "duplicate request joined"
            );
            return response.await;
        };

        let guard = EntryGuard {
            inner: &self.inner,
            key,
            id,
            finished: false,
        };
        let result = response.await;
        guard.finish(result.is_ok());
        result
    }

    /// Drop entries older than the TTL, in flight or not. Returns how many
    /// were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let ttl = self.inner.ttl;
        let mut state = self.inner.state.lock();
        let before = state.entries.len();
        state
            .entries
            .retain(|_, entry| now.duration_since(entry.timestamp) <= ttl);
        let removed = before - state.entries.len();
        if removed > 0 {
            tracing::debug!(
                target: targets::DEDUP,
                removed,
                remaining = state.entries.len(),
                "purged expired request entries"
            );
        }
        removed
    }

    /// Sweep every [`SWEEP_INTERVAL`] on the current tokio runtime.
    ///
    /// The task ends once every handle to this deduplicator is dropped.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let weak: Weak<DedupInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(Instant::now() + SWEEP_INTERVAL, SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                RequestDeduplicator { inner }.sweep();
            }
        })
    }
}

/// Settles the entry created by one [`RequestDeduplicator::execute`] call.
///
/// Dropped unfinished, i.e. when the caller's future is cancelled, it
/// removes the entry so later requests go to the network.
struct EntryGuard<'a> {
    inner: &'a DedupInner,
    key: String,
    id: u64,
    finished: bool,
}

impl EntryGuard<'_> {
    fn finish(mut self, success: bool) {
        self.finished = true;
        let mut state = self.inner.state.lock();
        // A newer request may have replaced the entry.
        if !state.entries.get(&self.key).is_some_and(|entry| entry.id == self.id) {
            return;
        }
        if success {
            if let Some(entry) = state.entries.get_mut(&self.key) {
                entry.timestamp = Instant::now();
            }
            tracing::trace!(target: targets::DEDUP, pending = state.entries.len(), "cached request result");
        } else {
            state.entries.remove(&self.key);
        }
    }
}

impl Drop for EntryGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut state = self.inner.state.lock();
        if state.entries.get(&self.key).is_some_and(|entry| entry.id == self.id) {
            state.entries.remove(&self.key);
            tracing::debug!(target: targets::DEDUP, "request cancelled, entry dropped");
        }
    }
}

impl std::fmt::Debug for RequestDeduplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDeduplicator")
            .field("patterns", &self.inner.patterns)
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// `METHOD-PATH-params-body`, with params and body as JSON.
pub fn fingerprint(request: &ApiRequest) -> String {
    let params = pairs_to_json(request.query.iter());
    let body = match &request.body {
        RequestBody::None => "{}".to_owned(),
        RequestBody::Json(value) => value.to_string(),
        RequestBody::Form(fields) => pairs_to_json(fields.iter()),
        RequestBody::Multipart(fields) => pairs_to_json(
            fields
                .iter()
                .filter(|(name, _)| MULTIPART_KEY_FIELDS.contains(&name.as_str())),
        ),
    };
    format!("{}-{}-{}-{}", request.method, request.path, params, body)
}

fn pairs_to_json<'a>(pairs: impl Iterator<Item = &'a (String, String)>) -> String {
    let map: Map<String, Value> = pairs
        .map(|(key, value)| (key.clone(), Value::String(value.clone())))
        .collect();
    Value::Object(map).to_string()
}
