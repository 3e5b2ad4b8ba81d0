//! Notification list endpoints and a store backed by them.

use std::sync::Arc;

use evalboard_core::logging::targets;
use evalboard_core::{Property, Signal};
use serde_json::Value;

use super::client::ApiClient;
use crate::channels::{Notification, NotificationStore};
use crate::error::Result;

/// One page of notifications.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NotificationPage {
    /// The notifications on this page.
    pub items: Vec<Notification>,
    /// Total across all pages.
    pub total: u64,
}

impl NotificationPage {
    /// Read a list response. Accepts the `{data, meta}` envelope and a bare
    /// array; records without an id are skipped.
    pub fn from_value(body: &Value) -> Self {
        let records = match body {
            Value::Array(records) => records.as_slice(),
            _ => body
                .get("data")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default(),
        };
        let items: Vec<Notification> = records.iter().filter_map(Notification::from_record).collect();

        let total = [
            body.pointer("/meta/count"),
            body.pointer("/meta/pagination/total"),
            body.get("total"),
        ]
        .into_iter()
        .flatten()
        .find_map(Value::as_u64)
        .unwrap_or(items.len() as u64);

        Self { items, total }
    }
}

/// `/notifications` endpoints.
#[derive(Clone, Debug)]
pub struct NotificationsApi {
    client: ApiClient,
}

impl NotificationsApi {
    /// Create the API.
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Fetch one page, 1-based.
    pub async fn list(&self, page: u32, page_size: u32) -> Result<NotificationPage> {
        let body: Value = self
            .client
            .get("/notifications")
            .query("page", page)
            .query("pageSize", page_size)
            .json_response()
            .await?;
        Ok(NotificationPage::from_value(&body))
    }

    /// Mark one notification as read.
    pub async fn mark_as_read(&self, id: i64) -> Result<()> {
        self.client
            .patch(&format!("/notifications/{id}/read"))
            .send()
            .await?;
        Ok(())
    }

    /// Mark every notification as read.
    pub async fn mark_all_as_read(&self) -> Result<()> {
        self.client.patch("/notifications/read-all").send().await?;
        Ok(())
    }

    /// Number of unread notifications.
    pub async fn unread_count(&self) -> Result<u64> {
        let body: Value = self
            .client
            .get("/notifications/unread-count")
            .json_response()
            .await?;
        Ok(body
            .pointer("/data/count")
            .or_else(|| body.get("count"))
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }
}

struct StoreInner {
    api: NotificationsApi,
    page_size: u32,
    notifications: Property<Vec<Notification>>,
    total: Property<u64>,
    changed: Signal<()>,
}

/// A [`NotificationStore`] that keeps the first page of notifications in
/// memory and reloads it from the server.
///
/// The trait methods spawn their requests on the current tokio runtime; call
/// them from within one.
#[derive(Clone)]
pub struct RemoteNotificationStore {
    inner: Arc<StoreInner>,
}

impl RemoteNotificationStore {
    /// Default page size.
    pub const PAGE_SIZE: u32 = 10;

    /// Create an empty store.
    pub fn new(api: NotificationsApi) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                api,
                page_size: Self::PAGE_SIZE,
                notifications: Property::new(Vec::new()),
                total: Property::new(0),
                changed: Signal::new(),
            }),
        }
    }

    /// The loaded notifications.
    pub fn notifications(&self) -> Vec<Notification> {
        self.inner.notifications.get()
    }

    /// Total number of notifications on the server.
    pub fn total(&self) -> u64 {
        self.inner.total.get()
    }

    /// Number of loaded notifications not yet read.
    pub fn unread_count(&self) -> usize {
        self.inner
            .notifications
            .with(|items| items.iter().filter(|n| !n.is_read).count())
    }

    /// Emitted after the list changed.
    pub fn changed(&self) -> &Signal<()> {
        &self.inner.changed
    }

    /// Reload the first page.
    pub async fn reload(&self) -> Result<()> {
        let page = self.inner.api.list(1, self.inner.page_size).await?;
        let changed = self.inner.notifications.set(page.items) | self.inner.total.set(page.total);
        if changed {
            self.inner.changed.emit(());
        }
        Ok(())
    }

    /// Mark a notification read on the server and locally.
    pub async fn mark_read(&self, id: i64) -> Result<()> {
        self.inner.api.mark_as_read(id).await?;
        let mut items = self.inner.notifications.get();
        if let Some(item) = items.iter_mut().find(|n| n.id == id) {
            item.is_read = true;
        }
        if self.inner.notifications.set(items) {
            self.inner.changed.emit(());
        }
        Ok(())
    }

    fn spawn<F>(&self, what: &'static str, task: F)
    where
        F: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = task.await {
                        tracing::warn!(target: targets::HTTP, error = %err, "notification {what} failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(target: targets::HTTP, "notification {what} skipped: no tokio runtime");
            }
        }
    }
}

impl NotificationStore for RemoteNotificationStore {
    fn refresh(&self) {
        let store = self.clone();
        self.spawn("refresh", async move { store.reload().await });
    }

    fn mark_as_read(&self, id: i64) {
        let store = self.clone();
        self.spawn("mark-as-read", async move { store.mark_read(id).await });
    }
}

impl std::fmt::Debug for RemoteNotificationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteNotificationStore")
            .field("loaded", &self.inner.notifications.with(Vec::len))
            .field("total", &self.total())
            .finish()
    }
}
