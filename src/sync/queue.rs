//! Durable queue of mutations waiting for connectivity.
//!
//! Every change persists the whole queue under [`UPLOAD_QUEUE_KEY`], so the
//! stored snapshot always matches memory. Replay is strictly FIFO: later
//! requests for the same entity must not overtake earlier ones.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use super::UPLOAD_QUEUE_KEY;
use crate::api::{ApiGateway, Method};
use crate::error::{Error, Result};
use crate::storage::CacheStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRequest {
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    pub method: Method,
    #[serde(default)]
    pub body: Value,
    /// Last replay failure; the request stays queued while this is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueuedRequest {
    pub fn new(method: Method, resource: impl Into<String>, resource_id: Option<String>, body: Value) -> Self {
        Self {
            resource: resource.into(),
            resource_id,
            method,
            body,
            error: None,
        }
    }

    pub fn post(resource: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, resource, None, body)
    }

    pub fn put(resource: impl Into<String>, id: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, resource, Some(id.into()), body)
    }

    pub fn patch(resource: impl Into<String>, id: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Patch, resource, Some(id.into()), body)
    }

    /// Body to send on the wire. A `null` body is sent as no body.
    pub fn body(&self) -> Option<Value> {
        (!self.body.is_null()).then(|| self.body.clone())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: u64,
    pub failed: usize,
}

pub struct UploadQueue {
    store: Arc<dyn CacheStore>,
    enabled: bool,
    requests: Mutex<Vec<QueuedRequest>>,
}

impl UploadQueue {
    /// Restore the queue persisted in `store`.
    pub async fn load(store: Arc<dyn CacheStore>, enabled: bool) -> Result<Self> {
        let requests = match store.get(UPLOAD_QUEUE_KEY).await? {
            None | Some(Value::Null) => Vec::new(),
            Some(snapshot) => serde_json::from_value(snapshot)?,
        };
        if !requests.is_empty() {
            log::info!("Restored {} queued requests", requests.len());
        }
        Ok(Self {
            store,
            enabled,
            requests: Mutex::new(requests),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn requests(&self) -> Vec<QueuedRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.requests.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn enqueue(&self, request: QueuedRequest) -> Result<()> {
        if !self.enabled {
            return Err(Error::Config("upload queue is disabled".into()));
        }
        if !request.method.is_queueable() {
            return Err(Error::InvalidRequest(format!(
                "{} requests cannot be queued",
                request.method
            )));
        }

        let mut requests = self.requests.lock().await;
        let mut next = requests.clone();
        log::debug!(
            "Queueing {} {}{}",
            request.method,
            request.resource,
            request
                .resource_id
                .as_deref()
                .map(|id| format!("/{id}"))
                .unwrap_or_default()
        );
        next.push(request);
        self.persist(&next).await?;
        *requests = next;
        Ok(())
    }

    /// Abandon a request (the first one equal to `request`).
    pub async fn delete_request(&self, request: &QueuedRequest) -> Result<bool> {
        let mut requests = self.requests.lock().await;
        let Some(index) = requests.iter().position(|r| r == request) else {
            return Ok(false);
        };
        let mut next = requests.clone();
        next.remove(index);
        self.persist(&next).await?;
        *requests = next;
        Ok(true)
    }

    /// Replay every queued request in insertion order.
    ///
    /// Successful requests leave the queue; failed ones stay with their
    /// `error` set. Fails with [`Error::UploadPending`] if anything is left.
    pub async fn flush(&self, gateway: &ApiGateway) -> Result<FlushReport> {
        let mut requests = self.requests.lock().await;
        if !self.enabled || requests.is_empty() {
            return Ok(FlushReport::default());
        }

        let mut report = FlushReport::default();
        for request in requests.iter_mut() {
            let result = gateway
                .send(
                    request.method,
                    &request.resource,
                    request.resource_id.as_deref(),
                    request.body(),
                )
                .await;
            match result {
                Ok(_) => {
                    request.error = None;
                    report.sent += 1;
                }
                Err(e) => {
                    log::warn!(
                        "Queued {} {} failed: {e}",
                        request.method,
                        request.resource
                    );
                    request.error = Some(e.to_string());
                }
            }
        }

        requests.retain(|r| r.error.is_some());
        report.failed = requests.len();
        self.persist(&requests).await?;

        if report.failed > 0 {
            return Err(Error::UploadPending {
                sent: report.sent,
                pending: report.failed,
            });
        }
        Ok(report)
    }

    /// Write the in-memory queue back to the store (after the store was cleared).
    pub async fn persist_snapshot(&self) -> Result<()> {
        let requests = self.requests.lock().await;
        self.persist(&requests).await
    }

    async fn persist(&self, requests: &[QueuedRequest]) -> Result<()> {
        let snapshot = serde_json::to_value(requests)?;
        self.store.set(UPLOAD_QUEUE_KEY, &snapshot).await
    }
}
