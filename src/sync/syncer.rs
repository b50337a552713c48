//! Sync orchestration: flush the upload queue, then pull deltas.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;

use super::delta::{DeltaSync, PullOutcome};
use super::queue::{QueuedRequest, UploadQueue};
use super::resource::ResourceRegistry;
use super::{last_sync_at, ResourceState, SyncOptions, SyncReport, SyncState};
use crate::api::ApiGateway;
use crate::date_util::{is_expired, now_millis};
use crate::error::{Error, Result};
use crate::network::Subscription;
use crate::storage::CacheStore;

pub struct Synchronizer {
    gateway: Arc<ApiGateway>,
    store: Arc<dyn CacheStore>,
    queue: Arc<UploadQueue>,
    delta: DeltaSync,
    registry: ResourceRegistry,
    options: SyncOptions,
    state: watch::Sender<SyncState>,
}

impl Synchronizer {
    pub async fn new(
        gateway: Arc<ApiGateway>,
        store: Arc<dyn CacheStore>,
        queue: Arc<UploadQueue>,
        registry: ResourceRegistry,
        options: SyncOptions,
    ) -> Result<Self> {
        let initial = SyncState {
            last_sync_at: last_sync_at(store.as_ref()).await?,
            pending_uploads: queue.len().await,
            resources: registry
                .names()
                .map(|name| (name.to_string(), ResourceState::default()))
                .collect(),
            ..SyncState::default()
        };
        let (state, _) = watch::channel(initial);
        let delta = DeltaSync::new(
            Arc::clone(&gateway),
            Arc::clone(&store),
            registry.clone(),
            options.clone(),
        );

        Ok(Self {
            gateway,
            store,
            queue,
            delta,
            registry,
            options,
            state,
        })
    }

    pub fn gateway(&self) -> &Arc<ApiGateway> {
        &self.gateway
    }

    /// Snapshot of the upload queue, oldest first.
    pub async fn pending_requests(&self) -> Vec<QueuedRequest> {
        self.queue.requests().await
    }

    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Flush the upload queue, then pull and apply deltas.
    ///
    /// A failed upload aborts the download. Returns a `Skipped` report when
    /// no resources are configured or another pass is already running.
    pub async fn synchronize(&self, manual: bool) -> SyncReport {
        if !self.try_begin() {
            return SyncReport::skipped();
        }
        self.run_locked(manual).await
    }

    /// Take the `synchronizing` flag and reset the per-pass error flags.
    fn try_begin(&self) -> bool {
        if self.registry.is_empty() {
            log::debug!("No resources configured, skipping synchronization");
            return false;
        }

        let acquired = self.state.send_if_modified(|state| {
            if state.synchronizing {
                return false;
            }
            state.synchronizing = true;
            state.error_in_last_sync = false;
            state.requires_manual_confirmation = false;
            for resource in state.resources.values_mut() {
                resource.error = false;
            }
            true
        });
        if !acquired {
            log::debug!("Synchronization already in progress");
        }
        acquired
    }

    /// One flush-and-pull pass. The caller holds the flag from
    /// [`try_begin`](Self::try_begin); it is released here.
    async fn run_locked(&self, manual: bool) -> SyncReport {
        log::info!("Synchronizing{}", if manual { " (confirmed)" } else { "" });
        let mut report = SyncReport::skipped();
        let mut requires_confirmation = false;

        match self.queue.flush(&self.gateway).await {
            Ok(flush) => report.uploads_sent = flush.sent,
            Err(e) => {
                if let Error::UploadPending { sent, pending } = &e {
                    report.uploads_sent = *sent;
                    report.uploads_failed = *pending as u64;
                }
                report.error = Some(e.to_string());
            }
        }

        if report.error.is_none() {
            match self.delta.pull(manual).await {
                Ok(pull) => {
                    report.pages = pull.pages;
                    report.records_applied = pull.records_applied;
                    match pull.outcome {
                        PullOutcome::Completed => {}
                        PullOutcome::RequiresConfirmation => requires_confirmation = true,
                        PullOutcome::Failed => {
                            report.error = Some(format!(
                                "failed resources: {}",
                                pull.failed_resources.join(", ")
                            ));
                            report.failed_resources = pull.failed_resources;
                        }
                    }
                }
                Err(e) => report.error = Some(e.to_string()),
            }
        }

        if let Some(e) = &report.error {
            log::warn!("Synchronization failed: {e}");
        }

        let watermark = match last_sync_at(self.store.as_ref()).await {
            Ok(watermark) => Some(watermark),
            Err(e) => {
                log::warn!("Could not read sync watermark: {e}");
                None
            }
        };
        let pending = self.queue.len().await;
        self.state.send_modify(|state| {
            state.synchronizing = false;
            state.error_in_last_sync = report.error.is_some();
            state.requires_manual_confirmation = requires_confirmation;
            state.pending_uploads = pending;
            if let Some(watermark) = watermark {
                state.last_sync_at = watermark;
            }
            for name in &report.failed_resources {
                state.resources.entry(name.clone()).or_default().error = true;
            }
        });

        report.finish(requires_confirmation)
    }

    /// Synchronize only when uploads are pending or the watermark has expired.
    pub async fn synchronize_if_needed(&self) -> Option<SyncReport> {
        let pending = !self.queue.is_empty().await;
        let watermark = match last_sync_at(self.store.as_ref()).await {
            Ok(watermark) => watermark,
            Err(e) => {
                log::warn!("Could not read sync watermark: {e}");
                None
            }
        };

        if pending || is_expired(watermark, now_millis(), self.options.sync_expiration) {
            Some(self.synchronize(false).await)
        } else {
            log::debug!("Cache is fresh, nothing to synchronize");
            None
        }
    }

    /// Drop every cached entry and the watermark, then resync from scratch.
    /// Queued uploads survive and are flushed first.
    pub async fn force_full_sync(&self) -> Result<SyncReport> {
        if !self.try_begin() {
            return Ok(SyncReport::skipped());
        }

        if let Err(e) = self.reset_cache().await {
            log::warn!("Could not clear the local cache: {e}");
            self.state.send_modify(|state| {
                state.synchronizing = false;
                state.error_in_last_sync = true;
            });
            return Err(e);
        }
        self.state.send_modify(|state| state.last_sync_at = None);
        log::info!("Local cache cleared, running full synchronization");

        Ok(self.run_locked(true).await)
    }

    async fn reset_cache(&self) -> Result<()> {
        self.gateway.settle().await;
        self.store.clear().await?;
        self.queue.persist_snapshot().await
    }

    /// Send a mutation now, or queue it when the device is offline or the
    /// network fails. `Ok(None)` means the request was queued.
    pub async fn send_or_enqueue(&self, request: QueuedRequest) -> Result<Option<Value>> {
        let deferrable = self.queue.is_enabled() && request.method.is_queueable();
        if deferrable && self.gateway.network().is_offline() {
            self.enqueue(request).await?;
            return Ok(None);
        }

        let result = self
            .gateway
            .send(
                request.method,
                &request.resource,
                request.resource_id.as_deref(),
                request.body(),
            )
            .await;

        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if deferrable && e.is_transient() => {
                log::info!("{} {} deferred: {e}", request.method, request.resource);
                self.enqueue(request).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Resynchronize whenever the network comes back: a full retry if the
    /// previous pass failed, otherwise only if needed.
    pub fn watch_network(self: &Arc<Self>) -> Subscription {
        let mut rx = self.gateway.network().subscribe();
        let this = Arc::clone(self);
        Subscription::spawn(async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                if !online {
                    continue;
                }
                let retry = this.state.borrow().error_in_last_sync;
                if retry {
                    this.synchronize(false).await;
                } else {
                    this.synchronize_if_needed().await;
                }
            }
        })
    }

    pub async fn enqueue(&self, request: QueuedRequest) -> Result<()> {
        self.queue.enqueue(request).await?;
        self.refresh_pending().await;
        Ok(())
    }

    /// Drop a queued request. Returns `false` if it was not queued.
    pub async fn delete_request(&self, request: &QueuedRequest) -> Result<bool> {
        let removed = self.queue.delete_request(request).await?;
        self.refresh_pending().await;
        Ok(removed)
    }

    async fn refresh_pending(&self) {
        let pending = self.queue.len().await;
        self.state.send_modify(|state| state.pending_uploads = pending);
    }
}
