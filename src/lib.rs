pub mod api;
pub mod config;
pub mod date_util;
pub mod error;
pub mod network;
pub mod storage;
pub mod sync;
pub mod url;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiGateway, ApiRequest, CacheMode, GetOptions, HttpTransport, Method, Transport};
pub use config::Config;
pub use error::{Error, Result};
pub use network::{NetworkMonitor, Subscription};
pub use storage::{CacheStore, Database, MemoryStore};
pub use sync::queue::{QueuedRequest, UploadQueue};
pub use sync::resource::{CacheableResource, JsonResource, ResourceRegistry, ResourceSpec};
pub use sync::syncer::Synchronizer;
pub use sync::{SyncOptions, SyncReport, SyncState, SyncStatus};

use std::sync::Arc;

use serde_json::Value;

use crate::url::scoped_path;

/// Main entry point: cached reads, queued writes and synchronization over
/// one backend and one cache store.
///
/// Resource paths given to this type are relative to the configured team
/// scope, so `customers` means `teams/{team}/customers` when a team is set.
pub struct OfflineClient {
    config: Config,
    network: NetworkMonitor,
    gateway: Arc<ApiGateway>,
    synchronizer: Arc<Synchronizer>,
}

impl OfflineClient {
    /// Wire up the engine. The network is assumed online until
    /// [`check_network`](Self::check_network) says otherwise.
    pub async fn new(
        store: Arc<dyn CacheStore>,
        transport: Arc<dyn Transport>,
        config: Config,
    ) -> Result<Self> {
        let network = NetworkMonitor::new(Arc::clone(&transport), true);
        let gateway = Arc::new(ApiGateway::new(
            config.api_base.clone(),
            transport,
            Arc::clone(&store),
            network.clone(),
        ));
        let registry = ResourceRegistry::from_specs(
            &config.api_base,
            config.sync.team_id.as_deref(),
            &config.resources,
        );
        let queue = Arc::new(UploadQueue::load(Arc::clone(&store), config.sync.upload_queue_enabled).await?);
        let synchronizer = Arc::new(
            Synchronizer::new(
                Arc::clone(&gateway),
                store,
                queue,
                registry,
                config.sync.clone(),
            )
            .await?,
        );

        Ok(Self {
            config,
            network,
            gateway,
            synchronizer,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    pub fn gateway(&self) -> &Arc<ApiGateway> {
        &self.gateway
    }

    pub fn synchronizer(&self) -> &Arc<Synchronizer> {
        &self.synchronizer
    }

    pub fn state(&self) -> SyncState {
        self.synchronizer.state()
    }

    /// Probe the backend and update the online flag.
    pub async fn check_network(&self) -> bool {
        self.network.check().await
    }

    pub async fn get_resource(&self, resource: &str, options: &GetOptions) -> Result<Value> {
        self.gateway.get_resource(&self.scoped(resource), options).await
    }

    /// Send a mutation, queueing it if it cannot reach the backend.
    /// `Ok(None)` means the request was queued.
    pub async fn send(&self, mut request: QueuedRequest) -> Result<Option<Value>> {
        request.resource = self.scoped(&request.resource);
        self.synchronizer.send_or_enqueue(request).await
    }

    /// Queue a mutation for the next sync without trying to send it.
    pub async fn enqueue(&self, mut request: QueuedRequest) -> Result<()> {
        request.resource = self.scoped(&request.resource);
        self.synchronizer.enqueue(request).await
    }

    pub async fn pending_requests(&self) -> Vec<QueuedRequest> {
        self.synchronizer.pending_requests().await
    }

    /// Drop a request as returned by [`pending_requests`](Self::pending_requests).
    pub async fn delete_request(&self, request: &QueuedRequest) -> Result<bool> {
        self.synchronizer.delete_request(request).await
    }

    pub async fn synchronize(&self, manual: bool) -> SyncReport {
        self.synchronizer.synchronize(manual).await
    }

    pub async fn synchronize_if_needed(&self) -> Option<SyncReport> {
        self.synchronizer.synchronize_if_needed().await
    }

    pub async fn force_full_sync(&self) -> Result<SyncReport> {
        self.synchronizer.force_full_sync().await
    }

    /// Resynchronize on reconnect until the returned handle is dropped.
    pub fn watch_network(&self) -> Subscription {
        self.synchronizer.watch_network()
    }

    /// Wait for background cache writes to finish.
    pub async fn settle(&self) {
        self.gateway.settle().await;
    }

    fn scoped(&self, resource: &str) -> String {
        scoped_path(self.config.sync.team_id.as_deref(), resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTransport;
    use serde_json::json;

    const BASE: &str = "https://api.example.com";

    fn config() -> Config {
        let mut config = Config::new(BASE);
        config.resources = vec![ResourceSpec::new("customers").sorted_by("name", false)];
        config.sync.team_id = Some("t1".into());
        config
    }

    #[tokio::test]
    async fn test_delta_feeds_cached_reads() {
        let transport = FakeTransport::new(|req| {
            if req.url.contains("/delta?") {
                Ok(json!({
                    "resources": ["customers"],
                    "records": {"customers": [
                        {"element": {"id": 2, "name": "B"}},
                        {"element": {"id": 1, "name": "A"}}
                    ]}
                }))
            } else {
                Err(Error::Network("offline".into()))
            }
        });
        let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
        let client = OfflineClient::new(store, transport, config()).await.unwrap();

        let report = client.synchronize(false).await;
        assert_eq!(report.status, SyncStatus::Success);

        client.network().set_online(false);
        let list = client
            .get_resource("customers", &GetOptions::new().cache_mode(CacheMode::CacheFirst))
            .await
            .unwrap();
        assert_eq!(list, json!([{"id": 1, "name": "A"}, {"id": 2, "name": "B"}]));

        let one = client
            .get_resource(
                "customers",
                &GetOptions::new().id("2").cache_mode(CacheMode::NetworkFirst),
            )
            .await
            .unwrap();
        assert_eq!(one, json!({"id": 2, "name": "B"}));
    }

    #[tokio::test]
    async fn test_offline_writes_are_scoped_and_queued() {
        let transport = FakeTransport::new(|_| Ok(json!({})));
        let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
        let client = OfflineClient::new(store.clone(), transport.clone(), config())
            .await
            .unwrap();

        client.network().set_online(false);
        let sent = client
            .send(QueuedRequest::patch("customers", "1", json!({"name": "Z"})))
            .await
            .unwrap();
        assert!(sent.is_none());
        assert_eq!(client.state().pending_uploads, 1);

        let queued = client.pending_requests().await;
        assert_eq!(queued[0].resource, "teams/t1/customers");
        assert_eq!(transport.request_count(), 0);

        // A fresh client over the same store picks the queue back up.
        let reopened = OfflineClient::new(store, transport, config()).await.unwrap();
        assert_eq!(reopened.state().pending_uploads, 1);
        assert!(reopened.delete_request(&queued[0]).await.unwrap());
        assert_eq!(reopened.state().pending_uploads, 0);
        assert!(reopened.pending_requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_is_scoped_and_counted() {
        let transport = FakeTransport::new(|_| Ok(json!({})));
        let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
        let client = OfflineClient::new(store, transport.clone(), config()).await.unwrap();

        client
            .enqueue(QueuedRequest::post("customers", json!({"name": "N"})))
            .await
            .unwrap();
        assert_eq!(client.state().pending_uploads, 1);
        assert_eq!(client.pending_requests().await[0].resource, "teams/t1/customers");
        assert_eq!(transport.request_count(), 0);
    }
}
