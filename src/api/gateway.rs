//! Cache-aware access to the REST backend.
//!
//! Reads go through one of the [`CacheMode`] policies; mutations always go
//! straight to the network. Successful cached reads write through to the
//! [`CacheStore`] in the background: the caller already has its value, so a
//! failed cache write is logged and otherwise ignored.

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::task::JoinHandle;

use super::{ApiRequest, Method, Transport};
use crate::error::{Error, Result};
use crate::network::NetworkMonitor;
use crate::storage::CacheStore;
use crate::url::{resource_url, Params};

/// Policy for combining network and cache on a GET.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
    /// Network only; the cache is neither read nor written.
    #[default]
    NoCache,
    /// Network, refreshing the cache; the cache is a fallback for network failures.
    NetworkFirst,
    /// Cache if present (then refresh it in the background), else network.
    CacheFirst,
    /// Cache only; never touches the network.
    CacheOnly,
}

impl FromStr for CacheMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "no-cache" | "none" => Ok(CacheMode::NoCache),
            "network-first" => Ok(CacheMode::NetworkFirst),
            "cache-first" => Ok(CacheMode::CacheFirst),
            "cache-only" => Ok(CacheMode::CacheOnly),
            other => Err(Error::InvalidRequest(format!("unknown cache mode: {other}"))),
        }
    }
}

/// Options for [`ApiGateway::get_resource`].
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    pub resource_id: Option<String>,
    pub params: Params,
    pub cache_mode: CacheMode,
}

impl GetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.resource_id = Some(id.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }
}

pub struct ApiGateway {
    base: String,
    transport: Arc<dyn Transport>,
    store: Arc<dyn CacheStore>,
    network: NetworkMonitor,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl ApiGateway {
    pub fn new(
        base: impl Into<String>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CacheStore>,
        network: NetworkMonitor,
    ) -> Self {
        Self {
            base: base.into(),
            transport,
            store,
            network,
            background: Mutex::new(Vec::new()),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    /// Request URL for a resource; also its cache key.
    pub fn url(&self, resource: &str, id: Option<&str>, params: &Params) -> Result<String> {
        resource_url(&self.base, resource, id, params)
    }

    /// GET a resource (a list when no id is given) under the requested cache mode.
    ///
    /// While the device is offline every caching mode degrades to
    /// [`CacheMode::CacheOnly`]; `NoCache` requests still hit the network and fail there.
    pub async fn get_resource(&self, resource: &str, options: &GetOptions) -> Result<Value> {
        let url = self.url(resource, options.resource_id.as_deref(), &options.params)?;
        let is_list = options.resource_id.is_none();

        let mode = match options.cache_mode {
            CacheMode::NoCache => CacheMode::NoCache,
            _ if self.network.is_offline() => CacheMode::CacheOnly,
            requested => requested,
        };
        log::debug!("GET {url} ({mode:?})");

        match mode {
            CacheMode::NoCache => self.fetch(&url).await,
            CacheMode::NetworkFirst => self.network_first(&url).await,
            CacheMode::CacheFirst => self.cache_first(&url, is_list).await,
            CacheMode::CacheOnly => self
                .read_cache(&url)
                .await?
                .ok_or(Error::CacheMiss(url)),
        }
    }

    pub async fn post_resource(&self, resource: &str, body: Value) -> Result<Value> {
        self.send(Method::Post, resource, None, Some(body)).await
    }

    pub async fn put_resource(&self, resource: &str, id: &str, body: Value) -> Result<Value> {
        self.send(Method::Put, resource, Some(id), Some(body)).await
    }

    pub async fn patch_resource(&self, resource: &str, id: &str, body: Value) -> Result<Value> {
        self.send(Method::Patch, resource, Some(id), Some(body)).await
    }

    pub async fn delete_resource(&self, resource: &str, id: &str) -> Result<Value> {
        self.send(Method::Delete, resource, Some(id), None).await
    }

    /// Uncached request of any method.
    pub async fn send(
        &self,
        method: Method,
        resource: &str,
        id: Option<&str>,
        body: Option<Value>,
    ) -> Result<Value> {
        let url = self.url(resource, id, &Params::new())?;
        self.transport.send(ApiRequest { method, url, body }).await
    }

    /// Wait for all background cache writes and refreshes started so far.
    pub async fn settle(&self) {
        let pending = match self.background.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => Vec::new(),
        };
        for task in pending {
            let _ = task.await;
        }
    }

    async fn fetch(&self, url: &str) -> Result<Value> {
        self.transport.send(ApiRequest::get(url)).await
    }

    async fn network_first(&self, url: &str) -> Result<Value> {
        match self.fetch(url).await {
            Ok(value) => {
                self.write_behind(url, value.clone());
                Ok(value)
            }
            Err(e) if e.is_transient() => {
                log::debug!("Network failed for {url}, falling back to cache: {e}");
                match self.read_cache(url).await {
                    Ok(Some(cached)) => Ok(cached),
                    Ok(None) => Err(e),
                    Err(cache_err) => {
                        log::warn!("Cache read failed for {url}: {cache_err}");
                        Err(e)
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn cache_first(&self, url: &str, is_list: bool) -> Result<Value> {
        let cached = match self.read_cache(url).await {
            Ok(cached) => cached,
            Err(e) => {
                log::warn!("Cache read failed for {url}: {e}");
                None
            }
        };

        if let Some(value) = cached.filter(|v| is_present(v, is_list)) {
            self.refresh_behind(url);
            return Ok(value);
        }

        let value = self.fetch(url).await?;
        self.write_behind(url, value.clone());
        Ok(value)
    }

    async fn read_cache(&self, url: &str) -> Result<Option<Value>> {
        Ok(self.store.get(url).await?.filter(|v| !v.is_null()))
    }

    fn write_behind(&self, url: &str, value: Value) {
        let store = Arc::clone(&self.store);
        let url = url.to_string();
        self.track(tokio::spawn(async move {
            if let Err(e) = store.set(&url, &value).await {
                log::debug!("Cache write failed for {url}: {e}");
            }
        }));
    }

    fn refresh_behind(&self, url: &str) {
        let store = Arc::clone(&self.store);
        let transport = Arc::clone(&self.transport);
        let url = url.to_string();
        self.track(tokio::spawn(async move {
            match transport.send(ApiRequest::get(url.clone())).await {
                Ok(fresh) => {
                    if let Err(e) = store.set(&url, &fresh).await {
                        log::debug!("Cache write failed for {url}: {e}");
                    }
                }
                Err(e) => log::debug!("Background refresh failed for {url}: {e}"),
            }
        }));
    }

    fn track(&self, handle: JoinHandle<()>) {
        if let Ok(mut tasks) = self.background.lock() {
            tasks.retain(|t| !t.is_finished());
            tasks.push(handle);
        }
    }
}

/// Whether a cached value counts as present for [`CacheMode::CacheFirst`].
///
/// Lists must be non-empty: an empty list means "not loaded yet", not
/// "known to be empty". Single entities follow JSON truthiness.
pub fn is_present(value: &Value, is_list: bool) -> bool {
    match value {
        Value::Array(items) if is_list => !items.is_empty(),
        other => is_truthy(other),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
