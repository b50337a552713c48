//! Test doubles shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::api::{ApiRequest, Transport};
use crate::error::{Error, Result};
use crate::storage::{CacheStore, MemoryStore};

type Handler = Box<dyn Fn(&ApiRequest) -> Result<Value> + Send + Sync>;

/// Transport answering every request through a closure and recording it.
pub(crate) struct FakeTransport {
    handler: Handler,
    requests: Mutex<Vec<ApiRequest>>,
    reachable: AtomicBool,
    probes: AtomicUsize,
}

impl FakeTransport {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&ApiRequest) -> Result<Value> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
            reachable: AtomicBool::new(true),
            probes: AtomicUsize::new(0),
        })
    }

    /// Transport whose every request fails with a network error.
    pub fn unreachable() -> Arc<Self> {
        let transport = Self::new(|_| Err(Error::Network("unreachable".into())));
        transport.set_reachable(false);
        transport
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.url).collect()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: ApiRequest) -> Result<Value> {
        self.requests.lock().unwrap().push(request.clone());
        (self.handler)(&request)
    }

    async fn probe(&self) -> Result<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Network("probe failed".into()))
        }
    }
}

/// `MemoryStore` that counts reads and writes.
#[derive(Default)]
pub(crate) struct CountingStore {
    inner: MemoryStore,
    reads: AtomicUsize,
    writes: AtomicUsize,
    clear_delay: Option<Duration>,
}

impl CountingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store whose `clear` sleeps before wiping.
    pub fn with_slow_clear(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            clear_delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStore for CountingStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &Value) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(key).await
    }

    async fn clear(&self) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.clear_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.clear().await
    }
}

/// Let spawned tasks on the current-thread test runtime run to their next await.
pub(crate) async fn pump() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
