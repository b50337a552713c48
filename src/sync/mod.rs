pub mod delta;
pub mod queue;
pub mod resource;
pub mod syncer;

use std::collections::BTreeMap;

use chrono::Duration;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::storage::CacheStore;

/// Store key of the last-successful-sync watermark (epoch ms).
pub const LAST_SYNC_KEY: &str = "offlinesync:lastSyncAt";
/// Store key of the upload queue snapshot.
pub const UPLOAD_QUEUE_KEY: &str = "offlinesync:uploadQueue";

pub const DEFAULT_DISCOVERY_LIMIT: u32 = 100;
pub const DEFAULT_PAGE_SIZE: u32 = 300;
pub const DEFAULT_SYNC_EXPIRATION_HOURS: i64 = 24;

/// Options controlling synchronization.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Tenant scope for the delta endpoint and resource paths.
    pub team_id: Option<String>,
    /// When false, mutations are never deferred and flushing is a no-op.
    pub upload_queue_enabled: bool,
    /// Page size of the first delta request; a continuation cursor on that
    /// page means an automatic sync is too large to run unattended.
    pub discovery_limit: u32,
    /// Page size of every following delta request.
    pub page_size: u32,
    /// `synchronize_if_needed` syncs when the watermark is older than this.
    pub sync_expiration: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            team_id: None,
            upload_queue_enabled: true,
            discovery_limit: DEFAULT_DISCOVERY_LIMIT,
            page_size: DEFAULT_PAGE_SIZE,
            sync_expiration: Duration::hours(DEFAULT_SYNC_EXPIRATION_HOURS),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceState {
    pub error: bool,
}

/// Observable synchronization state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncState {
    pub synchronizing: bool,
    pub error_in_last_sync: bool,
    pub requires_manual_confirmation: bool,
    pub last_sync_at: Option<i64>,
    pub pending_uploads: usize,
    pub resources: BTreeMap<String, ResourceState>,
}

/// Report returned after a synchronization pass.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub status: SyncStatus,
    pub uploads_sent: u64,
    pub uploads_failed: u64,
    pub records_applied: u64,
    pub pages: u32,
    pub failed_resources: Vec<String>,
    pub error: Option<String>,
}

impl SyncReport {
    pub fn skipped() -> Self {
        Self {
            status: SyncStatus::Skipped,
            uploads_sent: 0,
            uploads_failed: 0,
            records_applied: 0,
            pages: 0,
            failed_resources: Vec::new(),
            error: None,
        }
    }

    /// Fill in the status derived from the counts and the error.
    pub fn finish(mut self, requires_confirmation: bool) -> Self {
        self.status = if requires_confirmation {
            SyncStatus::AwaitingConfirmation
        } else if self.error.is_none() {
            SyncStatus::Success
        } else if self.uploads_sent > 0 || self.records_applied > 0 {
            SyncStatus::PartialFailure
        } else {
            SyncStatus::Failed
        };
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncStatus {
    Success,
    PartialFailure,
    Failed,
    /// A large automatic sync stopped before applying anything.
    AwaitingConfirmation,
    /// Nothing to do, or another pass was already running.
    Skipped,
}

/// Read the watermark; `None` if never synced.
pub async fn last_sync_at(store: &dyn CacheStore) -> Result<Option<i64>> {
    match store.get(LAST_SYNC_KEY).await? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| Error::Serialization(format!("invalid watermark: {n}"))),
        Some(other) => Err(Error::Serialization(format!("invalid watermark: {other}"))),
    }
}

pub async fn set_last_sync_at(store: &dyn CacheStore, millis: i64) -> Result<()> {
    store.set(LAST_SYNC_KEY, &Value::from(millis)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_watermark_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(last_sync_at(&store).await.unwrap(), None);

        set_last_sync_at(&store, 1_700_000_000_000).await.unwrap();
        assert_eq!(last_sync_at(&store).await.unwrap(), Some(1_700_000_000_000));
    }

    #[tokio::test]
    async fn test_corrupt_watermark_is_an_error() {
        let store = MemoryStore::new();
        store.set(LAST_SYNC_KEY, &json!("yesterday")).await.unwrap();
        assert!(last_sync_at(&store).await.is_err());
    }

    #[test]
    fn test_report_status() {
        let mut report = SyncReport::skipped();
        report.records_applied = 3;
        assert_eq!(report.clone().finish(false).status, SyncStatus::Success);
        assert_eq!(report.clone().finish(true).status, SyncStatus::AwaitingConfirmation);

        report.error = Some("customers failed".into());
        assert_eq!(report.clone().finish(false).status, SyncStatus::PartialFailure);

        report.records_applied = 0;
        assert_eq!(report.finish(false).status, SyncStatus::Failed);
    }

    #[test]
    fn test_default_options() {
        let options = SyncOptions::default();
        assert_eq!(options.discovery_limit, 100);
        assert_eq!(options.page_size, 300);
        assert_eq!(options.sync_expiration, Duration::hours(24));
        assert!(options.upload_queue_enabled);
    }
}
