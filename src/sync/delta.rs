//! Download half of synchronization: pull change pages since the watermark
//! and merge them into the cached list and detail entries.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::resource::{CacheableResource, ResourceRegistry};
use super::{last_sync_at, set_last_sync_at, SyncOptions};
use crate::api::{ApiGateway, CacheMode, GetOptions};
use crate::date_util::now_millis;
use crate::error::Result;
use crate::storage::CacheStore;
use crate::url::scoped_path;

/// One page of changes since a watermark.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub records: HashMap<String, Vec<DeltaRecord>>,
    /// Continuation cursor; more pages exist while this is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<Value>,
}

impl Delta {
    fn next_cursor(&self) -> Option<&Value> {
        match self.next.as_ref()? {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            cursor => Some(cursor),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaRecord {
    pub element: Value,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PullOutcome {
    #[default]
    Completed,
    /// First page of an automatic pull had more pages; nothing was applied.
    RequiresConfirmation,
    /// At least one resource type failed; the watermark was not advanced.
    Failed,
}

#[derive(Debug, Clone, Default)]
pub struct PullReport {
    pub outcome: PullOutcome,
    pub failed_resources: Vec<String>,
    pub pages: u32,
    pub records_applied: u64,
}

pub struct DeltaSync {
    gateway: Arc<ApiGateway>,
    store: Arc<dyn CacheStore>,
    registry: ResourceRegistry,
    options: SyncOptions,
}

impl DeltaSync {
    pub fn new(
        gateway: Arc<ApiGateway>,
        store: Arc<dyn CacheStore>,
        registry: ResourceRegistry,
        options: SyncOptions,
    ) -> Self {
        Self {
            gateway,
            store,
            registry,
            options,
        }
    }

    /// Pull every page since the watermark and apply it.
    ///
    /// Transport and watermark failures are returned as errors. A failing
    /// resource type does not stop the others on the same page, but no
    /// further pages are requested and the watermark stays put.
    pub async fn pull(&self, manual: bool) -> Result<PullReport> {
        // Captured before any request so changes made during the pull are seen next time.
        let started_at = now_millis();
        let since = last_sync_at(self.store.as_ref()).await?.unwrap_or(0);
        let mut report = PullReport::default();
        let mut cursor: Option<Value> = None;

        loop {
            let first = report.pages == 0;
            let limit = if first {
                self.options.discovery_limit
            } else {
                self.options.page_size
            };
            let delta = self.fetch_page(since, limit, cursor.as_ref()).await?;
            report.pages += 1;
            let next = delta.next_cursor().cloned();

            if first && !manual && next.is_some() {
                log::info!("Delta since {since} spans several pages; waiting for confirmation");
                report.outcome = PullOutcome::RequiresConfirmation;
                return Ok(report);
            }

            let (applied, failed) = self.apply(&delta).await;
            report.records_applied += applied;
            if !failed.is_empty() {
                log::warn!("Delta failed for: {}", failed.join(", "));
                report.failed_resources = failed;
                report.outcome = PullOutcome::Failed;
                return Ok(report);
            }

            match next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        set_last_sync_at(self.store.as_ref(), started_at).await?;
        log::info!(
            "Delta applied: {} records in {} pages",
            report.records_applied,
            report.pages
        );
        Ok(report)
    }

    async fn fetch_page(&self, since: i64, limit: u32, cursor: Option<&Value>) -> Result<Delta> {
        let path = scoped_path(self.options.team_id.as_deref(), "delta");
        let mut options = GetOptions::new()
            .param("since", since.to_string())
            .param("limit", limit.to_string())
            .cache_mode(CacheMode::NoCache);
        if let Some(cursor) = cursor {
            let cursor = match cursor {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            options = options.param("next", cursor);
        }
        let page = self.gateway.get_resource(&path, &options).await?;
        Ok(serde_json::from_value(page)?)
    }

    /// Apply one page: resource types concurrently, records of one type in order.
    /// Returns the number of records applied and the failed resource names.
    pub async fn apply(&self, delta: &Delta) -> (u64, Vec<String>) {
        let mut seen = HashSet::new();
        let mut tasks = Vec::new();
        for name in &delta.resources {
            if !seen.insert(name.as_str()) {
                continue;
            }
            let Some(resource) = self.registry.get(name) else {
                log::warn!("Skipping unknown resource in delta: {name}");
                continue;
            };
            let records = delta.records.get(name).map(Vec::as_slice).unwrap_or(&[]);
            tasks.push(async move {
                let result = self.apply_resource(resource.as_ref(), records).await;
                (name, result)
            });
        }

        let mut applied = 0;
        let mut failed = Vec::new();
        for (name, result) in join_all(tasks).await {
            match result {
                Ok(count) => applied += count,
                Err(e) => {
                    log::warn!("Applying {name} failed: {e}");
                    failed.push(name.clone());
                }
            }
        }
        (applied, failed)
    }

    async fn apply_resource(&self, resource: &dyn CacheableResource, records: &[DeltaRecord]) -> Result<u64> {
        let keyed = records
            .iter()
            .map(|record| Ok((resource.list_url(&record.element)?, record)))
            .collect::<Result<Vec<_>>>()?;

        for run in keyed.chunk_by(|a, b| a.0 == b.0) {
            let list_url = &run[0].0;
            self.apply_run(resource, list_url, run.iter().map(|(_, record)| *record))
                .await?;
        }
        Ok(records.len() as u64)
    }

    /// Apply records sharing one list: read the list once, write it back once.
    async fn apply_run<'a>(
        &self,
        resource: &dyn CacheableResource,
        list_url: &str,
        run: impl Iterator<Item = &'a DeltaRecord>,
    ) -> Result<()> {
        let mut list = match self.store.get(list_url).await? {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        let mut changed = false;

        for record in run {
            let element_url = resource.element_url(&record.element)?;
            let index = resource.find_index_in_list(&list, &record.element);
            if record.deleted {
                self.store.remove(&element_url).await?;
                if let Some(index) = index {
                    list.remove(index);
                    changed = true;
                }
            } else {
                self.store.set(&element_url, &record.element).await?;
                match index {
                    Some(index) => list[index] = record.element.clone(),
                    None => list.push(record.element.clone()),
                }
                changed = true;
            }
        }

        if changed {
            resource.sort(&mut list);
            self.store.set(list_url, &Value::Array(list)).await?;
        }
        Ok(())
    }
}
