use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::storage::repository;
use crate::storage::Database;
use crate::sync::resource::ResourceSpec;
use crate::sync::SyncOptions;

pub const API_BASE: &str = "api_base";
pub const TEAM_ID: &str = "team_id";
pub const RESOURCES: &str = "resources";
pub const UPLOAD_QUEUE: &str = "upload_queue";
pub const DISCOVERY_LIMIT: &str = "discovery_limit";
pub const PAGE_SIZE: &str = "page_size";
pub const SYNC_EXPIRATION_HOURS: &str = "sync_expiration_hours";
pub const PROBE_URL: &str = "probe_url";
pub const REQUEST_TIMEOUT_SECS: &str = "request_timeout_secs";

/// Every key read by [`Config::load`].
pub const KEYS: &[&str] = &[
    API_BASE,
    TEAM_ID,
    RESOURCES,
    UPLOAD_QUEUE,
    DISCOVERY_LIMIT,
    PAGE_SIZE,
    SYNC_EXPIRATION_HOURS,
    PROBE_URL,
    REQUEST_TIMEOUT_SECS,
];

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Runtime configuration, stored as key/value pairs in `app_config`.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_base: String,
    pub probe_url: String,
    pub request_timeout: Duration,
    pub resources: Vec<ResourceSpec>,
    pub sync: SyncOptions,
}

impl Config {
    /// Defaults for everything but the backend URL.
    pub fn new(api_base: impl Into<String>) -> Self {
        let api_base = api_base.into();
        Self {
            probe_url: api_base.clone(),
            api_base,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            resources: Vec::new(),
            sync: SyncOptions::default(),
        }
    }

    pub async fn load(db: &Database) -> Result<Self> {
        let values: HashMap<String, String> = db
            .reader()
            .call(|conn| repository::list_config(conn))
            .await?
            .into_iter()
            .collect();
        Self::from_values(&values)
    }

    pub fn from_values(values: &HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| {
            values
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };

        let api_base = get(API_BASE).ok_or_else(|| {
            Error::Config(format!(
                "{API_BASE} is not set. Run: offlinesync config set {API_BASE} <URL>"
            ))
        })?;
        validate_url(API_BASE, api_base)?;

        let mut config = Config::new(api_base);
        if let Some(probe) = get(PROBE_URL) {
            validate_url(PROBE_URL, probe)?;
            config.probe_url = probe.to_string();
        }
        if let Some(secs) = get(REQUEST_TIMEOUT_SECS) {
            config.request_timeout = Duration::from_secs(parse_positive(REQUEST_TIMEOUT_SECS, secs)?);
        }
        if let Some(resources) = get(RESOURCES) {
            config.resources = ResourceSpec::parse_list(resources)?;
        }

        config.sync.team_id = get(TEAM_ID).map(str::to_string);
        if let Some(enabled) = get(UPLOAD_QUEUE) {
            config.sync.upload_queue_enabled = parse_bool(UPLOAD_QUEUE, enabled)?;
        }
        if let Some(limit) = get(DISCOVERY_LIMIT) {
            config.sync.discovery_limit = parse_u32(DISCOVERY_LIMIT, limit)?;
        }
        if let Some(size) = get(PAGE_SIZE) {
            config.sync.page_size = parse_u32(PAGE_SIZE, size)?;
        }
        if let Some(hours) = get(SYNC_EXPIRATION_HOURS) {
            let hours = parse_positive(SYNC_EXPIRATION_HOURS, hours)?;
            let hours = i64::try_from(hours)
                .map_err(|_| Error::Config(format!("{SYNC_EXPIRATION_HOURS} is too large")))?;
            config.sync.sync_expiration = chrono::Duration::hours(hours);
        }

        Ok(config)
    }
}

fn validate_url(key: &str, value: &str) -> Result<()> {
    let url = url::Url::parse(value).map_err(|e| Error::Config(format!("{key}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(Error::Config(format!("{key}: unsupported scheme '{other}'"))),
    }
}

fn parse_positive(key: &str, value: &str) -> Result<u64> {
    match value.parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::Config(format!(
            "{key} must be a positive integer, got '{value}'"
        ))),
    }
}

fn parse_u32(key: &str, value: &str) -> Result<u32> {
    let n = parse_positive(key, value)?;
    u32::try_from(n).map_err(|_| Error::Config(format!("{key} is too large")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(Error::Config(format!("{key} must be true or false, got '{value}'"))),
    }
}
