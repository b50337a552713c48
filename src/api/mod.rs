//! REST transport contract and the cache-aware gateway built on top of it.

pub mod gateway;
pub mod http;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

pub use gateway::{ApiGateway, CacheMode, GetOptions};
pub use http::HttpTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// POST, PUT and PATCH are the methods the upload queue may replay.
    pub fn is_queueable(self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Patch)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            other => Err(crate::error::Error::InvalidRequest(format!(
                "unknown HTTP method: {other}"
            ))),
        }
    }
}

/// A fully-resolved outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            body: None,
        }
    }
}

/// HTTP transport used by the gateway and the network monitor.
///
/// Implementations map failures that never reached the backend to
/// `Error::Network` and non-2xx responses to `Error::Api`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute a request and decode the JSON response (`Value::Null` for empty bodies).
    async fn send(&self, request: ApiRequest) -> Result<Value>;

    /// Lightweight round-trip confirming the backend is reachable.
    async fn probe(&self) -> Result<()>;
}
