use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{ApiRequest, Method, Transport};
use crate::error::{Error, Result};

const UNKNOWN_ERROR: &str = "Unknown error";

/// `Transport` over HTTP(S) using reqwest.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    probe_url: String,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(probe_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            probe_url: probe_url.into(),
            token: None,
        })
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn builder(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let method = match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<Value> {
        log::debug!("{} {}", request.method, request.url);

        let mut builder = self.builder(request.method, &request.url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }
        decode_body(&text)
    }

    async fn probe(&self) -> Result<()> {
        // Any HTTP response proves connectivity; only transport failures count.
        self.builder(Method::Get, &self.probe_url)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| Error::Network(e.to_string()))
    }
}

/// Extract the backend's `message` from an error body, if it is JSON.
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(String::from))
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| UNKNOWN_ERROR.to_string())
}

fn decode_body(text: &str) -> Result<Value> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_message_from_json_body() {
        assert_eq!(
            error_message(r#"{"message":"Customer not found"}"#),
            "Customer not found"
        );
    }

    #[test]
    fn test_error_message_fallback() {
        assert_eq!(error_message("<html>Bad Gateway</html>"), UNKNOWN_ERROR);
        assert_eq!(error_message(r#"{"error":"x"}"#), UNKNOWN_ERROR);
        assert_eq!(error_message(r#"{"message":""}"#), UNKNOWN_ERROR);
        assert_eq!(error_message(""), UNKNOWN_ERROR);
    }

    #[test]
    fn test_decode_body() {
        assert_eq!(decode_body("").unwrap(), Value::Null);
        assert_eq!(decode_body("  \n").unwrap(), Value::Null);
        assert_eq!(decode_body(r#"{"id":1}"#).unwrap(), json!({"id": 1}));
        assert!(decode_body("not json").is_err());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_a_network_error() {
        let transport =
            HttpTransport::new("http://127.0.0.1:9/", Duration::from_millis(500)).unwrap();
        let err = transport
            .send(ApiRequest::get("http://127.0.0.1:9/items"))
            .await
            .unwrap_err();
        assert!(err.is_transient(), "expected network error, got {err}");
        assert!(transport.probe().await.is_err());
    }
}
