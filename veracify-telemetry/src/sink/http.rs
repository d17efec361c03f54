//! HTTP sink client
//!
//! POSTs batch inserts to `{base_url}/{table}`. The request shape follows
//! the PostgREST-style batch insert the analytics backend exposes: the
//! body is a JSON array of rows, the API key travels in both the `apikey`
//! and bearer authorization headers, and `Prefer: return=minimal` keeps
//! 2xx response bodies empty.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::config::SinkConfig;
use crate::error::{Error, Result};

use super::EventSink;

/// HTTP client for the analytics sink
pub struct HttpSink {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpSink {
    /// Create a new sink client from configuration
    ///
    /// Returns an error if the configuration is invalid or missing
    /// required fields.
    pub fn new(config: &SinkConfig) -> Result<Self> {
        config.validate()?;

        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| Error::Config("sink.base_url is required".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let api_key = config
            .api_key
            .as_deref()
            .ok_or_else(|| Error::Config("sink.api_key is required".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "apikey",
            HeaderValue::from_str(api_key)
                .map_err(|e| Error::Config(format!("invalid api_key: {}", e)))?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| Error::Config(format!("invalid api_key: {}", e)))?,
        );
        // Batch inserts don't need the created rows echoed back
        headers.insert("Prefer", HeaderValue::from_static("return=minimal"));

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }
}

#[async_trait]
impl EventSink for HttpSink {
    async fn send_batch(&self, table: &str, records: &[serde_json::Value]) -> Result<()> {
        let url = format!("{}/{}", self.base_url, table);

        let response = self
            .http_client
            .post(&url)
            .json(records)
            .send()
            .await
            .map_err(|e| Error::Network(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status.is_success() {
            return Ok(());
        }

        // Diagnostic only; correctness never depends on the body
        let body = response.text().await.unwrap_or_else(|_| "unknown".to_string());
        Err(Error::RemoteRejection {
            status: status.as_u16(),
            body,
        })
    }
}
