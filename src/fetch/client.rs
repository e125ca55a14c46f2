// HTTP image fetcher
// Author: kelexine (https://github.com/kelexine)

use super::ImageFetcher;
use crate::config::FetchConfig;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::debug;

/// HTTPS GET transport backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http_client: Client,
    max_image_bytes: u64,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .user_agent(config.user_agent.clone())
            .use_rustls_tls()
            .build()
            .map_err(|e| CacheError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        debug!("Created HTTP client for image fetches");

        Ok(Self {
            http_client,
            max_image_bytes: config.max_image_bytes,
        })
    }

    fn check_size(&self, locator: &str, len: u64) -> Result<()> {
        if len > self.max_image_bytes {
            return Err(CacheError::Fetch(format!(
                "{} is {} bytes, exceeding the {} byte limit",
                locator, len, self.max_image_bytes
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, locator: &str) -> Result<Bytes> {
        let started = Instant::now();
        let response = self.http_client.get(locator).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CacheError::FetchStatus {
                locator: locator.to_string(),
                status: status.as_u16(),
            });
        }

        if let Some(len) = response.content_length() {
            self.check_size(locator, len)?;
        }

        // Content-Length is optional, so the cap is enforced while reading.
        let mut body = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            self.check_size(locator, (body.len() + chunk.len()) as u64)?;
            body.extend_from_slice(&chunk);
        }
        let body = body.freeze();

        debug!(
            locator,
            bytes = body.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fetched image"
        );
        Ok(body)
    }
}
