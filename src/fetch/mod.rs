// Image transport
// Author: kelexine (https://github.com/kelexine)

mod client;

pub use client::HttpFetcher;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Fetches the raw bytes behind a locator.
///
/// Implementations report network failures and non-2xx statuses as fetch
/// errors and never retry on their own.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, locator: &str) -> Result<Bytes>;
}
