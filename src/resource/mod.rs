#[cfg(feature = "ehttp")]
pub mod ehttp;

#[cfg(feature = "fs")]
pub mod file;

#[cfg(feature = "reqwest")]
pub mod reqwest;

#[cfg(all(feature = "fs", feature = "reqwest"))]
pub mod hybrid;

pub mod memory;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Byte transport used for metadata, hierarchy chunks and node payloads.
///
/// Only ranged-read semantics are assumed; implementations decide what a
/// url means (http, `file://`, an in-memory key...).
#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn get(
        &self,
        url: &str,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<u8>, ResourceError>;

    async fn get_range(
        &self,
        url: &str,
        offset: u64,
        length: usize,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<u8>, ResourceError> {
        if length == 0 {
            return Ok(Vec::new());
        }

        // Compute the Range header
        let end = offset
            .checked_add(length as u64)
            .map(|v| v - 1)
            .ok_or_else(|| ResourceError::Other("Range overflow".into()))?;
        let range_value = format!("bytes={}-{}", offset, end);

        // Merge headers
        let mut all_headers = headers.unwrap_or_default();
        all_headers.insert("Range".to_string(), range_value);

        let bytes = self.get(url, Some(all_headers)).await?;
        if bytes.len() != length {
            return Err(ResourceError::ShortRead {
                url: url.to_string(),
                expected: length,
                actual: bytes.len(),
            });
        }
        Ok(bytes)
    }

    /// Maps a logical path (`<dataset>/octree.bin`) to the url actually fetched.
    fn resolve_url(&self, path: &str) -> String {
        path.to_string()
    }
}

#[async_trait]
impl<C: ResourceClient + ?Sized> ResourceClient for Arc<C> {
    async fn get(
        &self,
        url: &str,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<u8>, ResourceError> {
        (**self).get(url, headers).await
    }

    async fn get_range(
        &self,
        url: &str,
        offset: u64,
        length: usize,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<u8>, ResourceError> {
        (**self).get_range(url, offset, length, headers).await
    }

    fn resolve_url(&self, path: &str) -> String {
        (**self).resolve_url(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected HTTP status code: {0}")]
    Status(u16),

    #[error("File error: {0}")]
    File(#[from] std::io::Error),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Range {offset}+{length} is out of bounds for {url} ({size} bytes)")]
    OutOfRange {
        url: String,
        offset: u64,
        length: usize,
        size: usize,
    },

    #[error("Short read from {url}: expected {expected} bytes, got {actual}")]
    ShortRead {
        url: String,
        expected: usize,
        actual: usize,
    },

    #[error("{0}")]
    Other(String),

    #[error("Unsupported scheme: {0}")]
    Unsupported(String),
}

/// Shared handle over a [`ResourceClient`].
///
/// Node loads run on background tasks, so the loader is cloned into each of
/// them; cloning only bumps a reference count.
#[derive(Clone)]
pub struct ResourceLoader {
    client: Arc<dyn ResourceClient>,
}

impl fmt::Debug for ResourceLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLoader").finish_non_exhaustive()
    }
}

impl ResourceLoader {
    pub fn new(client: impl ResourceClient + 'static) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    pub fn from_arc(client: Arc<dyn ResourceClient>) -> Self {
        Self { client }
    }

    pub fn resolve_url(&self, path: &str) -> String {
        self.client.resolve_url(path)
    }

    pub async fn get(
        &self,
        url: &str,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<u8>, ResourceError> {
        self.client.get(url, headers).await
    }

    pub async fn get_range(
        &self,
        url: &str,
        offset: u64,
        length: usize,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<u8>, ResourceError> {
        self.client.get_range(url, offset, length, headers).await
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<T, ResourceError> {
        let bytes = self.get(url, headers).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
