use super::{ResourceClient, ResourceError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// Serves resources from memory, keyed by url.
///
/// Useful for datasets that were fetched by other means (a bundle, an
/// upload) and for exercising the streaming pipeline without a network.
#[derive(Clone, Debug, Default)]
pub struct MemoryClient {
    entries: Arc<RwLock<HashMap<String, Arc<Vec<u8>>>>>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: impl Into<String>, bytes: Vec<u8>) {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(url.into(), Arc::new(bytes));
    }

    fn lookup(&self, url: &str) -> Result<Arc<Vec<u8>>, ResourceError> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(url)
            .cloned()
            .ok_or_else(|| ResourceError::NotFound(url.to_string()))
    }
}

#[async_trait]
impl ResourceClient for MemoryClient {
    async fn get(
        &self,
        url: &str,
        _headers: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<u8>, ResourceError> {
        Ok(self.lookup(url)?.as_ref().clone())
    }

    async fn get_range(
        &self,
        url: &str,
        offset: u64,
        length: usize,
        _headers: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<u8>, ResourceError> {
        let bytes = self.lookup(url)?;
        let out_of_range = || ResourceError::OutOfRange {
            url: url.to_string(),
            offset,
            length,
            size: bytes.len(),
        };

        let start = usize::try_from(offset).map_err(|_| out_of_range())?;
        let end = start.checked_add(length).ok_or_else(out_of_range)?;
        bytes
            .get(start..end)
            .map(<[u8]>::to_vec)
            .ok_or_else(out_of_range)
    }
}
