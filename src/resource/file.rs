use super::{ResourceClient, ResourceError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Reads `file://` urls from the local filesystem.
#[derive(Clone, Debug, Default)]
pub struct FileClient;

fn local_path(url: &str) -> Result<&str, ResourceError> {
    url.strip_prefix("file://").ok_or_else(|| {
        ResourceError::Unsupported("This client supports only file:// urls.".to_string())
    })
}

#[async_trait]
impl ResourceClient for FileClient {
    async fn get(
        &self,
        url: &str,
        _headers: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<u8>, ResourceError> {
        let path = local_path(url)?;
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(ResourceError::NotFound(url.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get_range(
        &self,
        url: &str,
        offset: u64,
        length: usize,
        _headers: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<u8>, ResourceError> {
        let path = local_path(url)?;
        let mut file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        if offset.saturating_add(length as u64) > size {
            return Err(ResourceError::OutOfRange {
                url: url.to_string(),
                offset,
                length,
                size: size as usize,
            });
        }

        file.seek(SeekFrom::Start(offset)).await?;
        let mut bytes = vec![0; length];
        file.read_exact(&mut bytes).await?;
        Ok(bytes)
    }

    fn resolve_url(&self, path: &str) -> String {
        if path.starts_with("file://") {
            path.to_string()
        } else {
            format!("file://{path}")
        }
    }
}
