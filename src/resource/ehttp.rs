use super::{ResourceClient, ResourceError};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Transport backed by `ehttp`, which uses the browser `fetch` on wasm.
#[derive(Clone, Debug, Default)]
pub struct EhttpClient;

#[async_trait]
impl ResourceClient for EhttpClient {
    async fn get(
        &self,
        url: &str,
        headers: Option<BTreeMap<String, String>>, // `ehttp` has limited headers support
    ) -> Result<Vec<u8>, ResourceError> {
        let (tx, rx) = futures::channel::oneshot::channel();

        let mut request = ehttp::Request::get(url);
        for (k, v) in headers.unwrap_or_default() {
            request.headers.insert(k, v);
        }

        ehttp::fetch(request, move |res| {
            let _ = tx.send(res);
        });

        let response = rx
            .await
            .map_err(|_| ResourceError::Network("channel closed".to_string()))?;
        let response = response.map_err(ResourceError::Network)?;

        if response.status == 404 {
            return Err(ResourceError::NotFound(url.to_string()));
        }
        if !response.ok {
            return Err(ResourceError::Status(response.status));
        }

        Ok(response.bytes)
    }
}
