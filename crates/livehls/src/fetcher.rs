// Segment Fetcher: resolves a segment URI and streams its bytes into the
// session store.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::Client;
use tracing::{debug, instrument, trace};
use url::Url;

use crate::error::LiveHlsError;
use crate::manifest::SegmentDescriptor;
use crate::store::SegmentStore;

/// Resolve a segment URI against the manifest's base URL. URIs carrying a
/// scheme are used as they are.
pub fn resolve_segment_url(uri: &str, base_url: &Url) -> Result<Url, LiveHlsError> {
    match Url::parse(uri) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => base_url
            .join(uri)
            .map_err(|e| LiveHlsError::invalid_url(uri, e)),
        Err(e) => Err(LiveHlsError::invalid_url(uri, e)),
    }
}

#[async_trait]
pub trait SegmentSource: Send + Sync {
    /// Download one segment into the session store and return its local path.
    ///
    /// `Download` errors leave nothing behind and may be retried on a later
    /// poll; `Storage` errors are local and fatal.
    async fn fetch(
        &self,
        descriptor: &SegmentDescriptor,
        base_url: &Url,
    ) -> Result<PathBuf, LiveHlsError>;
}

pub struct HttpSegmentFetcher {
    client: Client,
    store: Arc<SegmentStore>,
    timeout: Duration,
}

impl HttpSegmentFetcher {
    pub fn new(client: Client, store: Arc<SegmentStore>, timeout: Duration) -> Self {
        Self {
            client,
            store,
            timeout,
        }
    }
}

#[async_trait]
impl SegmentSource for HttpSegmentFetcher {
    #[instrument(skip(self, descriptor, base_url), fields(seq = descriptor.sequence_position))]
    async fn fetch(
        &self,
        descriptor: &SegmentDescriptor,
        base_url: &Url,
    ) -> Result<PathBuf, LiveHlsError> {
        let uri = descriptor.uri.as_str();
        let url = resolve_segment_url(uri, base_url)
            .map_err(|e| LiveHlsError::download(uri, e))?;
        trace!(url = %url, "Requesting segment");

        let mut request = self.client.get(url.clone());
        if !self.timeout.is_zero() {
            request = request.timeout(self.timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LiveHlsError::download(uri, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LiveHlsError::download(uri, format!("HTTP {status} from {url}")));
        }

        let mut staged = self.store.stage(uri).await?;
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;

        while let Some(chunk_result) = stream.next().await {
            let chunk: Bytes = chunk_result.map_err(|e| LiveHlsError::download(uri, e))?;
            downloaded += chunk.len() as u64;
            staged.write_chunk(&chunk).await?;
        }

        let path = staged.commit().await?;
        debug!(uri, bytes = downloaded, path = %path.display(), "Segment downloaded");
        Ok(path)
    }
}
