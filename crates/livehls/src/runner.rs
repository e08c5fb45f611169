use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;
use url::Url;

use crate::client::create_client;
use crate::config::LiveConfig;
use crate::error::LiveHlsError;
use crate::fetcher::HttpSegmentFetcher;
use crate::manifest::HttpManifestFetcher;
use crate::player::{PlaybackDriver, ProcessPlayer};
use crate::session::{LiveSession, SessionControl, SessionSummary};
use crate::store::SegmentStore;

/// A running session: stop it through [`StreamHandle::control`], wait for it
/// with [`StreamHandle::join`].
pub struct StreamHandle {
    control: SessionControl,
    task: JoinHandle<Result<SessionSummary, LiveHlsError>>,
}

impl StreamHandle {
    pub fn control(&self) -> SessionControl {
        self.control.clone()
    }

    pub fn stop(&self) {
        self.control.stop();
    }

    /// Wait for the session to end. Cleanup has finished when this returns.
    pub async fn join(self) -> Result<SessionSummary, LiveHlsError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(LiveHlsError::fatal(format!("session task failed: {e}"))),
        }
    }
}

/// Start acquiring `manifest_url` over HTTP on the current tokio runtime.
pub fn start(manifest_url: &str, config: LiveConfig) -> Result<StreamHandle, LiveHlsError> {
    let manifest_url =
        Url::parse(manifest_url).map_err(|e| LiveHlsError::invalid_url(manifest_url, e))?;
    if !matches!(manifest_url.scheme(), "http" | "https") {
        return Err(LiveHlsError::invalid_url(
            manifest_url.as_str(),
            "only http and https manifests are supported",
        ));
    }
    config.validate()?;

    let config = Arc::new(config);
    let client = create_client(&config.http)?;
    let store = Arc::new(SegmentStore::create(&config.storage)?);

    let manifests = Arc::new(HttpManifestFetcher::new(
        client.clone(),
        config.poll.manifest_fetch_timeout,
    ));
    let segments = Arc::new(HttpSegmentFetcher::new(
        client,
        Arc::clone(&store),
        config.fetch.segment_download_timeout,
    ));
    let player: Option<Box<dyn PlaybackDriver>> = if config.player.enabled {
        Some(Box::new(ProcessPlayer::new(config.player.clone())))
    } else {
        info!("Playback disabled, acquiring headless");
        None
    };

    let session = match LiveSession::new(
        manifest_url,
        Arc::clone(&config),
        manifests,
        segments,
        Arc::clone(&store),
        player,
    ) {
        Ok(session) => session,
        Err(e) => {
            store.cleanup()?;
            return Err(e);
        }
    };

    let control = session.control();
    let task = tokio::spawn(session.run());
    Ok(StreamHandle { control, task })
}
