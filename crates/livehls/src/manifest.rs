// Manifest Fetcher: retrieves the live media playlist and turns it into an
// immutable snapshot the acquisition loop can diff against.

use std::time::Duration;

use async_trait::async_trait;
use m3u8_rs::{Playlist, parse_playlist_res};
use reqwest::Client;
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::LiveHlsError;

/// Target duration assumed when the playlist carries no `#EXT-X-TARGETDURATION`.
pub const DEFAULT_TARGET_DURATION: Duration = Duration::from_secs(2);

const EXTM3U_TAG: &[u8] = b"#EXTM3U";
const TARGET_DURATION_TAG: &[u8] = b"#EXT-X-TARGETDURATION";

/// One media segment as listed by a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegmentDescriptor {
    /// Segment URI exactly as written in the playlist; dedup identity.
    pub uri: String,
    /// `media_sequence` plus the segment's index in the manifest.
    pub sequence_position: u64,
}

/// Snapshot of the live playlist taken by one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub segments: Vec<SegmentDescriptor>,
    pub target_duration: Duration,
    pub end_of_stream: bool,
    pub media_sequence: u64,
}

impl Manifest {
    /// Parse a media playlist. `source` only labels errors.
    pub fn parse(bytes: &[u8], source: &str) -> Result<Self, LiveHlsError> {
        if !bytes.trim_ascii_start().starts_with(EXTM3U_TAG) {
            return Err(LiveHlsError::parse(source, "document does not start with #EXTM3U"));
        }

        let playlist = match parse_playlist_res(bytes) {
            Ok(Playlist::MediaPlaylist(pl)) => pl,
            Ok(Playlist::MasterPlaylist(_)) => {
                return Err(LiveHlsError::parse(
                    source,
                    "master playlists are not supported, pass a media playlist URL",
                ));
            }
            Err(e) => return Err(LiveHlsError::parse(source, e)),
        };

        // m3u8-rs reports a missing tag as 0, which is also a legal value.
        let target_duration = if memchr::memmem::find(bytes, TARGET_DURATION_TAG).is_some() {
            Duration::from_secs(playlist.target_duration)
        } else {
            trace!(url = %source, "No target duration tag, using default");
            DEFAULT_TARGET_DURATION
        };

        let media_sequence = playlist.media_sequence;
        let mut segments = Vec::with_capacity(playlist.segments.len());
        for (index, segment) in playlist.segments.into_iter().enumerate() {
            if segment.uri.trim().is_empty() {
                warn!(url = %source, index, "Skipping segment with empty URI");
                continue;
            }
            segments.push(SegmentDescriptor {
                uri: segment.uri.trim().to_string(),
                sequence_position: media_sequence + index as u64,
            });
        }

        Ok(Self {
            segments,
            target_duration,
            end_of_stream: playlist.end_list,
            media_sequence,
        })
    }
}

/// Base URL relative segment URIs resolve against: the manifest URL without
/// its final path component.
pub fn base_url_for(manifest_url: &Url) -> Result<Url, LiveHlsError> {
    manifest_url
        .join(".")
        .map_err(|e| LiveHlsError::invalid_url(manifest_url.as_str(), e))
}

#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Fetch and parse the current manifest. No retries, no side effects
    /// beyond the request.
    async fn fetch(&self, url: &Url) -> Result<Manifest, LiveHlsError>;
}

pub struct HttpManifestFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpManifestFetcher {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl ManifestSource for HttpManifestFetcher {
    async fn fetch(&self, url: &Url) -> Result<Manifest, LiveHlsError> {
        let mut request = self.client.get(url.clone());
        if !self.timeout.is_zero() {
            request = request.timeout(self.timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LiveHlsError::network(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LiveHlsError::http_status(status, url.as_str(), "manifest fetch"));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| LiveHlsError::network(url.as_str(), e))?;

        let manifest = Manifest::parse(&body, url.as_str())?;
        debug!(
            url = %url,
            segments = manifest.segments.len(),
            media_sequence = manifest.media_sequence,
            target_duration_secs = manifest.target_duration.as_secs(),
            end_of_stream = manifest.end_of_stream,
            "Fetched manifest"
        );
        Ok(manifest)
    }
}
