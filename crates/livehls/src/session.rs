// Live Acquisition Loop: polls the manifest, fetches each new segment once,
// keeps the playback manifest in order and decides when the player restarts.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::{LiveConfig, RetentionPolicy};
use crate::error::LiveHlsError;
use crate::fetcher::SegmentSource;
use crate::manifest::{Manifest, ManifestSource, SegmentDescriptor, base_url_for};
use crate::player::PlaybackDriver;
use crate::playlist::PlaybackManifest;
use crate::store::SegmentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Polling,
    Downloading,
    PlaylistRewrite,
    PlaybackRestart,
    Sleeping,
    Stopped,
}

/// A segment that made it to disk, in playback order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedSegment {
    pub uri: String,
    pub local_path: PathBuf,
    pub order_index: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub polls: u64,
    pub poll_failures: u64,
    pub segments_downloaded: u64,
    pub download_failures: u64,
    pub playback_launches: u64,
    pub launch_failures: u64,
    pub segments_evicted: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `stop()` was called.
    Requested,
    /// The manifest ended and every listed segment was acquired.
    EndOfStream,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub reason: StopReason,
    pub stats: SessionStats,
}

/// Cloneable handle for stopping a session or nudging its player.
#[derive(Clone)]
pub struct SessionControl {
    token: CancellationToken,
    restart_requested: Arc<AtomicBool>,
    wake: Arc<Notify>,
    state: watch::Receiver<SessionState>,
}

impl SessionControl {
    /// Stop the session. Idempotent and callable from any thread.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Restart the player at the next opportunity, even if it is still running.
    pub fn request_playback_restart(&self) {
        self.restart_requested.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }
}

#[derive(Debug)]
enum PollOutcome {
    Continue(Duration),
    EndOfStream,
    Cancelled,
}

pub struct LiveSession {
    manifest_url: Url,
    base_url: Url,
    config: Arc<LiveConfig>,
    manifests: Arc<dyn ManifestSource>,
    segments: Arc<dyn SegmentSource>,
    store: Arc<SegmentStore>,
    playback: PlaybackManifest,
    player: Option<Box<dyn PlaybackDriver>>,

    token: CancellationToken,
    restart_requested: Arc<AtomicBool>,
    wake: Arc<Notify>,
    state: watch::Sender<SessionState>,

    seen: HashSet<String>,
    downloaded: VecDeque<DownloadedSegment>,
    next_order_index: u64,
    consecutive_failures: u32,
    last_target_duration: Option<Duration>,
    stats: SessionStats,
}

impl LiveSession {
    /// `player` is `None` for headless acquisition.
    pub fn new(
        manifest_url: Url,
        config: Arc<LiveConfig>,
        manifests: Arc<dyn ManifestSource>,
        segments: Arc<dyn SegmentSource>,
        store: Arc<SegmentStore>,
        player: Option<Box<dyn PlaybackDriver>>,
    ) -> Result<Self, LiveHlsError> {
        config.validate()?;
        let base_url = base_url_for(&manifest_url)?;
        let playback =
            PlaybackManifest::new(store.root().join(&config.storage.playlist_file_name));
        let (state, _) = watch::channel(SessionState::Idle);

        Ok(Self {
            manifest_url,
            base_url,
            config,
            manifests,
            segments,
            store,
            playback,
            player,
            token: CancellationToken::new(),
            restart_requested: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
            state,
            seen: HashSet::new(),
            downloaded: VecDeque::new(),
            next_order_index: 0,
            consecutive_failures: 0,
            last_target_duration: None,
            stats: SessionStats::default(),
        })
    }

    pub fn control(&self) -> SessionControl {
        SessionControl {
            token: self.token.clone(),
            restart_requested: Arc::clone(&self.restart_requested),
            wake: Arc::clone(&self.wake),
            state: self.state.subscribe(),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Retained segments in playback order.
    pub fn segments(&self) -> impl Iterator<Item = &DownloadedSegment> {
        self.downloaded.iter()
    }

    pub fn playback_manifest_path(&self) -> PathBuf {
        self.playback.path().to_path_buf()
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    /// Sleep between polls: half the target duration, never below the floor.
    pub fn poll_interval(&self, target_duration: Duration) -> Duration {
        (target_duration / 2).max(self.config.poll.minimum_poll_interval)
    }

    /// Run until stopped, end of stream or a fatal error. Player shutdown and
    /// storage removal happen on every exit path.
    pub async fn run(mut self) -> Result<SessionSummary, LiveHlsError> {
        info!(
            url = %self.manifest_url,
            dir = %self.store.root().display(),
            playback = self.player.is_some(),
            "Live session started"
        );

        let outcome = self.drive().await;
        self.shutdown().await;

        let stats = self.stats.clone();
        match outcome {
            Ok(reason) => {
                info!(
                    url = %self.manifest_url,
                    ?reason,
                    polls = stats.polls,
                    poll_failures = stats.poll_failures,
                    segments = stats.segments_downloaded,
                    download_failures = stats.download_failures,
                    launches = stats.playback_launches,
                    "Live session finished"
                );
                Ok(SessionSummary { reason, stats })
            }
            Err(e) => {
                error!(
                    url = %self.manifest_url,
                    error = %e,
                    polls = stats.polls,
                    segments = stats.segments_downloaded,
                    "Live session aborted"
                );
                Err(e)
            }
        }
    }

    async fn drive(&mut self) -> Result<StopReason, LiveHlsError> {
        loop {
            if self.token.is_cancelled() {
                return Ok(StopReason::Requested);
            }

            match self.poll_once().await? {
                PollOutcome::Cancelled => return Ok(StopReason::Requested),
                PollOutcome::EndOfStream => return self.finish_stream().await,
                PollOutcome::Continue(delay) => {
                    self.set_state(SessionState::Sleeping);
                    debug!(delay_ms = delay.as_millis() as u64, "Sleeping until next poll");
                    if !sleep_or_wake(&self.token, &self.wake, delay).await {
                        return Ok(StopReason::Requested);
                    }
                }
            }
        }
    }

    /// One iteration: fetch, download new segments, rewrite the playback
    /// manifest, maybe restart the player.
    async fn poll_once(&mut self) -> Result<PollOutcome, LiveHlsError> {
        self.set_state(SessionState::Polling);
        self.stats.polls += 1;

        let fetched = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Ok(PollOutcome::Cancelled),
            result = self.manifests.fetch(&self.manifest_url) => result,
        };

        let manifest = match fetched {
            Ok(manifest) => {
                if self.consecutive_failures > 0 {
                    info!(
                        failures = self.consecutive_failures,
                        "Manifest fetch recovered"
                    );
                }
                self.consecutive_failures = 0;
                self.last_target_duration = Some(manifest.target_duration);
                manifest
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) if e.is_poll_failure() => return self.record_poll_failure(e),
            Err(e) => {
                error!(url = %self.manifest_url, error = %e, "Unexpected manifest error");
                return Err(LiveHlsError::fatal(format!("manifest fetch failed: {e}")));
            }
        };

        self.set_state(SessionState::Downloading);
        let Some(added) = self.acquire(&manifest).await? else {
            return Ok(PollOutcome::Cancelled);
        };
        let evicted = self.take_evicted();
        let changed = added > 0 || !evicted.is_empty();

        if changed {
            self.set_state(SessionState::PlaylistRewrite);
            let paths: Vec<&PathBuf> = self.downloaded.iter().map(|s| &s.local_path).collect();
            self.playback.write(&paths).await?;
            debug!(
                added,
                evicted = evicted.len(),
                entries = self.downloaded.len(),
                "Playback manifest updated"
            );
        }
        // Files go only once the manifest on disk no longer lists them.
        self.remove_evicted(evicted).await?;

        self.maybe_restart_player(changed).await;

        if manifest.end_of_stream
            && manifest.segments.iter().all(|s| self.seen.contains(&s.uri))
        {
            return Ok(PollOutcome::EndOfStream);
        }

        Ok(PollOutcome::Continue(
            self.poll_interval(manifest.target_duration),
        ))
    }

    fn record_poll_failure(&mut self, e: LiveHlsError) -> Result<PollOutcome, LiveHlsError> {
        self.consecutive_failures += 1;
        self.stats.poll_failures += 1;
        let budget = self.config.poll.max_consecutive_manifest_failures;

        if self.consecutive_failures > budget {
            error!(
                url = %self.manifest_url,
                failures = self.consecutive_failures,
                error = %e,
                "Manifest failure budget exhausted"
            );
            return Err(LiveHlsError::fatal(format!(
                "{} consecutive manifest failures, last: {e}",
                self.consecutive_failures
            )));
        }

        warn!(
            url = %self.manifest_url,
            failures = self.consecutive_failures,
            budget,
            error = %e,
            "Manifest fetch failed"
        );
        let fallback = self
            .last_target_duration
            .unwrap_or(self.config.poll.fallback_target_duration);
        Ok(PollOutcome::Continue(self.poll_interval(fallback)))
    }

    /// Download every listed uri not yet seen. Returns the number added, or
    /// `None` when the session was stopped mid-way.
    async fn acquire(&mut self, manifest: &Manifest) -> Result<Option<usize>, LiveHlsError> {
        let mut listed = HashSet::new();
        let pending: Vec<SegmentDescriptor> = manifest
            .segments
            .iter()
            .filter(|s| !self.seen.contains(&s.uri) && listed.insert(s.uri.as_str()))
            .cloned()
            .collect();
        if pending.is_empty() {
            return Ok(Some(0));
        }
        debug!(count = pending.len(), "New segments listed");

        let fetches: Vec<_> = pending
            .into_iter()
            .map(|descriptor| {
                let segments = Arc::clone(&self.segments);
                let base_url = self.base_url.clone();
                async move {
                    let result = segments.fetch(&descriptor, &base_url).await;
                    (descriptor, result)
                }
            })
            .collect();
        // `buffered` yields in input order whatever order downloads finish in.
        let downloads = futures::stream::iter(fetches)
            .buffered(self.config.fetch.download_concurrency)
            .collect::<Vec<_>>();

        let results = tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                debug!("Stop requested, abandoning in-flight downloads");
                return Ok(None);
            }
            results = downloads => results,
        };

        let mut added = 0;
        for (descriptor, result) in results {
            match result {
                Ok(local_path) => {
                    let order_index = self.next_order_index;
                    self.next_order_index += 1;
                    self.seen.insert(descriptor.uri.clone());
                    self.downloaded.push_back(DownloadedSegment {
                        uri: descriptor.uri.clone(),
                        local_path,
                        order_index,
                    });
                    self.stats.segments_downloaded += 1;
                    added += 1;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    self.stats.download_failures += 1;
                    warn!(
                        uri = %descriptor.uri,
                        seq = descriptor.sequence_position,
                        error = %e,
                        "Segment download failed, will retry next poll"
                    );
                }
            }
        }
        Ok(Some(added))
    }

    /// Pop the oldest segments beyond the retention limit. Their uris stay seen.
    fn take_evicted(&mut self) -> Vec<DownloadedSegment> {
        let RetentionPolicy::KeepLast(keep) = self.config.storage.retention else {
            return Vec::new();
        };
        let excess = self.downloaded.len().saturating_sub(keep);
        self.downloaded.drain(..excess).collect()
    }

    async fn remove_evicted(
        &mut self,
        evicted: Vec<DownloadedSegment>,
    ) -> Result<(), LiveHlsError> {
        for segment in evicted {
            self.store.remove(&segment.uri).await?;
            self.stats.segments_evicted += 1;
            debug!(uri = %segment.uri, order_index = segment.order_index, "Evicted segment");
        }
        Ok(())
    }

    /// Launch failures are counted and logged; acquisition goes on.
    async fn maybe_restart_player(&mut self, changed: bool) {
        if self.player.is_none() || self.downloaded.is_empty() {
            return;
        }

        let explicit = self.restart_requested.swap(false, Ordering::SeqCst);
        let alive = self.player.as_mut().is_some_and(|p| p.is_alive());
        if !explicit && !(changed && !alive) {
            return;
        }

        self.set_state(SessionState::PlaybackRestart);
        let playlist = self.playback.path().to_path_buf();
        let Some(player) = self.player.as_mut() else {
            return;
        };
        match player.restart(&playlist).await {
            Ok(()) => {
                self.stats.playback_launches += 1;
                info!(explicit, segments = self.downloaded.len(), "Playback (re)started");
            }
            Err(e) => {
                self.stats.launch_failures += 1;
                warn!(error = %e, "Failed to start player, acquisition continues");
            }
        }
    }

    /// Stream ended and everything is on disk: optionally wait for the player
    /// to finish what it has.
    async fn finish_stream(&mut self) -> Result<StopReason, LiveHlsError> {
        info!(
            url = %self.manifest_url,
            segments = self.seen.len(),
            "End of stream reached"
        );
        if !self.config.poll.linger_on_end_of_stream {
            return Ok(StopReason::EndOfStream);
        }

        let interval = self.config.poll.minimum_poll_interval;
        loop {
            // A restart request still replays what is on disk.
            self.maybe_restart_player(false).await;
            let alive = self.player.as_mut().is_some_and(|p| p.is_alive());
            if !alive {
                return Ok(StopReason::EndOfStream);
            }
            self.set_state(SessionState::Sleeping);
            if !sleep_or_wake(&self.token, &self.wake, interval).await {
                return Ok(StopReason::Requested);
            }
        }
    }

    async fn shutdown(&mut self) {
        if let Some(player) = self.player.as_mut() {
            player.stop().await;
        }
        if let Err(e) = self.playback.remove().await {
            warn!(error = %e, "Failed to remove playback manifest");
        }
        if let Err(e) = self.store.cleanup() {
            warn!(error = %e, "Failed to remove session directory");
        }
        self.token.cancel();
        self.set_state(SessionState::Stopped);
    }
}

/// Returns `false` when the session was stopped during the sleep. A
/// playback restart request ends the sleep early.
async fn sleep_or_wake(token: &CancellationToken, wake: &Notify, delay: Duration) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = wake.notified() => true,
        _ = tokio::time::sleep(delay) => true,
    }
}
