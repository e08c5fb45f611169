//! Live HLS acquisition engine.
//!
//! A [`LiveSession`] polls one live media playlist, downloads every segment
//! exactly once into a temporary session directory, keeps an ffmpeg concat
//! list of the acquired segments in manifest order, and (re)starts an external
//! player on that list. [`start`] wires the HTTP implementations together and
//! spawns the session on the current tokio runtime.

pub mod client;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod manifest;
pub mod player;
pub mod playlist;
pub mod runner;
pub mod session;
pub mod store;

pub use config::{
    FetchConfig, HttpConfig, LiveConfig, PlayerConfig, PollConfig, RetentionPolicy, StorageConfig,
};
pub use error::LiveHlsError;
pub use fetcher::{HttpSegmentFetcher, SegmentSource};
pub use manifest::{HttpManifestFetcher, Manifest, ManifestSource, SegmentDescriptor};
pub use player::{PlaybackDriver, PlayerState, ProcessPlayer};
pub use playlist::PlaybackManifest;
pub use runner::{StreamHandle, start};
pub use session::{
    DownloadedSegment, LiveSession, SessionControl, SessionState, SessionStats, SessionSummary,
    StopReason,
};
pub use store::SegmentStore;
