use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::error::LiveHlsError;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Placeholder substituted with the playback manifest path in player arguments.
pub const PLAYLIST_PLACEHOLDER: &str = "{playlist}";

// --- Top-Level Configuration ---
#[derive(Debug, Clone, Default)]
pub struct LiveConfig {
    pub http: HttpConfig,
    pub poll: PollConfig,
    pub fetch: FetchConfig,
    pub player: PlayerConfig,
    pub storage: StorageConfig,
}

impl LiveConfig {
    /// Reject values the session cannot run with.
    pub fn validate(&self) -> Result<(), LiveHlsError> {
        if self.fetch.download_concurrency == 0 {
            return Err(LiveHlsError::Configuration {
                reason: "download concurrency must be at least 1".to_string(),
            });
        }
        if self.storage.retention == RetentionPolicy::KeepLast(0) {
            return Err(LiveHlsError::Configuration {
                reason: "retention must keep at least one segment".to_string(),
            });
        }
        if self.player.enabled && self.player.program.trim().is_empty() {
            return Err(LiveHlsError::Configuration {
                reason: "player program is empty".to_string(),
            });
        }
        if self.storage.playlist_file_name.is_empty()
            || self.storage.playlist_file_name.contains(['/', '\\'])
        {
            return Err(LiveHlsError::Configuration {
                reason: format!(
                    "invalid playlist file name `{}`",
                    self.storage.playlist_file_name
                ),
            });
        }
        Ok(())
    }
}

// --- HTTP Configuration ---
/// Options for the shared HTTP client used for manifests and segments.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// User agent string
    pub user_agent: String,

    /// Custom HTTP headers for requests, merged over the defaults
    pub headers: HeaderMap,

    /// Explicit proxy URL applied to all requests
    pub proxy: Option<String>,

    /// Whether to use system proxy settings when no explicit proxy is set
    pub use_system_proxy: bool,

    /// Maximum idle connections to keep per host
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: HttpConfig::get_default_headers(),
            proxy: None,
            use_system_proxy: true,
            pool_max_idle_per_host: 10,
        }
    }
}

impl HttpConfig {
    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));

        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );

        default_headers
    }

    /// Merge custom headers over the defaults. Custom values win for the same name.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in headers.iter() {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }
}

// --- Poll Configuration ---
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Floor for the sleep between polls; guards against a zero target duration.
    pub minimum_poll_interval: Duration,
    /// Target duration assumed when a poll fails before any manifest was seen.
    pub fallback_target_duration: Duration,
    /// Consecutive manifest failures tolerated before the session gives up.
    pub max_consecutive_manifest_failures: u32,
    pub manifest_fetch_timeout: Duration,
    /// After `#EXT-X-ENDLIST`, keep the session alive until the player exits.
    pub linger_on_end_of_stream: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            minimum_poll_interval: Duration::from_secs(1),
            fallback_target_duration: Duration::from_secs(2),
            max_consecutive_manifest_failures: 10,
            manifest_fetch_timeout: Duration::from_secs(10),
            linger_on_end_of_stream: true,
        }
    }
}

// --- Fetch Configuration ---
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Max concurrent segment downloads within one poll
    pub download_concurrency: usize,
    pub segment_download_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            download_concurrency: 4,
            segment_download_timeout: Duration::from_secs(30),
        }
    }
}

// --- Player Configuration ---
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Launch a player at all. Disabled means headless acquisition.
    pub enabled: bool,
    pub program: String,
    /// Arguments; `{playlist}` is replaced by the playback manifest path.
    pub args: Vec<String>,
    /// Grace period between the termination request and a hard kill
    pub stop_timeout: Duration,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: std::env::var("FFPLAY_PATH").unwrap_or_else(|_| "ffplay".to_string()),
            args: PlayerConfig::default_ffplay_args(),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

impl PlayerConfig {
    /// Low-latency concat playback of the session's playback manifest.
    pub fn default_ffplay_args() -> Vec<String> {
        [
            "-fflags",
            "nobuffer",
            "-flags",
            "low_delay",
            "-framedrop",
            "-sync",
            "ext",
            "-f",
            "concat",
            "-safe",
            "0",
            "-i",
            PLAYLIST_PLACEHOLDER,
        ]
        .into_iter()
        .map(str::to_string)
        .collect()
    }
}

// --- Storage Configuration ---
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Keep every segment until the session ends
    #[default]
    KeepAll,
    /// Keep only the newest N segments on disk and in the playback manifest
    KeepLast(usize),
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Parent directory for the session directory; system temp dir when unset
    pub temp_root: Option<PathBuf>,
    pub retention: RetentionPolicy,
    pub playlist_file_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            temp_root: None,
            retention: RetentionPolicy::KeepAll,
            playlist_file_name: "playlist.txt".to_string(),
        }
    }
}
