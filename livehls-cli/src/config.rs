//! Configuration layering: defaults, then `LIVEHLS_*` environment variables
//! (a `.env` file is loaded first), then command-line flags.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use livehls_engine::{LiveConfig, RetentionPolicy};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::cli::{PlayArgs, ServeArgs};
use crate::error::{AppError, Result};

/// Session settings read from the environment on top of the engine defaults.
#[derive(Debug, Clone, Default)]
pub struct PlayConfig {
    pub live: LiveConfig,
}

impl PlayConfig {
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut live = LiveConfig::default();

        if let Some(ms) = lookup("LIVEHLS_MIN_POLL_INTERVAL_MS")
            && let Ok(parsed) = ms.trim().parse::<u64>()
        {
            live.poll.minimum_poll_interval = Duration::from_millis(parsed);
        }

        if let Some(max) = lookup("LIVEHLS_MAX_MANIFEST_FAILURES")
            && let Ok(parsed) = max.trim().parse::<u32>()
        {
            live.poll.max_consecutive_manifest_failures = parsed;
        }

        if let Some(concurrency) = lookup("LIVEHLS_DOWNLOAD_CONCURRENCY")
            && let Ok(parsed) = concurrency.trim().parse::<usize>()
        {
            live.fetch.download_concurrency = parsed;
        }

        if let Some(keep) = lookup("LIVEHLS_KEEP_LAST")
            && let Ok(parsed) = keep.trim().parse::<usize>()
        {
            live.storage.retention = RetentionPolicy::KeepLast(parsed);
        }

        if let Some(dir) = lookup("LIVEHLS_TEMP_DIR")
            && !dir.trim().is_empty()
        {
            live.storage.temp_root = Some(PathBuf::from(dir));
        }

        if let Some(proxy) = lookup("LIVEHLS_PROXY")
            && !proxy.trim().is_empty()
        {
            live.http.proxy = Some(proxy);
        }

        if let Some(user_agent) = lookup("LIVEHLS_USER_AGENT")
            && !user_agent.trim().is_empty()
        {
            live.http.user_agent = user_agent;
        }

        if let Some(flag) = lookup("LIVEHLS_NO_PLAYBACK") {
            live.player.enabled = !matches!(flag.trim(), "1" | "true" | "yes");
        }

        Self { live }
    }

    /// Apply command-line flags; they win over the environment.
    pub fn apply_args(mut self, args: &PlayArgs) -> Result<LiveConfig> {
        let live = &mut self.live;

        if args.no_playback {
            live.player.enabled = false;
        }
        if let Some(player) = &args.player {
            live.player.program = player.clone();
        }
        if !args.player_args.is_empty() {
            live.player.args = args.player_args.clone();
        }
        if let Some(keep) = args.keep_last {
            live.storage.retention = RetentionPolicy::KeepLast(keep);
        }
        if let Some(max) = args.max_manifest_failures {
            live.poll.max_consecutive_manifest_failures = max;
        }
        if let Some(ms) = args.min_poll_interval_ms {
            live.poll.minimum_poll_interval = Duration::from_millis(ms);
        }
        if let Some(concurrency) = args.concurrency {
            live.fetch.download_concurrency = concurrency;
        }
        if let Some(dir) = &args.temp_dir {
            live.storage.temp_root = Some(dir.clone());
        }
        if let Some(proxy) = &args.proxy {
            live.http.proxy = Some(proxy.clone());
        }
        if args.exit_on_end {
            live.poll.linger_on_end_of_stream = false;
        }
        if !args.headers.is_empty() {
            let headers = parse_headers(&args.headers)?;
            live.http = std::mem::take(&mut live.http).with_headers(headers);
        }

        live.validate()?;
        Ok(self.live)
    }
}

/// Parse `Name: value` pairs.
pub fn parse_headers(raw: &[String]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for entry in raw {
        let (name, value) = entry
            .split_once(':')
            .ok_or_else(|| AppError::InvalidInput(format!("header `{entry}` is not `Name: value`")))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| AppError::InvalidInput(format!("invalid header name in `{entry}`: {e}")))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| AppError::InvalidInput(format!("invalid header value in `{entry}`: {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Edge file service settings.
#[derive(Debug, Clone)]
pub struct EdgeConfig {
    pub root: PathBuf,
    pub bind: SocketAddr,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl EdgeConfig {
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(root) = lookup("LIVEHLS_EDGE_ROOT")
            && !root.trim().is_empty()
        {
            config.root = PathBuf::from(root);
        }

        if let Some(bind) = lookup("LIVEHLS_EDGE_BIND")
            && let Ok(parsed) = bind.trim().parse::<SocketAddr>()
        {
            config.bind = parsed;
        }

        config
    }

    pub fn apply_args(mut self, args: &ServeArgs) -> Self {
        if let Some(root) = &args.root {
            self.root = root.clone();
        }
        if let Some(bind) = args.bind {
            self.bind = bind;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = PlayConfig::from_lookup(lookup(&[
            ("LIVEHLS_MIN_POLL_INTERVAL_MS", "250"),
            ("LIVEHLS_KEEP_LAST", "6"),
            ("LIVEHLS_NO_PLAYBACK", "true"),
            ("LIVEHLS_DOWNLOAD_CONCURRENCY", "not a number"),
        ]));

        assert_eq!(
            config.live.poll.minimum_poll_interval,
            Duration::from_millis(250)
        );
        assert_eq!(config.live.storage.retention, RetentionPolicy::KeepLast(6));
        assert!(!config.live.player.enabled);
        assert_eq!(config.live.fetch.download_concurrency, 4);
    }

    #[test]
    fn flags_override_environment() {
        let config = PlayConfig::from_lookup(lookup(&[("LIVEHLS_KEEP_LAST", "6")]));
        let args = PlayArgs {
            url: "https://example.com/live.m3u8".to_string(),
            keep_last: Some(3),
            max_manifest_failures: Some(2),
            headers: vec!["Referer: https://example.com/".to_string()],
            exit_on_end: true,
            ..PlayArgs::default()
        };

        let live = config.apply_args(&args).unwrap();

        assert_eq!(live.storage.retention, RetentionPolicy::KeepLast(3));
        assert_eq!(live.poll.max_consecutive_manifest_failures, 2);
        assert!(!live.poll.linger_on_end_of_stream);
        assert_eq!(
            live.http.headers[reqwest::header::REFERER],
            "https://example.com/"
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        let args = PlayArgs {
            concurrency: Some(0),
            ..PlayArgs::default()
        };
        let err = PlayConfig::default().apply_args(&args).unwrap_err();
        assert!(matches!(err, AppError::Session(_)));

        assert!(parse_headers(&["no separator".to_string()]).is_err());
    }

    #[test]
    fn edge_config_layers() {
        let config = EdgeConfig::from_lookup(lookup(&[
            ("LIVEHLS_EDGE_ROOT", "/srv/hls"),
            ("LIVEHLS_EDGE_BIND", "127.0.0.1:9000"),
        ]));
        assert_eq!(config.root, PathBuf::from("/srv/hls"));

        let config = config.apply_args(&ServeArgs {
            root: None,
            bind: Some("127.0.0.1:9100".parse().unwrap()),
        });
        assert_eq!(config.root, PathBuf::from("/srv/hls"));
        assert_eq!(config.bind.port(), 9100);
    }
}
