use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "livehls",
    version,
    about = "Play a live HLS stream: poll the playlist, fetch each segment once, feed ffplay"
)]
pub struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Follow a live media playlist and play it
    Play(PlayArgs),

    /// Serve files from a directory by name over HTTP
    Serve(ServeArgs),
}

#[derive(clap::Args, Debug, Default)]
pub struct PlayArgs {
    /// Live media playlist URL
    pub url: String,

    /// Acquire segments without launching a player
    #[arg(long)]
    pub no_playback: bool,

    /// Player executable (defaults to ffplay, or $FFPLAY_PATH)
    #[arg(long, value_name = "PROGRAM")]
    pub player: Option<String>,

    /// Player argument, repeatable; replaces the default ffplay arguments.
    /// `{playlist}` is replaced by the concat list path.
    #[arg(long = "player-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub player_args: Vec<String>,

    /// Keep only the newest N segments on disk
    #[arg(long, value_name = "N")]
    pub keep_last: Option<usize>,

    /// Consecutive manifest failures tolerated before giving up
    #[arg(long, value_name = "N")]
    pub max_manifest_failures: Option<u32>,

    /// Floor for the interval between manifest polls
    #[arg(long, value_name = "MS")]
    pub min_poll_interval_ms: Option<u64>,

    /// Concurrent segment downloads per poll
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Parent directory for the session's temporary files
    #[arg(long, value_name = "DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Extra request header, repeatable
    #[arg(short = 'H', long = "header", value_name = "NAME: VALUE")]
    pub headers: Vec<String>,

    /// Proxy URL for all requests
    #[arg(long, value_name = "URL")]
    pub proxy: Option<String>,

    /// Stop as soon as an ended stream is fully downloaded instead of waiting
    /// for the player to finish
    #[arg(long)]
    pub exit_on_end: bool,
}

#[derive(clap::Args, Debug, Default)]
pub struct ServeArgs {
    /// Directory to serve
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<SocketAddr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_play_with_overrides() {
        let args = Args::parse_from([
            "livehls",
            "-v",
            "play",
            "https://example.com/live/index.m3u8",
            "--keep-last",
            "5",
            "-H",
            "Referer: https://example.com/",
            "--player-arg",
            "-autoexit",
            "--player-arg",
            "{playlist}",
        ]);

        assert!(args.verbose);
        let Commands::Play(play) = args.command else {
            panic!("expected play");
        };
        assert_eq!(play.url, "https://example.com/live/index.m3u8");
        assert_eq!(play.keep_last, Some(5));
        assert_eq!(play.headers, ["Referer: https://example.com/"]);
        assert_eq!(play.player_args, ["-autoexit", "{playlist}"]);
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        let result = Args::try_parse_from(["livehls", "-v", "-q", "serve"]);
        assert!(result.is_err());
    }
}
