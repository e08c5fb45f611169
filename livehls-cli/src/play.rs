use livehls_engine::{LiveConfig, SessionControl, StopReason};
use tracing::{info, warn};

use crate::error::Result;

/// Run one session until it ends, Ctrl-C stops it, or it fails.
pub async fn run_play(url: &str, config: LiveConfig) -> Result<()> {
    let handle = livehls_engine::start(url, config)?;
    let signals = tokio::spawn(forward_signals(handle.control()));

    let result = handle.join().await;
    signals.abort();
    let summary = result?;

    match summary.reason {
        StopReason::EndOfStream => info!("Stream ended"),
        StopReason::Requested => info!("Stopped"),
    }
    info!(
        polls = summary.stats.polls,
        segments = summary.stats.segments_downloaded,
        download_failures = summary.stats.download_failures,
        evicted = summary.stats.segments_evicted,
        launches = summary.stats.playback_launches,
        "Session summary"
    );
    Ok(())
}

/// Ctrl-C stops the session; on Unix, SIGUSR1 restarts the player.
async fn forward_signals(control: SessionControl) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut restart = match signal(SignalKind::user_defined1()) {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGUSR1");
                None
            }
        };
        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        warn!(error = %e, "Cannot listen for Ctrl-C");
                        return;
                    }
                    break;
                }
                Some(()) = async {
                    match restart.as_mut() {
                        Some(stream) => stream.recv().await,
                        None => std::future::pending().await,
                    }
                } => {
                    info!("SIGUSR1 received, restarting player");
                    control.request_playback_restart();
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C");
            return;
        }
    }

    info!("Ctrl-C received, stopping session");
    control.stop();
}
