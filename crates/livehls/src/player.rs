// Playback Driver: owns the external player process the session feeds.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use process_utils::{Termination, terminate_gracefully, tokio_command};
use tokio::process::Child;
use tracing::{debug, info, warn};

use crate::config::{PLAYLIST_PLACEHOLDER, PlayerConfig};
use crate::error::LiveHlsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    NotStarted,
    Running,
    /// Exited on its own or was stopped.
    Stopped,
    /// The last launch attempt failed.
    Failed,
}

#[async_trait]
pub trait PlaybackDriver: Send {
    fn state(&self) -> PlayerState;

    /// Whether the player process is still running. Reaps it if it exited.
    fn is_alive(&mut self) -> bool;

    /// Stop any running player, then launch a new one on `playlist`.
    async fn restart(&mut self, playlist: &Path) -> Result<(), LiveHlsError>;

    /// Request termination, wait a bounded time, then kill.
    async fn stop(&mut self);
}

pub struct ProcessPlayer {
    config: PlayerConfig,
    child: Option<Child>,
    state: PlayerState,
}

impl ProcessPlayer {
    pub fn new(config: PlayerConfig) -> Self {
        Self {
            config,
            child: None,
            state: PlayerState::NotStarted,
        }
    }

    async fn terminate_current(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        match terminate_gracefully(&mut child, self.config.stop_timeout).await {
            Ok(Termination::AlreadyExited(status)) => {
                debug!(program = %self.config.program, ?status, "Player had already exited");
            }
            Ok(Termination::Graceful(status)) => {
                debug!(program = %self.config.program, ?status, "Player terminated");
            }
            Ok(Termination::Killed(status)) => {
                warn!(program = %self.config.program, ?status, "Player killed after stop timeout");
            }
            Err(e) => {
                warn!(program = %self.config.program, error = %e, "Failed to terminate player");
            }
        }
        self.state = PlayerState::Stopped;
    }
}

/// Substitute the playlist path for the placeholder, or append it when no
/// argument mentions the placeholder.
pub fn build_player_args(args: &[String], playlist: &Path) -> Vec<String> {
    let playlist = playlist.to_string_lossy();
    let mut substituted = false;
    let mut out: Vec<String> = args
        .iter()
        .map(|arg| {
            if arg.contains(PLAYLIST_PLACEHOLDER) {
                substituted = true;
                arg.replace(PLAYLIST_PLACEHOLDER, &playlist)
            } else {
                arg.clone()
            }
        })
        .collect();
    if !substituted {
        out.push(playlist.into_owned());
    }
    out
}

#[async_trait]
impl PlaybackDriver for ProcessPlayer {
    fn state(&self) -> PlayerState {
        self.state
    }

    fn is_alive(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                info!(program = %self.config.program, ?status, "Player exited");
                self.child = None;
                self.state = PlayerState::Stopped;
                false
            }
            Err(e) => {
                warn!(program = %self.config.program, error = %e, "Failed to poll player status");
                false
            }
        }
    }

    async fn restart(&mut self, playlist: &Path) -> Result<(), LiveHlsError> {
        self.terminate_current().await;

        let args = build_player_args(&self.config.args, playlist);
        let mut command = tokio_command(&self.config.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match command.spawn() {
            Ok(child) => {
                info!(
                    program = %self.config.program,
                    pid = ?child.id(),
                    playlist = %playlist.display(),
                    "Player started"
                );
                self.child = Some(child);
                self.state = PlayerState::Running;
                Ok(())
            }
            Err(source) => {
                self.state = PlayerState::Failed;
                Err(LiveHlsError::Launch {
                    program: self.config.program.clone(),
                    source,
                })
            }
        }
    }

    async fn stop(&mut self) {
        self.terminate_current().await;
    }
}
