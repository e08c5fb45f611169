// Playback manifest: the ffmpeg concat list the player reads.

use std::io;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::error::LiveHlsError;

/// Suffix of the scratch file a rewrite goes through.
pub(crate) const TEMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone)]
pub struct PlaybackManifest {
    path: PathBuf,
}

impl PlaybackManifest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// One `file '<path>'` line per segment, in the given order.
    pub fn render<P: AsRef<Path>>(paths: &[P]) -> String {
        let mut out = String::new();
        for path in paths {
            out.push_str("file '");
            out.push_str(&escape(&path.as_ref().to_string_lossy()));
            out.push_str("'\n");
        }
        out
    }

    /// Replace the file on disk with the full list. Readers see either the
    /// previous list or the new one, never a partial write.
    pub async fn write<P: AsRef<Path>>(&self, paths: &[P]) -> Result<(), LiveHlsError> {
        let contents = Self::render(paths);

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(TEMP_SUFFIX);
        let tmp_path = PathBuf::from(tmp_name);

        tokio::fs::write(&tmp_path, contents.as_bytes())
            .await
            .map_err(|e| LiveHlsError::storage(&tmp_path, e))?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(LiveHlsError::storage(&self.path, e));
        }

        trace!(path = %self.path.display(), entries = paths.len(), "Rewrote playback manifest");
        Ok(())
    }

    pub async fn remove(&self) -> Result<(), LiveHlsError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LiveHlsError::storage(&self.path, e)),
        }
    }
}

/// Concat demuxer quoting: close the quote, emit an escaped quote, reopen.
fn escape(path: &str) -> String {
    path.replace('\'', r"'\''")
}
