// Segment Store: the session's temporary directory and the mapping from
// segment URIs to the files materialized inside it.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::config::StorageConfig;
use crate::error::LiveHlsError;
use crate::playlist::TEMP_SUFFIX;

const FALLBACK_FILE_NAME: &str = "segment";
const STAGING_SUFFIX: &str = ".part";

#[derive(Default)]
struct NameTable {
    by_uri: HashMap<String, String>,
    claimed: HashSet<String>,
}

pub struct SegmentStore {
    root: PathBuf,
    dir: Mutex<Option<TempDir>>,
    names: Mutex<NameTable>,
    materialized: Mutex<HashSet<String>>,
}

impl SegmentStore {
    /// Create a fresh session directory under `temp_root` or the system temp dir.
    pub fn create(config: &StorageConfig) -> Result<Self, LiveHlsError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("livehls-");
        let dir = match &config.temp_root {
            Some(parent) => builder
                .tempdir_in(parent)
                .map_err(|e| LiveHlsError::storage(parent, e))?,
            None => builder
                .tempdir()
                .map_err(|e| LiveHlsError::storage(std::env::temp_dir(), e))?,
        };
        // Playback manifests list absolute paths.
        let root = dir
            .path()
            .canonicalize()
            .map_err(|e| LiveHlsError::storage(dir.path(), e))?;

        // The playback manifest shares the directory; no segment may take its name.
        let mut names = NameTable::default();
        names.claimed.insert(config.playlist_file_name.clone());

        debug!(path = %root.display(), "Created session directory");
        Ok(Self {
            root,
            dir: Mutex::new(Some(dir)),
            names: Mutex::new(names),
            materialized: Mutex::new(HashSet::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local file name for `uri`. Stable for the session; distinct uris never
    /// share a name.
    pub fn file_name_for(&self, uri: &str) -> String {
        let mut table = self.names.lock();
        if let Some(name) = table.by_uri.get(uri) {
            return name.clone();
        }

        let base = base_file_name(uri);
        let name = if is_usable(&table, &base) {
            base
        } else {
            let digest = hex::encode(Sha256::digest(uri.as_bytes()));
            let stem = without_reserved_suffix(&base);
            let mut candidate = format!("{}-{stem}", &digest[..8]);
            let mut n = 1;
            while !is_usable(&table, &candidate) {
                candidate = format!("{}-{n}-{stem}", &digest[..8]);
                n += 1;
            }
            candidate
        };
        table.claimed.insert(name.clone());
        table.by_uri.insert(uri.to_string(), name.clone());
        name
    }

    /// Final path a completed download of `uri` lands at.
    pub fn path_for(&self, uri: &str) -> PathBuf {
        self.root.join(self.file_name_for(uri))
    }

    /// Open a staging file for `uri`. Nothing becomes visible under the final
    /// name until [`StagedSegment::commit`].
    pub async fn stage(&self, uri: &str) -> Result<StagedSegment<'_>, LiveHlsError> {
        let final_path = self.path_for(uri);
        let mut staged_name = final_path.as_os_str().to_owned();
        staged_name.push(STAGING_SUFFIX);
        let staged_path = PathBuf::from(staged_name);

        let file = File::create(&staged_path)
            .await
            .map_err(|e| LiveHlsError::storage(&staged_path, e))?;

        Ok(StagedSegment {
            store: self,
            uri: uri.to_string(),
            file: Some(file),
            staged_path,
            final_path,
            committed: false,
        })
    }

    pub fn is_materialized(&self, uri: &str) -> bool {
        self.materialized.lock().contains(uri)
    }

    /// Delete a materialized segment file. The uri keeps its file name.
    pub async fn remove(&self, uri: &str) -> Result<(), LiveHlsError> {
        let path = self.path_for(uri);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(LiveHlsError::storage(path, e)),
        }
        self.materialized.lock().remove(uri);
        Ok(())
    }

    /// Delete the session directory and everything in it. Idempotent.
    pub fn cleanup(&self) -> Result<(), LiveHlsError> {
        let Some(dir) = self.dir.lock().take() else {
            return Ok(());
        };
        self.materialized.lock().clear();
        dir.close()
            .map_err(|e| LiveHlsError::storage(&self.root, e))?;
        debug!(path = %self.root.display(), "Removed session directory");
        Ok(())
    }
}

/// Free, and not shaped like a staging or rewrite scratch file.
fn is_usable(table: &NameTable, name: &str) -> bool {
    !table.claimed.contains(name)
        && !name.ends_with(STAGING_SUFFIX)
        && !name.ends_with(TEMP_SUFFIX)
}

/// `seg.part` becomes `seg_part`.
fn without_reserved_suffix(name: &str) -> String {
    for suffix in [STAGING_SUFFIX, TEMP_SUFFIX] {
        if let Some(stem) = name.strip_suffix(suffix) {
            return format!("{stem}_{}", &suffix[1..]);
        }
    }
    name.to_string()
}

/// Last path component of `uri` without query or fragment, or a fixed
/// fallback when that is empty or would escape the directory.
fn base_file_name(uri: &str) -> String {
    let end = memchr::memchr2(b'?', b'#', uri.as_bytes()).unwrap_or(uri.len());
    let path = &uri[..end];
    let name = path.rsplit(['/', '\\']).next().unwrap_or_default();
    match name {
        "" | "." | ".." => FALLBACK_FILE_NAME.to_string(),
        name => name.to_string(),
    }
}

/// A download in progress. Dropping it without committing removes the
/// staging file.
pub struct StagedSegment<'a> {
    store: &'a SegmentStore,
    uri: String,
    file: Option<File>,
    staged_path: PathBuf,
    final_path: PathBuf,
    committed: bool,
}

impl StagedSegment<'_> {
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), LiveHlsError> {
        let file = self.file.as_mut().ok_or_else(|| {
            LiveHlsError::storage(
                &self.staged_path,
                io::Error::other("staging file already closed"),
            )
        })?;
        file.write_all(chunk)
            .await
            .map_err(|e| LiveHlsError::storage(&self.staged_path, e))
    }

    /// Flush, then rename into place and mark the uri materialized.
    pub async fn commit(mut self) -> Result<PathBuf, LiveHlsError> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .await
                .map_err(|e| LiveHlsError::storage(&self.staged_path, e))?;
            file.sync_all()
                .await
                .map_err(|e| LiveHlsError::storage(&self.staged_path, e))?;
        }
        tokio::fs::rename(&self.staged_path, &self.final_path)
            .await
            .map_err(|e| LiveHlsError::storage(&self.final_path, e))?;
        self.committed = true;
        self.store.materialized.lock().insert(self.uri.clone());
        Ok(self.final_path.clone())
    }
}

impl Drop for StagedSegment<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        drop(self.file.take());
        if let Err(e) = std::fs::remove_file(&self.staged_path)
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!(path = %self.staged_path.display(), error = %e, "Failed to remove staging file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(parent: &Path) -> SegmentStore {
        SegmentStore::create(&StorageConfig {
            temp_root: Some(parent.to_path_buf()),
            ..StorageConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn file_names_strip_query_and_fragment() {
        assert_eq!(base_file_name("seg1.ts"), "seg1.ts");
        assert_eq!(base_file_name("https://cdn.example.com/a/b/seg2.ts?t=1"), "seg2.ts");
        assert_eq!(base_file_name("chunks/seg3.ts#frag"), "seg3.ts");
        assert_eq!(base_file_name("https://cdn.example.com/live/"), "segment");
        assert_eq!(base_file_name(".."), "segment");
    }

    #[test]
    fn colliding_names_get_hash_prefix() {
        let parent = tempfile::tempdir().unwrap();
        let store = store_in(parent.path());

        let first = store.file_name_for("https://a.example.com/seg1.ts");
        let second = store.file_name_for("https://b.example.com/seg1.ts");

        assert_eq!(first, "seg1.ts");
        assert_ne!(first, second);
        assert!(second.ends_with("-seg1.ts"));
        assert_eq!(second.len(), "seg1.ts".len() + 9);
        // Stable per uri.
        assert_eq!(store.file_name_for("https://b.example.com/seg1.ts"), second);
    }

    #[test]
    fn playlist_file_name_is_reserved() {
        let parent = tempfile::tempdir().unwrap();
        let store = store_in(parent.path());
        assert_ne!(store.file_name_for("media/playlist.txt"), "playlist.txt");
    }

    #[test]
    fn scratch_file_names_are_never_handed_out() {
        let parent = tempfile::tempdir().unwrap();
        let store = store_in(parent.path());

        let staged_lookalike = store.file_name_for("media/seg1.ts.part");
        let temp_lookalike = store.file_name_for("media/playlist.txt.tmp");

        assert!(staged_lookalike.ends_with("-seg1.ts_part"));
        assert!(temp_lookalike.ends_with("-playlist.txt_tmp"));
        assert_eq!(store.file_name_for("media/seg1.ts.part"), staged_lookalike);
    }

    #[tokio::test]
    async fn lookalike_segments_stage_independently() {
        let parent = tempfile::tempdir().unwrap();
        let store = store_in(parent.path());

        let mut lookalike = store.stage("seg1.ts.part").await.unwrap();
        lookalike.write_chunk(b"lookalike").await.unwrap();
        let mut real = store.stage("seg1.ts").await.unwrap();
        real.write_chunk(b"real").await.unwrap();

        let lookalike_path = lookalike.commit().await.unwrap();
        let real_path = real.commit().await.unwrap();

        assert_ne!(lookalike_path, real_path);
        assert_eq!(std::fs::read(&lookalike_path).unwrap(), b"lookalike");
        assert_eq!(std::fs::read(&real_path).unwrap(), b"real");
    }

    #[tokio::test]
    async fn commit_makes_file_visible() {
        let parent = tempfile::tempdir().unwrap();
        let store = store_in(parent.path());

        let mut staged = store.stage("seg1.ts").await.unwrap();
        staged.write_chunk(b"hello ").await.unwrap();
        staged.write_chunk(b"world").await.unwrap();
        assert!(!store.root().join("seg1.ts").exists());

        let path = staged.commit().await.unwrap();
        assert_eq!(path, store.root().join("seg1.ts"));
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
        assert!(store.is_materialized("seg1.ts"));
        assert!(!store.root().join("seg1.ts.part").exists());
    }

    #[tokio::test]
    async fn dropped_stage_leaves_nothing_behind() {
        let parent = tempfile::tempdir().unwrap();
        let store = store_in(parent.path());

        let mut staged = store.stage("seg1.ts").await.unwrap();
        staged.write_chunk(b"partial").await.unwrap();
        drop(staged);

        assert_eq!(std::fs::read_dir(store.root()).unwrap().count(), 0);
        assert!(!store.is_materialized("seg1.ts"));
    }

    #[tokio::test]
    async fn remove_and_cleanup() {
        let parent = tempfile::tempdir().unwrap();
        let store = store_in(parent.path());

        let staged = store.stage("seg1.ts").await.unwrap();
        staged.commit().await.unwrap();
        store.remove("seg1.ts").await.unwrap();
        assert!(!store.root().join("seg1.ts").exists());
        assert!(!store.is_materialized("seg1.ts"));

        let root = store.root().to_path_buf();
        store.cleanup().unwrap();
        assert!(!root.exists());
        store.cleanup().unwrap();
    }
}
