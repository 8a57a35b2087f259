//! On-disk HLS fragment cache.
//!
//! Bytes live at `<root>/<sd_hash>/<name>`; an in-memory index maps
//! `(sd_hash, name)` to size and access metadata. The index is rebuilt
//! from disk at startup, so a restart keeps everything that was cached.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use tracing::{debug, info};

use crate::FragmentError;

/// One cached fragment.
#[derive(Debug, Clone)]
pub struct Fragment {
    sd_hash: String,
    name: String,
    size: u64,
    last_accessed: SystemTime,
}

impl Fragment {
    /// Stream the fragment belongs to.
    pub fn sd_hash(&self) -> &str {
        &self.sd_hash
    }

    /// File name within the stream.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size in bytes, as measured on disk.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// When the fragment was last handed out.
    pub fn last_accessed(&self) -> SystemTime {
        self.last_accessed
    }
}

/// Disk-backed fragment cache with an in-memory index.
pub struct FragmentCache {
    root: PathBuf,
    index: Mutex<HashMap<(String, String), Fragment>>,
}

impl FragmentCache {
    /// Creates an empty cache rooted at `root`. Call
    /// [`FragmentCache::restore`] to pick up fragments already on disk.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: Mutex::new(HashMap::new()),
        }
    }

    /// Cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rebuilds the index from disk and returns how many fragments were
    /// registered. A missing root directory is an empty cache.
    ///
    /// # Errors
    ///
    /// - `FragmentError::Io` - directory walk failed
    pub async fn restore(&self) -> Result<usize, FragmentError> {
        let mut restored = 0;
        let mut streams = match tokio::fs::read_dir(&self.root).await {
            Ok(streams) => streams,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(root = %self.root.display(), "no cache directory yet");
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };

        let mut fresh = HashMap::new();
        while let Some(stream) = streams.next_entry().await? {
            if !stream.file_type().await?.is_dir() {
                continue;
            }
            let sd_hash = stream.file_name().to_string_lossy().into_owned();
            let mut files = tokio::fs::read_dir(stream.path()).await?;
            while let Some(file) = files.next_entry().await? {
                if !file.file_type().await?.is_file() {
                    continue;
                }
                let meta = file.metadata().await?;
                let name = file.file_name().to_string_lossy().into_owned();
                fresh.insert(
                    (sd_hash.clone(), name.clone()),
                    Fragment {
                        sd_hash: sd_hash.clone(),
                        name,
                        size: meta.len(),
                        last_accessed: meta.modified().unwrap_or_else(|_| SystemTime::now()),
                    },
                );
                restored += 1;
            }
        }
        *self.index.lock().unwrap_or_else(|e| e.into_inner()) = fresh;
        info!(restored, root = %self.root.display(), "fragment cache restored");
        Ok(restored)
    }

    /// Looks a fragment up, bumping its access time on a hit.
    pub fn get(&self, sd_hash: &str, name: &str) -> Option<Fragment> {
        let mut index = self.index.lock().unwrap_or_else(|e| e.into_inner());
        let fragment = index.get_mut(&(sd_hash.to_owned(), name.to_owned()))?;
        fragment.last_accessed = SystemTime::now();
        Some(fragment.clone())
    }

    /// Writes a fragment to disk and indexes it.
    ///
    /// # Errors
    ///
    /// - `FragmentError::Io` - write failed
    pub async fn store(
        &self,
        sd_hash: &str,
        name: &str,
        data: &[u8],
    ) -> Result<Fragment, FragmentError> {
        let dir = self.root.join(sd_hash);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(name), data).await?;

        let fragment = Fragment {
            sd_hash: sd_hash.to_owned(),
            name: name.to_owned(),
            size: data.len() as u64,
            last_accessed: SystemTime::now(),
        };
        debug!(sd_hash, name, size = fragment.size, "fragment stored");
        self.index
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((sd_hash.to_owned(), name.to_owned()), fragment.clone());
        Ok(fragment)
    }

    /// Absolute path of a fragment's bytes.
    pub fn full_path(&self, fragment: &Fragment) -> PathBuf {
        self.root.join(fragment.sd_hash()).join(fragment.name())
    }

    /// Number of indexed fragments.
    pub fn len(&self) -> usize {
        self.index.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// True when nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn restore_of_missing_root_is_empty() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let cache = FragmentCache::new(tmp.path().join("nothing-here"));
        assert_eq!(0, cache.restore().await.expect("restore"));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn store_then_get_roundtrip() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let cache = FragmentCache::new(tmp.path());

        let stored = cache
            .store("hash", "master.m3u8", b"#EXTM3U")
            .await
            .expect("store");
        assert_eq!(7, stored.size());

        let hit = cache.get("hash", "master.m3u8").expect("hit");
        assert_eq!(7, hit.size());
        assert!(cache.full_path(&hit).exists());
        assert!(cache.get("hash", "other.ts").is_none());
    }

    #[tokio::test]
    async fn restore_reindexes_stored_fragments() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let cache = FragmentCache::new(tmp.path());
        cache.store("hash", "a.ts", &[0u8; 100]).await.expect("store");
        cache.store("hash", "b.ts", &[0u8; 50]).await.expect("store");

        let fresh = FragmentCache::new(tmp.path());
        assert_eq!(2, fresh.restore().await.expect("restore"));
        assert_eq!(100, fresh.get("hash", "a.ts").expect("hit").size());
    }
}
