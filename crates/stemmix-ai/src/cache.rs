//! On-disk result cache for separations and feature analysis.
//!
//! Layout:
//! ```text
//! cache_dir/
//!   entries/
//!     stems-{key}.json      # {key, createdAt, value: {stems, method}}
//!     features-{key}.json   # {key, createdAt, value: Features}
//!   stems/
//!     {key}/vocals.wav ...  # layer files owned by the cache
//! ```
//!
//! Entries are written atomically (temp file, then rename) and never locked.
//! Reads validate: a stale, unparsable or incomplete entry is evicted and
//! reported as a miss.

use crate::separation::SeparationMethod;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use stemmix_core::cache_layout::{ENTRIES_DIR, KEY_HEX_LEN, STEMS_DIR};
use stemmix_core::{Result, StemKind, StemSet, StemmixConfig, StemmixError};
use tracing::{debug, info, warn};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Deterministic cache key for a source base name.
///
/// Unrelated files that share a base name share a key.
pub fn cache_key(base_name: &str) -> String {
    let digest = Sha256::digest(base_name.as_bytes());
    let mut key = hex::encode(digest);
    key.truncate(KEY_HEX_LEN);
    key
}

/// Kind of cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Stems,
    Features,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stems => "stems",
            Self::Features => "features",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Entry<T> {
    key: String,
    created_at: u64,
    value: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryHeader {
    created_at: u64,
}

/// A cached separation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedStems {
    pub stems: StemSet,
    pub method: SeparationMethod,
}

/// File-backed cache shared by all jobs.
#[derive(Debug, Clone)]
pub struct ResultCache {
    root: PathBuf,
    retention: Duration,
}

impl ResultCache {
    pub fn new(root: impl Into<PathBuf>, retention: Duration) -> Self {
        Self {
            root: root.into(),
            retention,
        }
    }

    pub fn from_config(config: &StemmixConfig) -> Self {
        Self::new(&config.cache_dir, config.cache_retention())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, kind: EntryKind, key: &str) -> PathBuf {
        self.root
            .join(ENTRIES_DIR)
            .join(format!("{}-{key}.json", kind.as_str()))
    }

    fn stems_dir(&self, key: &str) -> PathBuf {
        self.root.join(STEMS_DIR).join(key)
    }

    fn is_stale(&self, created_at: u64) -> bool {
        now_secs().saturating_sub(created_at) > self.retention.as_secs()
    }

    /// Read a value; any problem with the entry is a miss.
    pub fn read<T: DeserializeOwned>(&self, kind: EntryKind, key: &str) -> Option<T> {
        let path = self.entry_path(kind, key);
        let data = std::fs::read_to_string(&path).ok()?;
        let entry: Entry<T> = match serde_json::from_str(&data) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt cache entry; evicting");
                self.evict_quietly(kind, key);
                return None;
            }
        };
        if entry.key != key || self.is_stale(entry.created_at) {
            debug!(kind = kind.as_str(), key, "Stale cache entry; evicting");
            self.evict_quietly(kind, key);
            return None;
        }
        Some(entry.value)
    }

    /// Write a value atomically.
    pub fn write<T: Serialize>(&self, kind: EntryKind, key: &str, value: &T) -> Result<()> {
        let path = self.entry_path(kind, key);
        let entry = Entry {
            key: key.to_string(),
            created_at: now_secs(),
            value,
        };
        let json = serde_json::to_string_pretty(&entry)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = tmp_sibling(&path);
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            StemmixError::Cache(format!("Failed to commit {}: {e}", path.display()))
        })?;
        debug!(kind = kind.as_str(), key, "Cache entry written");
        Ok(())
    }

    /// Remove an entry and, for stems, the files it owns.
    pub fn evict(&self, kind: EntryKind, key: &str) -> Result<()> {
        remove_if_exists(&self.entry_path(kind, key))?;
        if kind == EntryKind::Stems {
            let dir = self.stems_dir(key);
            if dir.exists() {
                std::fs::remove_dir_all(&dir)?;
            }
        }
        Ok(())
    }

    fn evict_quietly(&self, kind: EntryKind, key: &str) {
        if let Err(e) = self.evict(kind, key) {
            warn!(kind = kind.as_str(), key, error = %e, "Failed to evict cache entry");
        }
    }

    /// Copy `stems` into the cache and record them under `key`.
    ///
    /// The returned set points at the cache's own copies.
    pub async fn store_stems(
        &self,
        key: &str,
        stems: &StemSet,
        method: SeparationMethod,
    ) -> Result<CachedStems> {
        let dir = self.stems_dir(key);
        tokio::fs::create_dir_all(&dir).await?;

        let mut cached = stems.clone();
        for (kind, src) in stems.iter() {
            let dest = dir.join(layer_file_name(kind, src));
            let tmp = tmp_sibling(&dest);
            tokio::fs::copy(src, &tmp).await?;
            tokio::fs::rename(&tmp, &dest).await?;
            *cached.get_mut(kind) = dest;
        }

        let entry = CachedStems {
            stems: cached,
            method,
        };
        self.write(EntryKind::Stems, key, &entry)?;
        info!(key, method = method.as_str(), "Stems cached");
        Ok(entry)
    }

    /// Read cached stems, re-checking every layer file.
    pub fn read_stems(&self, key: &str) -> Option<CachedStems> {
        let entry: CachedStems = self.read(EntryKind::Stems, key)?;
        if let Err(e) = entry.stems.validate() {
            warn!(key, error = %e, "Cached stems incomplete; evicting");
            self.evict_quietly(EntryKind::Stems, key);
            return None;
        }
        Some(entry)
    }

    /// Remove stale or unreadable entries and their stem directories.
    ///
    /// Returns how many entries were removed.
    pub fn purge_stale(&self) -> Result<usize> {
        let entries_dir = self.root.join(ENTRIES_DIR);
        let listing = match std::fs::read_dir(&entries_dir) {
            Ok(listing) => listing,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for item in listing {
            let path = item?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            // Leftovers from interrupted writes.
            if name.contains(".tmp-") {
                remove_if_exists(&path)?;
                continue;
            }
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            let keep = std::fs::read_to_string(&path)
                .ok()
                .and_then(|data| serde_json::from_str::<EntryHeader>(&data).ok())
                .is_some_and(|h| !self.is_stale(h.created_at));
            if keep {
                continue;
            }
            remove_if_exists(&path)?;
            if let Some(key) = stem.strip_prefix("stems-") {
                let dir = self.stems_dir(key);
                if dir.exists() {
                    std::fs::remove_dir_all(&dir)?;
                }
            }
            removed += 1;
        }
        info!(removed, "Cache purged");
        Ok(removed)
    }
}

fn layer_file_name(kind: StemKind, src: &Path) -> String {
    match src.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}.{ext}", kind.as_str()),
        None => kind.as_str().to_string(),
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".tmp-{}-{n}", std::process::id()));
    path.with_file_name(name)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stemmix_core::Features;

    const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    fn layers(dir: &Path) -> StemSet {
        std::fs::create_dir_all(dir).unwrap();
        StemSet::from_fn(|kind| {
            let path = dir.join(format!("{}.wav", kind.as_str()));
            std::fs::write(&path, kind.as_str()).unwrap();
            path
        })
    }

    #[test]
    fn test_key_is_deterministic() {
        assert_eq!(cache_key("song"), cache_key("song"));
        assert_ne!(cache_key("song"), cache_key("other"));
        assert_eq!(cache_key("song").len(), KEY_HEX_LEN);
    }

    #[test]
    fn test_features_round_trip() {
        let tmp = tempfile::tempdir().expect("failed to create tempdir");
        let cache = ResultCache::new(tmp.path(), WEEK);
        let features = Features {
            bpm: 97.0,
            key: "D Minor".into(),
            energy: 0.4,
            clarity: 0.8,
        };
        cache.write(EntryKind::Features, "abc", &features).unwrap();
        assert_eq!(cache.read::<Features>(EntryKind::Features, "abc"), Some(features));
        assert!(cache.read::<Features>(EntryKind::Features, "missing").is_none());
    }

    #[test]
    fn test_corrupt_entry_is_evicted() {
        let tmp = tempfile::tempdir().expect("failed to create tempdir");
        let cache = ResultCache::new(tmp.path(), WEEK);
        let path = cache.entry_path(EntryKind::Features, "bad");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{truncated").unwrap();

        assert!(cache.read::<Features>(EntryKind::Features, "bad").is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_stems_are_copied_into_cache() {
        let tmp = tempfile::tempdir().expect("failed to create tempdir");
        let cache = ResultCache::new(tmp.path().join("cache"), WEEK);
        let work = layers(&tmp.path().join("work"));

        let stored = cache
            .store_stems("k1", &work, SeparationMethod::Filter)
            .await
            .unwrap();
        assert!(stored.stems.vocals.starts_with(cache.root()));

        // Removing the job's copies must not affect the cache.
        std::fs::remove_dir_all(tmp.path().join("work")).unwrap();
        let hit = cache.read_stems("k1").unwrap();
        assert_eq!(hit.method, SeparationMethod::Filter);
        assert_eq!(hit.stems, stored.stems);
    }

    #[tokio::test]
    async fn test_missing_layer_invalidates_entry() {
        let tmp = tempfile::tempdir().expect("failed to create tempdir");
        let cache = ResultCache::new(tmp.path().join("cache"), WEEK);
        let work = layers(&tmp.path().join("work"));
        let stored = cache.store_stems("k2", &work, SeparationMethod::Ml).await.unwrap();

        std::fs::remove_file(&stored.stems.drums).unwrap();
        assert!(cache.read_stems("k2").is_none());
        assert!(!cache.entry_path(EntryKind::Stems, "k2").exists());
        assert!(!stored.stems.vocals.exists());
    }

    #[tokio::test]
    async fn test_purge_removes_stale_entries() {
        let tmp = tempfile::tempdir().expect("failed to create tempdir");
        let cache = ResultCache::new(tmp.path(), WEEK);
        let work = layers(&tmp.path().join("work"));
        cache.store_stems("old", &work, SeparationMethod::Ml).await.unwrap();
        cache.write(EntryKind::Features, "fresh", &Features::default()).unwrap();

        // Backdate one entry past retention.
        let path = cache.entry_path(EntryKind::Stems, "old");
        let mut raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        raw["createdAt"] = serde_json::json!(1);
        std::fs::write(&path, raw.to_string()).unwrap();

        assert_eq!(cache.purge_stale().unwrap(), 1);
        assert!(!cache.stems_dir("old").exists());
        assert!(cache.read::<Features>(EntryKind::Features, "fresh").is_some());
    }
}
