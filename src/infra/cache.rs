//! Persistent on-disk cache for downloaded classification shards.
//!
//! One JSON file per shard filename, plus a metadata file carrying the
//! segmentation stamp of the generation the shards belong to. The cache is
//! versioned as a whole: a stamp change wipes every shard, never a subset.

use std::fs;
use std::io;
use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeError;
use thiserror::Error;
use tracing::{debug, info, warn};

const APP_QUALIFIER: &str = "com";
const APP_ORG: &str = "TariffCore";
const APP_NAME: &str = "TariffCore";

const METADATA_FILENAME: &str = "cache-metadata.json";

/// Chapter prefixes ordered by historical US import volume. The pre-warm
/// queue caches these shards first so the most common lookups hit disk.
#[rustfmt::skip]
pub const PRIORITY_CHAPTERS: &[&str] = &[
    // Top priority
    "85", "84", "87", "94", "39", "90", "30",
    // Medium priority
    "71", "95", "61", "62", "64", "42", "73",
    // Other major categories
    "29", "40", "48", "72", "76", "27", "96",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheMetadata {
    /// Version stamp of the segment index the cached shards came from.
    segmentation_date: String,
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache directory unavailable")]
    StorageUnavailable,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serde(#[from] SerdeError),
}

/// Opaque key-value store over shard filenames. Each write is independent
/// and idempotent, so interrupted background work never leaves the cache
/// inconsistent.
#[derive(Clone, Debug)]
pub struct ShardCache {
    root: PathBuf,
}

impl ShardCache {
    /// Opens a cache rooted at an explicit directory, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Opens the cache in the per-user application data directory.
    pub fn open_default() -> Result<Self, CacheError> {
        let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
            .ok_or(CacheError::StorageUnavailable)?;
        Self::new(dirs.data_local_dir().join("shards"))
    }

    /// Raw shard JSON for a key, or `None` on a miss. Unreadable files
    /// degrade to a miss.
    pub fn get(&self, shard_key: &str) -> Option<String> {
        let path = self.root.join(shard_key);
        match fs::read_to_string(&path) {
            Ok(json) => {
                debug!(shard_key, "shard served from disk cache");
                Some(json)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => {
                warn!(shard_key, error = %err, "failed to read cached shard");
                None
            }
        }
    }

    /// Persists shard JSON under its key, replacing any previous content.
    pub fn put(&self, shard_key: &str, json: &str) -> Result<(), CacheError> {
        fs::write(self.root.join(shard_key), json)?;
        debug!(shard_key, bytes = json.len(), "shard written to disk cache");
        Ok(())
    }

    pub fn contains(&self, shard_key: &str) -> bool {
        self.root.join(shard_key).is_file()
    }

    /// Aligns the cache with the live index's version stamp. On a mismatch
    /// every cached shard is deleted before the new stamp is recorded; the
    /// cache is one atomic generation.
    pub fn synchronize(&self, segmentation_date: &str) -> Result<(), CacheError> {
        if let Some(metadata) = self.read_metadata() {
            if metadata.segmentation_date == segmentation_date {
                return Ok(());
            }
            info!(
                old = %metadata.segmentation_date,
                new = %segmentation_date,
                "segment index version changed; clearing cached shards"
            );
        }
        self.clear_shards()?;
        self.write_metadata(&CacheMetadata {
            segmentation_date: segmentation_date.to_string(),
        })
    }

    fn clear_shards(&self) -> Result<(), CacheError> {
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_name() == METADATA_FILENAME {
                continue;
            }
            if entry.file_type()?.is_file() {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    fn read_metadata(&self) -> Option<CacheMetadata> {
        let json = fs::read_to_string(self.root.join(METADATA_FILENAME)).ok()?;
        match serde_json::from_str(&json) {
            Ok(metadata) => Some(metadata),
            Err(err) => {
                warn!(error = %err, "unreadable cache metadata; treating cache as stale");
                None
            }
        }
    }

    fn write_metadata(&self, metadata: &CacheMetadata) -> Result<(), CacheError> {
        let json = serde_json::to_string_pretty(metadata)?;
        fs::write(self.root.join(METADATA_FILENAME), json)?;
        Ok(())
    }
}

/// Orders shard filenames so high-volume chapters download first; files
/// outside the priority list keep their relative order at the back.
pub fn prioritized(mut files: Vec<String>) -> Vec<String> {
    files.sort_by_key(|file| {
        chapter_of(file)
            .and_then(|chapter| PRIORITY_CHAPTERS.iter().position(|p| *p == chapter))
            .unwrap_or(usize::MAX)
    });
    files
}

/// Chapter prefix of a shard filename, e.g. "tariff-851.json" -> "85".
fn chapter_of(file: &str) -> Option<&str> {
    let id = file.strip_prefix("tariff-")?.strip_suffix(".json")?;
    id.get(0..2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache() -> (TempDir, ShardCache) {
        let dir = TempDir::new().unwrap();
        let cache = ShardCache::new(dir.path()).unwrap();
        (dir, cache)
    }

    #[test]
    fn put_then_get_roundtrips() {
        let (_dir, cache) = cache();
        cache.put("tariff-721.json", r#"{"segment":"721"}"#).unwrap();

        assert!(cache.contains("tariff-721.json"));
        assert_eq!(
            cache.get("tariff-721.json").as_deref(),
            Some(r#"{"segment":"721"}"#)
        );
        assert_eq!(cache.get("tariff-761.json"), None);
    }

    #[test]
    fn synchronize_wipes_all_shards_on_version_change() {
        let (_dir, cache) = cache();
        cache.synchronize("2025-06-06").unwrap();
        cache.put("tariff-721.json", "{}").unwrap();
        cache.put("tariff-851.json", "{}").unwrap();

        cache.synchronize("2025-07-01").unwrap();

        assert!(!cache.contains("tariff-721.json"));
        assert!(!cache.contains("tariff-851.json"));
    }

    #[test]
    fn synchronize_keeps_shards_on_matching_version() {
        let (_dir, cache) = cache();
        cache.synchronize("2025-06-06").unwrap();
        cache.put("tariff-721.json", "{}").unwrap();

        cache.synchronize("2025-06-06").unwrap();

        assert!(cache.contains("tariff-721.json"));
    }

    #[test]
    fn missing_metadata_counts_as_stale() {
        let (_dir, cache) = cache();
        cache.put("tariff-721.json", "{}").unwrap();

        // First sync after a fresh install wipes whatever is lying around.
        cache.synchronize("2025-06-06").unwrap();

        assert!(!cache.contains("tariff-721.json"));
    }

    #[test]
    fn priority_chapters_sort_first() {
        let files = vec![
            "tariff-01.json".to_string(),
            "tariff-851.json".to_string(),
            "tariff-39.json".to_string(),
        ];
        let ordered = prioritized(files);
        assert_eq!(
            ordered,
            vec![
                "tariff-851.json".to_string(),
                "tariff-39.json".to_string(),
                "tariff-01.json".to_string(),
            ]
        );
    }

    #[test]
    fn unknown_chapters_keep_relative_order() {
        let files = vec![
            "tariff-02.json".to_string(),
            "tariff-01.json".to_string(),
            "tariff-1x.json".to_string(),
        ];
        let ordered = prioritized(files.clone());
        assert_eq!(ordered, files);
    }
}
