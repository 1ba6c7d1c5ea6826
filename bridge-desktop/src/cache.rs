//! Local Media Cache using Tokio file I/O
//!
//! Payloads are stored one file per entry under the cache root, named by the
//! entry id. Entry records live in a JSON index next to them.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{LocalEntry, LocalInventory, StorageEstimate},
};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const INDEX_FILE: &str = "index.json";

/// Default quota reported in storage estimates (2 GiB)
pub const DEFAULT_QUOTA_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Tokio-based local media cache
pub struct TokioFileCache {
    root: PathBuf,
    quota: u64,
    // Serializes index read-modify-write cycles
    index_lock: Mutex<()>,
}

impl TokioFileCache {
    /// Create a cache rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            quota: DEFAULT_QUOTA_BYTES,
            index_lock: Mutex::new(()),
        }
    }

    /// Create a cache in the platform cache directory
    pub fn in_user_cache() -> Self {
        let root = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("media-capture-core")
            .join("media");
        Self::new(root)
    }

    /// Override the quota reported by [`LocalInventory::estimate`]
    pub fn with_quota(mut self, quota: u64) -> Self {
        self.quota = quota;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    fn payload_path(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty()
            || id == INDEX_FILE
            || id.starts_with('.')
            || id.contains(['/', '\\'])
        {
            return Err(BridgeError::OperationFailed(format!(
                "Invalid cache entry id: {}",
                id
            )));
        }
        Ok(self.root.join(id))
    }

    async fn read_index(&self) -> Result<BTreeMap<String, LocalEntry>> {
        match fs::read(self.index_path()).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| {
                BridgeError::OperationFailed(format!("Corrupt cache index: {}", e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }

    async fn write_index(&self, index: &BTreeMap<String, LocalEntry>) -> Result<()> {
        let raw = serde_json::to_vec_pretty(index).map_err(|e| {
            BridgeError::OperationFailed(format!("Failed to encode cache index: {}", e))
        })?;
        write_atomic(&self.index_path(), &raw).await
    }
}

/// Write through a temporary file and rename, so readers never see partial data.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, data).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl LocalInventory for TokioFileCache {
    async fn list(&self) -> Result<Vec<LocalEntry>> {
        let _guard = self.index_lock.lock().await;
        let index = self.read_index().await?;
        Ok(index.into_values().collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Bytes>> {
        let path = self.payload_path(id)?;
        match fs::read(&path).await {
            Ok(data) => {
                debug!(id, size = data.len(), "Read cache entry");
                Ok(Some(Bytes::from(data)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }

    async fn put(&self, entry: LocalEntry, data: Bytes) -> Result<()> {
        let path = self.payload_path(&entry.id)?;
        let _guard = self.index_lock.lock().await;

        write_atomic(&path, &data).await?;

        let mut index = self.read_index().await?;
        let id = entry.id.clone();
        index.insert(
            id.clone(),
            LocalEntry {
                size: data.len() as u64,
                ..entry
            },
        );
        self.write_index(&index).await?;

        debug!(id = %id, size = data.len(), "Wrote cache entry");
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let path = self.payload_path(id)?;
        let _guard = self.index_lock.lock().await;

        let mut index = self.read_index().await?;
        if index.remove(id).is_some() {
            self.write_index(&index).await?;
        }

        match fs::remove_file(&path).await {
            Ok(()) => debug!(id, "Deleted cache entry"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(id, error = %e, "Failed to remove cache payload");
                return Err(BridgeError::Io(e));
            }
        }
        Ok(())
    }

    async fn estimate(&self) -> Result<Option<StorageEstimate>> {
        let _guard = self.index_lock.lock().await;
        let usage = self.read_index().await?.values().map(|e| e.size).sum();
        Ok(Some(StorageEstimate {
            usage,
            quota: self.quota,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn temp_cache() -> TokioFileCache {
        let root = std::env::temp_dir().join(format!("bridge-desktop-cache-{}", uuid::Uuid::new_v4()));
        TokioFileCache::new(root)
    }

    fn entry(name: &str) -> LocalEntry {
        LocalEntry {
            id: name.to_string(),
            name: name.to_string(),
            mime_type: "audio/mpeg".to_string(),
            size: 0,
            duration_secs: Some(3.5),
            created_at: Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_put_list_get_delete() {
        let cache = temp_cache();
        let name = "music_MySong_Jane_2024-01-10.mp3";

        cache
            .put(entry(name), Bytes::from_static(b"abc"))
            .await
            .unwrap();

        let listed = cache.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].size, 3);
        assert_eq!(listed[0].duration_secs, Some(3.5));

        let data = cache.get(name).await.unwrap();
        assert_eq!(data, Some(Bytes::from_static(b"abc")));

        cache.delete(name).await.unwrap();
        assert!(cache.list().await.unwrap().is_empty());
        assert_eq!(cache.get(name).await.unwrap(), None);

        // Deleting again is a no-op
        cache.delete(name).await.unwrap();

        let _ = fs::remove_dir_all(cache.root()).await;
    }

    #[tokio::test]
    async fn test_list_on_missing_root_is_empty() {
        let cache = temp_cache();
        assert!(cache.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_estimate_sums_entry_sizes() {
        let cache = temp_cache().with_quota(100);
        cache
            .put(entry("a_b_c_2024-01-01.mp3"), Bytes::from(vec![0u8; 40]))
            .await
            .unwrap();

        let estimate = cache.estimate().await.unwrap().unwrap();
        assert_eq!(estimate.usage, 40);
        assert_eq!(estimate.available(), 60);

        let _ = fs::remove_dir_all(cache.root()).await;
    }

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let cache = temp_cache();
        assert!(cache.get("../escape").await.is_err());
        assert!(cache.get(INDEX_FILE).await.is_err());
    }
}
