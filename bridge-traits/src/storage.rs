//! Storage Abstractions
//!
//! Two independently failing inventories back the combined file listing:
//! - [`LocalInventory`]: the disposable on-device cache of not-yet-uploaded media
//! - [`RemoteStore`]: the authoritative repository-backed store

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Record describing one entry of the local durable cache.
///
/// The payload itself is fetched separately through [`LocalInventory::get`] so
/// that listings stay cheap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalEntry {
    /// Cache key
    pub id: String,
    /// File name following the media naming convention
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    /// Media duration in seconds, when known
    pub duration_secs: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Storage usage reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageEstimate {
    pub usage: u64,
    pub quota: u64,
}

impl StorageEstimate {
    pub fn available(&self) -> u64 {
        self.quota.saturating_sub(self.usage)
    }
}

/// Local durable key-value file cache.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::LocalInventory;
///
/// async fn count(cache: &dyn LocalInventory) -> Result<usize> {
///     Ok(cache.list().await?.len())
/// }
/// ```
#[async_trait]
pub trait LocalInventory: Send + Sync {
    /// List all cached entries
    async fn list(&self) -> Result<Vec<LocalEntry>>;

    /// Read an entry's payload; `Ok(None)` if the id is unknown
    async fn get(&self, id: &str) -> Result<Option<Bytes>>;

    /// Insert or replace an entry
    async fn put(&self, entry: LocalEntry, data: Bytes) -> Result<()>;

    /// Delete an entry. Deleting a missing id is a no-op.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Storage usage estimate, if the host can provide one
    async fn estimate(&self) -> Result<Option<StorageEstimate>> {
        Ok(None)
    }
}

/// Entry listed from, or written to, the remote repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    /// Repository path
    pub path: String,
    /// Content hash assigned by the remote store
    pub sha: String,
    pub size: u64,
    /// Direct download URL, possibly short-lived
    pub download_url: Option<String>,
    pub is_dir: bool,
}

/// Authoritative remote store.
///
/// Implementations are responsible for retrying transient failures; errors that
/// reach the caller are either permanent or exhausted.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Verify the credentials can reach the repository
    async fn check_access(&self) -> Result<()>;

    /// List a directory. A directory that does not exist yet lists as empty.
    async fn list_directory(&self, path: &str) -> Result<Vec<RemoteEntry>>;

    /// Fetch metadata for one file; `Ok(None)` if it does not exist
    async fn get_metadata(&self, path: &str) -> Result<Option<RemoteEntry>>;

    /// Create or replace a file
    ///
    /// `progress` receives the completed fraction of the transfer, in `[0, 1]`.
    ///
    /// Writing the same path twice replaces the content, which makes uploads
    /// idempotent per path.
    async fn put_content(
        &self,
        path: &str,
        data: Bytes,
        message: &str,
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<RemoteEntry>;

    /// Delete a file. Deleting a missing file is a no-op.
    async fn delete_content(&self, path: &str, message: &str) -> Result<()>;

    /// Resolve a currently valid download URL for a file
    async fn resolve_download_url(&self, path: &str) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_estimate_available() {
        let estimate = StorageEstimate {
            usage: 700,
            quota: 1000,
        };
        assert_eq!(estimate.available(), 300);

        let over = StorageEstimate {
            usage: 1200,
            quota: 1000,
        };
        assert_eq!(over.available(), 0);
    }
}
