//! In-memory inventories for tests.
//!
//! Enabled for this crate's own tests and, through the `test-support` feature,
//! for downstream crates that need a local cache and a remote store without a
//! disk or a network.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::storage::{
    LocalEntry, LocalInventory, RemoteEntry, RemoteStore, StorageEstimate,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::naming::mime_type_for;

/// Local inventory held in a map, keyed by id.
#[derive(Default)]
pub struct MemoryInventory {
    entries: Mutex<BTreeMap<String, (LocalEntry, Bytes)>>,
    deleted: Mutex<Vec<String>>,
    quota: Mutex<Option<u64>>,
    fail_list: AtomicBool,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `data` under `name`, using the name as id.
    pub fn insert(&self, name: &str, data: &'static [u8], created_at: DateTime<Utc>) {
        let entry = LocalEntry {
            id: name.to_string(),
            name: name.to_string(),
            mime_type: mime_type_for(name).to_string(),
            size: data.len() as u64,
            duration_secs: None,
            created_at,
        };
        self.entries
            .lock()
            .insert(name.to_string(), (entry, Bytes::from_static(data)));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    /// Ids passed to `delete`, in call order
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }

    pub fn set_quota(&self, quota: Option<u64>) {
        *self.quota.lock() = quota;
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LocalInventory for MemoryInventory {
    async fn list(&self) -> Result<Vec<LocalEntry>> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(BridgeError::OperationFailed("cache unavailable".to_string()));
        }
        Ok(self
            .entries
            .lock()
            .values()
            .map(|(entry, _)| entry.clone())
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Bytes>> {
        Ok(self.entries.lock().get(id).map(|(_, data)| data.clone()))
    }

    async fn put(&self, entry: LocalEntry, data: Bytes) -> Result<()> {
        self.entries.lock().insert(entry.id.clone(), (entry, data));
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.deleted.lock().push(id.to_string());
        self.entries.lock().remove(id);
        Ok(())
    }

    async fn estimate(&self) -> Result<Option<StorageEstimate>> {
        let Some(quota) = *self.quota.lock() else {
            return Ok(None);
        };
        let usage = self.entries.lock().values().map(|(e, _)| e.size).sum();
        Ok(Some(StorageEstimate { usage, quota }))
    }
}

/// Remote store held in a map, keyed by repository path.
#[derive(Default)]
pub struct MemoryRemote {
    files: Mutex<BTreeMap<String, (RemoteEntry, Bytes)>>,
    failing_paths: Mutex<HashSet<String>>,
    fail_list: AtomicBool,
    puts: AtomicUsize,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &str, data: &'static [u8]) {
        let revision = self.puts.fetch_add(1, Ordering::SeqCst);
        self.store(path, Bytes::from_static(data), revision);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.lock().contains_key(path)
    }

    pub fn content(&self, path: &str) -> Option<Bytes> {
        self.files.lock().get(path).map(|(_, data)| data.clone())
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.lock().keys().cloned().collect()
    }

    /// Makes writes and deletes to `path` fail
    pub fn fail_path(&self, path: &str) {
        self.failing_paths.lock().insert(path.to_string());
    }

    pub fn recover_path(&self, path: &str) {
        self.failing_paths.lock().remove(path);
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    fn store(&self, path: &str, data: Bytes, revision: usize) -> RemoteEntry {
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        let entry = RemoteEntry {
            name,
            path: path.to_string(),
            sha: format!("sha-{}", revision),
            size: data.len() as u64,
            download_url: Some(format!("https://raw.example.test/{}", path)),
            is_dir: false,
        };
        self.files
            .lock()
            .insert(path.to_string(), (entry.clone(), data));
        entry
    }

    fn check_path(&self, path: &str) -> Result<()> {
        if self.failing_paths.lock().contains(path) {
            return Err(BridgeError::Network(format!("write to {} failed", path)));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn check_access(&self) -> Result<()> {
        Ok(())
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(BridgeError::Network("remote unavailable".to_string()));
        }
        let prefix = format!("{}/", path.trim_matches('/'));
        Ok(self
            .files
            .lock()
            .iter()
            .filter(|(p, _)| p.starts_with(&prefix) && !p[prefix.len()..].contains('/'))
            .map(|(_, (entry, _))| entry.clone())
            .collect())
    }

    async fn get_metadata(&self, path: &str) -> Result<Option<RemoteEntry>> {
        Ok(self.files.lock().get(path).map(|(entry, _)| entry.clone()))
    }

    async fn put_content(
        &self,
        path: &str,
        data: Bytes,
        _message: &str,
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<RemoteEntry> {
        progress(0.0);
        self.check_path(path)?;
        progress(0.5);
        let revision = self.puts.fetch_add(1, Ordering::SeqCst);
        let entry = self.store(path, data, revision);
        progress(1.0);
        Ok(entry)
    }

    async fn delete_content(&self, path: &str, _message: &str) -> Result<()> {
        self.check_path(path)?;
        self.files.lock().remove(path);
        Ok(())
    }

    async fn resolve_download_url(&self, path: &str) -> Result<String> {
        self.files
            .lock()
            .get(path)
            .and_then(|(entry, _)| entry.download_url.clone())
            .ok_or_else(|| BridgeError::OperationFailed(format!("{} not found", path)))
    }
}
