//! # Combined File Store
//!
//! Merges the local cache and the remote repository into one listing.
//!
//! ## Refresh
//!
//! 1. Fetch both inventories concurrently
//! 2. Delete every local entry whose name already exists remotely
//! 3. Merge the remaining local entries with the remote ones
//! 4. Sort by embedded date (newest first), then creation time, then name
//! 5. Index thumbnails by basename, one slot per origin
//!
//! A failing remote degrades the refresh to a local-only view. Nothing is
//! deleted in that case and the error is returned next to the view.
//!
//! The store takes no locks around refresh; uploads may run concurrently and
//! are picked up by the next refresh.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bridge_traits::error::BridgeError;
use bridge_traits::storage::{LocalEntry, LocalInventory, RemoteEntry, RemoteStore};
use bridge_traits::time::{Clock, SystemClock};
use bytes::Bytes;
use core_runtime::events::{CoreEvent, EventBus, InventoryEvent};
use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::error::{InventoryError, Result};
use crate::models::{InventoryView, MediaFile, MediaKind, Origin, RemoteLayout, ThumbnailPair};
use crate::naming::{basename, kind_for_mime, mime_type_for, MediaName};

/// Result of one refresh.
#[derive(Debug)]
pub struct RefreshOutcome {
    pub view: InventoryView,
    /// Names of local entries superseded by remote copies
    pub superseded: Vec<String>,
    /// Set when the remote could not be listed
    pub remote_error: Option<InventoryError>,
}

impl RefreshOutcome {
    pub fn is_degraded(&self) -> bool {
        self.remote_error.is_some()
    }
}

/// Remote listing split by directory
#[derive(Debug, Default)]
struct RemoteListing {
    media: Vec<RemoteEntry>,
    thumbnails: Vec<RemoteEntry>,
}

/// Merge of the two inventories, before any local deletion
#[derive(Debug)]
struct Reconciliation {
    view: InventoryView,
    superseded: Vec<LocalEntry>,
}

pub struct CombinedFileStore {
    local: Arc<dyn LocalInventory>,
    remote: Arc<dyn RemoteStore>,
    layout: RemoteLayout,
    events: EventBus,
    clock: Arc<dyn Clock>,
    latest: RwLock<Option<InventoryView>>,
}

impl CombinedFileStore {
    pub fn new(
        local: Arc<dyn LocalInventory>,
        remote: Arc<dyn RemoteStore>,
        layout: RemoteLayout,
        events: EventBus,
    ) -> Self {
        Self {
            local,
            remote,
            layout,
            events,
            clock: Arc::new(SystemClock),
            latest: RwLock::new(None),
        }
    }

    /// Replaces the clock used to timestamp local saves.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn layout(&self) -> &RemoteLayout {
        &self.layout
    }

    /// View produced by the last refresh
    pub fn latest(&self) -> Option<InventoryView> {
        self.latest.read().clone()
    }

    /// Rebuilds the combined listing.
    ///
    /// Fails only if the local inventory cannot be listed.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        let (local, remote) = tokio::join!(self.local.list(), self.fetch_remote());
        let local = local.map_err(InventoryError::Local)?;

        let (reconciliation, remote_error) = match remote {
            Ok(listing) => (reconcile(local, Some(listing)), None),
            Err(e) => {
                warn!(error = %e, "Remote listing failed, showing local files only");
                self.publish(InventoryEvent::RemoteUnavailable {
                    message: e.to_string(),
                });
                (reconcile(local, None), Some(e))
            }
        };

        let mut superseded = Vec::with_capacity(reconciliation.superseded.len());
        for entry in reconciliation.superseded {
            // Already-deleted ids are a no-op for the inventory
            if let Err(e) = self.local.delete(&entry.id).await {
                warn!(name = %entry.name, error = %e, "Failed to delete superseded local copy");
                continue;
            }
            debug!(name = %entry.name, "Deleted local copy superseded by remote");
            self.publish(InventoryEvent::LocalSuperseded {
                name: entry.name.clone(),
            });
            superseded.push(entry.name);
        }

        let view = reconciliation.view;
        let local_count = view.local_count();
        info!(
            total = view.len(),
            local = local_count,
            superseded = superseded.len(),
            degraded = remote_error.is_some(),
            "Inventory refreshed"
        );
        self.publish(InventoryEvent::Refreshed {
            total: view.len(),
            local: local_count,
            remote: view.len() - local_count,
            superseded: superseded.len(),
            degraded: remote_error.is_some(),
        });

        *self.latest.write() = Some(view.clone());

        Ok(RefreshOutcome {
            view,
            superseded,
            remote_error,
        })
    }

    /// Saves a captured file to the local cache.
    ///
    /// The storage estimate is checked first so a full device fails with
    /// `InsufficientStorage` instead of mid-write.
    #[instrument(skip(self, payload), fields(size = payload.len()))]
    pub async fn save_local(
        &self,
        name: &str,
        payload: Bytes,
        duration_secs: Option<f64>,
    ) -> Result<MediaFile> {
        MediaName::parse(name)?;
        if payload.is_empty() {
            return Err(InventoryError::EmptyPayload(name.to_string()));
        }

        let required = payload.len() as u64;
        if let Some(estimate) = self.local.estimate().await.map_err(InventoryError::Local)? {
            if estimate.available() < required {
                return Err(InventoryError::InsufficientStorage {
                    required,
                    available: estimate.available(),
                });
            }
        }

        let entry = LocalEntry {
            id: name.to_string(),
            name: name.to_string(),
            mime_type: mime_type_for(name).to_string(),
            size: required,
            duration_secs,
            created_at: self.clock.now(),
        };

        self.local
            .put(entry.clone(), payload)
            .await
            .map_err(|e| match e {
                BridgeError::InsufficientStorage {
                    required,
                    available,
                } => InventoryError::InsufficientStorage {
                    required,
                    available,
                },
                other => InventoryError::Local(other),
            })?;

        info!(name, "Saved capture to local cache");
        Ok(MediaFile::from_local(entry))
    }

    /// Reads the cached payload of a local file.
    pub async fn read_payload(&self, file: &MediaFile) -> Result<Bytes> {
        let handle = file
            .payload_handle()
            .ok_or_else(|| InventoryError::NotLocal(file.name.clone()))?;

        self.local
            .get(handle)
            .await
            .map_err(InventoryError::Local)?
            .ok_or_else(|| InventoryError::PayloadMissing(file.name.clone()))
    }

    /// Local thumbnail sharing the basename of a local media file.
    pub async fn find_local_thumbnail(&self, file: &MediaFile) -> Result<Option<MediaFile>> {
        if !file.origin.is_local() {
            return Ok(None);
        }
        let wanted = file.basename();
        let entries = self.local.list().await.map_err(InventoryError::Local)?;

        Ok(entries
            .into_iter()
            .filter(|entry| entry.id != file.id)
            .filter(|entry| kind_for_mime(&entry.mime_type) == MediaKind::Thumbnail)
            .find(|entry| basename(&entry.name) == wanted)
            .map(MediaFile::from_local))
    }

    /// Deletes a remote media file and, best effort, its remote thumbnail.
    #[instrument(skip(self, file), fields(name = %file.name))]
    pub async fn delete_remote(&self, file: &MediaFile) -> Result<()> {
        let path = file
            .remote_path()
            .ok_or_else(|| InventoryError::NotRemote(file.name.clone()))?;
        let message = format!("Delete {}", file.name);

        self.remote
            .delete_content(path, &message)
            .await
            .map_err(InventoryError::Remote)?;

        let thumbnail = self.layout.thumbnail_path(&file.name);
        if let Err(e) = self.remote.delete_content(&thumbnail, &message).await {
            warn!(path = %thumbnail, error = %e, "Failed to delete remote thumbnail");
        }
        Ok(())
    }

    /// Currently valid download URL for a remote file.
    pub async fn download_url(&self, file: &MediaFile) -> Result<String> {
        let path = file
            .remote_path()
            .ok_or_else(|| InventoryError::NotRemote(file.name.clone()))?;
        self.remote
            .resolve_download_url(path)
            .await
            .map_err(InventoryError::Remote)
    }

    async fn fetch_remote(&self) -> Result<RemoteListing> {
        let (media, thumbnails) = tokio::try_join!(
            self.remote.list_directory(&self.layout.media_dir),
            self.remote.list_directory(&self.layout.thumbnail_dir),
        )
        .map_err(InventoryError::Remote)?;

        Ok(RemoteListing {
            media: media.into_iter().filter(|e| !e.is_dir).collect(),
            thumbnails: thumbnails.into_iter().filter(|e| !e.is_dir).collect(),
        })
    }

    fn publish(&self, event: InventoryEvent) {
        let _ = self.events.emit(CoreEvent::Inventory(event));
    }
}

/// Pure merge step of a refresh. `remote` is `None` when the remote failed.
fn reconcile(local: Vec<LocalEntry>, remote: Option<RemoteListing>) -> Reconciliation {
    let remote = remote.unwrap_or_default();

    let remote_names: HashSet<&str> = remote
        .media
        .iter()
        .chain(remote.thumbnails.iter())
        .map(|e| e.name.as_str())
        .collect();
    // Thumbnails are re-encoded on upload, so only the basename survives
    let remote_thumbnail_bases: HashSet<&str> =
        remote.thumbnails.iter().map(|e| basename(&e.name)).collect();
    // A local thumbnail of remote media can never pair again
    let remote_media_bases: HashSet<&str> =
        remote.media.iter().map(|e| basename(&e.name)).collect();

    let (superseded, kept): (Vec<LocalEntry>, Vec<LocalEntry>) =
        local.into_iter().partition(|entry| {
            remote_names.contains(entry.name.as_str())
                || (kind_for_mime(&entry.mime_type) == MediaKind::Thumbnail
                    && (remote_thumbnail_bases.contains(basename(&entry.name))
                        || remote_media_bases.contains(basename(&entry.name))))
        });

    let (local_thumbnails, local_media): (Vec<MediaFile>, Vec<MediaFile>) = kept
        .into_iter()
        .map(MediaFile::from_local)
        .partition(MediaFile::is_thumbnail);

    let remote_media = remote.media.iter().cloned().map(|entry| {
        let kind = kind_for_mime(mime_type_for(&entry.name));
        MediaFile::from_remote(entry, kind)
    });
    let remote_thumbnails = remote
        .thumbnails
        .iter()
        .cloned()
        .map(|entry| MediaFile::from_remote(entry, MediaKind::Thumbnail));

    let mut files: Vec<MediaFile> = local_media
        .into_iter()
        .chain(remote_media.filter(|f| !f.is_thumbnail()))
        .collect();
    sort_files(&mut files);

    let mut seen = HashSet::new();
    files.retain(|f| seen.insert(f.name.clone()));

    let mut all_thumbnails: Vec<MediaFile> = local_thumbnails.into_iter().chain(remote_thumbnails).collect();
    sort_files(&mut all_thumbnails);

    let mut thumbnails: HashMap<String, ThumbnailPair> = HashMap::new();
    for thumbnail in all_thumbnails {
        let pair = thumbnails.entry(thumbnail.basename().to_string()).or_default();
        let slot = match thumbnail.origin {
            Origin::Local { .. } => &mut pair.local,
            Origin::Remote { .. } => &mut pair.remote,
        };
        if slot.is_none() {
            *slot = Some(thumbnail);
        }
    }

    Reconciliation {
        view: InventoryView { files, thumbnails },
        superseded,
    }
}

/// Embedded date descending, then creation time descending, then name.
fn sort_files(files: &mut [MediaFile]) {
    files.sort_by(|a, b| {
        b.date()
            .cmp(&a.date())
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.name.cmp(&b.name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryInventory, MemoryRemote};
    use bridge_traits::storage::StorageEstimate;
    use bridge_traits::time::FixedClock;
    use chrono::{TimeZone, Utc};

    fn at(day: u32, hour: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
    }

    fn store(local: &Arc<MemoryInventory>, remote: &Arc<MemoryRemote>) -> CombinedFileStore {
        CombinedFileStore::new(
            local.clone(),
            remote.clone(),
            RemoteLayout::default(),
            EventBus::new(64),
        )
    }

    fn names(view: &InventoryView) -> Vec<&str> {
        view.files.iter().map(|f| f.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_remote_copy_supersedes_local() {
        let local = Arc::new(MemoryInventory::new());
        let remote = Arc::new(MemoryRemote::new());
        local.insert("music_MySong_Jane_2024-01-10.mp3", b"local", at(10, 9));
        remote.insert("media/music_MySong_Jane_2024-01-10.mp3", b"remote");

        let outcome = store(&local, &remote).refresh().await.unwrap();

        assert_eq!(outcome.view.len(), 1);
        let file = &outcome.view.files[0];
        assert!(file.uploaded());
        assert_eq!(file.remote_path(), Some("media/music_MySong_Jane_2024-01-10.mp3"));
        assert_eq!(outcome.superseded, vec!["music_MySong_Jane_2024-01-10.mp3"]);
        assert!(!local.contains("music_MySong_Jane_2024-01-10.mp3"));
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let local = Arc::new(MemoryInventory::new());
        let remote = Arc::new(MemoryRemote::new());
        local.insert("music_A_Jane_2024-01-05.mp3", b"a", at(5, 9));
        local.insert("music_B_Jane_2024-01-07.mp3", b"b", at(7, 9));
        remote.insert("media/music_B_Jane_2024-01-07.mp3", b"b");
        remote.insert("media/video_C_Jane_2024-01-06.webm", b"c");
        let store = store(&local, &remote);

        let first = store.refresh().await.unwrap();
        let second = store.refresh().await.unwrap();

        assert_eq!(first.view, second.view);
        assert!(second.superseded.is_empty());
        assert_eq!(local.deleted(), vec!["music_B_Jane_2024-01-07.mp3"]);
        assert_eq!(store.latest(), Some(second.view));
    }

    #[tokio::test]
    async fn test_sort_by_date_then_created_then_name() {
        let local = Arc::new(MemoryInventory::new());
        let remote = Arc::new(MemoryRemote::new());
        local.insert("music_Old_Jane_2023-12-31.mp3", b"x", at(20, 9));
        local.insert("music_Early_Jane_2024-01-10.mp3", b"x", at(10, 8));
        local.insert("music_Late_Jane_2024-01-10.mp3", b"x", at(10, 18));
        local.insert("untitled.mp3", b"x", at(30, 9));
        remote.insert("media/music_Remote_Bob_2024-01-10.mp3", b"x");
        remote.insert("media/music_Newest_Bob_2024-02-01.mp3", b"x");

        let outcome = store(&local, &remote).refresh().await.unwrap();

        assert_eq!(
            names(&outcome.view),
            vec![
                "music_Newest_Bob_2024-02-01.mp3",
                "music_Late_Jane_2024-01-10.mp3",
                "music_Early_Jane_2024-01-10.mp3",
                "music_Remote_Bob_2024-01-10.mp3",
                "music_Old_Jane_2023-12-31.mp3",
                "untitled.mp3",
            ]
        );
    }

    #[tokio::test]
    async fn test_thumbnails_only_pair_with_same_origin() {
        let local = Arc::new(MemoryInventory::new());
        let remote = Arc::new(MemoryRemote::new());
        local.insert("music_Mine_Jane_2024-01-10.mp3", b"x", at(10, 9));
        local.insert("music_Mine_Jane_2024-01-10.png", b"img", at(10, 9));
        // Remote thumbnail whose media is still local only
        remote.insert("thumbnails/music_Other_Jane_2024-01-09.jpg", b"img");
        local.insert("music_Other_Jane_2024-01-09.mp3", b"x", at(9, 9));
        remote.insert("media/music_Up_Bob_2024-01-08.mp3", b"x");
        remote.insert("thumbnails/music_Up_Bob_2024-01-08.jpg", b"img");

        let outcome = store(&local, &remote).refresh().await.unwrap();
        let view = &outcome.view;

        assert_eq!(view.len(), 3);
        let mine = view.find("music_Mine_Jane_2024-01-10.mp3").unwrap();
        assert_eq!(
            view.thumbnail_for(mine).map(|t| t.name.as_str()),
            Some("music_Mine_Jane_2024-01-10.png")
        );

        let other = view.find("music_Other_Jane_2024-01-09.mp3").unwrap();
        assert!(view.thumbnail_for(other).is_none());

        let up = view.find("music_Up_Bob_2024-01-08.mp3").unwrap();
        assert!(view.thumbnail_for(up).unwrap().uploaded());
        assert!(view.files.iter().all(|f| !f.is_thumbnail()));
    }

    #[tokio::test]
    async fn test_uploaded_thumbnail_supersedes_local_by_basename() {
        let local = Arc::new(MemoryInventory::new());
        let remote = Arc::new(MemoryRemote::new());
        local.insert("music_Up_Bob_2024-01-08.png", b"img", at(8, 9));
        remote.insert("thumbnails/music_Up_Bob_2024-01-08.jpg", b"img");

        let outcome = store(&local, &remote).refresh().await.unwrap();

        assert_eq!(outcome.superseded, vec!["music_Up_Bob_2024-01-08.png"]);
        assert!(local.ids().is_empty());
    }

    #[tokio::test]
    async fn test_orphaned_local_thumbnail_is_removed() {
        let local = Arc::new(MemoryInventory::new());
        let remote = Arc::new(MemoryRemote::new());
        // Primary made it up, the thumbnail did not
        local.insert("music_Up_Bob_2024-01-08.png", b"img", at(8, 9));
        remote.insert("media/music_Up_Bob_2024-01-08.mp3", b"x");

        let outcome = store(&local, &remote).refresh().await.unwrap();

        assert_eq!(outcome.superseded, vec!["music_Up_Bob_2024-01-08.png"]);
        assert!(local.ids().is_empty());
        let up = outcome.view.find("music_Up_Bob_2024-01-08.mp3").unwrap();
        assert!(outcome.view.thumbnail_for(up).is_none());
    }

    #[tokio::test]
    async fn test_remote_failure_degrades_without_deleting() {
        let local = Arc::new(MemoryInventory::new());
        local.insert("music_MySong_Jane_2024-01-10.mp3", b"x", at(10, 9));

        let remote = Arc::new(MemoryRemote::new());
        remote.insert("media/music_MySong_Jane_2024-01-10.mp3", b"remote");
        remote.fail_listing(true);

        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let store = CombinedFileStore::new(
            local.clone(),
            remote,
            RemoteLayout::default(),
            events,
        );

        let outcome = store.refresh().await.unwrap();

        assert!(outcome.is_degraded());
        assert!(outcome.remote_error.as_ref().unwrap().is_retryable());
        assert_eq!(names(&outcome.view), vec!["music_MySong_Jane_2024-01-10.mp3"]);
        assert!(local.deleted().is_empty());

        let first = rx.recv().await.unwrap();
        assert!(matches!(
            first,
            CoreEvent::Inventory(InventoryEvent::RemoteUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_local_failure_is_an_error() {
        let local = Arc::new(MemoryInventory::new());
        local.fail_listing(true);
        let remote = Arc::new(MemoryRemote::new());

        let result = store(&local, &remote).refresh().await;
        assert!(matches!(result, Err(InventoryError::Local(_))));
    }

    #[tokio::test]
    async fn test_save_local_checks_quota() {
        let local = Arc::new(MemoryInventory::new());
        let remote = Arc::new(MemoryRemote::new());
        local.insert("music_Big_Jane_2024-01-01.mp3", b"0123456789", at(1, 9));
        local.set_quota(Some(14));

        let clock = Arc::new(FixedClock(at(11, 12)));
        let store = store(&local, &remote).with_clock(clock);

        let error = store
            .save_local("music_New_Jane_2024-01-11.mp3", Bytes::from_static(b"12345"), None)
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            InventoryError::InsufficientStorage {
                required: 5,
                available: 4
            }
        ));

        let saved = store
            .save_local("music_New_Jane_2024-01-11.mp3", Bytes::from_static(b"1234"), Some(2.5))
            .await
            .unwrap();
        assert_eq!(saved.created_at, at(11, 12));
        assert_eq!(saved.mime_type, "audio/mpeg");
        assert_eq!(saved.duration_secs, Some(2.5));
        assert_eq!(store.read_payload(&saved).await.unwrap(), Bytes::from_static(b"1234"));
    }

    #[tokio::test]
    async fn test_save_local_rejects_bad_input() {
        let local = Arc::new(MemoryInventory::new());
        let remote = Arc::new(MemoryRemote::new());
        let store = store(&local, &remote);

        let bad_name = store
            .save_local("no-date.mp3", Bytes::from_static(b"x"), None)
            .await;
        assert!(matches!(bad_name, Err(InventoryError::InvalidName(_))));

        let empty = store
            .save_local("music_A_B_2024-01-01.mp3", Bytes::new(), None)
            .await;
        assert!(matches!(empty, Err(InventoryError::EmptyPayload(_))));
        assert!(local.ids().is_empty());
    }

    #[tokio::test]
    async fn test_estimate_is_optional() {
        let local = Arc::new(MemoryInventory::new());
        let remote = Arc::new(MemoryRemote::new());
        assert_eq!(local.estimate().await.unwrap(), None::<StorageEstimate>);

        store(&local, &remote)
            .save_local("music_A_B_2024-01-01.mp3", Bytes::from_static(b"x"), None)
            .await
            .unwrap();
        assert!(local.contains("music_A_B_2024-01-01.mp3"));
    }

    #[tokio::test]
    async fn test_find_local_thumbnail() {
        let local = Arc::new(MemoryInventory::new());
        let remote = Arc::new(MemoryRemote::new());
        local.insert("music_A_B_2024-01-01.mp3", b"x", at(1, 9));
        local.insert("music_A_B_2024-01-01.png", b"img", at(1, 9));
        let store = store(&local, &remote);

        let outcome = store.refresh().await.unwrap();
        let media = outcome.view.find("music_A_B_2024-01-01.mp3").unwrap();
        let thumbnail = store.find_local_thumbnail(media).await.unwrap().unwrap();
        assert_eq!(thumbnail.name, "music_A_B_2024-01-01.png");
        assert_eq!(thumbnail.kind, MediaKind::Thumbnail);
    }

    #[tokio::test]
    async fn test_delete_remote_and_download_url() {
        let local = Arc::new(MemoryInventory::new());
        let remote = Arc::new(MemoryRemote::new());
        remote.insert("media/music_A_B_2024-01-01.mp3", b"x");
        remote.insert("thumbnails/music_A_B_2024-01-01.jpg", b"img");
        let store = store(&local, &remote);

        let outcome = store.refresh().await.unwrap();
        let file = outcome.view.files[0].clone();

        let url = store.download_url(&file).await.unwrap();
        assert!(url.ends_with("media/music_A_B_2024-01-01.mp3"));

        store.delete_remote(&file).await.unwrap();
        assert!(remote.paths().is_empty());

        let local_file = MediaFile {
            origin: Origin::Local {
                payload: "id".to_string(),
            },
            ..file
        };
        assert!(matches!(
            store.download_url(&local_file).await,
            Err(InventoryError::NotRemote(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_remote_tolerates_thumbnail_failure() {
        let local = Arc::new(MemoryInventory::new());
        let remote = Arc::new(MemoryRemote::new());
        remote.insert("media/music_A_B_2024-01-01.mp3", b"x");
        remote.insert("thumbnails/music_A_B_2024-01-01.jpg", b"img");
        remote.fail_path("thumbnails/music_A_B_2024-01-01.jpg");
        let store = store(&local, &remote);

        let file = store.refresh().await.unwrap().view.files[0].clone();
        store.delete_remote(&file).await.unwrap();

        assert_eq!(remote.paths(), vec!["thumbnails/music_A_B_2024-01-01.jpg"]);
    }
}
