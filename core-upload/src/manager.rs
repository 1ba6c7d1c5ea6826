//! # Upload Manager
//!
//! Moves a local capture, and its thumbnail if it has one, to the remote store.
//!
//! ## Saga
//!
//! 1. Primary asset to `{media_dir}/{name}`; this is the first 70% of progress
//! 2. Same-basename local thumbnail, re-encoded by the image pipeline, to
//!    `{thumbnail_dir}/{basename}.jpg`; the remaining 30%
//! 3. Success, then a delayed refresh of the combined inventory
//!
//! A failing primary write fails the upload and leaves it retryable. A failing
//! thumbnail is logged and skipped; the upload still succeeds. The two writes
//! are not transactional.

use std::collections::HashMap;
use std::sync::Arc;

use bridge_traits::media::ImagePipeline;
use bridge_traits::storage::{RemoteEntry, RemoteStore};
use core_inventory::{CombinedFileStore, MediaFile};
use core_runtime::config::UploadConfig;
use core_runtime::events::{CoreEvent, EventBus, UploadEvent};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, UploadError};
use crate::task::{UploadPhase, UploadTask};

/// Composite progress callback, receives values in `[0, 1]`
pub type UploadProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

type TaskTable = Arc<Mutex<HashMap<String, UploadTask>>>;

pub struct UploadManager {
    store: Arc<CombinedFileStore>,
    remote: Arc<dyn RemoteStore>,
    image_pipeline: Option<Arc<dyn ImagePipeline>>,
    config: UploadConfig,
    events: EventBus,
    tasks: TaskTable,
}

impl UploadManager {
    pub fn new(
        store: Arc<CombinedFileStore>,
        remote: Arc<dyn RemoteStore>,
        config: UploadConfig,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            remote,
            image_pipeline: None,
            config,
            events,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Thumbnails are uploaded unprocessed without a pipeline.
    pub fn with_image_pipeline(mut self, pipeline: Arc<dyn ImagePipeline>) -> Self {
        self.image_pipeline = Some(pipeline);
        self
    }

    /// Uploads a local file and its thumbnail.
    #[instrument(skip(self, file, on_progress), fields(name = %file.name))]
    pub async fn upload(
        &self,
        file: &MediaFile,
        on_progress: Option<UploadProgressCallback>,
    ) -> Result<UploadTask> {
        if file.payload_handle().is_none() {
            return Err(UploadError::AlreadyRemote(file.name.clone()));
        }
        self.begin(file)?;

        let tracker = ProgressTracker {
            file_name: file.name.clone(),
            tasks: Arc::clone(&self.tasks),
            events: self.events.clone(),
            callback: on_progress,
            state: Mutex::new(TrackerState::default()),
        };

        match self.run(file, &tracker).await {
            Ok(entry) => {
                tracker.report(1.0);
                let task = self.finish(file, |task| {
                    task.phase = UploadPhase::Success;
                    task.progress = 1.0;
                    task.remote_path = Some(entry.path.clone());
                });
                info!(path = %entry.path, "Upload complete");
                self.publish(UploadEvent::Completed {
                    file_name: file.name.clone(),
                    remote_path: entry.path,
                });
                self.schedule_refresh();
                Ok(task)
            }
            Err(e) => {
                warn!(error = %e, "Upload failed");
                self.finish(file, |task| {
                    task.phase = UploadPhase::Error;
                    task.error = Some(e.to_string());
                });
                self.publish(UploadEvent::Failed {
                    file_name: file.name.clone(),
                    message: e.to_string(),
                    retryable: e.is_retryable(),
                });
                Err(e)
            }
        }
    }

    /// Runs the whole upload again.
    pub async fn retry_upload(
        &self,
        file: &MediaFile,
        on_progress: Option<UploadProgressCallback>,
    ) -> Result<UploadTask> {
        debug!(name = %file.name, "Retrying upload");
        self.upload(file, on_progress).await
    }

    pub fn status(&self, name: &str) -> Option<UploadTask> {
        self.tasks.lock().get(name).cloned()
    }

    pub fn tasks(&self) -> Vec<UploadTask> {
        let mut tasks: Vec<UploadTask> = self.tasks.lock().values().cloned().collect();
        tasks.sort_by(|a, b| a.file.name.cmp(&b.file.name));
        tasks
    }

    /// Drops successful tasks; failed ones stay so they can be retried.
    pub fn clear_finished(&self) {
        self.tasks
            .lock()
            .retain(|_, task| task.phase != UploadPhase::Success);
    }

    fn begin(&self, file: &MediaFile) -> Result<()> {
        let mut tasks = self.tasks.lock();
        if let Some(existing) = tasks.get(&file.name) {
            if matches!(existing.phase, UploadPhase::Uploading) {
                return Err(UploadError::InProgress(file.name.clone()));
            }
        }

        let mut task = UploadTask::new(file.clone());
        task.phase = UploadPhase::Uploading;
        tasks.insert(file.name.clone(), task);
        drop(tasks);

        self.publish(UploadEvent::Started {
            file_name: file.name.clone(),
        });
        Ok(())
    }

    async fn run(&self, file: &MediaFile, tracker: &ProgressTracker) -> Result<RemoteEntry> {
        let weight = self.config.primary_weight;
        let layout = self.store.layout();
        let message = self.config.commit_message(&file.name);

        let payload = self.store.read_payload(file).await?;
        let path = layout.media_path(&file.name);
        debug!(%path, size = payload.len(), "Writing primary asset");

        let entry = self
            .remote
            .put_content(&path, payload, &message, &|fraction: f64| {
                tracker.report(fraction.clamp(0.0, 1.0) * weight)
            })
            .await
            .map_err(UploadError::Remote)?;
        tracker.report(weight);

        if let Err(e) = self.upload_thumbnail(file, &message, tracker).await {
            warn!(error = %e, "Thumbnail upload skipped");
            self.publish(UploadEvent::ThumbnailSkipped {
                file_name: file.name.clone(),
                message: e.to_string(),
            });
        }

        Ok(entry)
    }

    /// Best effort: the caller only logs the error.
    async fn upload_thumbnail(
        &self,
        file: &MediaFile,
        message: &str,
        tracker: &ProgressTracker,
    ) -> Result<()> {
        let Some(thumbnail) = self.store.find_local_thumbnail(file).await? else {
            return Ok(());
        };

        let data = self.store.read_payload(&thumbnail).await?;
        let data = match &self.image_pipeline {
            Some(pipeline) => pipeline
                .process_thumbnail(data, &thumbnail.mime_type)
                .await
                .map_err(UploadError::Thumbnail)?,
            None => data,
        };

        let weight = self.config.primary_weight;
        let path = self.store.layout().thumbnail_path(&file.name);
        debug!(%path, size = data.len(), "Writing thumbnail");

        self.remote
            .put_content(&path, data, message, &|fraction: f64| {
                tracker.report(weight + fraction.clamp(0.0, 1.0) * (1.0 - weight))
            })
            .await
            .map_err(UploadError::Remote)?;
        Ok(())
    }

    fn finish(&self, file: &MediaFile, update: impl FnOnce(&mut UploadTask)) -> UploadTask {
        let mut tasks = self.tasks.lock();
        let task = tasks
            .entry(file.name.clone())
            .or_insert_with(|| UploadTask::new(file.clone()));
        update(task);
        task.clone()
    }

    fn schedule_refresh(&self) {
        let store = Arc::clone(&self.store);
        let delay = self.config.refresh_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match store.refresh().await {
                Ok(outcome) if outcome.is_degraded() => {
                    debug!("Post-upload refresh ran without the remote listing")
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Post-upload refresh failed"),
            }
        });
    }

    fn publish(&self, event: UploadEvent) {
        let _ = self.events.emit(CoreEvent::Upload(event));
    }
}

#[derive(Default)]
struct TrackerState {
    progress: f64,
    percent: u8,
}

/// Keeps the composite progress non-decreasing and fans it out to the task
/// table, the caller's callback and the event bus.
struct ProgressTracker {
    file_name: String,
    tasks: TaskTable,
    events: EventBus,
    callback: Option<UploadProgressCallback>,
    state: Mutex<TrackerState>,
}

impl ProgressTracker {
    fn report(&self, value: f64) {
        let value = value.clamp(0.0, 1.0);
        let percent_changed = {
            let mut state = self.state.lock();
            if value < state.progress {
                return;
            }
            state.progress = value;
            let percent = (value * 100.0).round() as u8;
            let changed = percent > state.percent;
            state.percent = state.percent.max(percent);
            changed.then_some(percent)
        };

        if let Some(task) = self.tasks.lock().get_mut(&self.file_name) {
            task.progress = value;
        }
        if let Some(callback) = &self.callback {
            callback(value);
        }
        if let Some(percent) = percent_changed {
            let _ = self.events.emit(CoreEvent::Upload(UploadEvent::Progress {
                file_name: self.file_name.clone(),
                percent,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::BridgeError;
    use bridge_traits::storage::LocalInventory;
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use core_inventory::testing::{MemoryInventory, MemoryRemote};
    use core_inventory::{InventoryError, RemoteLayout};
    use std::time::Duration;

    const SONG: &str = "music_MySong_Jane_2024-01-10.mp3";
    const COVER: &str = "music_MySong_Jane_2024-01-10.png";

    struct FailingPipeline;

    #[async_trait]
    impl ImagePipeline for FailingPipeline {
        async fn process_thumbnail(
            &self,
            _data: Bytes,
            _mime_type: &str,
        ) -> bridge_traits::error::Result<Bytes> {
            Err(BridgeError::OperationFailed("decoder error".to_string()))
        }
    }

    struct TaggingPipeline;

    #[async_trait]
    impl ImagePipeline for TaggingPipeline {
        async fn process_thumbnail(
            &self,
            _data: Bytes,
            _mime_type: &str,
        ) -> bridge_traits::error::Result<Bytes> {
            Ok(Bytes::from_static(b"jpeg"))
        }
    }

    struct Fixture {
        local: Arc<MemoryInventory>,
        remote: Arc<MemoryRemote>,
        store: Arc<CombinedFileStore>,
        events: EventBus,
    }

    impl Fixture {
        fn new() -> Self {
            let local = Arc::new(MemoryInventory::new());
            let remote = Arc::new(MemoryRemote::new());
            let events = EventBus::new(256);
            let store = Arc::new(CombinedFileStore::new(
                local.clone(),
                remote.clone(),
                RemoteLayout::default(),
                events.clone(),
            ));
            Self {
                local,
                remote,
                store,
                events,
            }
        }

        fn manager(&self) -> UploadManager {
            UploadManager::new(
                self.store.clone(),
                self.remote.clone(),
                UploadConfig::default(),
                self.events.clone(),
            )
        }

        async fn local_file(&self, name: &str) -> MediaFile {
            let view = self.store.refresh().await.unwrap().view;
            view.find(name).cloned().unwrap()
        }
    }

    fn recorder() -> (UploadProgressCallback, Arc<Mutex<Vec<f64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (Arc::new(move |p| sink.lock().push(p)), seen)
    }

    fn created() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_progress_splits_primary_and_thumbnail() {
        let fx = Fixture::new();
        fx.local.insert(SONG, b"audio", created());
        fx.local.insert(COVER, b"png", created());
        let file = fx.local_file(SONG).await;

        let manager = fx.manager().with_image_pipeline(Arc::new(TaggingPipeline));
        let (callback, seen) = recorder();
        let task = manager.upload(&file, Some(callback)).await.unwrap();

        assert_eq!(task.phase, UploadPhase::Success);
        assert_eq!(task.progress, 1.0);
        assert_eq!(task.remote_path.as_deref(), Some("media/music_MySong_Jane_2024-01-10.mp3"));

        let seen = seen.lock().clone();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{:?}", seen);
        assert!(seen.iter().any(|p| (*p - 0.35).abs() < 1e-9));
        assert!(seen.iter().any(|p| (*p - 0.7).abs() < 1e-9));
        assert!(seen.iter().any(|p| (*p - 0.85).abs() < 1e-9));
        assert_eq!(seen.last(), Some(&1.0));

        assert_eq!(
            fx.remote.content("thumbnails/music_MySong_Jane_2024-01-10.jpg"),
            Some(Bytes::from_static(b"jpeg"))
        );
    }

    #[tokio::test]
    async fn test_thumbnail_failure_is_swallowed() {
        let fx = Fixture::new();
        fx.local.insert(SONG, b"audio", created());
        fx.local.insert(COVER, b"png", created());
        let file = fx.local_file(SONG).await;
        let mut rx = fx.events.subscribe();

        let manager = fx.manager().with_image_pipeline(Arc::new(FailingPipeline));
        let task = manager.upload(&file, None).await.unwrap();

        assert_eq!(task.phase, UploadPhase::Success);
        assert_eq!(task.progress, 1.0);
        assert!(fx.remote.contains("media/music_MySong_Jane_2024-01-10.mp3"));
        assert!(!fx.remote.contains("thumbnails/music_MySong_Jane_2024-01-10.jpg"));

        let mut skipped = false;
        while let Ok(event) = rx.try_recv() {
            if let CoreEvent::Upload(UploadEvent::ThumbnailSkipped { message, .. }) = event {
                assert!(message.contains("decoder error"));
                skipped = true;
            }
        }
        assert!(skipped);
    }

    #[tokio::test]
    async fn test_without_thumbnail_primary_fills_to_one() {
        let fx = Fixture::new();
        fx.local.insert(SONG, b"audio", created());
        let file = fx.local_file(SONG).await;

        let (callback, seen) = recorder();
        fx.manager().upload(&file, Some(callback)).await.unwrap();

        let seen = seen.lock().clone();
        assert_eq!(seen.first(), Some(&0.0));
        assert_eq!(seen.last(), Some(&1.0));
        assert!(seen.iter().all(|p| *p <= 0.7 || *p == 1.0));
    }

    #[tokio::test]
    async fn test_primary_failure_marks_error_and_retry_succeeds() {
        let fx = Fixture::new();
        fx.local.insert(SONG, b"audio", created());
        fx.remote.fail_path("media/music_MySong_Jane_2024-01-10.mp3");
        let file = fx.local_file(SONG).await;
        let manager = fx.manager();

        let error = manager.upload(&file, None).await.unwrap_err();
        assert!(error.is_retryable());

        let status = manager.status(SONG).unwrap();
        assert_eq!(status.phase, UploadPhase::Error);
        assert!(status.error.unwrap().contains("failed"));

        fx.remote.recover_path("media/music_MySong_Jane_2024-01-10.mp3");
        let task = manager.retry_upload(&file, None).await.unwrap();
        assert_eq!(task.phase, UploadPhase::Success);
        assert!(task.error.is_none());
        assert!(fx.remote.contains("media/music_MySong_Jane_2024-01-10.mp3"));
    }

    #[tokio::test]
    async fn test_remote_file_fails_fast() {
        let fx = Fixture::new();
        fx.remote.insert("media/music_MySong_Jane_2024-01-10.mp3", b"x");
        let view = fx.store.refresh().await.unwrap().view;
        let remote_file = view.files[0].clone();

        let result = fx.manager().upload(&remote_file, None).await;
        assert!(matches!(result, Err(UploadError::AlreadyRemote(_))));
        assert!(fx.manager().tasks().is_empty());
    }

    #[tokio::test]
    async fn test_missing_payload_is_an_error() {
        let fx = Fixture::new();
        fx.local.insert(SONG, b"audio", created());
        let file = fx.local_file(SONG).await;
        fx.local.delete(SONG).await.unwrap();

        let result = fx.manager().upload(&file, None).await;
        assert!(matches!(
            result,
            Err(UploadError::Inventory(InventoryError::PayloadMissing(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_refresh_reconciles_local_copy() {
        let fx = Fixture::new();
        fx.local.insert(SONG, b"audio", created());
        let file = fx.local_file(SONG).await;

        fx.manager().upload(&file, None).await.unwrap();
        assert!(fx.local.contains(SONG));

        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(!fx.local.contains(SONG));
        let latest = fx.store.latest().unwrap();
        assert!(latest.find(SONG).unwrap().uploaded());
    }

    #[tokio::test]
    async fn test_status_table() {
        let fx = Fixture::new();
        fx.local.insert(SONG, b"audio", created());
        fx.local.insert("music_Other_Jane_2024-01-09.mp3", b"audio", created());
        fx.remote.fail_path("media/music_Other_Jane_2024-01-09.mp3");
        let manager = fx.manager();

        let song = fx.local_file(SONG).await;
        let other = fx.local_file("music_Other_Jane_2024-01-09.mp3").await;
        manager.upload(&song, None).await.unwrap();
        manager.upload(&other, None).await.unwrap_err();

        assert_eq!(manager.tasks().len(), 2);
        manager.clear_finished();

        let remaining = manager.tasks();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].phase, UploadPhase::Error);
        assert!(manager.status(SONG).is_none());
    }
}
