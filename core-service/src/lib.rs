//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP, local cache,
//! image pipeline, notification surface, transcoder) into the media core and
//! owns every service instance. Desktop apps typically enable the
//! `desktop-shims` feature (which depends on `bridge-desktop`) so missing
//! bridges fall back to the desktop defaults; the `ffmpeg` feature adds the
//! ffmpeg-backed transcoder.
//!
//! There are no process-wide singletons: each [`MediaCore`] is an isolated
//! graph of services sharing one event bus.

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use bridge_traits::{
    error::BridgeError,
    http::HttpClient,
    media::{ImagePipeline, NotificationSurface, TranscodeEngine, TranscodeEngineFactory},
    storage::{LocalInventory, RemoteStore},
};
use core_conversion::{spawn_notifier, ConversionKind, ConversionService, Screen, ScreenTracker};
use core_inventory::{CombinedFileStore, RemoteLayout};
use core_runtime::{config::CoreConfig, events::EventBus};
use core_upload::UploadManager;
use parking_lot::Mutex;
use provider_github::GitHubConnector;
use tokio::task::JoinHandle;
use tracing::{info, instrument};

/// Aggregated handle to all bridge dependencies the core requires.
#[derive(Clone)]
pub struct MediaCoreDependencies {
    pub http_client: Arc<dyn HttpClient>,
    pub local_inventory: Arc<dyn LocalInventory>,
    pub image_pipeline: Option<Arc<dyn ImagePipeline>>,
    pub notification_surface: Option<Arc<dyn NotificationSurface>>,
    pub transcoder_factory: Option<TranscodeEngineFactory>,
}

impl From<&CoreConfig> for MediaCoreDependencies {
    fn from(config: &CoreConfig) -> Self {
        Self {
            http_client: Arc::clone(&config.http_client),
            local_inventory: Arc::clone(&config.local_inventory),
            image_pipeline: config.image_pipeline.clone(),
            notification_surface: config.notification_surface.clone(),
            transcoder_factory: config.transcoder_factory.clone(),
        }
    }
}

/// Primary façade exposed to host applications.
pub struct MediaCore {
    deps: MediaCoreDependencies,
    events: EventBus,
    screens: ScreenTracker,
    audio: ConversionService,
    video: ConversionService,
    remote: Arc<dyn RemoteStore>,
    store: Arc<CombinedFileStore>,
    uploads: Arc<UploadManager>,
    notifier: Mutex<Option<JoinHandle<()>>>,
}

impl MediaCore {
    /// Builds every service from a validated configuration.
    ///
    /// Must be called from within a tokio runtime; the notifier subscriber is
    /// spawned onto it.
    #[instrument(skip(config), fields(repo = %config.remote.repo))]
    pub fn bootstrap(config: CoreConfig) -> Result<Self> {
        config.validate()?;
        let connector = GitHubConnector::new(
            Arc::clone(&config.http_client),
            config.remote.clone(),
            config.retry_policy.clone(),
        );
        Self::assemble(config, Arc::new(connector))
    }

    /// Same as [`bootstrap`](Self::bootstrap) with a caller-supplied remote
    /// store instead of the GitHub connector.
    pub fn bootstrap_with_remote(config: CoreConfig, remote: Arc<dyn RemoteStore>) -> Result<Self> {
        config.validate()?;
        Self::assemble(config, remote)
    }

    fn assemble(config: CoreConfig, remote: Arc<dyn RemoteStore>) -> Result<Self> {
        let deps = MediaCoreDependencies::from(&config);
        let events = EventBus::new(config.event_buffer_size);
        let screens = ScreenTracker::new(Screen::Other);

        let factory = deps
            .transcoder_factory
            .clone()
            .unwrap_or_else(missing_transcoder);
        let audio = ConversionService::new(
            ConversionKind::Audio,
            Arc::clone(&factory),
            config.conversion.clone(),
            events.clone(),
        );
        let video = ConversionService::new(
            ConversionKind::Video,
            factory,
            config.conversion.clone(),
            events.clone(),
        );

        let store = Arc::new(CombinedFileStore::new(
            Arc::clone(&deps.local_inventory),
            Arc::clone(&remote),
            RemoteLayout::from(&config.remote),
            events.clone(),
        ));

        let mut uploads = UploadManager::new(
            Arc::clone(&store),
            Arc::clone(&remote),
            config.upload.clone(),
            events.clone(),
        );
        if let Some(pipeline) = &deps.image_pipeline {
            uploads = uploads.with_image_pipeline(Arc::clone(pipeline));
        }

        let notifier = deps
            .notification_surface
            .as_ref()
            .map(|surface| spawn_notifier(&events, screens.clone(), Arc::clone(surface)));

        info!(
            notifications = notifier.is_some(),
            transcoder = deps.transcoder_factory.is_some(),
            "Media core ready"
        );

        Ok(Self {
            deps,
            events,
            screens,
            audio,
            video,
            remote,
            store,
            uploads: Arc::new(uploads),
            notifier: Mutex::new(notifier),
        })
    }

    pub fn dependencies(&self) -> &MediaCoreDependencies {
        &self.deps
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Active-screen tracker consulted by the notifier
    pub fn screens(&self) -> &ScreenTracker {
        &self.screens
    }

    pub fn conversion(&self, kind: ConversionKind) -> &ConversionService {
        match kind {
            ConversionKind::Audio => &self.audio,
            ConversionKind::Video => &self.video,
        }
    }

    pub fn store(&self) -> Arc<CombinedFileStore> {
        Arc::clone(&self.store)
    }

    pub fn uploads(&self) -> Arc<UploadManager> {
        Arc::clone(&self.uploads)
    }

    pub fn remote(&self) -> Arc<dyn RemoteStore> {
        Arc::clone(&self.remote)
    }

    /// Verifies the configured credentials can write to the repository.
    pub async fn check_remote_access(&self) -> Result<()> {
        self.remote.check_access().await?;
        Ok(())
    }

    /// Terminates both conversion workers and stops the notifier.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.audio.terminate().await;
        self.video.terminate().await;
        if let Some(handle) = self.notifier.lock().take() {
            handle.abort();
        }
        info!("Media core shut down");
    }
}

fn missing_transcoder() -> TranscodeEngineFactory {
    Arc::new(|| -> bridge_traits::error::Result<Box<dyn TranscodeEngine>> {
        Err(BridgeError::NotAvailable(
            "no transcoding engine configured; enable the 'ffmpeg' feature or inject one"
                .to_string(),
        ))
    })
}
