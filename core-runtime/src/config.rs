//! # Core Configuration Module
//!
//! Provides configuration management for the Media Capture Core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds all necessary dependencies and settings. It enforces
//! fail-fast validation so a misconfigured core never starts.
//!
//! ## Required Settings
//!
//! - [`RemoteRepoConfig`] - Repository that acts as the authoritative store
//! - Cache directory - Root for the on-device media cache
//!
//! ## Bridges (with platform defaults)
//!
//! - `HttpClient` - HTTP operations (desktop default: reqwest)
//! - `LocalInventory` - Local media cache (desktop default: tokio fs)
//! - `ImagePipeline` - Thumbnail processing (desktop default: `image` crate)
//! - `NotificationSurface` - Passive notifications (desktop default: tracing)
//! - `TranscodeEngineFactory` - Conversion engine (desktop default with the
//!   `ffmpeg` feature: ffmpeg process)
//!
//! When the `desktop-shims` feature is disabled, `HttpClient` and
//! `LocalInventory` must be injected explicitly.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, RemoteRepoConfig};
//!
//! let config = CoreConfig::builder()
//!     .remote_repo(RemoteRepoConfig::new("jane", "captures", "ghp_token"))
//!     .cache_dir("/path/to/cache")
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! // Missing remote repository settings
//! let config = CoreConfig::builder()
//!     .cache_dir("/path/to/cache")
//!     .build()
//!     .expect("Should fail - missing remote repository");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{
    HttpClient, ImagePipeline, LocalInventory, NotificationSurface, RetryPolicy,
    TranscodeEngineFactory,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Default per-job conversion timeout.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(30);

/// Share of upload progress attributed to the primary asset.
pub const DEFAULT_PRIMARY_WEIGHT: f64 = 0.7;

/// Core configuration for the Media Capture Core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Directory backing the local media cache
    pub cache_dir: PathBuf,

    /// Authoritative remote repository
    pub remote: RemoteRepoConfig,

    /// Retry/backoff settings for remote calls
    pub retry_policy: RetryPolicy,

    /// Conversion worker settings
    pub conversion: ConversionConfig,

    /// Upload saga settings
    pub upload: UploadConfig,

    /// Event bus channel capacity
    pub event_buffer_size: usize,

    /// HTTP client for making API requests
    pub http_client: Arc<dyn HttpClient>,

    /// Local media cache
    pub local_inventory: Arc<dyn LocalInventory>,

    /// Thumbnail processing (optional; thumbnails are uploaded as-is without it)
    pub image_pipeline: Option<Arc<dyn ImagePipeline>>,

    /// Passive notification surface (optional)
    pub notification_surface: Option<Arc<dyn NotificationSurface>>,

    /// Transcoding engine factory (optional; conversions fail without it)
    pub transcoder_factory: Option<TranscodeEngineFactory>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("cache_dir", &self.cache_dir)
            .field("remote", &self.remote)
            .field("retry_policy", &self.retry_policy)
            .field("conversion", &self.conversion)
            .field("upload", &self.upload)
            .field("event_buffer_size", &self.event_buffer_size)
            .field("http_client", &"HttpClient { ... }")
            .field("local_inventory", &"LocalInventory { ... }")
            .field(
                "image_pipeline",
                &self.image_pipeline.as_ref().map(|_| "ImagePipeline { ... }"),
            )
            .field(
                "notification_surface",
                &self
                    .notification_surface
                    .as_ref()
                    .map(|_| "NotificationSurface { ... }"),
            )
            .field(
                "transcoder_factory",
                &self
                    .transcoder_factory
                    .as_ref()
                    .map(|_| "TranscodeEngineFactory { ... }"),
            )
            .finish()
    }
}

/// Remote repository settings.
///
/// The token is never printed by the `Debug` implementation.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteRepoConfig {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub token: String,
    /// Directory holding media files
    pub media_dir: String,
    /// Directory holding thumbnails (`{basename}.jpg`)
    pub thumbnail_dir: String,
    /// REST API base URL
    pub api_base_url: String,
}

impl RemoteRepoConfig {
    /// Creates settings with default branch, directories and API base URL.
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            branch: "main".to_string(),
            token: token.into(),
            media_dir: "media".to_string(),
            thumbnail_dir: "thumbnails".to_string(),
            api_base_url: "https://api.github.com".to_string(),
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn with_media_dir(mut self, dir: impl Into<String>) -> Self {
        self.media_dir = dir.into();
        self
    }

    pub fn with_thumbnail_dir(mut self, dir: impl Into<String>) -> Self {
        self.thumbnail_dir = dir.into();
        self
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Validates the repository settings
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("owner", &self.owner),
            ("repo", &self.repo),
            ("branch", &self.branch),
            ("token", &self.token),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!(
                    "Remote repository {} cannot be empty",
                    field
                )));
            }
        }

        for (field, value) in [
            ("media_dir", &self.media_dir),
            ("thumbnail_dir", &self.thumbnail_dir),
        ] {
            if value.is_empty() || value.starts_with('/') || value.ends_with('/') {
                return Err(Error::Config(format!(
                    "Remote {} must be a non-empty relative path without leading or trailing '/'",
                    field
                )));
            }
        }

        if self.media_dir == self.thumbnail_dir {
            return Err(Error::Config(
                "Remote media_dir and thumbnail_dir must differ".to_string(),
            ));
        }

        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://")
        {
            return Err(Error::Config(format!(
                "Remote API base URL must be http(s): {}",
                self.api_base_url
            )));
        }

        Ok(())
    }
}

impl std::fmt::Debug for RemoteRepoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteRepoConfig")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("branch", &self.branch)
            .field("token", &"[REDACTED]")
            .field("media_dir", &self.media_dir)
            .field("thumbnail_dir", &self.thumbnail_dir)
            .field("api_base_url", &self.api_base_url)
            .finish()
    }
}

/// Conversion worker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionConfig {
    /// Hard timeout per job
    pub job_timeout: Duration,
    /// Capacity of the request channel into each worker
    pub channel_capacity: usize,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            job_timeout: DEFAULT_JOB_TIMEOUT,
            channel_capacity: 32,
        }
    }
}

/// Upload saga settings.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadConfig {
    /// Share of the composite progress taken by the primary asset, in (0, 1)
    pub primary_weight: f64,
    /// Delay before the post-upload inventory refresh
    pub refresh_delay: Duration,
    /// Commit message; `{name}` is replaced with the file name
    pub commit_message_template: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            primary_weight: DEFAULT_PRIMARY_WEIGHT,
            refresh_delay: Duration::from_secs(1),
            commit_message_template: "Upload {name}".to_string(),
        }
    }
}

impl UploadConfig {
    /// Renders the commit message for a file
    pub fn commit_message(&self, name: &str) -> String {
        self.commit_message_template.replace("{name}", name)
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Cache directory is not empty
    /// - Remote repository settings are complete
    /// - Retry policy is coherent
    /// - Conversion and upload settings are in range
    pub fn validate(&self) -> Result<()> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config("Cache directory cannot be empty".to_string()));
        }

        self.remote.validate()?;

        if self.retry_policy.max_attempts == 0 {
            return Err(Error::Config(
                "Retry policy must allow at least one attempt".to_string(),
            ));
        }

        if self.retry_policy.base_delay > self.retry_policy.max_delay {
            return Err(Error::Config(
                "Retry base delay cannot exceed the maximum delay".to_string(),
            ));
        }

        if self.conversion.job_timeout.is_zero() {
            return Err(Error::Config(
                "Conversion job timeout must be greater than zero".to_string(),
            ));
        }

        if self.conversion.channel_capacity == 0 {
            return Err(Error::Config(
                "Conversion channel capacity must be greater than zero".to_string(),
            ));
        }

        let weight = self.upload.primary_weight;
        if !(weight > 0.0 && weight < 1.0) {
            return Err(Error::Config(format!(
                "Upload primary weight must be between 0 and 1 (exclusive), got {}",
                weight
            )));
        }

        if !self.upload.commit_message_template.contains("{name}") {
            return Err(Error::Config(
                "Upload commit message template must contain '{name}'".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn http_client_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required to reach the remote store. \
                 Desktop: enable the 'desktop-shims' feature to use the default ReqwestHttpClient. \
                 Other hosts: inject a platform HTTP client."
            .to_string(),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn local_inventory_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "LocalInventory".to_string(),
        message: "LocalInventory implementation is required to cache captured media. \
                 Desktop: enable the 'desktop-shims' feature to use the default TokioFileCache. \
                 Other hosts: inject a durable on-device store."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::new().map_err(|e| {
        Error::Internal(format!("Failed to initialize default HttpClient: {}", e))
    })?;
    let client: Arc<dyn HttpClient> = Arc::new(client);
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(http_client_missing_error())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_local_inventory(cache_dir: &Path) -> Result<Arc<dyn LocalInventory>> {
    use bridge_desktop::TokioFileCache;

    let cache: Arc<dyn LocalInventory> = Arc::new(TokioFileCache::new(cache_dir.join("media")));
    Ok(cache)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_local_inventory(_cache_dir: &Path) -> Result<Arc<dyn LocalInventory>> {
    Err(local_inventory_missing_error())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_image_pipeline() -> Option<Arc<dyn ImagePipeline>> {
    let pipeline: Arc<dyn ImagePipeline> = Arc::new(bridge_desktop::ImageThumbnailer::default());
    Some(pipeline)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_image_pipeline() -> Option<Arc<dyn ImagePipeline>> {
    None
}

#[cfg(feature = "desktop-shims")]
fn provide_default_notification_surface() -> Option<Arc<dyn NotificationSurface>> {
    let surface: Arc<dyn NotificationSurface> = Arc::new(bridge_desktop::TracingNotifier);
    Some(surface)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_notification_surface() -> Option<Arc<dyn NotificationSurface>> {
    None
}

#[cfg(feature = "ffmpeg")]
fn provide_default_transcoder_factory() -> Option<TranscodeEngineFactory> {
    Some(bridge_desktop::FfmpegTranscoder::factory())
}

#[cfg(not(feature = "ffmpeg"))]
fn provide_default_transcoder_factory() -> Option<TranscodeEngineFactory> {
    None
}

/// Builder for constructing [`CoreConfig`] instances.
///
/// Missing bridges are filled from `bridge-desktop` when the `desktop-shims`
/// feature is enabled; otherwise the builder fails with
/// [`Error::CapabilityMissing`].
#[derive(Default)]
pub struct CoreConfigBuilder {
    cache_dir: Option<PathBuf>,
    remote: Option<RemoteRepoConfig>,
    retry_policy: Option<RetryPolicy>,
    conversion: Option<ConversionConfig>,
    upload: Option<UploadConfig>,
    event_buffer_size: Option<usize>,
    http_client: Option<Arc<dyn HttpClient>>,
    local_inventory: Option<Arc<dyn LocalInventory>>,
    image_pipeline: Option<Arc<dyn ImagePipeline>>,
    notification_surface: Option<Arc<dyn NotificationSurface>>,
    transcoder_factory: Option<TranscodeEngineFactory>,
}

impl CoreConfigBuilder {
    /// Sets the cache directory.
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder().cache_dir("/path/to/cache");
    /// ```
    pub fn cache_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    /// Sets the remote repository (required).
    pub fn remote_repo(mut self, remote: RemoteRepoConfig) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Overrides the retry policy for remote calls.
    ///
    /// Default: 3 attempts, 1s base delay doubling up to 5s, 10s 404 staleness window
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Overrides conversion worker settings.
    pub fn conversion(mut self, conversion: ConversionConfig) -> Self {
        self.conversion = Some(conversion);
        self
    }

    /// Sets the per-job conversion timeout.
    ///
    /// Default: 30 seconds
    pub fn job_timeout(mut self, timeout: Duration) -> Self {
        self.conversion.get_or_insert_with(ConversionConfig::default).job_timeout = timeout;
        self
    }

    /// Overrides upload saga settings.
    pub fn upload(mut self, upload: UploadConfig) -> Self {
        self.upload = Some(upload);
        self
    }

    /// Sets the event bus capacity.
    ///
    /// Default: 100
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Sets the HTTP client implementation.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the local media cache implementation.
    pub fn local_inventory(mut self, inventory: Arc<dyn LocalInventory>) -> Self {
        self.local_inventory = Some(inventory);
        self
    }

    /// Sets the thumbnail image pipeline.
    pub fn image_pipeline(mut self, pipeline: Arc<dyn ImagePipeline>) -> Self {
        self.image_pipeline = Some(pipeline);
        self
    }

    /// Sets the passive notification surface.
    pub fn notification_surface(mut self, surface: Arc<dyn NotificationSurface>) -> Self {
        self.notification_surface = Some(surface);
        self
    }

    /// Sets the factory that builds a transcoding engine on each worker thread.
    pub fn transcoder_factory(mut self, factory: TranscodeEngineFactory) -> Self {
        self.transcoder_factory = Some(factory);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Returns
    ///
    /// Returns `Ok(CoreConfig)` on success, or an error if:
    /// - The cache directory or remote repository is missing
    /// - Required bridges are missing and no desktop default is available
    /// - Configuration values are invalid
    pub fn build(self) -> Result<CoreConfig> {
        let cache_dir = self.cache_dir.ok_or_else(|| {
            Error::Config("Cache directory is required. Use .cache_dir() to set it.".to_string())
        })?;

        let remote = self.remote.ok_or_else(|| {
            Error::Config(
                "Remote repository is required. Use .remote_repo() to set it.".to_string(),
            )
        })?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let local_inventory = match self.local_inventory {
            Some(inventory) => inventory,
            None => provide_default_local_inventory(&cache_dir)?,
        };

        let config = CoreConfig {
            cache_dir,
            remote,
            retry_policy: self.retry_policy.unwrap_or_default(),
            conversion: self.conversion.unwrap_or_default(),
            upload: self.upload.unwrap_or_default(),
            event_buffer_size: self
                .event_buffer_size
                .unwrap_or(crate::events::DEFAULT_EVENT_BUFFER_SIZE),
            http_client,
            local_inventory,
            image_pipeline: self.image_pipeline.or_else(provide_default_image_pipeline),
            notification_surface: self
                .notification_surface
                .or_else(provide_default_notification_surface),
            transcoder_factory: self
                .transcoder_factory
                .or_else(provide_default_transcoder_factory),
        };

        config.validate()?;

        Ok(config)
    }
}
