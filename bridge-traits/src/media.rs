//! Media Collaborator Abstractions
//!
//! Narrow contracts for the pieces of the capture pipeline that live outside the
//! core: the transcoding engine, the thumbnail image pipeline and the host's
//! notification surface.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// External transcoding engine.
///
/// Runs on a dedicated worker thread, so calls are synchronous and the engine
/// only needs to be `Send`. The engine is a black box: bytes in, bytes out.
pub trait TranscodeEngine: Send {
    /// Transcode `input` into `format` (a container/extension such as `"mp3"`).
    ///
    /// `progress` may be called any number of times with a percentage in
    /// `0..=100` and a short human-readable phase label.
    fn transcode(
        &mut self,
        input: &[u8],
        format: &str,
        progress: &mut dyn FnMut(u8, &str),
    ) -> Result<Vec<u8>>;
}

/// Builds a transcoding engine on the worker thread that will own it.
pub type TranscodeEngineFactory =
    std::sync::Arc<dyn Fn() -> Result<Box<dyn TranscodeEngine>> + Send + Sync>;

/// Image resize/re-encode pipeline used for thumbnails before upload.
#[async_trait]
pub trait ImagePipeline: Send + Sync {
    /// Returns the processed image bytes (JPEG)
    async fn process_thumbnail(&self, data: Bytes, mime_type: &str) -> Result<Bytes>;
}

/// Notification importance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationLevel {
    Info,
    Success,
    Error,
}

/// Passive, user-facing notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub body: String,
}

impl Notification {
    pub fn new(level: NotificationLevel, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            body: body.into(),
        }
    }
}

/// Host notification surface (toasts, system notifications, ...)
pub trait NotificationSurface: Send + Sync {
    fn notify(&self, notification: Notification);
}
