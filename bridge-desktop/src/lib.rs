//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`
//! - `LocalInventory` using `tokio::fs` with a JSON index
//! - `ImagePipeline` using the `image` crate
//! - `NotificationSurface` that logs through `tracing`
//! - `TranscodeEngine` spawning `ffmpeg` (feature `ffmpeg`)
//!
//! ## Feature Flags
//!
//! - `ffmpeg`: Enable the ffmpeg-backed transcoding engine
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, TokioFileCache};
//!
//! let http_client = ReqwestHttpClient::new()?;
//! let cache = TokioFileCache::in_user_cache();
//! ```

mod cache;
mod http;
mod thumbnail;
mod notifier;

#[cfg(feature = "ffmpeg")]
mod transcoder;

pub use cache::{TokioFileCache, DEFAULT_QUOTA_BYTES};
pub use http::ReqwestHttpClient;
pub use thumbnail::ImageThumbnailer;
pub use notifier::TracingNotifier;

#[cfg(feature = "ffmpeg")]
pub use transcoder::FfmpegTranscoder;
