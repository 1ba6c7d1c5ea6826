//! # Host Bridge Traits
//!
//! Collaborator contracts the media core depends on but does not implement.
//!
//! ## Overview
//!
//! Each trait is a narrow capability supplied by the host (desktop defaults live
//! in `bridge-desktop`). The core only ever talks to these traits, so every
//! collaborator can be replaced by an in-memory fake in tests.
//!
//! ## Traits
//!
//! ### Networking & Storage
//! - [`HttpClient`](http::HttpClient) - Single-attempt async HTTP
//! - [`LocalInventory`](storage::LocalInventory) - Durable on-device cache of captured media
//! - [`RemoteStore`](storage::RemoteStore) - Authoritative repository-backed store
//!
//! ### Media Pipeline
//! - [`TranscodeEngine`](media::TranscodeEngine) - Black-box transcoder run on a worker thread
//! - [`ImagePipeline`](media::ImagePipeline) - Thumbnail resize/re-encode
//! - [`NotificationSurface`](media::NotificationSurface) - Passive user notifications
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! should map transport failures to `BridgeError::Network` so the retry layer can
//! classify them as transient.
//!
//! ## Thread Safety
//!
//! All traits except [`TranscodeEngine`](media::TranscodeEngine) require
//! `Send + Sync`. The engine is owned by exactly one worker thread and only needs
//! `Send`.

pub mod error;
pub mod http;
pub mod media;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use media::{
    ImagePipeline, Notification, NotificationLevel, NotificationSurface, TranscodeEngine,
    TranscodeEngineFactory,
};
pub use storage::{LocalEntry, LocalInventory, RemoteEntry, RemoteStore, StorageEstimate};
pub use time::{Clock, FixedClock, LogEntry, LogLevel, LoggerSink, SystemClock};
