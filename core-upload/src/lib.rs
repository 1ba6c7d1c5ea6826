//! # Upload Manager
//!
//! Two-phase upload of local captures to the remote store: the primary asset,
//! then its thumbnail. Progress is reported as one composite value and every
//! step is published on the event bus.

pub mod error;
pub mod manager;
pub mod task;

pub use error::{Result, UploadError};
pub use manager::{UploadManager, UploadProgressCallback};
pub use task::{UploadPhase, UploadTask};
