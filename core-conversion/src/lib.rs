//! # Conversion Worker Service
//!
//! Background transcoding for captured media.
//!
//! Each media kind gets its own [`ConversionService`], which owns one persistent
//! worker thread and multiplexes concurrent jobs through it by correlation id.
//! Terminal results are published on the event bus so that
//! [`notifier::spawn_notifier`] can tell the user about conversions that finish
//! after they navigated away.

pub mod error;
pub mod notifier;
pub mod protocol;
pub mod service;
mod worker;

pub use error::{ConversionError, Result};
pub use notifier::{spawn_notifier, Screen, ScreenTracker};
pub use protocol::{ConversionKind, ConversionOutput};
pub use service::{ConversionProgress, ConversionService, ProgressCallback};
