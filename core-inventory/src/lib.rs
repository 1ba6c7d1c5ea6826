//! # Combined File Inventory
//!
//! One listing over two independently failing sources: the on-device cache of
//! captured media and the remote repository that is the source of truth.
//!
//! - [`naming`] parses and formats `{category}_{title}_{author}_{date}.{ext}` names
//! - [`models`] holds [`MediaFile`] and its [`Origin`]
//! - [`store`] reconciles both inventories into an [`InventoryView`]

pub mod error;
pub mod models;
pub mod naming;
pub mod store;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use error::{InventoryError, Result};
pub use models::{InventoryView, MediaFile, MediaKind, Origin, RemoteLayout, ThumbnailPair};
pub use naming::{basename, extract_date, MediaName};
pub use store::{CombinedFileStore, RefreshOutcome};
