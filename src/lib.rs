//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (e.g., `core-service` with its desktop bridges or the
//! ffmpeg-backed transcoder). Host applications can depend on `mcc-workspace`
//! and enable the documented features without needing to wire each crate
//! individually.

#[cfg(any(feature = "desktop-shims", feature = "ffmpeg"))]
pub use core_service::{MediaCore, MediaCoreDependencies};
