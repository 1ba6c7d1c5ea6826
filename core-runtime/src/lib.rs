//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the media capture core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities every other core crate depends on.
//! It establishes the logging conventions, the fail-fast configuration builder,
//! and the broadcast event bus through which conversion, upload and inventory
//! results reach the UI and the notifier.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
