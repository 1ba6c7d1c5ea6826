//! # GitHub Provider
//!
//! Implements the `RemoteStore` trait over the GitHub repository contents API.
//!
//! ## Overview
//!
//! This module provides:
//! - Repository access checks with bearer-token authentication
//! - Directory listing and single-file metadata (a missing directory lists as empty)
//! - Create/replace/delete of files with base64 content and commit messages
//! - [`ResilientFetch`]: retry with capped exponential backoff, a staleness
//!   window for 404s, and download URL fallbacks across raw hosts and a CDN

pub mod connector;
pub mod error;
pub mod resilient;
pub mod types;

pub use connector::GitHubConnector;
pub use error::{GitHubError, Result};
pub use resilient::{NotFoundMode, ResilientFetch};
