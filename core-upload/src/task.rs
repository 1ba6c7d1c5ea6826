//! Upload status records

use core_inventory::MediaFile;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadPhase {
    Pending,
    Uploading,
    Success,
    Error,
}

impl UploadPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadPhase::Success | UploadPhase::Error)
    }
}

/// State of one file's upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadTask {
    pub file: MediaFile,
    pub phase: UploadPhase,
    /// Composite progress in `[0, 1]`
    pub progress: f64,
    pub error: Option<String>,
    /// Repository path of the primary asset once written
    pub remote_path: Option<String>,
}

impl UploadTask {
    pub fn new(file: MediaFile) -> Self {
        Self {
            file,
            phase: UploadPhase::Pending,
            progress: 0.0,
            error: None,
            remote_path: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.phase.is_terminal()
    }
}
