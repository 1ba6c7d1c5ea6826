use bridge_traits::error::BridgeError;
use core_inventory::InventoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("{0} is already stored remotely")]
    AlreadyRemote(String),

    #[error("Upload already in progress for {0}")]
    InProgress(String),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error("Remote write failed: {0}")]
    Remote(BridgeError),

    #[error("Thumbnail processing failed: {0}")]
    Thumbnail(BridgeError),
}

impl UploadError {
    /// Whether retrying the same upload may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::Remote(BridgeError::Network(_)) => true,
            UploadError::Inventory(e) => e.is_retryable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, UploadError>;
