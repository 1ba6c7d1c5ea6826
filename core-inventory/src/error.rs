use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("Local inventory error: {0}")]
    Local(BridgeError),

    #[error("Remote store error: {0}")]
    Remote(BridgeError),

    #[error("Invalid media name: {0}")]
    InvalidName(String),

    #[error("Refusing to save empty payload for {0}")]
    EmptyPayload(String),

    #[error("Insufficient storage: need {required} bytes, {available} available")]
    InsufficientStorage { required: u64, available: u64 },

    #[error("File is not stored locally: {0}")]
    NotLocal(String),

    #[error("File is not stored remotely: {0}")]
    NotRemote(String),

    #[error("Local payload missing for {0}")]
    PayloadMissing(String),
}

impl InventoryError {
    /// Transient remote failures are worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, InventoryError::Remote(BridgeError::Network(_)))
    }
}

pub type Result<T> = std::result::Result<T, InventoryError>;
