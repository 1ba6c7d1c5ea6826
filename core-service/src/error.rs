use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Conversion error: {0}")]
    Conversion(#[from] core_conversion::ConversionError),

    #[error("Inventory error: {0}")]
    Inventory(#[from] core_inventory::InventoryError),

    #[error("Upload error: {0}")]
    Upload(#[from] core_upload::UploadError),

    #[error("Remote error: {0}")]
    Remote(#[from] provider_github::GitHubError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::BridgeError),
}

impl CoreError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Inventory(e) => e.is_retryable(),
            CoreError::Upload(e) => e.is_retryable(),
            CoreError::Remote(e) => e.is_retryable(),
            CoreError::Bridge(bridge_traits::BridgeError::Network(_)) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
