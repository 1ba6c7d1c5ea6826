use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    /// Rejected locally, never sent to the worker
    #[error("{0} data is required")]
    MissingPayload(String),

    #[error("Conversion service destroyed")]
    ServiceDestroyed,

    #[error("Conversion timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    #[error("Conversion failed: {0}")]
    Failed(String),

    #[error("Conversion worker crashed: {0}")]
    WorkerCrashed(String),

    #[error("Conversion worker failed to start: {0}")]
    WorkerInit(String),

    #[error("Unexpected worker reply: {0}")]
    UnexpectedReply(String),
}

pub type Result<T> = std::result::Result<T, ConversionError>;
