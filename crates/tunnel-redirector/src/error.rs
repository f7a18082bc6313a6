use thiserror::Error;
use tunnel_core::{CoreError, StorageError};

pub type Result<T> = std::result::Result<T, RedirectorError>;

#[derive(Debug, Clone, Error)]
pub enum RedirectorError {
    /// The persistent store could not answer in time. The code may well
    /// exist, so this must never be reported as not found.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("invalid short code: {0}")]
    InvalidShortCode(String),
    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for RedirectorError {
    fn from(value: StorageError) -> Self {
        if value.is_unavailable() {
            Self::BackendUnavailable(value.to_string())
        } else {
            Self::Storage(value)
        }
    }
}

impl From<CoreError> for RedirectorError {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::InvalidShortCode(message) | CoreError::InvalidEncoding(message) => {
                Self::InvalidShortCode(message)
            }
        }
    }
}
