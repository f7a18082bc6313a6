use thiserror::Error;
use tunnel_core::{CoreError, MappingId, StorageError};

pub type Result<T> = std::result::Result<T, ShortenerError>;

#[derive(Debug, Clone, Error)]
pub enum ShortenerError {
    #[error("alias already exists: {0}")]
    AliasConflict(String),
    #[error("invalid short code: {0}")]
    InvalidShortCode(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid expiration: {0}")]
    InvalidExpiration(String),
    /// The identity generator handed out an id whose code is already owned
    /// by a mapping derived from that same id.
    #[error("derived code '{code}' of mapping {mapping_id} is already in use")]
    EncodingCollision { mapping_id: MappingId, code: String },
    #[error("no free derived code after {0} attempts")]
    AllocationExhausted(u32),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<CoreError> for ShortenerError {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::InvalidShortCode(message) | CoreError::InvalidEncoding(message) => {
                Self::InvalidShortCode(message)
            }
        }
    }
}
