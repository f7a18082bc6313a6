use thiserror::Error;
use tunnel_core::ClickError;

pub type Result<T> = std::result::Result<T, DrainError>;

#[derive(Debug, Clone, Error)]
pub enum DrainError {
    #[error("failed to list pending mappings: {0}")]
    Counter(#[from] ClickError),
}
