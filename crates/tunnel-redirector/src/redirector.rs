use crate::Result;
use async_trait::async_trait;
use tunnel_core::ShortCode;

/// Outcome of resolving a short code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The mapping is live; send the client to this URL.
    Redirect(String),
    /// The mapping exists but is inactive or expired.
    Gone,
    NotFound,
}

#[async_trait]
pub trait Redirector: Send + Sync + 'static {
    /// Resolves a short code, recording a click when it redirects.
    async fn resolve(&self, code: &ShortCode) -> Result<Resolution>;
}
