use crate::error::CacheError;
use crate::mapping::MappingSnapshot;
use crate::shortcode::ShortCode;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, CacheError>;

/// A TTL-bounded cache of [`MappingSnapshot`]s keyed by [`ShortCode`].
///
/// Callers treat every method as best effort: a failing cache degrades to
/// a miss, never to a failed resolution.
#[async_trait]
pub trait SnapshotCache: Send + Sync + 'static {
    /// Get a snapshot from cache.
    ///
    /// Returns `Ok(None)` if the key is absent or its TTL has elapsed.
    async fn get(&self, code: &ShortCode) -> Result<Option<MappingSnapshot>> {
        Ok(self.get_with_ttl(code).await?.map(|(snapshot, _)| snapshot))
    }

    /// Get a snapshot together with the time it has left to live.
    async fn get_with_ttl(&self, code: &ShortCode) -> Result<Option<(MappingSnapshot, Duration)>>;

    /// Store a snapshot for at most `ttl`. Last writer wins.
    async fn set(&self, code: &ShortCode, snapshot: &MappingSnapshot, ttl: Duration)
        -> Result<()>;

    /// Remove a snapshot from cache.
    ///
    /// It is not an error if the key does not exist.
    async fn del(&self, code: &ShortCode) -> Result<()>;
}

#[async_trait]
impl<T: SnapshotCache + ?Sized> SnapshotCache for Arc<T> {
    async fn get(&self, code: &ShortCode) -> Result<Option<MappingSnapshot>> {
        (**self).get(code).await
    }

    async fn get_with_ttl(&self, code: &ShortCode) -> Result<Option<(MappingSnapshot, Duration)>> {
        (**self).get_with_ttl(code).await
    }

    async fn set(
        &self,
        code: &ShortCode,
        snapshot: &MappingSnapshot,
        ttl: Duration,
    ) -> Result<()> {
        (**self).set(code, snapshot, ttl).await
    }

    async fn del(&self, code: &ShortCode) -> Result<()> {
        (**self).del(code).await
    }
}
