use crate::error::ClickError;
use crate::mapping::MappingId;
use async_trait::async_trait;
use std::sync::Arc;

pub type Result<T> = std::result::Result<T, ClickError>;

/// Volatile per-mapping click counters with a membership set.
///
/// Every method must be atomic with respect to concurrent callers on the
/// same mapping; implementations use native atomic primitives rather than
/// read-modify-write in the application.
#[async_trait]
pub trait ClickCounter: Send + Sync + 'static {
    /// Adds one click and records the mapping as a member in a single
    /// indivisible step. Returns the pending count after the increment.
    async fn increment(&self, id: MappingId) -> Result<u64>;

    /// Mappings currently in the membership set.
    async fn pending_ids(&self) -> Result<Vec<MappingId>>;

    /// Current pending count; zero for non-members.
    async fn pending(&self, id: MappingId) -> Result<u64>;

    /// Reads the pending count and subtracts exactly the observed amount,
    /// atomically. Increments racing with the take stay pending.
    ///
    /// Returns the observed amount. Membership is left untouched.
    async fn take(&self, id: MappingId) -> Result<u64>;

    /// Adds `delta` back and re-records membership.
    async fn restore(&self, id: MappingId, delta: u64) -> Result<()>;

    /// Removes the mapping from membership if and only if its pending count
    /// is zero. Returns whether it was removed.
    async fn retire_if_idle(&self, id: MappingId) -> Result<bool>;
}

/// Sink for clicks produced by redirects.
#[async_trait]
pub trait ClickRecorder: Send + Sync + 'static {
    async fn record_click(&self, id: MappingId) -> Result<()>;
}

#[async_trait]
impl<T: ClickCounter + ?Sized> ClickCounter for Arc<T> {
    async fn increment(&self, id: MappingId) -> Result<u64> {
        (**self).increment(id).await
    }

    async fn pending_ids(&self) -> Result<Vec<MappingId>> {
        (**self).pending_ids().await
    }

    async fn pending(&self, id: MappingId) -> Result<u64> {
        (**self).pending(id).await
    }

    async fn take(&self, id: MappingId) -> Result<u64> {
        (**self).take(id).await
    }

    async fn restore(&self, id: MappingId, delta: u64) -> Result<()> {
        (**self).restore(id, delta).await
    }

    async fn retire_if_idle(&self, id: MappingId) -> Result<bool> {
        (**self).retire_if_idle(id).await
    }
}

#[async_trait]
impl<T: ClickRecorder + ?Sized> ClickRecorder for Arc<T> {
    async fn record_click(&self, id: MappingId) -> Result<()> {
        (**self).record_click(id).await
    }
}
