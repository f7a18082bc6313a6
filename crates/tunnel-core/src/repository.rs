use crate::error::StorageError;
use crate::mapping::{ClickAggregate, MappingId, MappingRecord};
use crate::shortcode::ShortCode;
use async_trait::async_trait;
use jiff::Timestamp;
use std::sync::Arc;

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// A read-only view of the mapping store.
///
/// This is all the redirector needs; writes go through
/// [`MappingRepository`].
#[async_trait]
pub trait MappingReader: Send + Sync + 'static {
    /// Returns the record holding `code`, live or not.
    async fn find_by_code(&self, code: &ShortCode) -> Result<Option<MappingRecord>>;

    async fn find_by_id(&self, id: MappingId) -> Result<Option<MappingRecord>>;

    /// Checks whether a short code has ever been assigned.
    async fn exists_by_code(&self, code: &ShortCode) -> Result<bool>;
}

#[async_trait]
pub trait MappingRepository: MappingReader {
    /// Draws the next identifier from the identity generator.
    ///
    /// Identifiers are never handed out twice, even if the reservation is
    /// never followed by an insert.
    async fn reserve_id(&self) -> Result<MappingId>;

    /// Inserts a new record with its final code.
    ///
    /// Returns `Err(StorageError::Conflict)` if the code is already taken.
    async fn insert(&self, record: MappingRecord) -> Result<()>;

    /// Returns `true` if the record existed.
    async fn set_active(&self, id: MappingId, active: bool) -> Result<bool>;

    /// Returns `true` if the record existed.
    async fn set_expires_at(&self, id: MappingId, expires_at: Option<Timestamp>) -> Result<bool>;
}

/// Durable click totals.
#[async_trait]
pub trait AggregateRepository: Send + Sync + 'static {
    /// Adds `delta` to the mapping's total, creating the row if needed, and
    /// stamps it with `now`.
    async fn upsert_aggregate(&self, id: MappingId, delta: u64, now: Timestamp) -> Result<()>;

    async fn get_aggregate(&self, id: MappingId) -> Result<Option<ClickAggregate>>;
}

#[async_trait]
impl<T: MappingReader + ?Sized> MappingReader for Arc<T> {
    async fn find_by_code(&self, code: &ShortCode) -> Result<Option<MappingRecord>> {
        (**self).find_by_code(code).await
    }

    async fn find_by_id(&self, id: MappingId) -> Result<Option<MappingRecord>> {
        (**self).find_by_id(id).await
    }

    async fn exists_by_code(&self, code: &ShortCode) -> Result<bool> {
        (**self).exists_by_code(code).await
    }
}

#[async_trait]
impl<T: MappingRepository + ?Sized> MappingRepository for Arc<T> {
    async fn reserve_id(&self) -> Result<MappingId> {
        (**self).reserve_id().await
    }

    async fn insert(&self, record: MappingRecord) -> Result<()> {
        (**self).insert(record).await
    }

    async fn set_active(&self, id: MappingId, active: bool) -> Result<bool> {
        (**self).set_active(id, active).await
    }

    async fn set_expires_at(&self, id: MappingId, expires_at: Option<Timestamp>) -> Result<bool> {
        (**self).set_expires_at(id, expires_at).await
    }
}

#[async_trait]
impl<T: AggregateRepository + ?Sized> AggregateRepository for Arc<T> {
    async fn upsert_aggregate(&self, id: MappingId, delta: u64, now: Timestamp) -> Result<()> {
        (**self).upsert_aggregate(id, delta, now).await
    }

    async fn get_aggregate(&self, id: MappingId) -> Result<Option<ClickAggregate>> {
        (**self).get_aggregate(id).await
    }
}
