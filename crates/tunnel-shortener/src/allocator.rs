use crate::error::{Result, ShortenerError};
use std::sync::Arc;
use tracing::{debug, error, trace};
use tunnel_core::{
    Clock, MappingId, MappingRecord, MappingRepository, NewMapping, ShortCode, StorageError,
    SystemClock,
};

const DEFAULT_MAX_ATTEMPTS: u32 = 8;

/// Assigns codes to new mappings.
///
/// An identifier is reserved first and the record is inserted exactly once,
/// already carrying its final code. Derived codes are the base62 encoding of
/// the identifier. A derived code that a custom alias already occupies is
/// skipped by reserving another identifier.
pub struct CodeAllocator<R> {
    repository: Arc<R>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
}

impl<R: MappingRepository> CodeAllocator<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self {
            repository,
            clock: Arc::new(SystemClock),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Bounds how many identifiers a derived allocation may skip.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Persists `mapping` under `custom_alias`, or under the code derived
    /// from a freshly reserved identifier when no alias is given.
    pub async fn allocate(
        &self,
        mapping: NewMapping,
        custom_alias: Option<ShortCode>,
    ) -> Result<MappingRecord> {
        match custom_alias {
            Some(alias) => self.allocate_alias(mapping, alias).await,
            None => self.allocate_derived(mapping).await,
        }
    }

    async fn allocate_alias(&self, mapping: NewMapping, alias: ShortCode) -> Result<MappingRecord> {
        if self.repository.exists_by_code(&alias).await? {
            return Err(ShortenerError::AliasConflict(alias.to_string()));
        }

        let id = self.repository.reserve_id().await?;
        let record = self.record(id, alias, &mapping);

        match self.repository.insert(record.clone()).await {
            Ok(()) => {
                debug!(code = %record.code, mapping_id = %id, "Allocated custom alias");
                Ok(record)
            }
            Err(StorageError::Conflict(_)) => self.alias_conflict(id, &record.code).await,
            Err(e) => Err(e.into()),
        }
    }

    /// Classifies a conflicting alias insert. If the alias now has a holder
    /// the race for it was lost; otherwise the clash was on `id` itself.
    async fn alias_conflict(&self, id: MappingId, alias: &ShortCode) -> Result<MappingRecord> {
        if self.repository.find_by_code(alias).await?.is_some() {
            return Err(ShortenerError::AliasConflict(alias.to_string()));
        }

        error!(code = %alias, mapping_id = %id, "Reserved identifier is already in use");
        Err(ShortenerError::EncodingCollision {
            mapping_id: id,
            code: alias.to_string(),
        })
    }

    async fn allocate_derived(&self, mapping: NewMapping) -> Result<MappingRecord> {
        for attempt in 1..=self.max_attempts {
            let id = self.repository.reserve_id().await?;
            let code = ShortCode::derive(id);
            let record = self.record(id, code, &mapping);

            match self.repository.insert(record.clone()).await {
                Ok(()) => {
                    debug!(code = %record.code, mapping_id = %id, "Allocated derived code");
                    return Ok(record);
                }
                Err(StorageError::Conflict(_)) => self.check_conflict(id, &record.code).await?,
                Err(e) => return Err(e.into()),
            }

            trace!(attempt, mapping_id = %id, "Derived code taken by an alias, skipping id");
        }

        Err(ShortenerError::AllocationExhausted(self.max_attempts))
    }

    /// Decides whether a conflicting derived code can be skipped.
    ///
    /// Only custom aliases may occupy someone else's derived code; any other
    /// holder means the identity generator issued `id` twice.
    async fn check_conflict(&self, id: MappingId, code: &ShortCode) -> Result<()> {
        let holder = self.repository.find_by_code(code).await?;
        match holder {
            Some(holder) if !holder.code.is_derived_from(holder.mapping_id) => Ok(()),
            _ => {
                error!(
                    code = %code,
                    mapping_id = %id,
                    "Derived code already owned by the same identifier"
                );
                Err(ShortenerError::EncodingCollision {
                    mapping_id: id,
                    code: code.to_string(),
                })
            }
        }
    }

    fn record(&self, id: MappingId, code: ShortCode, mapping: &NewMapping) -> MappingRecord {
        MappingRecord {
            mapping_id: id,
            code,
            destination_url: mapping.destination_url.clone(),
            created_at: self.clock.now(),
            expires_at: mapping.expires_at,
            active: true,
        }
    }
}

impl<R> Clone for CodeAllocator<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            clock: Arc::clone(&self.clock),
            max_attempts: self.max_attempts,
        }
    }
}
