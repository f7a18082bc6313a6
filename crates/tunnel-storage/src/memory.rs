use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use jiff::Timestamp;
use std::sync::atomic::{AtomicU64, Ordering};
use tunnel_core::repository::Result;
use tunnel_core::{
    AggregateRepository, ClickAggregate, MappingId, MappingReader, MappingRecord,
    MappingRepository, ShortCode, StorageError,
};

/// In-memory implementation of the repository traits.
///
/// Records are indexed twice: by code, and from identifier to code. An insert
/// holds the vacant code slot while it claims the identifier slot, so a
/// rejected insert writes neither index. Identifiers come from an atomic
/// counter and are never handed out twice.
#[derive(Debug)]
pub struct InMemoryRepository {
    by_code: DashMap<ShortCode, MappingRecord>,
    code_by_id: DashMap<MappingId, ShortCode>,
    aggregates: DashMap<MappingId, ClickAggregate>,
    next_id: AtomicU64,
}

impl InMemoryRepository {
    /// Creates a new in-memory repository whose identifiers start at 1.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Creates a repository whose first reserved identifier is `first_id`.
    pub fn starting_at(first_id: u64) -> Self {
        Self {
            by_code: DashMap::new(),
            code_by_id: DashMap::new(),
            aggregates: DashMap::new(),
            next_id: AtomicU64::new(first_id),
        }
    }

    fn code_of(&self, id: MappingId) -> Option<ShortCode> {
        self.code_by_id.get(&id).map(|code| code.clone())
    }

    fn update<F>(&self, id: MappingId, apply: F) -> bool
    where
        F: FnOnce(&mut MappingRecord),
    {
        let Some(code) = self.code_of(id) else {
            return false;
        };
        match self.by_code.get_mut(&code) {
            Some(mut record) => {
                apply(record.value_mut());
                true
            }
            None => false,
        }
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MappingReader for InMemoryRepository {
    async fn find_by_code(&self, code: &ShortCode) -> Result<Option<MappingRecord>> {
        Ok(self.by_code.get(code).map(|record| record.clone()))
    }

    async fn find_by_id(&self, id: MappingId) -> Result<Option<MappingRecord>> {
        let Some(code) = self.code_of(id) else {
            return Ok(None);
        };
        Ok(self.by_code.get(&code).map(|record| record.clone()))
    }

    async fn exists_by_code(&self, code: &ShortCode) -> Result<bool> {
        Ok(self.by_code.contains_key(code))
    }
}

#[async_trait]
impl MappingRepository for InMemoryRepository {
    async fn reserve_id(&self) -> Result<MappingId> {
        Ok(MappingId::new(self.next_id.fetch_add(1, Ordering::Relaxed)))
    }

    async fn insert(&self, record: MappingRecord) -> Result<()> {
        // the code shard stays locked until both indexes are written
        let Entry::Vacant(code_slot) = self.by_code.entry(record.code.clone()) else {
            return Err(StorageError::Conflict(record.code.to_string()));
        };
        let Entry::Vacant(id_slot) = self.code_by_id.entry(record.mapping_id) else {
            return Err(StorageError::Conflict(format!(
                "mapping id {} already used",
                record.mapping_id
            )));
        };

        id_slot.insert(record.code.clone());
        code_slot.insert(record);
        Ok(())
    }

    async fn set_active(&self, id: MappingId, active: bool) -> Result<bool> {
        Ok(self.update(id, |record| record.active = active))
    }

    async fn set_expires_at(&self, id: MappingId, expires_at: Option<Timestamp>) -> Result<bool> {
        Ok(self.update(id, |record| record.expires_at = expires_at))
    }
}

#[async_trait]
impl AggregateRepository for InMemoryRepository {
    async fn upsert_aggregate(&self, id: MappingId, delta: u64, now: Timestamp) -> Result<()> {
        self.aggregates
            .entry(id)
            .and_modify(|aggregate| {
                aggregate.total_clicks = aggregate.total_clicks.saturating_add(delta);
                aggregate.last_flushed_at = now;
            })
            .or_insert(ClickAggregate {
                mapping_id: id,
                total_clicks: delta,
                last_flushed_at: now,
            });
        Ok(())
    }

    async fn get_aggregate(&self, id: MappingId) -> Result<Option<ClickAggregate>> {
        Ok(self.aggregates.get(&id).map(|aggregate| *aggregate))
    }
}
