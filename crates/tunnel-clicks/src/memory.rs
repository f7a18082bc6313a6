use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tunnel_core::clicks::Result;
use tunnel_core::{ClickCounter, MappingId};

/// In-process click counters.
///
/// The key set of the map is the membership set. Increments take a shard
/// read lock and bump the atomic, so they never block each other; removal
/// takes the shard write lock and only happens while the count is zero,
/// which keeps a racing increment from landing on a removed counter.
#[derive(Debug, Default)]
pub struct InMemoryClickCounter {
    counters: DashMap<MappingId, AtomicU64>,
}

impl InMemoryClickCounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, id: MappingId, delta: u64) -> u64 {
        if let Some(counter) = self.counters.get(&id) {
            return counter.fetch_add(delta, Ordering::AcqRel) + delta;
        }
        self.counters
            .entry(id)
            .or_default()
            .fetch_add(delta, Ordering::AcqRel)
            + delta
    }
}

#[async_trait]
impl ClickCounter for InMemoryClickCounter {
    async fn increment(&self, id: MappingId) -> Result<u64> {
        Ok(self.add(id, 1))
    }

    async fn pending_ids(&self) -> Result<Vec<MappingId>> {
        Ok(self.counters.iter().map(|entry| *entry.key()).collect())
    }

    async fn pending(&self, id: MappingId) -> Result<u64> {
        Ok(self
            .counters
            .get(&id)
            .map_or(0, |counter| counter.load(Ordering::Acquire)))
    }

    async fn take(&self, id: MappingId) -> Result<u64> {
        // swap(0) subtracts exactly the count it returns; clicks landing
        // after it stay pending for the next take
        Ok(self
            .counters
            .get(&id)
            .map_or(0, |counter| counter.swap(0, Ordering::AcqRel)))
    }

    async fn restore(&self, id: MappingId, delta: u64) -> Result<()> {
        self.add(id, delta);
        Ok(())
    }

    async fn retire_if_idle(&self, id: MappingId) -> Result<bool> {
        Ok(self
            .counters
            .remove_if(&id, |_, counter| counter.load(Ordering::Acquire) == 0)
            .is_some())
    }
}
