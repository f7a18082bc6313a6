use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, trace, warn};
use tunnel_core::{
    AggregateRepository, ClickCounter, ClickError, ClickRecorder, Clock, MappingId, SystemClock,
};

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Clicks written into the aggregates, per mapping.
    pub persisted: BTreeMap<MappingId, u64>,
    /// Clicks whose write failed; they stay pending for the next pass.
    pub failed: BTreeMap<MappingId, u64>,
    /// Mappings that left the membership set.
    pub retired: usize,
    /// Mappings skipped because the counter backend errored.
    pub counter_errors: usize,
}

impl DrainReport {
    pub fn total_persisted(&self) -> u64 {
        self.persisted.values().sum()
    }

    pub fn total_failed(&self) -> u64 {
        self.failed.values().sum()
    }

    /// Whether every pending count was handled without error.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.counter_errors == 0
    }

    fn record_persisted(&mut self, id: MappingId, delta: u64) {
        *self.persisted.entry(id).or_default() += delta;
    }

    fn record_failed(&mut self, id: MappingId, delta: u64) {
        *self.failed.entry(id).or_default() += delta;
    }
}

/// Buffers clicks in a [`ClickCounter`] and drains them into an
/// [`AggregateRepository`].
///
/// For every mapping id the following holds at all times:
/// `persisted total + pending count + stranded delta == increments issued`.
/// A delta is *stranded* when its aggregate write failed and handing it back
/// to the counter failed too; it is kept here and written first on the next
/// pass.
pub struct ClickBuffer<C, A> {
    counter: Arc<C>,
    aggregates: Arc<A>,
    clock: Arc<dyn Clock>,
    // doubles as the drain lock, so only one pass runs at a time
    stranded: Mutex<BTreeMap<MappingId, u64>>,
}

impl<C: ClickCounter, A: AggregateRepository> ClickBuffer<C, A> {
    pub fn new(counter: C, aggregates: A) -> Self {
        Self::with_clock(counter, aggregates, Arc::new(SystemClock))
    }

    pub fn with_clock(counter: C, aggregates: A, clock: Arc<dyn Clock>) -> Self {
        Self {
            counter: Arc::new(counter),
            aggregates: Arc::new(aggregates),
            clock,
            stranded: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn counter(&self) -> &C {
        &self.counter
    }

    pub fn aggregates(&self) -> &A {
        &self.aggregates
    }

    /// Records one click for `id`. Returns the pending count afterwards.
    pub async fn increment(&self, id: MappingId) -> std::result::Result<u64, ClickError> {
        let pending = self.counter.increment(id).await?;
        trace!(mapping_id = %id, pending, "Recorded click");
        Ok(pending)
    }

    /// Deltas currently held back after a double failure.
    pub async fn stranded(&self) -> BTreeMap<MappingId, u64> {
        self.stranded.lock().await.clone()
    }

    /// Moves every pending count into the aggregates.
    ///
    /// Per mapping: take the observed count, upsert it, then retire the
    /// mapping if nothing new arrived meanwhile. A failed upsert hands the
    /// delta back to the counter. Fails only if the membership set cannot be
    /// listed; per-mapping problems are reported in the [`DrainReport`].
    pub async fn drain(&self) -> Result<DrainReport> {
        let mut stranded = self.stranded.lock().await;
        let ids = self.counter.pending_ids().await?;
        let now = self.clock.now();
        let mut report = DrainReport::default();

        trace!(members = ids.len(), stranded = stranded.len(), "Starting drain");

        for (id, delta) in std::mem::take(&mut *stranded) {
            match self.aggregates.upsert_aggregate(id, delta, now).await {
                Ok(()) => {
                    debug!(mapping_id = %id, delta, "Persisted stranded clicks");
                    report.record_persisted(id, delta);
                }
                Err(e) => {
                    warn!(mapping_id = %id, delta, error = %e, "Failed to persist stranded clicks");
                    report.record_failed(id, delta);
                    self.hand_back(&mut stranded, id, delta).await;
                }
            }
        }

        for id in ids {
            if report.failed.contains_key(&id) {
                // its stranded delta just failed and went back to the counter
                continue;
            }

            let observed = match self.counter.take(id).await {
                Ok(observed) => observed,
                Err(e) => {
                    warn!(mapping_id = %id, error = %e, "Failed to take pending clicks");
                    report.counter_errors += 1;
                    continue;
                }
            };

            if observed > 0 {
                if let Err(e) = self.aggregates.upsert_aggregate(id, observed, now).await {
                    warn!(mapping_id = %id, delta = observed, error = %e, "Failed to persist clicks");
                    report.record_failed(id, observed);
                    self.hand_back(&mut stranded, id, observed).await;
                    continue;
                }
                debug!(mapping_id = %id, delta = observed, "Persisted clicks");
                report.record_persisted(id, observed);
            }

            match self.counter.retire_if_idle(id).await {
                Ok(true) => report.retired += 1,
                Ok(false) => trace!(mapping_id = %id, "Mapping received clicks during drain"),
                Err(e) => {
                    // still a member, so the next pass retries the retirement
                    warn!(mapping_id = %id, error = %e, "Failed to retire mapping");
                    report.counter_errors += 1;
                }
            }
        }

        debug!(
            persisted = report.total_persisted(),
            failed = report.total_failed(),
            retired = report.retired,
            "Drain finished"
        );
        Ok(report)
    }

    async fn hand_back(&self, stranded: &mut BTreeMap<MappingId, u64>, id: MappingId, delta: u64) {
        if let Err(e) = self.counter.restore(id, delta).await {
            error!(mapping_id = %id, delta, error = %e, "Failed to restore clicks, holding them for the next drain");
            *stranded.entry(id).or_default() += delta;
        }
    }
}

#[async_trait]
impl<C: ClickCounter, A: AggregateRepository> ClickRecorder for ClickBuffer<C, A> {
    async fn record_click(&self, id: MappingId) -> std::result::Result<(), ClickError> {
        self.increment(id).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryClickCounter;
    use jiff::Timestamp;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tunnel_core::{ClickAggregate, ManualClock, StorageError};
    use tunnel_storage::InMemoryRepository;

    fn id(value: u64) -> MappingId {
        MappingId::new(value)
    }

    fn buffer() -> ClickBuffer<InMemoryClickCounter, InMemoryRepository> {
        ClickBuffer::new(InMemoryClickCounter::new(), InMemoryRepository::new())
    }

    async fn total(aggregates: &impl AggregateRepository, id: MappingId) -> u64 {
        aggregates
            .get_aggregate(id)
            .await
            .unwrap()
            .map_or(0, |aggregate| aggregate.total_clicks)
    }

    /// Aggregate store whose writes can be switched off.
    #[derive(Default)]
    struct FlakyAggregates {
        inner: InMemoryRepository,
        failing: AtomicBool,
    }

    #[async_trait]
    impl AggregateRepository for FlakyAggregates {
        async fn upsert_aggregate(
            &self,
            id: MappingId,
            delta: u64,
            now: Timestamp,
        ) -> tunnel_core::repository::Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StorageError::Unavailable("database is down".to_string()));
            }
            self.inner.upsert_aggregate(id, delta, now).await
        }

        async fn get_aggregate(
            &self,
            id: MappingId,
        ) -> tunnel_core::repository::Result<Option<ClickAggregate>> {
            self.inner.get_aggregate(id).await
        }
    }

    /// Counter whose restores can be switched off.
    #[derive(Default)]
    struct NoRestoreCounter {
        inner: InMemoryClickCounter,
        failing_restores: AtomicBool,
    }

    #[async_trait]
    impl ClickCounter for NoRestoreCounter {
        async fn increment(&self, id: MappingId) -> tunnel_core::clicks::Result<u64> {
            self.inner.increment(id).await
        }

        async fn pending_ids(&self) -> tunnel_core::clicks::Result<Vec<MappingId>> {
            self.inner.pending_ids().await
        }

        async fn pending(&self, id: MappingId) -> tunnel_core::clicks::Result<u64> {
            self.inner.pending(id).await
        }

        async fn take(&self, id: MappingId) -> tunnel_core::clicks::Result<u64> {
            self.inner.take(id).await
        }

        async fn restore(&self, id: MappingId, delta: u64) -> tunnel_core::clicks::Result<()> {
            if self.failing_restores.load(Ordering::SeqCst) {
                return Err(ClickError::Unavailable("redis is down".to_string()));
            }
            self.inner.restore(id, delta).await
        }

        async fn retire_if_idle(&self, id: MappingId) -> tunnel_core::clicks::Result<bool> {
            self.inner.retire_if_idle(id).await
        }
    }

    #[tokio::test]
    async fn concurrent_increments_then_drain() {
        let buffer = Arc::new(buffer());
        let handles: Vec<_> = (0..5)
            .map(|_| {
                let buffer = Arc::clone(&buffer);
                tokio::spawn(async move { buffer.increment(id(7)).await.unwrap() })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let report = buffer.drain().await.unwrap();

        assert_eq!(report.persisted, BTreeMap::from([(id(7), 5)]));
        assert_eq!(total(buffer.aggregates(), id(7)).await, 5);
        assert_eq!(buffer.counter().pending(id(7)).await.unwrap(), 0);
        assert!(buffer.counter().pending_ids().await.unwrap().is_empty());
        assert_eq!(report.retired, 1);
    }

    #[tokio::test]
    async fn consecutive_drains_accumulate() {
        let buffer = buffer();
        for _ in 0..3 {
            buffer.increment(id(7)).await.unwrap();
        }
        assert_eq!(buffer.drain().await.unwrap().persisted[&id(7)], 3);

        for _ in 0..2 {
            buffer.increment(id(7)).await.unwrap();
        }
        assert_eq!(buffer.drain().await.unwrap().persisted[&id(7)], 2);

        assert_eq!(total(buffer.aggregates(), id(7)).await, 5);
    }

    #[tokio::test]
    async fn drain_stamps_last_flushed_at() {
        let clock = ManualClock::new(Timestamp::from_second(1_700_000_000).unwrap());
        let buffer = ClickBuffer::with_clock(
            InMemoryClickCounter::new(),
            InMemoryRepository::new(),
            Arc::new(clock.clone()),
        );
        buffer.increment(id(3)).await.unwrap();
        buffer.drain().await.unwrap();

        let aggregate = buffer.aggregates().get_aggregate(id(3)).await.unwrap().unwrap();
        assert_eq!(aggregate.last_flushed_at, clock.now());
    }

    #[tokio::test]
    async fn empty_drain_persists_nothing() {
        let buffer = buffer();
        let report = buffer.drain().await.unwrap();
        assert!(report.persisted.is_empty());
        assert!(report.is_clean());
        assert!(buffer.aggregates().get_aggregate(id(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_persist_restores_delta() {
        let buffer = ClickBuffer::new(InMemoryClickCounter::new(), FlakyAggregates::default());
        for _ in 0..4 {
            buffer.increment(id(2)).await.unwrap();
        }
        buffer.aggregates().failing.store(true, Ordering::SeqCst);

        let report = buffer.drain().await.unwrap();

        assert!(report.persisted.is_empty());
        assert_eq!(report.failed, BTreeMap::from([(id(2), 4)]));
        assert!(!report.is_clean());
        assert_eq!(buffer.counter().pending(id(2)).await.unwrap(), 4);
        assert_eq!(buffer.counter().pending_ids().await.unwrap(), vec![id(2)]);

        buffer.aggregates().failing.store(false, Ordering::SeqCst);
        buffer.increment(id(2)).await.unwrap();
        let report = buffer.drain().await.unwrap();

        assert_eq!(report.persisted, BTreeMap::from([(id(2), 5)]));
        assert_eq!(total(buffer.aggregates(), id(2)).await, 5);
    }

    #[tokio::test]
    async fn stranded_delta_is_persisted_on_next_drain() {
        let buffer = ClickBuffer::new(NoRestoreCounter::default(), FlakyAggregates::default());
        for _ in 0..3 {
            buffer.increment(id(4)).await.unwrap();
        }
        buffer.aggregates().failing.store(true, Ordering::SeqCst);
        buffer.counter().failing_restores.store(true, Ordering::SeqCst);

        buffer.drain().await.unwrap();

        assert_eq!(buffer.stranded().await, BTreeMap::from([(id(4), 3)]));
        assert_eq!(buffer.counter().pending(id(4)).await.unwrap(), 0);

        buffer.aggregates().failing.store(false, Ordering::SeqCst);
        buffer.counter().failing_restores.store(false, Ordering::SeqCst);
        let report = buffer.drain().await.unwrap();

        assert_eq!(report.persisted, BTreeMap::from([(id(4), 3)]));
        assert!(buffer.stranded().await.is_empty());
        assert_eq!(total(buffer.aggregates(), id(4)).await, 3);
    }

    #[tokio::test]
    async fn stranded_delta_goes_back_to_counter_when_store_still_down() {
        let buffer = ClickBuffer::new(NoRestoreCounter::default(), FlakyAggregates::default());
        buffer.increment(id(5)).await.unwrap();
        buffer.aggregates().failing.store(true, Ordering::SeqCst);
        buffer.counter().failing_restores.store(true, Ordering::SeqCst);
        buffer.drain().await.unwrap();

        buffer.counter().failing_restores.store(false, Ordering::SeqCst);
        let report = buffer.drain().await.unwrap();

        assert_eq!(report.failed, BTreeMap::from([(id(5), 1)]));
        assert!(buffer.stranded().await.is_empty());
        assert_eq!(buffer.counter().pending(id(5)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn no_clicks_lost_under_interleaved_drains() {
        let buffer = Arc::new(buffer());
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let buffer = Arc::clone(&buffer);
                tokio::spawn(async move {
                    for i in 0..250 {
                        buffer.increment(id((w + i) % 3 + 1)).await.unwrap();
                        if i % 50 == 0 {
                            tokio::task::yield_now().await;
                        }
                    }
                })
            })
            .collect();
        let drainer = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move {
                for _ in 0..20 {
                    buffer.drain().await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        for writer in writers {
            writer.await.unwrap();
        }
        drainer.await.unwrap();
        buffer.drain().await.unwrap();

        let mut persisted = 0;
        for mapping in 1..=3 {
            persisted += total(buffer.aggregates(), id(mapping)).await;
            assert_eq!(buffer.counter().pending(id(mapping)).await.unwrap(), 0);
        }
        assert_eq!(persisted, 1000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallel_drains_persist_every_click_once() {
        let buffer = Arc::new(buffer());
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let buffer = Arc::clone(&buffer);
                tokio::spawn(async move {
                    for i in 0..500 {
                        buffer.increment(id((w + i) % 3 + 1)).await.unwrap();
                    }
                })
            })
            .collect();
        let drainers: Vec<_> = (0..3)
            .map(|_| {
                let buffer = Arc::clone(&buffer);
                tokio::spawn(async move {
                    let mut persisted = 0;
                    for _ in 0..25 {
                        persisted += buffer.drain().await.unwrap().total_persisted();
                        tokio::task::yield_now().await;
                    }
                    persisted
                })
            })
            .collect();

        for writer in writers {
            writer.await.unwrap();
        }
        let mut persisted = 0;
        for drainer in drainers {
            persisted += drainer.await.unwrap();
        }

        let mut pending = 0;
        let mut stored = 0;
        for mapping in 1..=3 {
            pending += buffer.counter().pending(id(mapping)).await.unwrap();
            stored += total(buffer.aggregates(), id(mapping)).await;
        }
        assert_eq!(persisted + pending, 2_000);
        assert_eq!(stored, persisted);
    }

    #[tokio::test]
    async fn record_click_increments_buffer() {
        let buffer = buffer();
        buffer.record_click(id(8)).await.unwrap();
        buffer.record_click(id(8)).await.unwrap();
        assert_eq!(buffer.counter().pending(id(8)).await.unwrap(), 2);
    }
}
