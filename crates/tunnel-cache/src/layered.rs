use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, trace};
use tunnel_core::cache::Result;
use tunnel_core::{MappingSnapshot, ShortCode, SnapshotCache};

/// A multi-layer cache that composes two cache implementations.
///
/// L1 is typically a fast local cache (e.g. [`crate::MokaSnapshotCache`])
/// and L2 a shared one (e.g. [`crate::RedisSnapshotCache`]).
///
/// - **Get**: try L1, then L2. An L2 hit is backfilled into L1 with the TTL
///   the L2 entry has left, so the layered cache never extends a snapshot's
///   lifetime beyond the TTL it was first written with.
/// - **Set**: write L2, then L1.
/// - **Delete**: remove from L1, then L2.
#[derive(Debug, Clone)]
pub struct LayeredCache<L1, L2> {
    l1: L1,
    l2: L2,
}

impl<L1, L2> LayeredCache<L1, L2> {
    pub fn new(l1: L1, l2: L2) -> Self {
        Self { l1, l2 }
    }

    pub fn l1(&self) -> &L1 {
        &self.l1
    }

    pub fn l2(&self) -> &L2 {
        &self.l2
    }

    pub fn into_inner(self) -> (L1, L2) {
        (self.l1, self.l2)
    }
}

#[async_trait]
impl<L1, L2> SnapshotCache for LayeredCache<L1, L2>
where
    L1: SnapshotCache,
    L2: SnapshotCache,
{
    async fn get_with_ttl(&self, code: &ShortCode) -> Result<Option<(MappingSnapshot, Duration)>> {
        trace!(code = %code, "Fetching snapshot from layered cache");

        if let Some(hit) = self.l1.get_with_ttl(code).await? {
            debug!(code = %code, "L1 cache hit");
            return Ok(Some(hit));
        }
        trace!(code = %code, "L1 cache miss, trying L2");

        match self.l2.get_with_ttl(code).await? {
            Some((snapshot, remaining)) => {
                debug!(code = %code, "L2 cache hit, backfilling L1");
                if !remaining.is_zero() {
                    // L2 hit is already a success
                    let _ = self.l1.set(code, &snapshot, remaining).await;
                }
                Ok(Some((snapshot, remaining)))
            }
            None => {
                trace!(code = %code, "L2 cache miss");
                Ok(None)
            }
        }
    }

    async fn set(
        &self,
        code: &ShortCode,
        snapshot: &MappingSnapshot,
        ttl: Duration,
    ) -> Result<()> {
        trace!(code = %code, "Storing snapshot in layered cache");

        self.l2.set(code, snapshot, ttl).await?;
        debug!(code = %code, "Stored in L2 cache");

        self.l1.set(code, snapshot, ttl).await?;
        debug!(code = %code, "Stored in L1 cache");

        Ok(())
    }

    async fn del(&self, code: &ShortCode) -> Result<()> {
        trace!(code = %code, "Removing snapshot from layered cache");

        self.l1.del(code).await?;
        debug!(code = %code, "Removed from L1 cache");

        self.l2.del(code).await?;
        debug!(code = %code, "Removed from L2 cache");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MokaSnapshotCache;
    use jiff::{SignedDuration, Timestamp};
    use std::sync::Arc;
    use tunnel_core::{ManualClock, MappingId};

    const TTL: Duration = Duration::from_secs(3600);

    fn snapshot(url: &str) -> MappingSnapshot {
        MappingSnapshot {
            code: ShortCode::new_unchecked("abc123"),
            mapping_id: MappingId::new(1),
            destination_url: url.to_string(),
            expires_at: None,
            active: true,
        }
    }

    fn code(s: &str) -> ShortCode {
        ShortCode::new_unchecked(s)
    }

    fn create_test_cache() -> (LayeredCache<MokaSnapshotCache, MokaSnapshotCache>, ManualClock) {
        let clock = ManualClock::new(Timestamp::from_second(1_700_000_000).unwrap());
        let layer = || -> MokaSnapshotCache {
            MokaSnapshotCache::builder()
                .max_capacity(100)
                .clock(Arc::new(clock.clone()))
                .build()
                .into()
        };
        (LayeredCache::new(layer(), layer()), clock)
    }

    #[tokio::test]
    async fn layered_cache_get_from_l1() {
        let (cache, _) = create_test_cache();
        let c = code("abc123");
        let snap = snapshot("https://example.com");

        cache.l1().set(&c, &snap, TTL).await.unwrap();

        assert_eq!(cache.get(&c).await.unwrap(), Some(snap));
    }

    #[tokio::test]
    async fn layered_cache_get_backfills_l1_from_l2() {
        let (cache, _) = create_test_cache();
        let c = code("abc123");
        let snap = snapshot("https://example.com");

        cache.l2().set(&c, &snap, TTL).await.unwrap();
        assert!(cache.l1().get(&c).await.unwrap().is_none());

        assert_eq!(cache.get(&c).await.unwrap(), Some(snap.clone()));
        assert_eq!(cache.l1().get(&c).await.unwrap(), Some(snap));
    }

    #[tokio::test]
    async fn backfill_carries_remaining_ttl() {
        let (cache, clock) = create_test_cache();
        let c = code("abc123");

        cache
            .l2()
            .set(&c, &snapshot("https://example.com"), Duration::from_secs(60))
            .await
            .unwrap();
        clock.advance(SignedDuration::from_secs(50));

        assert!(cache.get(&c).await.unwrap().is_some());
        let (_, remaining) = cache.l1().get_with_ttl(&c).await.unwrap().unwrap();
        assert_eq!(remaining, Duration::from_secs(10));

        clock.advance(SignedDuration::from_secs(10));
        assert!(cache.l1().get(&c).await.unwrap().is_none());
        assert!(cache.get(&c).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn layered_cache_set_writes_to_both() {
        let (cache, _) = create_test_cache();
        let c = code("abc123");
        let snap = snapshot("https://example.com");

        cache.set(&c, &snap, TTL).await.unwrap();

        assert_eq!(cache.l1().get(&c).await.unwrap(), Some(snap.clone()));
        assert_eq!(cache.l2().get(&c).await.unwrap(), Some(snap));
    }

    #[tokio::test]
    async fn layered_cache_del_removes_from_both() {
        let (cache, _) = create_test_cache();
        let c = code("abc123");
        let snap = snapshot("https://example.com");

        cache.set(&c, &snap, TTL).await.unwrap();
        cache.del(&c).await.unwrap();

        assert!(cache.l1().get(&c).await.unwrap().is_none());
        assert!(cache.l2().get(&c).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn layered_cache_miss_when_both_empty() {
        let (cache, _) = create_test_cache();
        assert!(cache.get(&code("abc123")).await.unwrap().is_none());
    }
}
