use async_trait::async_trait;
use jiff::{SignedDuration, Timestamp};
use moka::future::Cache;
use moka::Expiry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};
use typed_builder::TypedBuilder;
use tunnel_core::cache::Result;
use tunnel_core::{Clock, MappingSnapshot, ShortCode, SnapshotCache, SystemClock};

const DEFAULT_MAX_CAPACITY: u64 = 10_000;

#[derive(Debug, Clone)]
struct CachedSnapshot {
    snapshot: MappingSnapshot,
    ttl: Duration,
    cached_until: Timestamp,
}

/// Expires each entry after the TTL it was written with.
struct PerEntryTtl;

impl Expiry<String, CachedSnapshot> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedSnapshot,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedSnapshot,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// An in-memory snapshot cache using Moka.
///
/// Each entry carries its own TTL. Besides Moka's own eviction, reads compare
/// the entry deadline against the configured [`Clock`], so an entry is never
/// served after its TTL even before Moka gets around to evicting it.
#[derive(Clone)]
pub struct MokaSnapshotCache {
    cache: Cache<String, CachedSnapshot>,
    clock: Arc<dyn Clock>,
}

impl MokaSnapshotCache {
    /// Creates a new cache with a default maximum capacity of 10,000 entries.
    pub fn new() -> Self {
        MokaCacheConfig::builder().build().into()
    }

    pub fn with_capacity(max_capacity: u64) -> Self {
        MokaCacheConfig::builder()
            .max_capacity(max_capacity)
            .build()
            .into()
    }

    /// Returns a builder for creating a custom cache configuration.
    pub fn builder() -> MokaCacheConfigBuilder {
        MokaCacheConfig::builder()
    }

    fn deadline(&self, ttl: Duration) -> Timestamp {
        let now = self.clock.now();
        SignedDuration::try_from(ttl)
            .ok()
            .and_then(|ttl| now.checked_add(ttl).ok())
            .unwrap_or(Timestamp::MAX)
    }
}

impl Default for MokaSnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MokaSnapshotCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaSnapshotCache")
            .field("entries", &self.cache.entry_count())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SnapshotCache for MokaSnapshotCache {
    async fn get_with_ttl(&self, code: &ShortCode) -> Result<Option<(MappingSnapshot, Duration)>> {
        trace!(code = %code, "Fetching snapshot from Moka cache");

        let Some(entry) = self.cache.get(code.as_str()).await else {
            trace!(code = %code, "Cache miss in Moka");
            return Ok(None);
        };

        let now = self.clock.now();
        // left for Moka's expiry; reads never remove entries
        if now >= entry.cached_until {
            debug!(code = %code, "Cached snapshot outlived its TTL");
            return Ok(None);
        }

        let remaining = Duration::try_from(entry.cached_until.duration_since(now))
            .unwrap_or(Duration::ZERO);
        debug!(code = %code, "Cache hit in Moka");
        Ok(Some((entry.snapshot, remaining)))
    }

    async fn set(
        &self,
        code: &ShortCode,
        snapshot: &MappingSnapshot,
        ttl: Duration,
    ) -> Result<()> {
        trace!(code = %code, ttl_ms = ttl.as_millis() as u64, "Storing snapshot in Moka cache");

        let entry = CachedSnapshot {
            snapshot: snapshot.clone(),
            ttl,
            cached_until: self.deadline(ttl),
        };
        self.cache.insert(code.as_str().to_string(), entry).await;
        debug!(code = %code, "Cached snapshot in Moka");
        Ok(())
    }

    async fn del(&self, code: &ShortCode) -> Result<()> {
        trace!(code = %code, "Removing snapshot from Moka cache");

        self.cache.invalidate(code.as_str()).await;
        debug!(code = %code, "Removed snapshot from Moka cache (if present)");
        Ok(())
    }
}

/// Configuration for creating a [`MokaSnapshotCache`] with custom settings.
#[derive(TypedBuilder)]
pub struct MokaCacheConfig {
    /// Maximum number of entries the cache can hold.
    #[builder(default = DEFAULT_MAX_CAPACITY)]
    max_capacity: u64,
    /// Clock used to enforce entry deadlines on read.
    #[builder(default = Arc::new(SystemClock) as Arc<dyn Clock>)]
    clock: Arc<dyn Clock>,
}

impl From<MokaCacheConfig> for MokaSnapshotCache {
    fn from(config: MokaCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .expire_after(PerEntryTtl)
            .build();

        MokaSnapshotCache {
            cache,
            clock: config.clock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunnel_core::{ManualClock, MappingId};

    const TTL: Duration = Duration::from_secs(3600);

    fn snapshot(id: u64, url: &str) -> MappingSnapshot {
        MappingSnapshot {
            code: ShortCode::derive(MappingId::new(id)),
            mapping_id: MappingId::new(id),
            destination_url: url.to_string(),
            expires_at: None,
            active: true,
        }
    }

    fn code(s: &str) -> ShortCode {
        ShortCode::new_unchecked(s)
    }

    fn manual_cache() -> (MokaSnapshotCache, ManualClock) {
        let clock = ManualClock::new(Timestamp::from_second(1_700_000_000).unwrap());
        let cache = MokaSnapshotCache::builder()
            .clock(Arc::new(clock.clone()))
            .build()
            .into();
        (cache, clock)
    }

    #[tokio::test]
    async fn cache_get_and_set() {
        let cache = MokaSnapshotCache::new();
        let c = code("7");
        let snap = snapshot(7, "https://example.com");

        assert!(cache.get(&c).await.unwrap().is_none());

        cache.set(&c, &snap, TTL).await.unwrap();

        assert_eq!(cache.get(&c).await.unwrap(), Some(snap));
    }

    #[tokio::test]
    async fn cache_del_is_idempotent() {
        let cache = MokaSnapshotCache::new();
        let c = code("7");
        cache.set(&c, &snapshot(7, "https://example.com"), TTL).await.unwrap();

        cache.del(&c).await.unwrap();
        assert!(cache.get(&c).await.unwrap().is_none());

        cache.del(&c).await.unwrap();
    }

    #[tokio::test]
    async fn repeated_population_is_last_writer_wins() {
        let cache = MokaSnapshotCache::new();
        let c = code("7");
        let first = snapshot(7, "https://one.example");
        let second = snapshot(7, "https://two.example");

        cache.set(&c, &first, TTL).await.unwrap();
        cache.set(&c, &first, TTL).await.unwrap();
        assert_eq!(cache.get(&c).await.unwrap(), Some(first));

        cache.set(&c, &second, TTL).await.unwrap();
        assert_eq!(cache.get(&c).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn entry_is_a_miss_once_clock_passes_ttl() {
        let (cache, clock) = manual_cache();
        let c = code("7");
        cache
            .set(&c, &snapshot(7, "https://example.com"), Duration::from_secs(60))
            .await
            .unwrap();

        clock.advance(SignedDuration::from_secs(59));
        assert!(cache.get(&c).await.unwrap().is_some());

        clock.advance(SignedDuration::from_secs(1));
        assert!(cache.get(&c).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_read_does_not_drop_a_newer_entry() {
        let (cache, clock) = manual_cache();
        let c = code("7");
        let stale = snapshot(7, "https://old.example");
        let fresh = snapshot(7, "https://new.example");

        cache.set(&c, &stale, Duration::from_secs(60)).await.unwrap();
        clock.advance(SignedDuration::from_secs(60));

        let (reader, writer) = tokio::join!(
            cache.get(&c),
            cache.set(&c, &fresh, Duration::from_secs(60)),
        );
        writer.unwrap();
        assert!(reader.unwrap().map_or(true, |snap| snap == fresh));

        assert_eq!(cache.get(&c).await.unwrap(), Some(fresh));
    }

    #[tokio::test]
    async fn expired_read_leaves_the_entry_to_moka() {
        let (cache, clock) = manual_cache();
        let c = code("7");
        cache
            .set(&c, &snapshot(7, "https://example.com"), Duration::from_secs(60))
            .await
            .unwrap();

        clock.advance(SignedDuration::from_secs(61));
        assert!(cache.get(&c).await.unwrap().is_none());

        // still physically present; only Moka's own expiry removes it
        assert!(cache.cache.get(c.as_str()).await.is_some());
    }

    #[tokio::test]
    async fn get_with_ttl_reports_remaining_time() {
        let (cache, clock) = manual_cache();
        let c = code("7");
        cache
            .set(&c, &snapshot(7, "https://example.com"), Duration::from_secs(60))
            .await
            .unwrap();

        clock.advance(SignedDuration::from_secs(45));
        let (_, remaining) = cache.get_with_ttl(&c).await.unwrap().unwrap();
        assert_eq!(remaining, Duration::from_secs(15));
    }

    #[tokio::test]
    async fn entries_keep_their_own_ttl() {
        let (cache, clock) = manual_cache();
        cache
            .set(&code("short"), &snapshot(1, "https://a.example"), Duration::from_secs(10))
            .await
            .unwrap();
        cache
            .set(&code("long"), &snapshot(2, "https://b.example"), Duration::from_secs(100))
            .await
            .unwrap();

        clock.advance(SignedDuration::from_secs(30));
        assert!(cache.get(&code("short")).await.unwrap().is_none());
        assert!(cache.get(&code("long")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn moka_evicts_after_wall_clock_ttl() {
        let cache = MokaSnapshotCache::with_capacity(100);
        let c = code("7");
        cache
            .set(&c, &snapshot(7, "https://example.com"), Duration::from_millis(50))
            .await
            .unwrap();
        assert!(cache.get(&c).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(cache.get(&c).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn zero_ttl_is_never_served() {
        let cache = MokaSnapshotCache::new();
        let c = code("7");
        cache
            .set(&c, &snapshot(7, "https://example.com"), Duration::ZERO)
            .await
            .unwrap();

        assert!(cache.get(&c).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cache_handles_many_entries() {
        let cache = MokaSnapshotCache::with_capacity(100);

        for i in 1..=50 {
            let snap = snapshot(i, &format!("https://example{i}"));
            cache.set(&snap.code.clone(), &snap, TTL).await.unwrap();
        }

        let c25 = ShortCode::derive(MappingId::new(25));
        assert_eq!(
            cache.get(&c25).await.unwrap().unwrap().destination_url,
            "https://example25"
        );
    }
}
