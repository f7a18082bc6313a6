use crate::error::{RedirectorError, Result};
use crate::redirector::{Redirector, Resolution};
use crate::settings::ResolverSettings;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, trace, warn};
use tunnel_core::{
    ClickRecorder, Clock, MappingId, MappingReader, MappingSnapshot, ShortCode, SnapshotCache,
    SystemClock,
};

/// Read-through resolver.
///
/// The cache is consulted first. A cached snapshot is final: a live one
/// redirects, a dead one is gone, and neither touches the store. On a miss
/// the store is asked and its answer is written back to the cache.
///
/// Cache and click failures are logged and tolerated. A store that cannot
/// answer within `store_timeout` yields [`RedirectorError::BackendUnavailable`].
pub struct RedirectorService<R, C, K> {
    repository: Arc<R>,
    cache: Arc<C>,
    clicks: Arc<K>,
    clock: Arc<dyn Clock>,
    settings: ResolverSettings,
}

impl<R, C, K> RedirectorService<R, C, K>
where
    R: MappingReader,
    C: SnapshotCache,
    K: ClickRecorder,
{
    pub fn new(repository: R, cache: C, clicks: K) -> Self {
        Self {
            repository: Arc::new(repository),
            cache: Arc::new(cache),
            clicks: Arc::new(clicks),
            clock: Arc::new(SystemClock),
            settings: ResolverSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ResolverSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Parses `code` and resolves it.
    pub async fn resolve_str(&self, code: &str) -> Result<Resolution> {
        let code = ShortCode::parse(code)?;
        Redirector::resolve(self, &code).await
    }

    async fn cached(&self, code: &ShortCode) -> Option<MappingSnapshot> {
        match timeout(self.settings.cache_timeout, self.cache.get(code)).await {
            Ok(Ok(hit)) => hit,
            Ok(Err(e)) => {
                warn!(code = %code, error = %e, "Cache read failed, treating as miss");
                None
            }
            Err(_) => {
                warn!(code = %code, "Cache read timed out, treating as miss");
                None
            }
        }
    }

    async fn populate(&self, code: &ShortCode, snapshot: &MappingSnapshot) {
        let write = self.cache.set(code, snapshot, self.settings.cache_ttl);
        match timeout(self.settings.cache_timeout, write).await {
            Ok(Ok(())) => debug!(code = %code, active = snapshot.active, "Populated cache"),
            Ok(Err(e)) => warn!(code = %code, error = %e, "Failed to populate cache"),
            Err(_) => warn!(code = %code, "Cache populate timed out"),
        }
    }

    // A failed click must not fail the redirect. A click that errors or
    // times out is counted at most once: a timed-out increment may still
    // have been applied by the backend, and it is never retried here.
    async fn record_click(&self, id: MappingId) {
        match timeout(self.settings.click_timeout, self.clicks.record_click(id)).await {
            Ok(Ok(())) => trace!(mapping_id = %id, "Recorded click"),
            Ok(Err(e)) => warn!(mapping_id = %id, error = %e, "Failed to record click"),
            Err(_) => warn!(mapping_id = %id, "Recording click timed out"),
        }
    }

    async fn redirect(&self, snapshot: MappingSnapshot) -> Resolution {
        self.record_click(snapshot.mapping_id).await;
        Resolution::Redirect(snapshot.destination_url)
    }
}

#[async_trait]
impl<R, C, K> Redirector for RedirectorService<R, C, K>
where
    R: MappingReader,
    C: SnapshotCache,
    K: ClickRecorder,
{
    async fn resolve(&self, code: &ShortCode) -> Result<Resolution> {
        trace!(code = %code, "Resolving short code");

        if let Some(snapshot) = self.cached(code).await {
            if snapshot.is_live_at(self.clock.now()) {
                debug!(code = %code, "Cache hit");
                return Ok(self.redirect(snapshot).await);
            }
            debug!(code = %code, "Cache hit on dead snapshot");
            return Ok(Resolution::Gone);
        }

        trace!(code = %code, "Cache miss, querying store");
        let record = match timeout(
            self.settings.store_timeout,
            self.repository.find_by_code(code),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!(code = %code, "Store lookup timed out");
                return Err(RedirectorError::BackendUnavailable(format!(
                    "store lookup for '{code}' exceeded {:?}",
                    self.settings.store_timeout
                )));
            }
        };

        let Some(record) = record else {
            debug!(code = %code, "Short code not found");
            return Ok(Resolution::NotFound);
        };

        let snapshot = record.snapshot();
        if snapshot.is_live_at(self.clock.now()) {
            self.populate(code, &snapshot).await;
            debug!(code = %code, mapping_id = %snapshot.mapping_id, "Resolved from store");
            return Ok(self.redirect(snapshot).await);
        }

        if self.settings.cache_dead_snapshots {
            self.populate(code, &snapshot).await;
        }
        debug!(code = %code, mapping_id = %snapshot.mapping_id, "Mapping is inactive or expired");
        Ok(Resolution::Gone)
    }
}
