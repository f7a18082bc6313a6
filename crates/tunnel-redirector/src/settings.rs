use std::time::Duration;
use typed_builder::TypedBuilder;

#[derive(Debug, Clone, TypedBuilder)]
pub struct ResolverSettings {
    /// How long a populated snapshot is served from the cache.
    #[builder(default = Duration::from_secs(3600))]
    pub cache_ttl: Duration,
    /// Bound on each cache read or write.
    #[builder(default = Duration::from_millis(50))]
    pub cache_timeout: Duration,
    /// Bound on the persistent store lookup.
    #[builder(default = Duration::from_secs(1))]
    pub store_timeout: Duration,
    /// Bound on recording a click.
    #[builder(default = Duration::from_millis(50))]
    pub click_timeout: Duration,
    /// Whether inactive or expired snapshots are cached after a store hit.
    #[builder(default = true)]
    pub cache_dead_snapshots: bool,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}
