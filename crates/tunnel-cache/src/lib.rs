//! Snapshot cache implementations.
//!
//! [`MokaSnapshotCache`] keeps snapshots in process with a per-entry TTL,
//! [`RedisSnapshotCache`] shares them across processes, and
//! [`LayeredCache`] stacks the two.

pub mod layered;
pub mod moka;
pub mod redis;

pub use layered::LayeredCache;
pub use self::moka::{MokaCacheConfig, MokaSnapshotCache};
pub use self::redis::RedisSnapshotCache;
pub use tunnel_core::cache::Result;
pub use tunnel_core::{CacheError, SnapshotCache};
