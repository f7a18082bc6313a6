//! Buffered click accounting.
//!
//! Redirects bump a volatile per-mapping counter through [`ClickBuffer`];
//! a [`DrainScheduler`] periodically moves the pending counts into the
//! persistent click aggregates. Counters live either in process
//! ([`InMemoryClickCounter`]) or in Redis ([`RedisClickCounter`]).

pub mod buffer;
pub mod error;
pub mod memory;
pub mod redis;
pub mod scheduler;

pub use buffer::{ClickBuffer, DrainReport};
pub use error::{DrainError, Result};
pub use memory::InMemoryClickCounter;
pub use scheduler::{DrainScheduler, SchedulerSettings};
pub use self::redis::RedisClickCounter;
