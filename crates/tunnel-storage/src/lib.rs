//! Persistent stores for mappings and click aggregates.

pub mod memory;
pub mod mysql;

pub use memory::InMemoryRepository;
pub use mysql::MySqlRepository;
pub use tunnel_core::repository::{AggregateRepository, MappingReader, MappingRepository, Result};
pub use tunnel_core::StorageError;
