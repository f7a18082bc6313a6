//! Core types and traits for the Tunnel short-code resolver.
//!
//! This crate provides the shared domain model (mappings, snapshots, click
//! aggregates), the base62 code encoding, and the capability traits that the
//! cache, storage, click-buffer, shortener and redirector crates plug into.

pub mod base62;
pub mod cache;
pub mod clicks;
pub mod clock;
pub mod error;
pub mod mapping;
pub mod repository;
pub mod shortcode;

pub use cache::SnapshotCache;
pub use clicks::{ClickCounter, ClickRecorder};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CacheError, ClickError, CoreError, StorageError};
pub use mapping::{ClickAggregate, MappingId, MappingRecord, MappingSnapshot, NewMapping};
pub use repository::{AggregateRepository, MappingReader, MappingRepository};
pub use shortcode::ShortCode;
