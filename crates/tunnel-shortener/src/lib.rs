//! Mapping creation.
//!
//! [`CodeAllocator`] turns a destination into a persisted mapping with a
//! unique short code; [`ShortenerService`] adds URL validation, expiration
//! policies and the administrative mutations on top of it.

pub mod allocator;
pub mod error;
pub mod service;

pub use allocator::CodeAllocator;
pub use error::{Result, ShortenerError};
pub use service::{ExpirationPolicy, ShortenParams, Shortener, ShortenerService};
