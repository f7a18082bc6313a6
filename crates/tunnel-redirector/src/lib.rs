//! Short-code resolution.
//!
//! [`RedirectorService`] resolves a code through a [`SnapshotCache`] in front
//! of the persistent store and records a click for every redirect it issues.
//!
//! [`SnapshotCache`]: tunnel_core::SnapshotCache

pub mod error;
pub mod redirector;
pub mod service;
pub mod settings;

pub use error::{RedirectorError, Result};
pub use redirector::{Redirector, Resolution};
pub use service::RedirectorService;
pub use settings::ResolverSettings;
