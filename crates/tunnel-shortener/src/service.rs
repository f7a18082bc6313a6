use crate::allocator::CodeAllocator;
use crate::error::{Result, ShortenerError};
use async_trait::async_trait;
use jiff::{SignedDuration, Timestamp};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tunnel_core::{MappingRecord, MappingRepository, NewMapping, ShortCode};

/// When a mapping stops resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpirationPolicy {
    #[default]
    Never,
    AfterDuration(Duration),
    AtTimestamp(Timestamp),
}

#[derive(Debug, Clone)]
pub struct ShortenParams {
    pub destination_url: String,
    pub expiration: ExpirationPolicy,
    pub custom_alias: Option<String>,
}

impl ShortenParams {
    pub fn new(destination_url: impl Into<String>) -> Self {
        Self {
            destination_url: destination_url.into(),
            expiration: ExpirationPolicy::Never,
            custom_alias: None,
        }
    }
}

#[async_trait]
pub trait Shortener: Send + Sync + 'static {
    /// Creates a mapping and returns the persisted record.
    async fn shorten(&self, params: ShortenParams) -> Result<MappingRecord>;

    /// Activates or deactivates the mapping behind `code`.
    /// Returns `false` when no such mapping exists.
    async fn set_active(&self, code: &str, active: bool) -> Result<bool>;

    /// Replaces the expiry of the mapping behind `code`.
    /// Returns `false` when no such mapping exists.
    async fn set_expiration(&self, code: &str, expiration: ExpirationPolicy) -> Result<bool>;
}

/// Default [`Shortener`] backed by a [`CodeAllocator`].
///
/// Mutations go to the persistent record only. Cached snapshots keep
/// serving the previous state until their TTL runs out.
pub struct ShortenerService<R> {
    allocator: CodeAllocator<R>,
}

impl<R: MappingRepository> ShortenerService<R> {
    pub fn new(repository: R) -> Self {
        Self::with_allocator(CodeAllocator::new(Arc::new(repository)))
    }

    pub fn with_allocator(allocator: CodeAllocator<R>) -> Self {
        Self { allocator }
    }

    pub fn allocator(&self) -> &CodeAllocator<R> {
        &self.allocator
    }

    /// Validates that the URL has a valid format (has a scheme and host).
    fn validate_url(url: &str) -> Result<()> {
        if url.is_empty() {
            return Err(ShortenerError::InvalidUrl(
                "URL cannot be empty".to_string(),
            ));
        }

        let Some((scheme, rest)) = url.split_once("://") else {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL must have a valid scheme and host: {url}"
            )));
        };

        let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
        if scheme.is_empty() || host.is_empty() {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL must have a valid scheme and host: {url}"
            )));
        }

        let scheme = scheme.to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL scheme must be http or https: {scheme}"
            )));
        }

        Ok(())
    }

    fn expires_at(&self, expiration: ExpirationPolicy) -> Result<Option<Timestamp>> {
        let now = self.allocator.clock().now();
        let expires_at = match expiration {
            ExpirationPolicy::Never => return Ok(None),
            ExpirationPolicy::AfterDuration(duration) => {
                let duration = SignedDuration::try_from(duration)
                    .map_err(|e| ShortenerError::InvalidExpiration(e.to_string()))?;
                now.checked_add(duration)
                    .map_err(|e| ShortenerError::InvalidExpiration(e.to_string()))?
            }
            ExpirationPolicy::AtTimestamp(timestamp) => timestamp,
        };

        if expires_at <= now {
            return Err(ShortenerError::InvalidExpiration(format!(
                "{expires_at} is not in the future"
            )));
        }
        Ok(Some(expires_at))
    }

    async fn find(&self, code: &str) -> Result<Option<MappingRecord>> {
        let code = ShortCode::parse(code)?;
        Ok(self.allocator.repository().find_by_code(&code).await?)
    }
}

#[async_trait]
impl<R: MappingRepository> Shortener for ShortenerService<R> {
    async fn shorten(&self, params: ShortenParams) -> Result<MappingRecord> {
        Self::validate_url(&params.destination_url)?;

        let custom_alias = params.custom_alias.map(ShortCode::custom).transpose()?;
        let expires_at = self.expires_at(params.expiration)?;

        let mapping = NewMapping {
            destination_url: params.destination_url,
            expires_at,
        };
        self.allocator.allocate(mapping, custom_alias).await
    }

    async fn set_active(&self, code: &str, active: bool) -> Result<bool> {
        let Some(record) = self.find(code).await? else {
            return Ok(false);
        };

        let updated = self
            .allocator
            .repository()
            .set_active(record.mapping_id, active)
            .await?;
        if updated {
            info!(code = %record.code, mapping_id = %record.mapping_id, active, "Updated mapping state");
        }
        Ok(updated)
    }

    async fn set_expiration(&self, code: &str, expiration: ExpirationPolicy) -> Result<bool> {
        let Some(record) = self.find(code).await? else {
            return Ok(false);
        };
        let expires_at = self.expires_at(expiration)?;

        let updated = self
            .allocator
            .repository()
            .set_expires_at(record.mapping_id, expires_at)
            .await?;
        if updated {
            info!(
                code = %record.code,
                mapping_id = %record.mapping_id,
                expires_at = ?expires_at,
                "Updated mapping expiry"
            );
        }
        Ok(updated)
    }
}
