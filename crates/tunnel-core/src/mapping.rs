use crate::shortcode::ShortCode;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Identifier of a mapping, issued by the store's identity generator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MappingId(u64);

impl MappingId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for MappingId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Display for MappingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Denormalized view of a mapping as held by the cache.
///
/// A snapshot may lag behind its [`MappingRecord`] for at most the TTL it was
/// cached with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingSnapshot {
    pub code: ShortCode,
    pub mapping_id: MappingId,
    pub destination_url: String,
    pub expires_at: Option<Timestamp>,
    pub active: bool,
}

impl MappingSnapshot {
    /// A snapshot is live when it is active and its expiry, if any, lies
    /// strictly after `now`.
    pub fn is_live_at(&self, now: Timestamp) -> bool {
        self.active && !self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// A stored mapping. The code is fixed when the record is inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRecord {
    pub mapping_id: MappingId,
    pub code: ShortCode,
    pub destination_url: String,
    pub created_at: Timestamp,
    pub expires_at: Option<Timestamp>,
    pub active: bool,
}

impl MappingRecord {
    pub fn snapshot(&self) -> MappingSnapshot {
        MappingSnapshot {
            code: self.code.clone(),
            mapping_id: self.mapping_id,
            destination_url: self.destination_url.clone(),
            expires_at: self.expires_at,
            active: self.active,
        }
    }

    pub fn is_live_at(&self, now: Timestamp) -> bool {
        self.active && !self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// The caller-provided part of a mapping that is about to be allocated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMapping {
    pub destination_url: String,
    pub expires_at: Option<Timestamp>,
}

/// Persisted click total of a mapping. `total_clicks` never decreases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickAggregate {
    pub mapping_id: MappingId,
    pub total_clicks: u64,
    pub last_flushed_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::SignedDuration;

    fn snapshot(active: bool, expires_at: Option<Timestamp>) -> MappingSnapshot {
        MappingSnapshot {
            code: ShortCode::new_unchecked("abc"),
            mapping_id: MappingId::new(7),
            destination_url: "https://example.com".to_string(),
            expires_at,
            active,
        }
    }

    #[test]
    fn active_without_expiry_is_live() {
        assert!(snapshot(true, None).is_live_at(Timestamp::now()));
    }

    #[test]
    fn inactive_is_dead() {
        assert!(!snapshot(false, None).is_live_at(Timestamp::now()));
    }

    #[test]
    fn expiry_boundary_is_dead() {
        let now = Timestamp::now();
        assert!(!snapshot(true, Some(now)).is_live_at(now));
        assert!(snapshot(true, Some(now + SignedDuration::from_secs(1))).is_live_at(now));
        assert!(!snapshot(true, Some(now - SignedDuration::from_secs(1))).is_live_at(now));
    }

    #[test]
    fn expiry_is_monotonic() {
        let expires_at = Timestamp::now();
        let snap = snapshot(true, Some(expires_at));
        let later = [1, 60, 3600].map(|s| expires_at + SignedDuration::from_secs(s));
        assert!(later.iter().all(|&t| !snap.is_live_at(t)));
    }

    #[test]
    fn snapshot_copies_record_fields() {
        let record = MappingRecord {
            mapping_id: MappingId::new(3),
            code: ShortCode::new_unchecked("3"),
            destination_url: "https://example.com".to_string(),
            created_at: Timestamp::now(),
            expires_at: None,
            active: true,
        };
        let snap = record.snapshot();
        assert_eq!(snap.mapping_id, record.mapping_id);
        assert_eq!(snap.code, record.code);
        assert_eq!(snap.destination_url, record.destination_url);
        assert!(snap.active);
    }

    #[test]
    fn snapshot_serializes_code_and_id_transparently() {
        let json = serde_json::to_value(snapshot(true, None)).unwrap();
        assert_eq!(json["code"], "abc");
        assert_eq!(json["mapping_id"], 7);
    }
}
