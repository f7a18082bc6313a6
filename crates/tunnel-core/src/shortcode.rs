use crate::base62;
use crate::error::{CoreError, Result};
use crate::mapping::MappingId;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// The lookup key of a mapping.
///
/// Derived codes are the base62 encoding of a [`MappingId`]; custom codes are
/// caller-supplied aliases of 3-32 characters drawn from `[a-zA-Z0-9_-]`.
/// Comparison is case-sensitive.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShortCode(String);

const MIN_ALIAS_LENGTH: usize = 3;
const MAX_LENGTH: usize = 32;

impl ShortCode {
    /// Derives the code for a mapping identifier.
    pub fn derive(id: MappingId) -> Self {
        Self(base62::encode(id.get()))
    }

    /// Creates a custom alias after validating it.
    ///
    /// Valid aliases are 3-32 characters and contain only `[a-zA-Z0-9_-]`.
    pub fn custom(alias: impl Into<String>) -> Result<Self> {
        let alias = alias.into();
        if alias.len() < MIN_ALIAS_LENGTH || alias.len() > MAX_LENGTH {
            return Err(CoreError::InvalidShortCode(format!(
                "alias length must be between {} and {}, got {}",
                MIN_ALIAS_LENGTH,
                MAX_LENGTH,
                alias.len()
            )));
        }
        Self::check_charset(&alias)?;
        Ok(Self(alias))
    }

    /// Parses a code received from a caller, accepting both derived codes and
    /// aliases. Only the charset and the upper length bound are checked.
    pub fn parse(code: impl Into<String>) -> Result<Self> {
        let code = code.into();
        if code.is_empty() || code.len() > MAX_LENGTH {
            return Err(CoreError::InvalidShortCode(format!(
                "length must be between 1 and {}, got {}",
                MAX_LENGTH,
                code.len()
            )));
        }
        Self::check_charset(&code)?;
        Ok(Self(code))
    }

    /// Creates a `ShortCode` without validation.
    ///
    /// Use this only for codes read back from trusted storage.
    pub fn new_unchecked(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Generates the full shortened URL based on the provided base URL.
    pub fn to_url(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self)
    }

    /// Returns the short code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identifier this code would have been derived from, if it is a
    /// canonical base62 string.
    pub fn decoded_id(&self) -> Option<MappingId> {
        base62::decode(&self.0).ok().map(MappingId::new)
    }

    /// Whether this code is exactly the derived code of `id`.
    pub fn is_derived_from(&self, id: MappingId) -> bool {
        self.decoded_id() == Some(id)
    }

    fn check_charset(code: &str) -> Result<()> {
        if !code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(CoreError::InvalidShortCode(format!(
                "must contain only alphanumeric characters, hyphens, or underscores: '{}'",
                code
            )));
        }
        Ok(())
    }
}

impl Display for ShortCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ShortCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_aliases() {
        assert!(ShortCode::custom("abc").is_ok());
        assert!(ShortCode::custom("Abc-123_xyz").is_ok());
        assert!(ShortCode::custom("a".repeat(32)).is_ok());
    }

    #[test]
    fn alias_too_short() {
        assert!(ShortCode::custom("ab").is_err());
        assert!(ShortCode::custom("").is_err());
    }

    #[test]
    fn alias_too_long() {
        assert!(ShortCode::custom("a".repeat(33)).is_err());
    }

    #[test]
    fn alias_invalid_characters() {
        assert!(ShortCode::custom("abc def").is_err());
        assert!(ShortCode::custom("abc/def").is_err());
        assert!(ShortCode::custom("abc!def").is_err());
    }

    #[test]
    fn parse_accepts_single_character_derived_codes() {
        assert_eq!(ShortCode::parse("1").unwrap().as_str(), "1");
        assert!(ShortCode::parse("").is_err());
        assert!(ShortCode::parse("a".repeat(33)).is_err());
        assert!(ShortCode::parse("a.b").is_err());
    }

    #[test]
    fn derive_uses_base62() {
        assert_eq!(ShortCode::derive(MappingId::new(1)).as_str(), "1");
        assert_eq!(ShortCode::derive(MappingId::new(61)).as_str(), "Z");
        assert_eq!(ShortCode::derive(MappingId::new(62)).as_str(), "10");
    }

    #[test]
    fn derived_code_decodes_back_to_id() {
        let id = MappingId::new(125_000);
        let code = ShortCode::derive(id);
        assert_eq!(code.decoded_id(), Some(id));
        assert!(code.is_derived_from(id));
        assert!(!code.is_derived_from(MappingId::new(125_001)));
    }

    #[test]
    fn alias_with_dash_has_no_decoded_id() {
        let code = ShortCode::custom("my-link").unwrap();
        assert_eq!(code.decoded_id(), None);
    }

    #[test]
    fn comparison_is_case_sensitive() {
        assert_ne!(ShortCode::new_unchecked("a"), ShortCode::new_unchecked("A"));
    }

    #[test]
    fn to_url_trims_trailing_slash() {
        let code = ShortCode::custom("abc123").unwrap();
        assert_eq!(code.to_url("https://tun.nl"), "https://tun.nl/abc123");
        assert_eq!(code.to_url("https://tun.nl/"), "https://tun.nl/abc123");
    }
}
