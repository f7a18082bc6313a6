//! Base62 encoding of mapping identifiers.
//!
//! Digits are written most significant first without padding, so `0` encodes
//! to `"0"`, `61` to `"Z"` and `62` to `"10"`. Only the canonical form (no
//! leading zero unless the value is zero) decodes successfully, which keeps
//! the mapping between identifiers and derived codes a bijection.

use crate::error::{CoreError, Result};

/// The digit alphabet, in ascending digit order.
pub const ALPHABET: &[u8; 62] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

const BASE: u64 = 62;

/// Length of the longest encoding (`u64::MAX`).
pub const MAX_ENCODED_LEN: usize = 11;

/// Encodes `value` into its canonical base62 representation.
pub fn encode(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }

    let mut digits = Vec::with_capacity(MAX_ENCODED_LEN);
    while value > 0 {
        digits.push(ALPHABET[(value % BASE) as usize]);
        value /= BASE;
    }

    digits.iter().rev().map(|&b| b as char).collect()
}

/// Decodes a canonical base62 string back into its value.
///
/// Rejects empty input, characters outside [`ALPHABET`], leading zeros and
/// values that do not fit into a `u64`.
pub fn decode(input: &str) -> Result<u64> {
    if input.is_empty() {
        return Err(CoreError::InvalidEncoding("input is empty".to_string()));
    }

    if input.len() > 1 && input.starts_with('0') {
        return Err(CoreError::InvalidEncoding(format!(
            "leading zero in '{input}'"
        )));
    }

    input.bytes().try_fold(0u64, |acc, byte| {
        let digit = digit_value(byte).ok_or_else(|| {
            CoreError::InvalidEncoding(format!(
                "character '{}' is not in the alphabet",
                byte as char
            ))
        })?;

        acc.checked_mul(BASE)
            .and_then(|v| v.checked_add(digit))
            .ok_or_else(|| CoreError::InvalidEncoding(format!("'{input}' overflows u64")))
    })
}

fn digit_value(byte: u8) -> Option<u64> {
    match byte {
        b'0'..=b'9' => Some(u64::from(byte - b'0')),
        b'a'..=b'z' => Some(u64::from(byte - b'a') + 10),
        b'A'..=b'Z' => Some(u64::from(byte - b'A') + 36),
        _ => None,
    }
}
