//! Counter key derivation.

use chrono::{DateTime, Utc};

use crate::error::{Result, WindowgateError};

/// Default prefix for counter keys.
pub const DEFAULT_KEY_PREFIX: &str = "limiter";
/// Default delimiter between key segments.
pub const DEFAULT_KEY_DELIMITER: &str = "-";

/// Builds the counter key for an identity in a window slot.
///
/// Implementations must be deterministic, and two calls must return the same
/// key exactly when they share both slot and identity.
pub trait KeyDeriver: Send + Sync {
    fn derive_key(&self, now: DateTime<Utc>, slot: i64, identity: &str) -> String;
}

/// A key of the form `prefix-slot-identity`.
///
/// The slot is a decimal integer sitting between the prefix and the identity,
/// so keys stay unambiguous as long as the delimiter has no ASCII digit in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixedKey {
    prefix: String,
    delimiter: String,
}

impl PrefixedKey {
    /// Create a key deriver with the given prefix and delimiter.
    ///
    /// Fails if the delimiter is empty or contains an ASCII digit.
    pub fn new(prefix: impl Into<String>, delimiter: impl Into<String>) -> Result<Self> {
        let delimiter = delimiter.into();
        check_delimiter(&delimiter)?;
        Ok(Self {
            prefix: prefix.into(),
            delimiter,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }
}

/// Reject delimiters that would let a slot and an identity run together.
pub fn check_delimiter(delimiter: &str) -> Result<()> {
    if delimiter.is_empty() || delimiter.chars().any(|c| c.is_ascii_digit()) {
        return Err(WindowgateError::Config(format!(
            "key delimiter must be non-empty and free of digits, got {:?}",
            delimiter
        )));
    }
    Ok(())
}

impl Default for PrefixedKey {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_KEY_PREFIX.to_string(),
            delimiter: DEFAULT_KEY_DELIMITER.to_string(),
        }
    }
}

impl KeyDeriver for PrefixedKey {
    fn derive_key(&self, _now: DateTime<Utc>, slot: i64, identity: &str) -> String {
        format!(
            "{}{}{}{}{}",
            self.prefix, self.delimiter, slot, self.delimiter, identity
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_default_key_format() {
        let keyer = PrefixedKey::default();
        assert_eq!(keyer.derive_key(now(), 42, "alice"), "limiter-42-alice");
    }

    #[test]
    fn test_custom_prefix_and_delimiter() {
        let keyer = PrefixedKey::new("api", ":").unwrap();
        assert_eq!(keyer.derive_key(now(), 7, "10.0.0.1"), "api:7:10.0.0.1");
    }

    #[test]
    fn test_rejects_ambiguous_delimiters() {
        assert!(PrefixedKey::new("api", "").is_err());
        assert!(PrefixedKey::new("api", "1").is_err());
        assert!(PrefixedKey::new("api", "-0-").is_err());
        assert!(check_delimiter("::").is_ok());
    }

    #[test]
    fn test_keys_differ_by_slot_and_identity() {
        let keyer = PrefixedKey::default();

        let base = keyer.derive_key(now(), 1, "a");
        assert_eq!(base, keyer.derive_key(now(), 1, "a"));
        assert_ne!(base, keyer.derive_key(now(), 2, "a"));
        assert_ne!(base, keyer.derive_key(now(), 1, "b"));
        // identities containing the delimiter cannot borrow another slot
        assert_ne!(
            keyer.derive_key(now(), 1, "2-x"),
            keyer.derive_key(now(), 12, "x")
        );
    }
}
