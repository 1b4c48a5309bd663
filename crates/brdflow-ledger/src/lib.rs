//! Idempotency ledger
//!
//! Maps a deterministic content key to the tracker key of the item created for
//! it. Every creation is preceded by a [`IdempotencyLedger::lookup`]; a hit
//! means the item already exists and no write is issued.
//!
//! Entries are write-once. Recording a different item for an existing key is a
//! [`LedgerError::Conflict`], never an overwrite.
//!
//! ```rust
//! use brdflow_ledger::{IdempotencyLedger, LedgerKey};
//!
//! let mut ledger = IdempotencyLedger::default();
//! let key = LedgerKey::derive("SHOP", "User login", "Email and password");
//! assert!(ledger.lookup(&key).is_none());
//!
//! ledger.record(&key, "SHOP-1").unwrap();
//!
//! // Cosmetic differences map to the same key
//! let same = LedgerKey::derive("SHOP", "  user   LOGIN ", "email and password");
//! assert_eq!(ledger.lookup(&same), Some("SHOP-1"));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use unicode_normalization::UnicodeNormalization;

use brdflow_utils::canonicalization::blake3_parts;
use brdflow_utils::error::LedgerError;

/// Normalize text for key derivation: NFKC, lowercase, whitespace runs
/// collapsed to one space, trimmed.
#[must_use]
pub fn normalize(text: &str) -> String {
    let folded: String = text.nfkc().collect::<String>().to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// BLAKE3 key over `(scope, normalized title, normalized description)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerKey(String);

impl LedgerKey {
    #[must_use]
    pub fn derive(scope: &str, title: &str, description: &str) -> Self {
        Self(blake3_parts(&[
            scope.trim(),
            &normalize(title),
            &normalize(description),
        ]))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a successful [`IdempotencyLedger::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted,
    /// The same item was already recorded under this key.
    AlreadyPresent,
}

/// Write-once key → item mapping, persisted inside every checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyLedger {
    entries: BTreeMap<LedgerKey, String>,
}

impl IdempotencyLedger {
    #[must_use]
    pub fn lookup(&self, key: &LedgerKey) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Record `item_id` for `key`.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Conflict`] when `key` already maps to a different item.
    pub fn record(&mut self, key: &LedgerKey, item_id: &str) -> Result<RecordOutcome, LedgerError> {
        match self.entries.get(key) {
            Some(existing) if existing == item_id => Ok(RecordOutcome::AlreadyPresent),
            Some(existing) => Err(LedgerError::Conflict {
                key: key.to_string(),
                existing: existing.clone(),
                attempted: item_id.to_string(),
            }),
            None => {
                self.entries.insert(key.clone(), item_id.to_string());
                Ok(RecordOutcome::Inserted)
            }
        }
    }

    /// Remove the entry for an item that compensation deleted remotely.
    pub fn retract(&mut self, key: &LedgerKey) -> Option<String> {
        let removed = self.entries.remove(key);
        if let Some(item) = &removed {
            tracing::debug!(key = %key, item = %item, "Retracted ledger entry");
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LedgerKey, &str)> {
        self.entries.iter().map(|(k, v)| (k, v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Hello\t\n  World  "), "hello world");
        // Fullwidth letters fold under NFKC
        assert_eq!(normalize("ＡＢＣ"), "abc");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_scope_separates_keys() {
        let a = LedgerKey::derive("SHOP", "Login", "");
        let b = LedgerKey::derive("CRM", "Login", "");
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_title_and_description_boundary() {
        let a = LedgerKey::derive("P", "ab", "c");
        let b = LedgerKey::derive("P", "a", "bc");
        assert_ne!(a, b);
    }

    #[test]
    fn test_record_is_write_once() {
        let mut ledger = IdempotencyLedger::default();
        let key = LedgerKey::derive("P", "Checkout", "Pay by card");

        assert_eq!(ledger.record(&key, "P-7").unwrap(), RecordOutcome::Inserted);
        assert_eq!(ledger.record(&key, "P-7").unwrap(), RecordOutcome::AlreadyPresent);

        let err = ledger.record(&key, "P-8").unwrap_err();
        assert!(matches!(err, LedgerError::Conflict { ref existing, ref attempted, .. }
            if existing == "P-7" && attempted == "P-8"));
        assert_eq!(ledger.lookup(&key), Some("P-7"));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_retract_allows_rerecord() {
        let mut ledger = IdempotencyLedger::default();
        let key = LedgerKey::derive("P", "Search", "");
        ledger.record(&key, "1001").unwrap();
        assert_eq!(ledger.retract(&key).as_deref(), Some("1001"));
        assert!(ledger.is_empty());
        assert_eq!(ledger.record(&key, "1002").unwrap(), RecordOutcome::Inserted);
    }

    #[test]
    fn test_serializes_as_flat_map() {
        let mut ledger = IdempotencyLedger::default();
        let key = LedgerKey::derive("P", "Search", "");
        ledger.record(&key, "1001").unwrap();

        let json = serde_json::to_value(&ledger).unwrap();
        assert_eq!(json[key.as_str()], "1001");
        let back: IdempotencyLedger = serde_json::from_value(json).unwrap();
        assert_eq!(back, ledger);
    }

    proptest! {
        #[test]
        fn prop_cosmetic_whitespace_and_case_do_not_change_key(
            words in proptest::collection::vec("[a-zA-Z0-9]{1,8}", 1..6),
            pad in "[ \t]{0,3}",
        ) {
            let plain = words.join(" ");
            let noisy = format!("{pad}{}{pad}", words.iter()
                .map(|w| w.to_uppercase())
                .collect::<Vec<_>>()
                .join("  \t "));
            prop_assert_eq!(
                LedgerKey::derive("S", &plain, &plain),
                LedgerKey::derive("S", &noisy, &noisy)
            );
        }

        #[test]
        fn prop_normalize_is_idempotent(text in "[a-zA-Z0-9 \t\n.,-]{0,40}") {
            let once = normalize(&text);
            prop_assert_eq!(normalize(&once), once);
        }
    }
}
