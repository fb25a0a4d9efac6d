#![deny(unsafe_code)]
//! Append-only, hash-linked audit ledger.
//!
//! Every state transition and every veto decision is chained into an
//! immutable per-proposal record sequence. Each record's hash covers the
//! previous record's hash, the canonical bytes of the payload, and the
//! sequence number, so the full decision history can be independently
//! re-verified and cannot be silently edited. Verification reports the first
//! divergent sequence number and never repairs anything.

pub mod chain;
pub mod record;

pub use chain::{AuditChain, ChainVerification};
pub use record::{AuditRecord, RecordPayload};

use serde::Serialize;
use thiserror::Error;

/// Errors from the audit chain.
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("record payload serialization failed: {0}")]
    Serialization(String),
}

/// Deterministic byte representation of a payload for hashing.
///
/// Round-tripping through `serde_json::Value` sorts map keys (the map is a
/// BTreeMap), so the bytes are independent of struct field declaration order
/// and of any formatting choices.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, ChainError> {
    let value =
        serde_json::to_value(value).map_err(|e| ChainError::Serialization(e.to_string()))?;
    serde_json::to_vec(&value).map_err(|e| ChainError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn canonical_bytes_sorts_map_keys() {
        let mut forward = HashMap::new();
        forward.insert("alpha", 1);
        forward.insert("beta", 2);
        forward.insert("gamma", 3);

        // Same entries inserted in a different order hash identically.
        let mut reverse = HashMap::new();
        reverse.insert("gamma", 3);
        reverse.insert("beta", 2);
        reverse.insert("alpha", 1);

        assert_eq!(
            canonical_bytes(&forward).unwrap(),
            canonical_bytes(&reverse).unwrap()
        );
    }
}
