//! The append-only chain store and its verification logic.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tracing::warn;

use ratify_capability::SignerHasher;
use ratify_types::{Digest, ProposalId};

use crate::record::{AuditRecord, RecordPayload};
use crate::{canonical_bytes, ChainError};

const RECORD_DOMAIN_TAG: &[u8] = b"ratify-audit-record-v1:";
const GENESIS_TAG: &[u8] = b"ratify-chain-genesis-v1";

/// Outcome of a chain verification pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainVerification {
    pub valid: bool,
    /// Sequence number of the first record that fails recomputation.
    pub first_divergence: Option<u64>,
}

impl ChainVerification {
    fn ok() -> Self {
        Self {
            valid: true,
            first_divergence: None,
        }
    }

    fn diverged(sequence: u64) -> Self {
        Self {
            valid: false,
            first_divergence: Some(sequence),
        }
    }
}

/// Append-only, hash-linked ledger of decision records, keyed by proposal.
///
/// Existing records are never mutated; readers may hold clones freely.
/// Cross-proposal ordering is neither guaranteed nor required.
pub struct AuditChain {
    hasher: Arc<dyn SignerHasher>,
    records: RwLock<HashMap<ProposalId, Vec<AuditRecord>>>,
}

impl AuditChain {
    pub fn new(hasher: Arc<dyn SignerHasher>) -> Self {
        Self {
            hasher,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Well-known value the first record of every proposal chains from.
    pub fn genesis(&self) -> Digest {
        self.hasher.hash(GENESIS_TAG)
    }

    /// Append a record for `proposal_id`. The only mutating operation.
    pub fn append(
        &self,
        proposal_id: ProposalId,
        payload: RecordPayload,
    ) -> Result<AuditRecord, ChainError> {
        let payload_bytes = canonical_bytes(&payload)?;

        let mut records = self.records.write().unwrap();
        let chain = records.entry(proposal_id).or_default();
        let sequence = chain.len() as u64;
        let previous_hash = chain.last().map(|r| r.hash).unwrap_or_else(|| self.genesis());
        let hash = record_hash(self.hasher.as_ref(), &previous_hash, &payload_bytes, sequence);

        let record = AuditRecord {
            sequence,
            previous_hash,
            payload,
            hash,
            recorded_at: Utc::now(),
        };
        chain.push(record.clone());
        Ok(record)
    }

    /// Hash of the most recent record for `proposal_id`, if any.
    pub fn head(&self, proposal_id: &ProposalId) -> Option<Digest> {
        self.records
            .read()
            .unwrap()
            .get(proposal_id)
            .and_then(|chain| chain.last())
            .map(|r| r.hash)
    }

    /// Number of records for `proposal_id`.
    pub fn len(&self, proposal_id: &ProposalId) -> usize {
        self.records
            .read()
            .unwrap()
            .get(proposal_id)
            .map(|chain| chain.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, proposal_id: &ProposalId) -> bool {
        self.len(proposal_id) == 0
    }

    /// Ordered page of records for `proposal_id`. A `limit` of 0 returns
    /// everything from `offset`.
    pub fn trail(&self, proposal_id: &ProposalId, offset: usize, limit: usize) -> Vec<AuditRecord> {
        let records = self.records.read().unwrap();
        let Some(chain) = records.get(proposal_id) else {
            return Vec::new();
        };
        let iter = chain.iter().skip(offset);
        if limit == 0 {
            iter.cloned().collect()
        } else {
            iter.take(limit).cloned().collect()
        }
    }

    /// Verify the stored chain for `proposal_id`.
    pub fn verify(&self, proposal_id: &ProposalId) -> ChainVerification {
        let records = self.trail(proposal_id, 0, 0);
        self.verify_records(&records)
    }

    /// Recompute a record sequence from genesis.
    ///
    /// Confirms that sequence numbers increase strictly from 0 with no gaps,
    /// that each record links to its predecessor's hash, and that each stored
    /// hash matches the recomputed value. On failure, reports the first
    /// divergent sequence number; corruption is never repaired.
    pub fn verify_records(&self, records: &[AuditRecord]) -> ChainVerification {
        let mut expected_previous = self.genesis();

        for (index, record) in records.iter().enumerate() {
            let expected_sequence = index as u64;

            if record.sequence != expected_sequence {
                warn!(
                    expected = expected_sequence,
                    found = record.sequence,
                    "audit chain sequence gap"
                );
                return ChainVerification::diverged(expected_sequence);
            }

            if record.previous_hash != expected_previous {
                warn!(sequence = record.sequence, "audit chain link mismatch");
                return ChainVerification::diverged(expected_sequence);
            }

            let Ok(payload_bytes) = canonical_bytes(&record.payload) else {
                return ChainVerification::diverged(expected_sequence);
            };
            let recomputed = record_hash(
                self.hasher.as_ref(),
                &record.previous_hash,
                &payload_bytes,
                record.sequence,
            );
            if recomputed != record.hash {
                warn!(sequence = record.sequence, "audit chain hash mismatch");
                return ChainVerification::diverged(expected_sequence);
            }

            expected_previous = record.hash;
        }

        ChainVerification::ok()
    }
}

fn record_hash(
    hasher: &dyn SignerHasher,
    previous: &Digest,
    payload_bytes: &[u8],
    sequence: u64,
) -> Digest {
    let mut bytes =
        Vec::with_capacity(RECORD_DOMAIN_TAG.len() + 32 + payload_bytes.len() + 8);
    bytes.extend_from_slice(RECORD_DOMAIN_TAG);
    bytes.extend_from_slice(previous.as_bytes());
    bytes.extend_from_slice(payload_bytes);
    bytes.extend_from_slice(&sequence.to_le_bytes());
    hasher.hash(&bytes)
}
