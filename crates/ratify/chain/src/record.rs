//! Audit records: the immutable entries of the decision ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ratify_pipeline::VerificationReport;
use ratify_types::{Digest, ProposalState};
use ratify_veto::VetoVerdict;

/// What a single audit record documents.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RecordPayload {
    /// A committed state transition.
    Transition {
        from: ProposalState,
        to: ProposalState,
        /// Name of the guard that admitted the transition.
        guard: String,
    },
    /// A transition attempt whose guard failed; the proposal was routed to
    /// a failure state.
    TransitionFailed {
        from: ProposalState,
        attempted: ProposalState,
        routed_to: ProposalState,
        error_kind: String,
        reason: String,
    },
    /// A veto evaluation performed at a gated transition.
    VetoVerdict { verdict: VetoVerdict },
    /// A verification pipeline run performed at a gated transition.
    VerificationReport { report: VerificationReport },
    /// A payload hash replacement during a rework cycle. Logged before the
    /// proposal may re-enter active audit.
    PayloadRehashed {
        previous: Digest,
        replacement: Digest,
    },
    /// A transition abandoned on collaborator timeout. Forensic only; the
    /// proposal state did not change.
    AttemptTimedOut { attempted: ProposalState },
}

impl RecordPayload {
    /// Stable tag for logs and queries.
    pub fn kind(&self) -> &'static str {
        match self {
            RecordPayload::Transition { .. } => "transition",
            RecordPayload::TransitionFailed { .. } => "transition-failed",
            RecordPayload::VetoVerdict { .. } => "veto-verdict",
            RecordPayload::VerificationReport { .. } => "verification-report",
            RecordPayload::PayloadRehashed { .. } => "payload-rehashed",
            RecordPayload::AttemptTimedOut { .. } => "attempt-timed-out",
        }
    }
}

/// One immutable, hash-linked ledger entry.
///
/// Created once, never mutated or deleted; the only valid operation on the
/// containing chain is append.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Monotonic per-proposal sequence number, starting at 0.
    pub sequence: u64,
    /// Hash of the preceding record, or the genesis digest for sequence 0.
    pub previous_hash: Digest,
    pub payload: RecordPayload,
    /// `H(domain-tag ‖ previous_hash ‖ canonical(payload) ‖ sequence)`.
    pub hash: Digest,
    pub recorded_at: DateTime<Utc>,
}
