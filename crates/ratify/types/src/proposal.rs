//! Proposal types: the governed change request and its lifecycle state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Digest, PrincipalId, ProposalId};

/// Lifecycle state of a proposal.
///
/// The only legal forward sequence is
/// `Initialized → PeerReview → AuditQueue → AuditActive ⇄ AuditRework →
/// AuditPass → PreIngress → Executing → Archived`. The failure states are
/// terminal apart from draining into `Archived`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalState {
    Initialized,
    PeerReview,
    AuditQueue,
    AuditActive,
    AuditRework,
    AuditPass,
    PreIngress,
    Executing,
    Archived,
    /// Early-stage guard failure; recoverable by resubmitting a corrected proposal.
    FailedStructural,
    /// Audit- or execution-stage guard failure; requires external remediation.
    FailedCritical,
}

impl ProposalState {
    /// Archived proposals accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProposalState::Archived)
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ProposalState::FailedStructural | ProposalState::FailedCritical
        )
    }
}

impl std::fmt::Display for ProposalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProposalState::Initialized => "initialized",
            ProposalState::PeerReview => "peer-review",
            ProposalState::AuditQueue => "audit-queue",
            ProposalState::AuditActive => "audit-active",
            ProposalState::AuditRework => "audit-rework",
            ProposalState::AuditPass => "audit-pass",
            ProposalState::PreIngress => "pre-ingress",
            ProposalState::Executing => "executing",
            ProposalState::Archived => "archived",
            ProposalState::FailedStructural => "failed-structural",
            ProposalState::FailedCritical => "failed-critical",
        };
        write!(f, "{name}")
    }
}

/// A signed approval recorded during peer review.
///
/// Approvals sign the proposal's payload hash; they are appended in order and
/// never edited.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub approver: PrincipalId,
    pub key_id: String,
    pub signature: Vec<u8>,
    pub signed_at: DateTime<Utc>,
}

impl Approval {
    pub fn new(approver: PrincipalId, key_id: impl Into<String>, signature: Vec<u8>) -> Self {
        Self {
            approver,
            key_id: key_id.into(),
            signature,
            signed_at: Utc::now(),
        }
    }
}

/// Self-declared risk figures carried on the proposal.
///
/// `value` must not exceed `tolerance` (internal consistency) nor the
/// externally configured ceiling for `unit` (operational limit).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskDeclaration {
    pub value: f64,
    pub tolerance: f64,
    pub unit: String,
}

impl RiskDeclaration {
    pub fn new(value: f64, tolerance: f64, unit: impl Into<String>) -> Self {
        Self {
            value,
            tolerance,
            unit: unit.into(),
        }
    }
}

/// Certified-metrics attestation attached by the originator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    /// Reference to the signing principal; must be non-empty.
    pub signer: PrincipalId,
    /// Key under which `signature` was produced.
    pub key_id: String,
    /// Raw signature over the proposal's payload hash.
    pub signature: Vec<u8>,
}

/// A governed change request moving through the lifecycle.
///
/// `id`, `originator_id` and (outside an audited rework cycle) `payload_hash`
/// are immutable. `state` and `transition_log_head` are owned exclusively by
/// the state machine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub originator_id: PrincipalId,
    pub payload_hash: Digest,
    pub state: ProposalState,
    pub approvals: Vec<Approval>,
    /// External audit run identifier; set once on entering the audit queue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_ref: Option<String>,
    /// Compute allotment fixed at the pre-ingress gate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compute_budget: Option<u64>,
    /// Hash of the most recent audit record for this proposal.
    pub transition_log_head: Digest,
    /// Declared policy family reference, e.g. `"policy/change-mgmt/v2"`.
    pub policy_ref: String,
    pub risk: RiskDeclaration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation: Option<Attestation>,
    /// Completed rework cycles.
    pub rework_cycles: u32,
    /// Whether the current rework cycle has already logged a payload rehash.
    pub rework_hash_logged: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Proposal {
    /// Create a proposal in `Initialized` with a fresh id.
    ///
    /// `transition_log_head` starts at zero and is set by the state machine
    /// when the creation record is chained.
    pub fn new(
        originator_id: PrincipalId,
        payload_hash: Digest,
        policy_ref: impl Into<String>,
        risk: RiskDeclaration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ProposalId::new(),
            originator_id,
            payload_hash,
            state: ProposalState::Initialized,
            approvals: Vec::new(),
            audit_ref: None,
            compute_budget: None,
            transition_log_head: Digest::ZERO,
            policy_ref: policy_ref.into(),
            risk,
            attestation: None,
            rework_cycles: 0,
            rework_hash_logged: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_attestation(mut self, attestation: Attestation) -> Self {
        self.attestation = Some(attestation);
        self
    }

    /// Number of distinct approving principals.
    pub fn independent_approvals(&self) -> usize {
        let mut approvers: Vec<&PrincipalId> =
            self.approvals.iter().map(|a| &a.approver).collect();
        approvers.sort_by(|a, b| a.0.cmp(&b.0));
        approvers.dedup();
        approvers.len()
    }
}
