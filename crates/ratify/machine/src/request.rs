//! Transition requests and results.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use ratify_types::{Digest, ProposalId, ProposalState};
use ratify_veto::ConstraintSnapshot;

/// Caller-supplied evidence accompanying a transition request.
///
/// Most guards read their evidence from the proposal itself (approvals, audit
/// reference); the variants here carry only what arrives with the request.
#[derive(Clone, Debug)]
pub enum TransitionEvidence {
    /// No request-carried evidence.
    None,
    /// Constraint snapshot for the pre-ingress veto evaluation. The machine
    /// resolves soft-constraint weights from its configured threshold table;
    /// the request carries values and the dynamic limit only.
    Constraints(ConstraintSnapshot),
    /// Compute budget the caller wants fixed for execution.
    BudgetRequest { compute_budget: u64 },
    /// Hash of the produced result artifact, required for archival.
    ExecutionResult { artifact_hash: Digest },
}

/// A request to move one proposal to a target state.
#[derive(Clone, Debug)]
pub struct TransitionRequest {
    pub proposal_id: ProposalId,
    pub target: ProposalState,
    pub evidence: TransitionEvidence,
    /// Resubmitting with the same token replays the stored result instead of
    /// re-running the guard.
    pub idempotency_token: Option<String>,
    /// Upper bound on collaborator calls made while evaluating the guard.
    pub timeout: Option<Duration>,
}

impl TransitionRequest {
    pub fn new(proposal_id: ProposalId, target: ProposalState) -> Self {
        Self {
            proposal_id,
            target,
            evidence: TransitionEvidence::None,
            idempotency_token: None,
            timeout: None,
        }
    }

    pub fn with_evidence(mut self, evidence: TransitionEvidence) -> Self {
        self.evidence = evidence;
        self
    }

    pub fn with_idempotency_token(mut self, token: impl Into<String>) -> Self {
        self.idempotency_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of a processed transition request.
///
/// A guard failure that routed the proposal to a failure state is still a
/// processed request: `success` is false and `failure_reason` is set, but the
/// routing itself committed and produced `audit_record_id`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransitionResult {
    pub success: bool,
    pub new_state: ProposalState,
    /// Hash of the transition (or routing) record appended for this request.
    pub audit_record_id: Digest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}
