//! Error taxonomy for the governance decision core.
//!
//! Every fallible operation returns one of these kinds. Only
//! [`GovernanceError::IntegrityFailure`] is a hard stop; retryable kinds are
//! distinguished by [`GovernanceError::is_retryable`].

use thiserror::Error;

use crate::{ProposalId, ProposalState};

/// Errors surfaced by the governance decision core.
#[derive(Error, Debug)]
pub enum GovernanceError {
    /// Malformed input, missing required artifact, or schema mismatch.
    /// Recoverable by resubmission with corrected input.
    #[error("structural violation: {0}")]
    StructuralViolation(String),

    /// Declared values breach self-declared or configured limits.
    #[error("policy violation (post_audit={post_audit}): {detail}")]
    PolicyViolation {
        detail: String,
        /// Detected after the external audit gate; routes to FailedCritical.
        post_audit: bool,
    },

    /// Audit-chain mismatch or signature verification failure.
    /// Never silently retried or auto-corrected.
    #[error("integrity failure: {0}")]
    IntegrityFailure(String),

    /// External capability timed out or errored; the transition was
    /// abandoned without mutating proposal state.
    #[error("collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),

    /// Another transition is in flight for the same proposal.
    #[error("transition already in flight for proposal {0}")]
    ConcurrencyConflict(ProposalId),

    #[error("proposal not found: {0}")]
    ProposalNotFound(ProposalId),

    /// The proposal is in a terminal state and accepts no transitions.
    #[error("proposal is terminal in state {0}")]
    TerminalState(ProposalState),
}

impl GovernanceError {
    /// Retryable errors leave the proposal unchanged and may be resubmitted
    /// as-is; everything else is terminal for the attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GovernanceError::CollaboratorUnavailable(_)
                | GovernanceError::ConcurrencyConflict(_)
        )
    }

    /// Short stable tag used in audit records and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GovernanceError::StructuralViolation(_) => "structural-violation",
            GovernanceError::PolicyViolation { .. } => "policy-violation",
            GovernanceError::IntegrityFailure(_) => "integrity-failure",
            GovernanceError::CollaboratorUnavailable(_) => "collaborator-unavailable",
            GovernanceError::ConcurrencyConflict(_) => "concurrency-conflict",
            GovernanceError::ProposalNotFound(_) => "proposal-not-found",
            GovernanceError::TerminalState(_) => "terminal-state",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(GovernanceError::CollaboratorUnavailable("timeout".into()).is_retryable());
        assert!(GovernanceError::ConcurrencyConflict(ProposalId::new()).is_retryable());
        assert!(!GovernanceError::StructuralViolation("bad".into()).is_retryable());
        assert!(!GovernanceError::IntegrityFailure("divergence".into()).is_retryable());
    }

    #[test]
    fn policy_violation_message_distinguishes_stage() {
        let pre = GovernanceError::PolicyViolation {
            detail: "risk above tolerance".into(),
            post_audit: false,
        };
        let post = GovernanceError::PolicyViolation {
            detail: "ceiling exceeded".into(),
            post_audit: true,
        };
        assert!(pre.to_string().contains("post_audit=false"));
        assert!(post.to_string().contains("post_audit=true"));
    }
}
