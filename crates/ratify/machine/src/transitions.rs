//! The static transition table: which edges exist, what guard admits each,
//! and where a failed attempt routes.

use ratify_types::{GovernanceError, ProposalState};

/// Whether `from → to` is an edge of the lifecycle graph.
pub fn is_legal(from: ProposalState, to: ProposalState) -> bool {
    use ProposalState::*;
    matches!(
        (from, to),
        (Initialized, PeerReview)
            | (PeerReview, AuditQueue)
            | (AuditQueue, AuditActive)
            | (AuditActive, AuditPass)
            | (AuditActive, AuditRework)
            | (AuditRework, AuditActive)
            | (AuditPass, PreIngress)
            | (PreIngress, Executing)
            | (Executing, Archived)
            | (FailedStructural, Archived)
            | (FailedCritical, Archived)
    )
}

/// Name of the guard that admits a legal edge. Recorded in the audit trail.
pub fn guard_name(from: ProposalState, to: ProposalState) -> &'static str {
    use ProposalState::*;
    match (from, to) {
        (Initialized, PeerReview) => "payload-locked",
        (PeerReview, AuditQueue) => "approval-quorum",
        (AuditQueue, AuditActive) => "audit-ref-assigned",
        (AuditActive, AuditPass) => "audit-report-clean",
        (AuditActive, AuditRework) => "audit-remediable",
        (AuditRework, AuditActive) => "rework-complete",
        (AuditPass, PreIngress) => "verified-unvetoed",
        (PreIngress, Executing) => "budget-confirmed",
        (Executing, Archived) => "execution-complete",
        (FailedStructural, Archived) | (FailedCritical, Archived) => "failure-drained",
        _ => "illegal",
    }
}

/// Failure state a rejected attempt from `from` routes to.
///
/// Integrity failures always route critical; otherwise severity follows the
/// stage: pre-audit stages fail structurally, everything later fails
/// critically.
pub fn failure_route(from: ProposalState, error: &GovernanceError) -> ProposalState {
    use ProposalState::*;
    if matches!(error, GovernanceError::IntegrityFailure(_)) {
        return FailedCritical;
    }
    match from {
        Initialized | PeerReview | AuditQueue => FailedStructural,
        _ => FailedCritical,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProposalState::*;

    #[test]
    fn forward_path_is_legal() {
        let path = [
            Initialized,
            PeerReview,
            AuditQueue,
            AuditActive,
            AuditPass,
            PreIngress,
            Executing,
            Archived,
        ];
        for pair in path.windows(2) {
            assert!(is_legal(pair[0], pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn rework_loop_is_legal_both_ways() {
        assert!(is_legal(AuditActive, AuditRework));
        assert!(is_legal(AuditRework, AuditActive));
    }

    #[test]
    fn no_stage_skipping() {
        assert!(!is_legal(Initialized, AuditQueue));
        assert!(!is_legal(PeerReview, AuditActive));
        assert!(!is_legal(AuditQueue, AuditPass));
        assert!(!is_legal(AuditPass, Executing));
        assert!(!is_legal(Initialized, Archived));
    }

    #[test]
    fn no_backward_edges_outside_rework() {
        assert!(!is_legal(AuditPass, AuditActive));
        assert!(!is_legal(Executing, PreIngress));
        assert!(!is_legal(PeerReview, Initialized));
    }

    #[test]
    fn archived_accepts_nothing() {
        for to in [Initialized, PeerReview, Executing, FailedCritical] {
            assert!(!is_legal(Archived, to));
        }
    }

    #[test]
    fn failure_states_only_drain_to_archived() {
        assert!(is_legal(FailedStructural, Archived));
        assert!(is_legal(FailedCritical, Archived));
        assert!(!is_legal(FailedStructural, PeerReview));
        assert!(!is_legal(FailedCritical, AuditActive));
    }

    #[test]
    fn routing_severity_follows_stage() {
        let structural = GovernanceError::StructuralViolation("bad".into());
        assert_eq!(failure_route(PeerReview, &structural), FailedStructural);
        assert_eq!(failure_route(AuditQueue, &structural), FailedStructural);
        assert_eq!(failure_route(AuditActive, &structural), FailedCritical);
        assert_eq!(failure_route(Executing, &structural), FailedCritical);
    }

    #[test]
    fn integrity_failures_always_route_critical() {
        let integrity = GovernanceError::IntegrityFailure("divergence".into());
        assert_eq!(failure_route(Initialized, &integrity), FailedCritical);
        assert_eq!(failure_route(PeerReview, &integrity), FailedCritical);
    }
}
