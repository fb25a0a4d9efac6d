//! Gate behavior end to end: veto routing, fail-fast verification, tamper
//! detection, and collaborator timeouts.

use std::time::Duration;

use ratify_chain::RecordPayload;
use ratify_integration::Harness;
use ratify_machine::{TransitionEvidence, TransitionRequest};
use ratify_pipeline::StepStatus;
use ratify_types::{GovernanceError, ProposalState};
use ratify_veto::{ConstraintSnapshot, VetoDomain};

#[tokio::test]
async fn hard_threshold_veto_routes_critical_and_is_chained() {
    let harness = Harness::new();
    let proposal = harness.register(b"change-payload").await;
    harness.drive_to_audit_pass(proposal.id).await;

    let snapshot = ConstraintSnapshot::new(10.0)
        .with_hard_threshold("containment-breach", true)
        .with_soft_constraint("load", 1.0, 2.0);
    let result = harness
        .machine
        .submit_transition(
            TransitionRequest::new(proposal.id, ProposalState::PreIngress)
                .with_evidence(TransitionEvidence::Constraints(snapshot)),
        )
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.new_state, ProposalState::FailedCritical);

    let trail = harness.machine.get_audit_trail(&proposal.id, 0, 0);
    let verdict = trail
        .iter()
        .find_map(|r| match &r.payload {
            RecordPayload::VetoVerdict { verdict } => Some(verdict.clone()),
            _ => None,
        })
        .expect("verdict is chained");
    assert!(verdict.vetoed);
    assert_eq!(verdict.domain, Some(VetoDomain::HardThreshold));
    assert_eq!(verdict.trace.tripped, vec!["containment-breach".to_string()]);
    assert!(harness.machine.verify_chain(&proposal.id).valid);
}

#[tokio::test]
async fn soft_aggregate_over_limit_vetoes() {
    let harness = Harness::new();
    let proposal = harness.register(b"change-payload").await;
    harness.drive_to_audit_pass(proposal.id).await;

    // Configured weights: 3.0 * 1.0 (load) + 1.0 * 0.5 (queue-depth)
    // = 3.5 > 2.0. The weights carried by the request play no part.
    let snapshot = ConstraintSnapshot::new(2.0)
        .with_soft_constraint("load", 3.0, 0.0)
        .with_soft_constraint("queue-depth", 1.0, 0.0);
    let result = harness
        .machine
        .submit_transition(
            TransitionRequest::new(proposal.id, ProposalState::PreIngress)
                .with_evidence(TransitionEvidence::Constraints(snapshot)),
        )
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.new_state, ProposalState::FailedCritical);
}

#[tokio::test]
async fn request_borne_weights_cannot_defeat_the_soft_veto() {
    let harness = Harness::new();
    let proposal = harness.register(b"change-payload").await;
    harness.drive_to_audit_pass(proposal.id).await;

    // A submitter zeroing the weight of a hot constraint still gets the
    // configured 1.0 weight applied: 100.0 > 0.1.
    let snapshot = ConstraintSnapshot::new(0.1).with_soft_constraint("load", 100.0, 0.0);
    let result = harness
        .machine
        .submit_transition(
            TransitionRequest::new(proposal.id, ProposalState::PreIngress)
                .with_evidence(TransitionEvidence::Constraints(snapshot)),
        )
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.new_state, ProposalState::FailedCritical);

    let trail = harness.machine.get_audit_trail(&proposal.id, 0, 0);
    let verdict = trail
        .iter()
        .find_map(|r| match &r.payload {
            RecordPayload::VetoVerdict { verdict } => Some(verdict.clone()),
            _ => None,
        })
        .expect("verdict is chained");
    assert_eq!(verdict.domain, Some(VetoDomain::SoftAggregate));
    assert_eq!(verdict.trace.aggregate, Some(100.0));
}

#[tokio::test]
async fn missing_attestation_fails_fast_and_skips_later_steps() {
    let harness = Harness::new();
    let proposal = harness.register_unattested(b"change-payload").await;
    harness.drive_to_audit_pass(proposal.id).await;

    let result = harness
        .machine
        .submit_transition(
            TransitionRequest::new(proposal.id, ProposalState::PreIngress)
                .with_evidence(TransitionEvidence::Constraints(Harness::calm_snapshot())),
        )
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.new_state, ProposalState::FailedCritical);

    let trail = harness.machine.get_audit_trail(&proposal.id, 0, 0);
    let report = trail
        .iter()
        .find_map(|r| match &r.payload {
            RecordPayload::VerificationReport { report } => Some(report.clone()),
            _ => None,
        })
        .expect("report is chained");
    assert!(!report.overall_success);
    assert_eq!(report.steps[0].status, StepStatus::RanFail);
    assert!(report.steps[1..]
        .iter()
        .all(|s| s.status == StepStatus::Skipped));

    // The pipeline failed before the veto could run.
    assert!(!trail
        .iter()
        .any(|r| matches!(r.payload, RecordPayload::VetoVerdict { .. })));
}

#[tokio::test]
async fn tampered_trail_reports_the_first_divergence() {
    let harness = Harness::new();
    let proposal = harness.register(b"change-payload").await;
    harness.drive_to_audit_pass(proposal.id).await;

    let mut records = harness.machine.get_audit_trail(&proposal.id, 0, 0);
    assert!(harness.machine.chain().verify_records(&records).valid);

    records[1].payload = RecordPayload::Transition {
        from: ProposalState::PeerReview,
        to: ProposalState::AuditPass,
        guard: "forged".to_string(),
    };

    let verification = harness.machine.chain().verify_records(&records);
    assert!(!verification.valid);
    assert_eq!(verification.first_divergence, Some(1));

    // The stored chain itself is untouched.
    assert!(harness.machine.verify_chain(&proposal.id).valid);
}

#[tokio::test]
async fn collaborator_timeout_leaves_state_untouched() {
    let harness = Harness::new();
    let proposal = harness.register(b"change-payload").await;
    harness.advance(proposal.id, ProposalState::PeerReview).await;
    harness.approve(proposal.id, "alice").await;
    harness.approve(proposal.id, "bob").await;
    harness.advance(proposal.id, ProposalState::AuditQueue).await;
    harness.advance(proposal.id, ProposalState::AuditActive).await;

    harness.audit.set_latency(Duration::from_millis(500));
    let result = harness
        .machine
        .submit_transition(
            TransitionRequest::new(proposal.id, ProposalState::AuditPass)
                .with_timeout(Duration::from_millis(20)),
        )
        .await;
    assert!(matches!(
        result,
        Err(GovernanceError::CollaboratorUnavailable(_))
    ));

    let stored = harness.machine.get_proposal(&proposal.id).unwrap();
    assert_eq!(stored.state, ProposalState::AuditActive);

    let trail = harness.machine.get_audit_trail(&proposal.id, 0, 0);
    assert!(matches!(
        trail.last().unwrap().payload,
        RecordPayload::AttemptTimedOut { .. }
    ));

    // The attempt is retryable once the collaborator recovers.
    harness.audit.set_latency(Duration::from_millis(0));
    harness.advance(proposal.id, ProposalState::AuditPass).await;
    assert!(harness.machine.verify_chain(&proposal.id).valid);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_transitions_admit_exactly_one_winner() {
    let harness = Harness::new();
    let proposal = harness.register(b"change-payload").await;
    harness.advance(proposal.id, ProposalState::PeerReview).await;
    harness.approve(proposal.id, "alice").await;
    harness.approve(proposal.id, "bob").await;
    harness.advance(proposal.id, ProposalState::AuditQueue).await;
    harness.advance(proposal.id, ProposalState::AuditActive).await;

    harness.audit.set_latency(Duration::from_millis(200));
    let machine = harness.machine.clone();
    let id = proposal.id;
    let slow = tokio::spawn(async move {
        machine
            .submit_transition(TransitionRequest::new(id, ProposalState::AuditPass))
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let contended = harness
        .machine
        .submit_transition(TransitionRequest::new(proposal.id, ProposalState::AuditPass))
        .await;
    assert!(matches!(
        contended,
        Err(GovernanceError::ConcurrencyConflict(_))
    ));

    let winner = slow.await.unwrap().unwrap();
    assert!(winner.success);
    assert_eq!(
        harness.machine.get_proposal(&proposal.id).unwrap().state,
        ProposalState::AuditPass
    );
    assert!(harness.machine.verify_chain(&proposal.id).valid);
}
