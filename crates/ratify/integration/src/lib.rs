#![deny(unsafe_code)]
//! Shared harness for end-to-end tests: a fully wired decision core with a
//! real in-process Ed25519 signer and simulated external collaborators.

use std::sync::Arc;

use ratify_capability::{
    LocalEd25519, SignerHasher, SimulatedAuditService, SimulatedBudgetAuthority, StaticThresholds,
};
use ratify_machine::{
    MachineConfig, ProposalStateMachine, TransitionEvidence, TransitionRequest, TransitionResult,
};
use ratify_pipeline::VerificationPipeline;
use ratify_types::{
    Approval, Attestation, PrincipalId, Proposal, ProposalId, ProposalState, RiskDeclaration,
};
use ratify_veto::ConstraintSnapshot;

pub const METRICS_KEY: &str = "metrics-key";
pub const AUDITOR_KEY: &str = "auditor-key";
pub const POLICY_REF: &str = "policy/change-mgmt/v2";
pub const RISK_UNIT: &str = "latency-ms";

/// A wired-up decision core plus handles to its collaborators.
pub struct Harness {
    pub machine: Arc<ProposalStateMachine>,
    pub signer: Arc<LocalEd25519>,
    pub audit: Arc<SimulatedAuditService>,
}

/// Install a compact subscriber so `RUST_LOG` works under the test harness.
/// Safe to call from every test; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        let signer = Arc::new(LocalEd25519::new());
        signer.generate_key(METRICS_KEY);
        signer.generate_key(AUDITOR_KEY);

        let audit = Arc::new(SimulatedAuditService::passing(
            signer.clone() as Arc<dyn SignerHasher>,
            AUDITOR_KEY,
        ));
        let thresholds = Arc::new(
            StaticThresholds::new(1)
                .with_ceiling(RISK_UNIT, 0.8)
                .with_weight("load", 1.0)
                .with_weight("queue-depth", 0.5),
        );
        let pipeline = VerificationPipeline::standard(
            signer.clone(),
            thresholds.clone(),
            vec!["policy/change-mgmt/".to_string()],
        );
        let machine = ProposalStateMachine::new(
            signer.clone(),
            audit.clone(),
            Arc::new(SimulatedBudgetAuthority::with_pool(10_000)),
            thresholds,
            pipeline,
            MachineConfig::default(),
        );

        Self {
            machine: Arc::new(machine),
            signer,
            audit,
        }
    }

    /// Register a proposal over `payload`, attested under the metrics key.
    pub async fn register(&self, payload: &[u8]) -> Proposal {
        let payload_hash = self.signer.hash(payload);
        let attestation = Attestation {
            signer: PrincipalId::new("metrics-authority"),
            key_id: METRICS_KEY.to_string(),
            signature: self
                .signer
                .sign(payload_hash.as_bytes(), METRICS_KEY)
                .await
                .expect("metrics key is registered"),
        };
        let proposal = Proposal::new(
            PrincipalId::new("originator-1"),
            payload_hash,
            POLICY_REF,
            RiskDeclaration::new(0.2, 0.5, RISK_UNIT),
        )
        .with_attestation(attestation);
        self.machine
            .submit_proposal(proposal)
            .expect("fresh proposal registers")
    }

    /// Register a proposal with no attestation attached.
    pub async fn register_unattested(&self, payload: &[u8]) -> Proposal {
        let proposal = Proposal::new(
            PrincipalId::new("originator-1"),
            self.signer.hash(payload),
            POLICY_REF,
            RiskDeclaration::new(0.2, 0.5, RISK_UNIT),
        );
        self.machine
            .submit_proposal(proposal)
            .expect("fresh proposal registers")
    }

    /// Record an approval signed under a per-approver key.
    pub async fn approve(&self, proposal_id: ProposalId, approver: &str) {
        let key_id = format!("approver-{approver}");
        self.signer.generate_key(&key_id);
        let payload_hash = self
            .machine
            .get_proposal(&proposal_id)
            .expect("proposal exists")
            .payload_hash;
        let signature = self
            .signer
            .sign(payload_hash.as_bytes(), &key_id)
            .await
            .expect("approver key is registered");
        self.machine
            .record_approval(
                proposal_id,
                Approval::new(PrincipalId::new(approver), key_id, signature),
            )
            .expect("approval is accepted");
    }

    /// Re-attest a proposal after a rework rehash dropped the original.
    pub async fn reattest(&self, proposal_id: ProposalId) {
        let payload_hash = self
            .machine
            .get_proposal(&proposal_id)
            .expect("proposal exists")
            .payload_hash;
        let attestation = Attestation {
            signer: PrincipalId::new("metrics-authority"),
            key_id: METRICS_KEY.to_string(),
            signature: self
                .signer
                .sign(payload_hash.as_bytes(), METRICS_KEY)
                .await
                .expect("metrics key is registered"),
        };
        self.machine
            .record_attestation(proposal_id, attestation)
            .expect("attestation is accepted");
    }

    /// Submit a bare transition and assert it committed.
    pub async fn advance(&self, proposal_id: ProposalId, target: ProposalState) -> TransitionResult {
        let result = self
            .machine
            .submit_transition(TransitionRequest::new(proposal_id, target))
            .await
            .expect("transition request is processed");
        assert!(result.success, "expected {target} to commit: {result:?}");
        result
    }

    /// Walk a freshly registered proposal up to `AuditPass`.
    pub async fn drive_to_audit_pass(&self, proposal_id: ProposalId) {
        self.advance(proposal_id, ProposalState::PeerReview).await;
        self.approve(proposal_id, "alice").await;
        self.approve(proposal_id, "bob").await;
        self.advance(proposal_id, ProposalState::AuditQueue).await;
        self.advance(proposal_id, ProposalState::AuditActive).await;
        self.advance(proposal_id, ProposalState::AuditPass).await;
    }

    /// Constraint snapshot with nothing tripped and ample headroom. The
    /// machine resolves soft weights from its configured table, so the
    /// weight given here is inert.
    pub fn calm_snapshot() -> ConstraintSnapshot {
        ConstraintSnapshot::new(10.0)
            .with_hard_threshold("containment-breach", false)
            .with_soft_constraint("load", 1.0, 0.0)
    }

    /// Take the proposal from `AuditPass` all the way to `Archived`.
    pub async fn drive_to_archived(&self, proposal_id: ProposalId) {
        let result = self
            .machine
            .submit_transition(
                TransitionRequest::new(proposal_id, ProposalState::PreIngress)
                    .with_evidence(TransitionEvidence::Constraints(Self::calm_snapshot())),
            )
            .await
            .expect("pre-ingress request is processed");
        assert!(result.success, "pre-ingress: {result:?}");

        let result = self
            .machine
            .submit_transition(
                TransitionRequest::new(proposal_id, ProposalState::Executing).with_evidence(
                    TransitionEvidence::BudgetRequest {
                        compute_budget: 250,
                    },
                ),
            )
            .await
            .expect("execution request is processed");
        assert!(result.success, "executing: {result:?}");

        let artifact_hash = self.signer.hash(b"result-artifact");
        let result = self
            .machine
            .submit_transition(
                TransitionRequest::new(proposal_id, ProposalState::Archived)
                    .with_evidence(TransitionEvidence::ExecutionResult { artifact_hash }),
            )
            .await
            .expect("archival request is processed");
        assert!(result.success, "archived: {result:?}");
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
