//! The three standard verification steps.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use ratify_capability::{CapabilityError, SignerHasher, ThresholdSource};
use ratify_types::{GovernanceError, Proposal};

use crate::{StepOutcome, VerificationStep};

/// Minimum raw signature length accepted as structurally well-formed.
const MIN_SIGNATURE_LEN: usize = 32;

/// Step 1: certified-metrics attestation.
///
/// Structural checks (presence, non-empty signer, minimum signature length)
/// happen locally; the cryptographic verification is delegated to the
/// injected [`SignerHasher`]. This is the pipeline's only suspension point.
pub struct AttestationStep {
    signer: Arc<dyn SignerHasher>,
}

impl AttestationStep {
    pub fn new(signer: Arc<dyn SignerHasher>) -> Self {
        Self { signer }
    }
}

#[async_trait]
impl VerificationStep for AttestationStep {
    fn name(&self) -> &str {
        "attestation"
    }

    async fn evaluate(&self, proposal: &Proposal) -> Result<StepOutcome, GovernanceError> {
        let Some(attestation) = &proposal.attestation else {
            return Ok(StepOutcome::fail("certified-metrics attestation missing"));
        };

        if attestation.signer.0.is_empty() {
            return Ok(StepOutcome::fail("attestation signer reference is empty"));
        }
        if attestation.signature.len() < MIN_SIGNATURE_LEN {
            return Ok(StepOutcome::fail_with(
                "attestation signature below minimum length",
                serde_json::json!({
                    "length": attestation.signature.len(),
                    "minimum": MIN_SIGNATURE_LEN,
                }),
            ));
        }

        let verified = self
            .signer
            .verify(
                proposal.payload_hash.as_bytes(),
                &attestation.signature,
                &attestation.key_id,
            )
            .await;

        match verified {
            Ok(true) => Ok(StepOutcome::Pass),
            Ok(false) => Ok(StepOutcome::fail("attestation signature invalid")),
            // A key the signer does not know or bytes it cannot parse are
            // verification findings, not collaborator outages.
            Err(CapabilityError::UnknownKey(key)) => Ok(StepOutcome::fail_with(
                "attestation key unknown to signer",
                serde_json::json!({ "key_id": key }),
            )),
            Err(CapabilityError::MalformedSignature(detail)) => Ok(StepOutcome::fail_with(
                "attestation signature malformed",
                serde_json::json!({ "detail": detail }),
            )),
            Err(err) => Err(GovernanceError::CollaboratorUnavailable(err.to_string())),
        }
    }
}

/// Step 2: policy adherence.
///
/// The declared policy reference must belong to one of the authorized policy
/// families, and the self-declared risk value must not exceed the
/// self-declared tolerance. Both are internal consistency checks, independent
/// of the external ceiling applied in step 3.
pub struct PolicyAdherenceStep {
    authorized_families: Vec<String>,
}

impl PolicyAdherenceStep {
    pub fn new(authorized_families: Vec<String>) -> Self {
        Self {
            authorized_families,
        }
    }
}

#[async_trait]
impl VerificationStep for PolicyAdherenceStep {
    fn name(&self) -> &str {
        "policy-adherence"
    }

    async fn evaluate(&self, proposal: &Proposal) -> Result<StepOutcome, GovernanceError> {
        let authorized = self
            .authorized_families
            .iter()
            .any(|family| proposal.policy_ref.starts_with(family.as_str()));
        if !authorized {
            return Ok(StepOutcome::fail_with(
                "policy reference outside authorized families",
                serde_json::json!({ "policy_ref": proposal.policy_ref }),
            ));
        }

        let risk = &proposal.risk;
        if !risk.value.is_finite() || !risk.tolerance.is_finite() {
            return Ok(StepOutcome::fail("declared risk figures are non-finite"));
        }
        if risk.value > risk.tolerance {
            return Ok(StepOutcome::fail_with(
                "declared risk exceeds declared tolerance",
                serde_json::json!({ "value": risk.value, "tolerance": risk.tolerance }),
            ));
        }

        Ok(StepOutcome::Pass)
    }
}

/// Step 3: operational risk ceiling.
///
/// The declared risk value must not exceed the ceiling configured for its
/// unit. An unknown unit is a hard failure, never a silent pass.
pub struct RiskCeilingStep {
    thresholds: Arc<dyn ThresholdSource>,
}

impl RiskCeilingStep {
    pub fn new(thresholds: Arc<dyn ThresholdSource>) -> Self {
        Self { thresholds }
    }
}

#[async_trait]
impl VerificationStep for RiskCeilingStep {
    fn name(&self) -> &str {
        "risk-ceiling"
    }

    async fn evaluate(&self, proposal: &Proposal) -> Result<StepOutcome, GovernanceError> {
        let unit = proposal.risk.unit.as_str();
        let Some(ceiling) = self.thresholds.risk_ceiling(unit) else {
            return Ok(StepOutcome::fail_with(
                "no operational ceiling configured for declared risk unit",
                serde_json::json!({ "unit": unit }),
            ));
        };

        debug!(
            unit,
            ceiling,
            value = proposal.risk.value,
            config_version = self.thresholds.version(),
            "checking operational risk ceiling"
        );

        if proposal.risk.value > ceiling {
            return Ok(StepOutcome::fail_with(
                "declared risk exceeds operational ceiling",
                serde_json::json!({
                    "value": proposal.risk.value,
                    "ceiling": ceiling,
                    "config_version": self.thresholds.version(),
                }),
            ));
        }

        Ok(StepOutcome::Pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratify_capability::{StaticHasher, StaticThresholds};
    use ratify_types::{Attestation, Digest, PrincipalId, RiskDeclaration};

    fn proposal() -> Proposal {
        Proposal::new(
            PrincipalId::new("originator-1"),
            Digest::from_bytes([5u8; 32]),
            "policy/change-mgmt/v2",
            RiskDeclaration::new(0.2, 0.5, "latency-ms"),
        )
    }

    async fn attested(proposal: Proposal) -> Proposal {
        let signer = StaticHasher;
        let signature = signer
            .sign(proposal.payload_hash.as_bytes(), "metrics-key")
            .await
            .unwrap();
        proposal.with_attestation(Attestation {
            signer: PrincipalId::new("metrics-authority"),
            key_id: "metrics-key".to_string(),
            signature,
        })
    }

    #[tokio::test]
    async fn attestation_missing_fails() {
        let step = AttestationStep::new(Arc::new(StaticHasher));
        let outcome = step.evaluate(&proposal()).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Fail { .. }));
    }

    #[tokio::test]
    async fn attestation_valid_passes() {
        let step = AttestationStep::new(Arc::new(StaticHasher));
        let proposal = attested(proposal()).await;
        let outcome = step.evaluate(&proposal).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Pass));
    }

    #[tokio::test]
    async fn attestation_short_signature_fails_structurally() {
        let step = AttestationStep::new(Arc::new(StaticHasher));
        let proposal = proposal().with_attestation(Attestation {
            signer: PrincipalId::new("metrics-authority"),
            key_id: "metrics-key".to_string(),
            signature: vec![1, 2, 3],
        });
        let outcome = step.evaluate(&proposal).await.unwrap();
        let StepOutcome::Fail { reason, .. } = outcome else {
            panic!("expected failure");
        };
        assert!(reason.contains("minimum length"));
    }

    #[tokio::test]
    async fn policy_family_mismatch_fails() {
        let step = PolicyAdherenceStep::new(vec!["policy/change-mgmt/".to_string()]);
        let mut proposal = proposal();
        proposal.policy_ref = "policy/rogue/v1".to_string();
        let outcome = step.evaluate(&proposal).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Fail { .. }));
    }

    #[tokio::test]
    async fn risk_above_tolerance_fails() {
        let step = PolicyAdherenceStep::new(vec!["policy/change-mgmt/".to_string()]);
        let mut proposal = proposal();
        proposal.risk = RiskDeclaration::new(0.9, 0.5, "latency-ms");
        let outcome = step.evaluate(&proposal).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Fail { .. }));
    }

    #[tokio::test]
    async fn unknown_unit_is_a_hard_failure() {
        let thresholds = StaticThresholds::new(1).with_ceiling("latency-ms", 0.8);
        let step = RiskCeilingStep::new(Arc::new(thresholds));
        let mut proposal = proposal();
        proposal.risk = RiskDeclaration::new(0.1, 0.5, "unheard-of-unit");
        let outcome = step.evaluate(&proposal).await.unwrap();
        let StepOutcome::Fail { reason, .. } = outcome else {
            panic!("expected failure");
        };
        assert!(reason.contains("no operational ceiling"));
    }

    #[tokio::test]
    async fn ceiling_enforced() {
        let thresholds = StaticThresholds::new(1).with_ceiling("latency-ms", 0.8);
        let step = RiskCeilingStep::new(Arc::new(thresholds));

        let ok = step.evaluate(&proposal()).await.unwrap();
        assert!(matches!(ok, StepOutcome::Pass));

        let mut over = proposal();
        over.risk = RiskDeclaration::new(0.9, 1.0, "latency-ms");
        let outcome = step.evaluate(&over).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Fail { .. }));
    }
}
