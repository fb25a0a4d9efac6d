//! Pipeline runner: fail-fast execution with an explicit status for every
//! configured step.

use std::sync::Arc;

use tracing::{debug, warn};

use ratify_capability::{SignerHasher, ThresholdSource};
use ratify_types::{GovernanceError, Proposal};

use crate::report::{VerificationReport, VerificationStepResult};
use crate::steps::{AttestationStep, PolicyAdherenceStep, RiskCeilingStep};
use crate::{StepOutcome, VerificationStep};

/// An ordered, fail-fast verification pipeline.
pub struct VerificationPipeline {
    steps: Vec<Box<dyn VerificationStep>>,
}

impl VerificationPipeline {
    /// An empty pipeline. Steps must be added in evaluation order.
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// The standard three-step pipeline: attestation, policy adherence,
    /// risk ceiling.
    pub fn standard(
        signer: Arc<dyn SignerHasher>,
        thresholds: Arc<dyn ThresholdSource>,
        authorized_families: Vec<String>,
    ) -> Self {
        let mut pipeline = Self::new();
        pipeline.add_step(Box::new(AttestationStep::new(signer)));
        pipeline.add_step(Box::new(PolicyAdherenceStep::new(authorized_families)));
        pipeline.add_step(Box::new(RiskCeilingStep::new(thresholds)));
        pipeline
    }

    pub fn add_step(&mut self, step: Box<dyn VerificationStep>) {
        self.steps.push(step);
    }

    /// Run all steps against `proposal`.
    ///
    /// `Ok(report)` covers both pass and fail verdicts; `Err` means the run
    /// could not complete (collaborator unavailable) and produced no verdict.
    /// Steps after the first failure are reported as skipped, never run.
    pub async fn run(&self, proposal: &Proposal) -> Result<VerificationReport, GovernanceError> {
        let mut results = Vec::with_capacity(self.steps.len());
        let mut failed = false;

        for step in &self.steps {
            if failed {
                results.push(VerificationStepResult::skipped(step.name()));
                continue;
            }

            debug!(proposal_id = %proposal.id, step = step.name(), "running verification step");
            match step.evaluate(proposal).await? {
                StepOutcome::Pass => {
                    results.push(VerificationStepResult::passed(step.name()));
                }
                StepOutcome::Fail { reason, details } => {
                    warn!(
                        proposal_id = %proposal.id,
                        step = step.name(),
                        reason = %reason,
                        "verification step failed"
                    );
                    results.push(VerificationStepResult::failed(step.name(), reason, details));
                    failed = true;
                }
            }
        }

        Ok(VerificationReport {
            overall_success: !failed,
            steps: results,
        })
    }
}

impl Default for VerificationPipeline {
    fn default() -> Self {
        Self::new()
    }
}
