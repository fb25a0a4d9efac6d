#![deny(unsafe_code)]
//! Verification pipeline — an ordered, fail-fast sequence of checks run
//! against a proposal before it may leave the audit stage.
//!
//! Steps, in fixed order:
//! 1. **Attestation** — certified-metrics signature present, structurally
//!    well-formed, and cryptographically valid ([`AttestationStep`]).
//! 2. **Policy adherence** — declared policy reference belongs to an
//!    authorized family and self-declared risk stays within self-declared
//!    tolerance ([`PolicyAdherenceStep`]).
//! 3. **Risk ceiling** — declared risk stays under the operational ceiling
//!    configured for its unit ([`RiskCeilingStep`]).
//!
//! The pipeline stops at the first failing step, but every step appears in
//! the returned report with an explicit status: ran-pass, ran-fail, or
//! skipped. The steps are sequential on purpose — a later step's result is
//! meaningless when an earlier one failed, and the skipped status encodes
//! exactly that.

pub mod pipeline;
pub mod report;
pub mod steps;

pub use pipeline::VerificationPipeline;
pub use report::{StepStatus, VerificationReport, VerificationStepResult};
pub use steps::{AttestationStep, PolicyAdherenceStep, RiskCeilingStep};

use async_trait::async_trait;

use ratify_types::{GovernanceError, Proposal};

/// Outcome of a single verification step that actually ran.
#[derive(Clone, Debug)]
pub enum StepOutcome {
    Pass,
    Fail {
        reason: String,
        details: Option<serde_json::Value>,
    },
}

impl StepOutcome {
    pub fn fail(reason: impl Into<String>) -> Self {
        StepOutcome::Fail {
            reason: reason.into(),
            details: None,
        }
    }

    pub fn fail_with(reason: impl Into<String>, details: serde_json::Value) -> Self {
        StepOutcome::Fail {
            reason: reason.into(),
            details: Some(details),
        }
    }
}

/// One check in the pipeline.
///
/// A step distinguishes a *negative finding* (`Ok(StepOutcome::Fail)`) from
/// an *inability to check* (`Err`, e.g. a collaborator timeout): only the
/// former is a verification result.
#[async_trait]
pub trait VerificationStep: Send + Sync {
    /// Stable step name used in reports and audit records.
    fn name(&self) -> &str;

    async fn evaluate(&self, proposal: &Proposal) -> Result<StepOutcome, GovernanceError>;
}
