//! Verification run reports.

use serde::{Deserialize, Serialize};

/// Whether a step ran, and how it ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    RanPass,
    RanFail,
    Skipped,
}

/// Result entry for one step of a verification run.
///
/// Every configured step is represented in the report, including the ones
/// skipped after an earlier failure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerificationStepResult {
    pub step: String,
    pub status: StepStatus,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl VerificationStepResult {
    pub fn passed(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            status: StepStatus::RanPass,
            reason: "ok".to_string(),
            details: None,
        }
    }

    pub fn failed(
        step: impl Into<String>,
        reason: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> Self {
        Self {
            step: step.into(),
            status: StepStatus::RanFail,
            reason: reason.into(),
            details,
        }
    }

    pub fn skipped(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            status: StepStatus::Skipped,
            reason: "skipped after earlier failure".to_string(),
            details: None,
        }
    }
}

/// The full trace of one pipeline run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub overall_success: bool,
    pub steps: Vec<VerificationStepResult>,
}

impl VerificationReport {
    /// The first failing step, if any.
    pub fn first_failure(&self) -> Option<&VerificationStepResult> {
        self.steps
            .iter()
            .find(|s| s.status == StepStatus::RanFail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&StepStatus::RanPass).unwrap(),
            "\"ran-pass\""
        );
        assert_eq!(
            serde_json::to_string(&StepStatus::RanFail).unwrap(),
            "\"ran-fail\""
        );
        assert_eq!(
            serde_json::to_string(&StepStatus::Skipped).unwrap(),
            "\"skipped\""
        );
    }

    #[test]
    fn first_failure_finds_the_failing_step() {
        let report = VerificationReport {
            overall_success: false,
            steps: vec![
                VerificationStepResult::passed("attestation"),
                VerificationStepResult::failed("policy-adherence", "family mismatch", None),
                VerificationStepResult::skipped("risk-ceiling"),
            ],
        };
        assert_eq!(report.first_failure().unwrap().step, "policy-adherence");
    }
}
