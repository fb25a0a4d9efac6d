//! Simulated collaborators for development and testing.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use ratify_types::{PrincipalId, ProposalId};

use crate::{
    AuditReport, AuditService, BudgetAuthority, CapabilityError, SignerHasher, ThresholdSource,
};

/// Outcome the simulated audit service will report for every run.
#[derive(Clone, Debug)]
struct SimulatedOutcome {
    passed: bool,
    open_critical_findings: u32,
    remediable_findings: u32,
}

/// A simulated external audit service.
///
/// Assigns `audit-<uuid>` references and returns reports signed by the
/// injected [`SignerHasher`] under `key_id`, so report signatures verify the
/// same way a real auditor's would. Optional latency makes timeout paths
/// testable.
pub struct SimulatedAuditService {
    signer: Arc<dyn SignerHasher>,
    auditor: PrincipalId,
    key_id: String,
    outcome: Mutex<SimulatedOutcome>,
    latency: Mutex<Option<Duration>>,
    assigned: Mutex<HashMap<String, ProposalId>>,
}

impl SimulatedAuditService {
    /// An auditor that passes every run with zero findings.
    pub fn passing(signer: Arc<dyn SignerHasher>, key_id: impl Into<String>) -> Self {
        Self {
            signer,
            auditor: PrincipalId::new("simulated-auditor"),
            key_id: key_id.into(),
            outcome: Mutex::new(SimulatedOutcome {
                passed: true,
                open_critical_findings: 0,
                remediable_findings: 0,
            }),
            latency: Mutex::new(None),
            assigned: Mutex::new(HashMap::new()),
        }
    }

    /// Configure the outcome of subsequent reports.
    pub fn set_outcome(&self, passed: bool, open_critical: u32, remediable: u32) {
        *self.outcome.lock().unwrap() = SimulatedOutcome {
            passed,
            open_critical_findings: open_critical,
            remediable_findings: remediable,
        };
    }

    /// Delay every `fetch_report` by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }
}

#[async_trait]
impl AuditService for SimulatedAuditService {
    async fn assign_audit_ref(&self, proposal_id: ProposalId) -> Result<String, CapabilityError> {
        let audit_ref = format!("audit-{}", uuid::Uuid::new_v4());
        self.assigned
            .lock()
            .unwrap()
            .insert(audit_ref.clone(), proposal_id);
        Ok(audit_ref)
    }

    async fn fetch_report(&self, audit_ref: &str) -> Result<AuditReport, CapabilityError> {
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if !self.assigned.lock().unwrap().contains_key(audit_ref) {
            return Err(CapabilityError::UnknownAuditRef(audit_ref.to_string()));
        }

        let outcome = self.outcome.lock().unwrap().clone();
        let mut report = AuditReport {
            audit_ref: audit_ref.to_string(),
            passed: outcome.passed,
            open_critical_findings: outcome.open_critical_findings,
            remediable_findings: outcome.remediable_findings,
            signed_by: self.auditor.clone(),
            key_id: self.key_id.clone(),
            signature: Vec::new(),
        };
        report.signature = self
            .signer
            .sign(&report.signing_bytes(), &self.key_id)
            .await?;
        Ok(report)
    }
}

/// A simulated budget authority with a fixed pool.
pub struct SimulatedBudgetAuthority {
    available: u64,
}

impl SimulatedBudgetAuthority {
    pub fn with_pool(available: u64) -> Self {
        Self { available }
    }
}

#[async_trait]
impl BudgetAuthority for SimulatedBudgetAuthority {
    async fn confirm_budget(
        &self,
        _proposal_id: ProposalId,
        requested: u64,
    ) -> Result<bool, CapabilityError> {
        Ok(requested <= self.available)
    }
}

/// A static, versioned threshold table.
#[derive(Clone, Debug, Default)]
pub struct StaticThresholds {
    version: u32,
    ceilings: BTreeMap<String, f64>,
    weights: BTreeMap<String, f64>,
}

impl StaticThresholds {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            ceilings: BTreeMap::new(),
            weights: BTreeMap::new(),
        }
    }

    pub fn with_ceiling(mut self, unit: impl Into<String>, ceiling: f64) -> Self {
        self.ceilings.insert(unit.into(), ceiling);
        self
    }

    pub fn with_weight(mut self, name: impl Into<String>, weight: f64) -> Self {
        self.weights.insert(name.into(), weight);
        self
    }
}

impl ThresholdSource for StaticThresholds {
    fn risk_ceiling(&self, unit: &str) -> Option<f64> {
        self.ceilings.get(unit).copied()
    }

    fn soft_weight(&self, name: &str) -> Option<f64> {
        self.weights.get(name).copied()
    }

    fn version(&self) -> u32 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::StaticHasher;

    fn service() -> SimulatedAuditService {
        SimulatedAuditService::passing(Arc::new(StaticHasher), "auditor-key")
    }

    #[tokio::test]
    async fn assigned_report_signature_verifies() {
        let svc = service();
        let audit_ref = svc.assign_audit_ref(ProposalId::new()).await.unwrap();
        let report = svc.fetch_report(&audit_ref).await.unwrap();

        assert!(report.passed);
        let ok = StaticHasher
            .verify(&report.signing_bytes(), &report.signature, "auditor-key")
            .await
            .unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn unassigned_ref_is_rejected() {
        let svc = service();
        let result = svc.fetch_report("audit-nope").await;
        assert!(matches!(result, Err(CapabilityError::UnknownAuditRef(_))));
    }

    #[tokio::test]
    async fn outcome_is_configurable() {
        let svc = service();
        svc.set_outcome(false, 2, 1);
        let audit_ref = svc.assign_audit_ref(ProposalId::new()).await.unwrap();
        let report = svc.fetch_report(&audit_ref).await.unwrap();
        assert!(!report.passed);
        assert_eq!(report.open_critical_findings, 2);
        assert_eq!(report.remediable_findings, 1);
    }

    #[tokio::test]
    async fn budget_pool_enforced() {
        let authority = SimulatedBudgetAuthority::with_pool(100);
        assert!(authority
            .confirm_budget(ProposalId::new(), 100)
            .await
            .unwrap());
        assert!(!authority
            .confirm_budget(ProposalId::new(), 101)
            .await
            .unwrap());
    }

    #[test]
    fn thresholds_lookup() {
        let thresholds = StaticThresholds::new(3)
            .with_ceiling("latency-ms", 0.8)
            .with_weight("latency", 0.5);

        assert_eq!(thresholds.risk_ceiling("latency-ms"), Some(0.8));
        assert_eq!(thresholds.risk_ceiling("unknown-unit"), None);
        assert_eq!(thresholds.soft_weight("latency"), Some(0.5));
        assert_eq!(thresholds.version(), 3);
    }
}
