#![deny(unsafe_code)]
//! Collaborator capability interfaces consumed by the governance decision
//! core, plus local and simulated implementations.
//!
//! The core never reimplements these concerns; it consumes them as closed
//! trait interfaces resolved once at construction and injected explicitly:
//! - [`SignerHasher`] — cryptographic signing, verification, and hashing.
//! - [`AuditService`] — external audit run assignment and signed reports.
//! - [`BudgetAuthority`] — compute budget confirmation.
//! - [`ThresholdSource`] — versioned, read-only risk ceilings and weights.

pub mod signer;
pub mod simulated;

pub use signer::{LocalEd25519, StaticHasher};
pub use simulated::{SimulatedAuditService, SimulatedBudgetAuthority, StaticThresholds};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use ratify_types::{Digest, PrincipalId, ProposalId};

/// Errors surfaced by collaborator capabilities.
#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("unknown key: {0}")]
    UnknownKey(String),

    #[error("unknown audit reference: {0}")]
    UnknownAuditRef(String),

    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    #[error("capability unavailable: {0}")]
    Unavailable(String),
}

/// Signing, verification, and collision-resistant hashing.
///
/// `hash` is pure computation and stays synchronous; `sign` and `verify` may
/// cross a process boundary (HSM, remote signer) and are the designated
/// suspension points.
#[async_trait]
pub trait SignerHasher: Send + Sync {
    /// Collision-resistant digest of `bytes`.
    fn hash(&self, bytes: &[u8]) -> Digest;

    /// Sign `payload` under `key_id`.
    async fn sign(&self, payload: &[u8], key_id: &str) -> Result<Vec<u8>, CapabilityError>;

    /// Verify `signature` over `payload` under `key_id`.
    ///
    /// Returns `Ok(false)` for a well-formed but invalid signature; errors
    /// are reserved for unknown keys and malformed input.
    async fn verify(
        &self,
        payload: &[u8],
        signature: &[u8],
        key_id: &str,
    ) -> Result<bool, CapabilityError>;
}

/// A signed pass/fail report from the external audit service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditReport {
    pub audit_ref: String,
    pub passed: bool,
    pub open_critical_findings: u32,
    /// Findings the auditor marked as fixable via a rework cycle.
    pub remediable_findings: u32,
    pub signed_by: PrincipalId,
    pub key_id: String,
    pub signature: Vec<u8>,
}

impl AuditReport {
    /// Deterministic bytes covered by the report signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        format!(
            "ratify-audit-report-v1:{}:{}:{}:{}",
            self.audit_ref, self.passed, self.open_critical_findings, self.remediable_findings
        )
        .into_bytes()
    }
}

/// External audit service: assigns audit identifiers and eventually reports.
#[async_trait]
pub trait AuditService: Send + Sync {
    async fn assign_audit_ref(&self, proposal_id: ProposalId) -> Result<String, CapabilityError>;

    async fn fetch_report(&self, audit_ref: &str) -> Result<AuditReport, CapabilityError>;
}

/// Resource authority confirming a proposed compute budget is available.
#[async_trait]
pub trait BudgetAuthority: Send + Sync {
    async fn confirm_budget(
        &self,
        proposal_id: ProposalId,
        requested: u64,
    ) -> Result<bool, CapabilityError>;
}

/// Read-only, versioned configuration of operational risk ceilings and
/// soft-constraint weights.
pub trait ThresholdSource: Send + Sync {
    /// Operational ceiling for a declared risk unit; `None` for unknown units.
    fn risk_ceiling(&self, unit: &str) -> Option<f64>;

    /// Weight applied to a named soft constraint at the pre-ingress veto
    /// gate; `None` when not configured.
    fn soft_weight(&self, name: &str) -> Option<f64>;

    /// Monotonic configuration version.
    fn version(&self) -> u32;
}
