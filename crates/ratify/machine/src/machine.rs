//! The proposal state machine: guard evaluation, failure routing, and the
//! coupling between state mutation and the audit chain.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use ratify_capability::{
    AuditReport, AuditService, BudgetAuthority, CapabilityError, SignerHasher, ThresholdSource,
};
use ratify_chain::{AuditChain, AuditRecord, ChainVerification, RecordPayload};
use ratify_pipeline::VerificationPipeline;
use ratify_types::{Approval, Digest, GovernanceError, Proposal, ProposalId, ProposalState};
use ratify_veto::ConstraintSnapshot;

use crate::request::{TransitionEvidence, TransitionRequest, TransitionResult};
use crate::transitions;

/// Tunables for the state machine.
#[derive(Clone, Debug)]
pub struct MachineConfig {
    /// Distinct approving principals required to leave peer review.
    pub approval_quorum: usize,
    /// Timeout applied to collaborator calls when a request carries none.
    pub default_timeout: Option<Duration>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            approval_quorum: 2,
            default_timeout: None,
        }
    }
}

/// Drives proposals through the lifecycle.
///
/// Exactly one transition is processed per proposal at a time; a second
/// request for the same proposal while one is in flight fails synchronously
/// with [`GovernanceError::ConcurrencyConflict`]. Every committed outcome —
/// success or routed failure — appends to the audit chain before the stored
/// proposal changes.
pub struct ProposalStateMachine {
    config: MachineConfig,
    signer: Arc<dyn SignerHasher>,
    audit_service: Arc<dyn AuditService>,
    budget_authority: Arc<dyn BudgetAuthority>,
    thresholds: Arc<dyn ThresholdSource>,
    pipeline: VerificationPipeline,
    chain: Arc<AuditChain>,
    proposals: RwLock<HashMap<ProposalId, Proposal>>,
    in_flight: Mutex<HashSet<ProposalId>>,
    completed: Mutex<HashMap<ProposalId, HashMap<String, TransitionResult>>>,
}

/// Releases the per-proposal in-flight slot on drop.
struct Claim<'a> {
    machine: &'a ProposalStateMachine,
    id: ProposalId,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.machine.in_flight.lock().unwrap().remove(&self.id);
    }
}

impl ProposalStateMachine {
    pub fn new(
        signer: Arc<dyn SignerHasher>,
        audit_service: Arc<dyn AuditService>,
        budget_authority: Arc<dyn BudgetAuthority>,
        thresholds: Arc<dyn ThresholdSource>,
        pipeline: VerificationPipeline,
        config: MachineConfig,
    ) -> Self {
        let chain = Arc::new(AuditChain::new(signer.clone()));
        Self {
            config,
            signer,
            audit_service,
            budget_authority,
            thresholds,
            pipeline,
            chain,
            proposals: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            completed: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying audit chain, shared for independent verification.
    pub fn chain(&self) -> Arc<AuditChain> {
        self.chain.clone()
    }

    /// Register a new proposal. Registration is not a transition and appends
    /// no audit record; the chain starts with the first transition.
    pub fn submit_proposal(&self, proposal: Proposal) -> Result<Proposal, GovernanceError> {
        if proposal.state != ProposalState::Initialized {
            return Err(GovernanceError::StructuralViolation(format!(
                "proposals must be submitted in initialized state, got {}",
                proposal.state
            )));
        }

        let mut proposals = self.proposals.write().unwrap();
        if proposals.contains_key(&proposal.id) {
            return Err(GovernanceError::StructuralViolation(format!(
                "proposal {} already registered",
                proposal.id
            )));
        }

        info!(proposal_id = %proposal.id, originator = %proposal.originator_id, "proposal registered");
        proposals.insert(proposal.id, proposal.clone());
        Ok(proposal)
    }

    pub fn get_proposal(&self, proposal_id: &ProposalId) -> Option<Proposal> {
        self.proposals.read().unwrap().get(proposal_id).cloned()
    }

    /// Ordered page of the proposal's audit trail. A `limit` of 0 returns
    /// everything from `offset`.
    pub fn get_audit_trail(
        &self,
        proposal_id: &ProposalId,
        offset: usize,
        limit: usize,
    ) -> Vec<AuditRecord> {
        self.chain.trail(proposal_id, offset, limit)
    }

    pub fn verify_chain(&self, proposal_id: &ProposalId) -> ChainVerification {
        self.chain.verify(proposal_id)
    }

    /// Record an approval. Approvals are append-only and accepted during
    /// peer review, or during rework when a rehash dropped the old ones.
    pub fn record_approval(
        &self,
        proposal_id: ProposalId,
        approval: Approval,
    ) -> Result<usize, GovernanceError> {
        let _slot = self.claim(proposal_id)?;

        if approval.signature.is_empty() {
            return Err(GovernanceError::StructuralViolation(
                "approval carries an empty signature".to_string(),
            ));
        }

        let mut proposals = self.proposals.write().unwrap();
        let proposal = proposals
            .get_mut(&proposal_id)
            .ok_or(GovernanceError::ProposalNotFound(proposal_id))?;
        if !matches!(
            proposal.state,
            ProposalState::PeerReview | ProposalState::AuditRework
        ) {
            return Err(GovernanceError::StructuralViolation(format!(
                "approvals may only be recorded in peer review or rework, proposal is {}",
                proposal.state
            )));
        }

        proposal.approvals.push(approval);
        proposal.updated_at = Utc::now();
        debug!(
            proposal_id = %proposal_id,
            independent = proposal.independent_approvals(),
            "approval recorded"
        );
        Ok(proposal.independent_approvals())
    }

    /// Attach or replace the certified-metrics attestation. Accepted in the
    /// same windows as approvals; the pipeline re-verifies it at the
    /// pre-ingress gate.
    pub fn record_attestation(
        &self,
        proposal_id: ProposalId,
        attestation: ratify_types::Attestation,
    ) -> Result<(), GovernanceError> {
        let _slot = self.claim(proposal_id)?;

        if attestation.signature.is_empty() {
            return Err(GovernanceError::StructuralViolation(
                "attestation carries an empty signature".to_string(),
            ));
        }

        let mut proposals = self.proposals.write().unwrap();
        let proposal = proposals
            .get_mut(&proposal_id)
            .ok_or(GovernanceError::ProposalNotFound(proposal_id))?;
        if !matches!(
            proposal.state,
            ProposalState::PeerReview | ProposalState::AuditRework
        ) {
            return Err(GovernanceError::StructuralViolation(format!(
                "attestations may only be recorded in peer review or rework, proposal is {}",
                proposal.state
            )));
        }

        proposal.attestation = Some(attestation);
        proposal.updated_at = Utc::now();
        Ok(())
    }

    /// Replace the payload hash during a rework cycle.
    ///
    /// Allowed at most once per cycle and only while the proposal sits in
    /// `AuditRework`. The replacement is chained before it takes effect, and
    /// signatures over the old hash (approvals, attestation) are dropped.
    pub fn record_rework_hash(
        &self,
        proposal_id: ProposalId,
        replacement: Digest,
    ) -> Result<AuditRecord, GovernanceError> {
        let _slot = self.claim(proposal_id)?;

        if replacement == Digest::ZERO {
            return Err(GovernanceError::StructuralViolation(
                "replacement payload hash is unset".to_string(),
            ));
        }

        let mut proposals = self.proposals.write().unwrap();
        let proposal = proposals
            .get_mut(&proposal_id)
            .ok_or(GovernanceError::ProposalNotFound(proposal_id))?;
        if proposal.state != ProposalState::AuditRework {
            return Err(GovernanceError::StructuralViolation(format!(
                "payload hash may only change during rework, proposal is {}",
                proposal.state
            )));
        }
        if proposal.rework_hash_logged {
            return Err(GovernanceError::StructuralViolation(
                "payload hash already replaced in this rework cycle".to_string(),
            ));
        }

        let record = self
            .chain
            .append(
                proposal_id,
                RecordPayload::PayloadRehashed {
                    previous: proposal.payload_hash,
                    replacement,
                },
            )
            .map_err(|e| GovernanceError::IntegrityFailure(e.to_string()))?;

        info!(
            proposal_id = %proposal_id,
            previous = %proposal.payload_hash,
            replacement = %replacement,
            "payload hash replaced during rework"
        );
        proposal.payload_hash = replacement;
        proposal.rework_hash_logged = true;
        proposal.approvals.clear();
        proposal.attestation = None;
        proposal.transition_log_head = record.hash;
        proposal.updated_at = Utc::now();
        Ok(record)
    }

    /// Process one transition request.
    ///
    /// Retryable conditions (collaborator unavailable, concurrent request)
    /// surface as `Err` and leave the proposal state untouched. Guard
    /// rejections route the proposal to a failure state and return a
    /// non-success `Ok` result carrying the routing record's hash.
    pub async fn submit_transition(
        &self,
        request: TransitionRequest,
    ) -> Result<TransitionResult, GovernanceError> {
        if let Some(token) = &request.idempotency_token {
            let completed = self.completed.lock().unwrap();
            if let Some(prior) = completed
                .get(&request.proposal_id)
                .and_then(|tokens| tokens.get(token))
            {
                debug!(proposal_id = %request.proposal_id, token = %token, "replaying stored result");
                return Ok(prior.clone());
            }
        }

        let _slot = self.claim(request.proposal_id)?;

        let proposal = self
            .get_proposal(&request.proposal_id)
            .ok_or(GovernanceError::ProposalNotFound(request.proposal_id))?;
        if proposal.state.is_terminal() {
            return Err(GovernanceError::TerminalState(proposal.state));
        }

        let from = proposal.state;
        info!(proposal_id = %proposal.id, from = %from, target = %request.target, "transition requested");

        if !transitions::is_legal(from, request.target) {
            let error = GovernanceError::StructuralViolation(format!(
                "no transition from {from} to {}",
                request.target
            ));
            // A failed proposal is not re-routed for asking the wrong thing.
            if from.is_failure() {
                return Err(error);
            }
            let result = self.route_and_commit(proposal, request.target, error)?;
            self.remember(&request, &result);
            return Ok(result);
        }

        let mut staged = proposal.clone();
        let evaluation = match request.timeout.or(self.config.default_timeout) {
            Some(budget) => {
                match tokio::time::timeout(budget, self.evaluate_guard(&mut staged, &request))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => return self.abandon_on_timeout(&request, budget),
                }
            }
            None => self.evaluate_guard(&mut staged, &request).await,
        };

        match evaluation {
            Ok(()) => {
                let guard = transitions::guard_name(from, request.target);
                let record = self.append_for(
                    &mut staged,
                    RecordPayload::Transition {
                        from,
                        to: request.target,
                        guard: guard.to_string(),
                    },
                )?;

                staged.state = request.target;
                if from == ProposalState::AuditRework
                    && request.target == ProposalState::AuditActive
                {
                    staged.rework_cycles += 1;
                    staged.rework_hash_logged = false;
                }
                staged.updated_at = Utc::now();
                self.proposals.write().unwrap().insert(staged.id, staged);

                info!(
                    proposal_id = %request.proposal_id,
                    from = %from,
                    to = %request.target,
                    guard,
                    "transition committed"
                );
                let result = TransitionResult {
                    success: true,
                    new_state: request.target,
                    audit_record_id: record.hash,
                    failure_reason: None,
                };
                self.remember(&request, &result);
                Ok(result)
            }
            Err(error) if error.is_retryable() => {
                // Evidence records appended before the interruption stay in
                // the chain; resync the head without touching the state.
                self.resync_head(&request.proposal_id);
                Err(error)
            }
            Err(error) => {
                let result = self.route_and_commit(staged, request.target, error)?;
                self.remember(&request, &result);
                Ok(result)
            }
        }
    }

    /// Reconstruct a proposal's lifecycle state from its audit trail alone.
    ///
    /// The records are assumed chain-verified; this checks only that each
    /// transition's claimed source matches the replayed state.
    pub fn replay_state(records: &[AuditRecord]) -> Result<ProposalState, GovernanceError> {
        crate::replay::replay_state(records)
    }

    fn claim(&self, proposal_id: ProposalId) -> Result<Claim<'_>, GovernanceError> {
        let mut in_flight = self.in_flight.lock().unwrap();
        if !in_flight.insert(proposal_id) {
            return Err(GovernanceError::ConcurrencyConflict(proposal_id));
        }
        Ok(Claim {
            machine: self,
            id: proposal_id,
        })
    }

    fn remember(&self, request: &TransitionRequest, result: &TransitionResult) {
        let mut completed = self.completed.lock().unwrap();
        if let Some(token) = &request.idempotency_token {
            completed
                .entry(request.proposal_id)
                .or_default()
                .insert(token.clone(), result.clone());
        }
        // A terminal result ends the proposal's request stream; only the
        // archival token (if any) stays replayable.
        if result.new_state.is_terminal() {
            if let Some(tokens) = completed.get_mut(&request.proposal_id) {
                let keep = request.idempotency_token.as_deref();
                tokens.retain(|token, _| Some(token.as_str()) == keep);
                if tokens.is_empty() {
                    completed.remove(&request.proposal_id);
                }
            }
        }
    }

    /// Append a record and move the staged head with it.
    fn append_for(
        &self,
        staged: &mut Proposal,
        payload: RecordPayload,
    ) -> Result<AuditRecord, GovernanceError> {
        let record = self
            .chain
            .append(staged.id, payload)
            .map_err(|e| GovernanceError::IntegrityFailure(e.to_string()))?;
        staged.transition_log_head = record.hash;
        Ok(record)
    }

    /// Point the stored proposal's head at the chain's current tip.
    fn resync_head(&self, proposal_id: &ProposalId) {
        if let Some(head) = self.chain.head(proposal_id) {
            if let Some(stored) = self.proposals.write().unwrap().get_mut(proposal_id) {
                stored.transition_log_head = head;
                stored.updated_at = Utc::now();
            }
        }
    }

    fn abandon_on_timeout(
        &self,
        request: &TransitionRequest,
        budget: Duration,
    ) -> Result<TransitionResult, GovernanceError> {
        let record = self
            .chain
            .append(
                request.proposal_id,
                RecordPayload::AttemptTimedOut {
                    attempted: request.target,
                },
            )
            .map_err(|e| GovernanceError::IntegrityFailure(e.to_string()))?;
        if let Some(stored) = self
            .proposals
            .write()
            .unwrap()
            .get_mut(&request.proposal_id)
        {
            stored.transition_log_head = record.hash;
            stored.updated_at = Utc::now();
        }
        warn!(
            proposal_id = %request.proposal_id,
            target = %request.target,
            ?budget,
            "transition abandoned on collaborator timeout"
        );
        Err(GovernanceError::CollaboratorUnavailable(format!(
            "transition to {} timed out after {budget:?}",
            request.target
        )))
    }

    /// Chain a rejection record and route the proposal to its failure state.
    fn route_and_commit(
        &self,
        mut staged: Proposal,
        attempted: ProposalState,
        error: GovernanceError,
    ) -> Result<TransitionResult, GovernanceError> {
        let from = staged.state;
        let routed = transitions::failure_route(from, &error);
        let record = self.append_for(
            &mut staged,
            RecordPayload::TransitionFailed {
                from,
                attempted,
                routed_to: routed,
                error_kind: error.kind().to_string(),
                reason: error.to_string(),
            },
        )?;

        staged.state = routed;
        staged.updated_at = Utc::now();
        warn!(
            proposal_id = %staged.id,
            from = %from,
            attempted = %attempted,
            routed = %routed,
            reason = %error,
            "transition rejected"
        );
        self.proposals.write().unwrap().insert(staged.id, staged);

        Ok(TransitionResult {
            success: false,
            new_state: routed,
            audit_record_id: record.hash,
            failure_reason: Some(error.to_string()),
        })
    }

    /// Evaluate the guard for `staged.state → request.target`.
    ///
    /// `Ok(())` admits the transition. Retryable errors abandon the attempt;
    /// any other error routes the proposal. Evidence records (verification
    /// reports, veto verdicts) are chained here as they are produced, before
    /// the outcome record.
    async fn evaluate_guard(
        &self,
        staged: &mut Proposal,
        request: &TransitionRequest,
    ) -> Result<(), GovernanceError> {
        use ProposalState::*;

        match (staged.state, request.target) {
            (Initialized, PeerReview) => self.check_payload_lock(staged),

            (PeerReview, AuditQueue) => {
                let independent = staged.independent_approvals();
                if independent < self.config.approval_quorum {
                    return Err(GovernanceError::StructuralViolation(format!(
                        "{independent} independent approvals recorded, {} required",
                        self.config.approval_quorum
                    )));
                }
                // The audit reference is fixed once, on entering the queue.
                if staged.audit_ref.is_none() {
                    let audit_ref = self
                        .audit_service
                        .assign_audit_ref(staged.id)
                        .await
                        .map_err(|e| GovernanceError::CollaboratorUnavailable(e.to_string()))?;
                    staged.audit_ref = Some(audit_ref);
                }
                Ok(())
            }

            (AuditQueue, AuditActive) => {
                if staged.audit_ref.is_none() {
                    return Err(GovernanceError::StructuralViolation(
                        "no audit reference was assigned on queue entry".to_string(),
                    ));
                }
                Ok(())
            }

            (AuditActive, AuditPass) => {
                let report = self.verified_report(staged).await?;
                if !report.passed || report.open_critical_findings > 0 {
                    return Err(GovernanceError::PolicyViolation {
                        detail: format!(
                            "audit report not clean: passed={}, open critical findings={}",
                            report.passed, report.open_critical_findings
                        ),
                        post_audit: true,
                    });
                }
                Ok(())
            }

            (AuditActive, AuditRework) => {
                let report = self.verified_report(staged).await?;
                if report.open_critical_findings > 0 {
                    return Err(GovernanceError::PolicyViolation {
                        detail: format!(
                            "{} open critical findings are not remediable by rework",
                            report.open_critical_findings
                        ),
                        post_audit: true,
                    });
                }
                if report.passed || report.remediable_findings == 0 {
                    return Err(GovernanceError::StructuralViolation(
                        "audit reported no remediable findings".to_string(),
                    ));
                }
                Ok(())
            }

            // The single-rehash rule is enforced by record_rework_hash;
            // re-entry itself carries no extra evidence.
            (AuditRework, AuditActive) => Ok(()),

            (AuditPass, PreIngress) => {
                let TransitionEvidence::Constraints(snapshot) = &request.evidence else {
                    return Err(GovernanceError::StructuralViolation(
                        "pre-ingress requires a constraint snapshot".to_string(),
                    ));
                };
                let snapshot = self.weighted_snapshot(snapshot)?;

                let report = self.pipeline.run(staged).await?;
                let verified = report.overall_success;
                let first_failure = report
                    .first_failure()
                    .map(|s| format!("step {} failed: {}", s.step, s.reason));
                self.append_for(staged, RecordPayload::VerificationReport { report })?;
                if !verified {
                    return Err(GovernanceError::PolicyViolation {
                        detail: first_failure
                            .unwrap_or_else(|| "verification pipeline failed".to_string()),
                        post_audit: true,
                    });
                }

                let verdict = ratify_veto::evaluate(&snapshot);
                let vetoed = verdict.vetoed;
                let domain = verdict.domain;
                self.append_for(staged, RecordPayload::VetoVerdict { verdict })?;
                if vetoed {
                    return Err(GovernanceError::PolicyViolation {
                        detail: format!("vetoed in {domain:?} domain"),
                        post_audit: true,
                    });
                }
                Ok(())
            }

            (PreIngress, Executing) => {
                let &TransitionEvidence::BudgetRequest { compute_budget } = &request.evidence
                else {
                    return Err(GovernanceError::StructuralViolation(
                        "execution requires a compute budget request".to_string(),
                    ));
                };
                if compute_budget == 0 {
                    return Err(GovernanceError::PolicyViolation {
                        detail: "compute budget must be non-zero".to_string(),
                        post_audit: true,
                    });
                }
                if staged.attestation.is_none() {
                    return Err(GovernanceError::StructuralViolation(
                        "attestation missing at the execution gate".to_string(),
                    ));
                }
                if staged.independent_approvals() < self.config.approval_quorum {
                    return Err(GovernanceError::StructuralViolation(
                        "approval quorum no longer met at the execution gate".to_string(),
                    ));
                }

                let confirmed = self
                    .budget_authority
                    .confirm_budget(staged.id, compute_budget)
                    .await
                    .map_err(|e| GovernanceError::CollaboratorUnavailable(e.to_string()))?;
                if !confirmed {
                    return Err(GovernanceError::PolicyViolation {
                        detail: format!("budget authority declined {compute_budget} units"),
                        post_audit: true,
                    });
                }
                staged.compute_budget = Some(compute_budget);
                Ok(())
            }

            (Executing, Archived) => {
                let &TransitionEvidence::ExecutionResult { artifact_hash } = &request.evidence
                else {
                    return Err(GovernanceError::StructuralViolation(
                        "archival requires a result artifact hash".to_string(),
                    ));
                };
                if artifact_hash == Digest::ZERO {
                    return Err(GovernanceError::StructuralViolation(
                        "result artifact hash is unset".to_string(),
                    ));
                }
                Ok(())
            }

            (FailedStructural, Archived) | (FailedCritical, Archived) => Ok(()),

            // Unreachable: legality was checked before evaluation.
            (from, to) => Err(GovernanceError::StructuralViolation(format!(
                "no transition from {from} to {to}"
            ))),
        }
    }

    /// Rebuild the caller's snapshot with soft-constraint weights taken from
    /// the configured threshold table. Requests carry values and the dynamic
    /// limit; weights are never accepted from the caller.
    fn weighted_snapshot(
        &self,
        snapshot: &ConstraintSnapshot,
    ) -> Result<ConstraintSnapshot, GovernanceError> {
        let mut resolved = snapshot.clone();
        for (name, constraint) in resolved.soft_constraints.iter_mut() {
            constraint.weight = self.thresholds.soft_weight(name).ok_or_else(|| {
                GovernanceError::StructuralViolation(format!(
                    "no configured weight for soft constraint {name}"
                ))
            })?;
        }
        Ok(resolved)
    }

    fn check_payload_lock(&self, staged: &Proposal) -> Result<(), GovernanceError> {
        if staged.payload_hash == Digest::ZERO {
            return Err(GovernanceError::StructuralViolation(
                "payload hash is unset".to_string(),
            ));
        }
        if staged.policy_ref.is_empty() {
            return Err(GovernanceError::StructuralViolation(
                "policy reference is empty".to_string(),
            ));
        }
        if !staged.risk.value.is_finite() || !staged.risk.tolerance.is_finite() {
            return Err(GovernanceError::StructuralViolation(
                "risk declaration is not finite".to_string(),
            ));
        }
        if staged.risk.unit.is_empty() {
            return Err(GovernanceError::StructuralViolation(
                "risk unit is empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Fetch the audit report and verify its signature.
    async fn verified_report(&self, staged: &Proposal) -> Result<AuditReport, GovernanceError> {
        let audit_ref = staged.audit_ref.as_deref().ok_or_else(|| {
            GovernanceError::StructuralViolation("no audit reference assigned".to_string())
        })?;

        let report = self
            .audit_service
            .fetch_report(audit_ref)
            .await
            .map_err(|e| GovernanceError::CollaboratorUnavailable(e.to_string()))?;

        let verified = self
            .signer
            .verify(&report.signing_bytes(), &report.signature, &report.key_id)
            .await
            .map_err(|e| match e {
                CapabilityError::UnknownKey(key) => GovernanceError::IntegrityFailure(format!(
                    "audit report signed under unknown key {key}"
                )),
                CapabilityError::MalformedSignature(detail) => {
                    GovernanceError::IntegrityFailure(format!(
                        "audit report signature malformed: {detail}"
                    ))
                }
                other => GovernanceError::CollaboratorUnavailable(other.to_string()),
            })?;
        if !verified {
            return Err(GovernanceError::IntegrityFailure(
                "audit report signature did not verify".to_string(),
            ));
        }
        Ok(report)
    }
}
