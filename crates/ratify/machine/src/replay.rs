//! State reconstruction from the audit trail.

use ratify_chain::{AuditRecord, RecordPayload};
use ratify_types::{GovernanceError, ProposalState};

/// Fold a proposal's audit trail back into its lifecycle state.
///
/// Only transition and routing records move the state; evidence records
/// (verification reports, veto verdicts, payload rehashes, timed-out
/// attempts) are passed over. Each record's claimed source state must match
/// the replayed state or the trail is internally inconsistent.
pub fn replay_state(records: &[AuditRecord]) -> Result<ProposalState, GovernanceError> {
    let mut state = ProposalState::Initialized;

    for record in records {
        match &record.payload {
            RecordPayload::Transition { from, to, .. } => {
                if *from != state {
                    return Err(GovernanceError::IntegrityFailure(format!(
                        "record {} claims source {from}, replay is at {state}",
                        record.sequence
                    )));
                }
                state = *to;
            }
            RecordPayload::TransitionFailed {
                from, routed_to, ..
            } => {
                if *from != state {
                    return Err(GovernanceError::IntegrityFailure(format!(
                        "record {} claims source {from}, replay is at {state}",
                        record.sequence
                    )));
                }
                state = *routed_to;
            }
            _ => {}
        }
    }

    Ok(state)
}
