#![deny(unsafe_code)]
//! Proposal lifecycle state machine.
//!
//! Proposals move along a single forward path with one audited rework loop:
//! `Initialized → PeerReview → AuditQueue → AuditActive ⇄ AuditRework →
//! AuditPass → PreIngress → Executing → Archived`. Each edge is admitted by a
//! named guard; a rejected attempt routes the proposal to `FailedStructural`
//! or `FailedCritical` depending on stage and error kind, and every committed
//! outcome is chained into the audit ledger before it becomes observable.
//!
//! The machine owns proposal state exclusively: callers express intent
//! through [`TransitionRequest`] and read back [`TransitionResult`].

pub mod machine;
pub mod replay;
pub mod request;
mod transitions;

pub use machine::{MachineConfig, ProposalStateMachine};
pub use replay::replay_state;
pub use request::{TransitionEvidence, TransitionRequest, TransitionResult};
