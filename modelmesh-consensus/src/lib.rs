//! View- and sequence-numbered Byzantine quorum consensus core.
//!
//! Admits `Propose`/`Vote`/`ViewChange` messages only from agents
//! [`modelmesh_reputation::ReputationEngine`] currently trusts, drives each
//! proposal through `Proposed -> Preparing -> Committing -> Committed`
//! (or `Aborted`) on 2f+1 quorums over the live non-quarantined
//! participant set, and keeps a [`vector_clock::VectorClock`] over
//! proposers for causal ordering of the committed log.

pub mod engine;
pub mod types;
pub mod vector_clock;

pub use engine::{ConsensusEngine, ConsensusError};
pub use types::{
    digest_payload, AgentId, CommittedEntry, ConsensusConfig, ConsensusEvent, ConsensusMessage,
    Proposal, ProposalId, ProposalOutcome, ProposalState, ViewChangeMessage, Vote, VotePhase,
};
pub use vector_clock::{VectorClock, VectorClockOrdering};
