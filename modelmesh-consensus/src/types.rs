//! Core types for the view- and sequence-numbered consensus core.
//!
//! A `Proposal` carries an opaque payload (whatever the orchestrator needs
//! agreement on: a fleet's chosen action, a disputed routing decision, a
//! batch result) through three phases — preparing, committing, committed —
//! gated at every step by the sender's trust status in `modelmesh-reputation`.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Agent/node identifier, shared with `modelmesh-reputation::AgentIdentity::id`.
pub type AgentId = String;

pub type ProposalId = Uuid;

/// Tunable parameters for the consensus core.
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Maximum fraction of participants assumed Byzantine; used only for
    /// documentation/metrics today since quorum is derived directly from
    /// the live non-quarantined participant count.
    pub fault_tolerance: f64,
    /// How long a proposal may sit unresolved before it is aborted with
    /// `LivenessLost`.
    pub proposal_timeout: std::time::Duration,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            fault_tolerance: 0.33,
            proposal_timeout: std::time::Duration::from_secs(30),
        }
    }
}

/// Where a proposal sits in the three-phase commit state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalState {
    Proposed,
    Preparing,
    Prepared,
    Committing,
    Committed,
    Aborted,
}

/// An operation proposed for agreement. The payload is opaque to this
/// crate; the orchestrator decides what it means.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub view: u64,
    pub sequence: u64,
    pub proposer: AgentId,
    pub payload: serde_json::Value,
    pub payload_digest: String,
    pub timestamp: DateTime<Utc>,
}

/// Which round of voting a `Vote` belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VotePhase {
    Prepare,
    Commit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub proposal_id: ProposalId,
    pub view: u64,
    pub sequence: u64,
    pub phase: VotePhase,
    pub voter: AgentId,
    pub payload_digest: String,
    pub timestamp: DateTime<Utc>,
}

/// A request to move to a new view, e.g. after a stalled or faulty leader.
/// `last_committed` is load-bearing: the reputation rule engine's
/// `view-change-abuse` detector flags any view-change message missing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewChangeMessage {
    pub new_view: u64,
    pub peer_id: AgentId,
    pub last_committed: u64,
    pub timestamp: DateTime<Utc>,
}

/// Messages the core admits. Quarantine gating is enforced uniformly over
/// the sender extracted from any variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConsensusMessage {
    Propose(Proposal),
    Vote(Vote),
    ViewChange(ViewChangeMessage),
}

impl ConsensusMessage {
    pub fn sender(&self) -> &str {
        match self {
            ConsensusMessage::Propose(p) => &p.proposer,
            ConsensusMessage::Vote(v) => &v.voter,
            ConsensusMessage::ViewChange(vc) => &vc.peer_id,
        }
    }
}

/// A proposal that reached the `Committed` state, with the votes that
/// carried it there.
#[derive(Debug, Clone)]
pub struct CommittedEntry {
    pub proposal: Proposal,
    pub view: u64,
    pub sequence: u64,
    pub prepare_votes: HashSet<AgentId>,
    pub commit_votes: HashSet<AgentId>,
    pub committed_at: DateTime<Utc>,
}

/// Result of admitting a vote: whether the proposal advanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalOutcome {
    Pending,
    Prepared,
    Committed,
}

/// Events the core publishes for external subscribers.
#[derive(Debug, Clone)]
pub enum ConsensusEvent {
    MessageRejected { sender: AgentId, reason: String },
    ProposalCommitted { proposal_id: ProposalId, view: u64, sequence: u64 },
    ProposalAborted { proposal_id: ProposalId, reason: String },
    ViewChanged { new_view: u64 },
    QuorumFailed { proposal_id: ProposalId },
    LivenessLost { reason: String },
}

/// `blake3(payload_json)`, hex-encoded — used both to populate
/// `payload_digest` and to verify a vote references the proposal it claims.
pub fn digest_payload(payload: &serde_json::Value) -> String {
    let bytes = serde_json::to_vec(payload).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}
