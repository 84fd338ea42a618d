//! View- and sequence-numbered consensus engine.
//!
//! A `DashMap` of in-flight proposals, a periodic background task, and an
//! explicit admit/propose/vote surface. The admission gate checks
//! `modelmesh-reputation::ReputationEngine::is_agent_trusted` on every
//! message, and quorum is 2f+1 over the live non-quarantined participant
//! set rather than a fixed majority of a static peer list.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use modelmesh_reputation::ReputationEngine;

use crate::types::{
    digest_payload, AgentId, CommittedEntry, ConsensusConfig, ConsensusEvent, ConsensusMessage,
    Proposal, ProposalId, ProposalOutcome, ProposalState, ViewChangeMessage, Vote, VotePhase,
};
use crate::vector_clock::VectorClock;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("sender `{0}` is not trusted")]
    Untrusted(AgentId),
    #[error("unknown proposal {0}")]
    UnknownProposal(ProposalId),
    #[error("proposal {0} is not awaiting {1:?} votes (state is {2:?})")]
    WrongPhase(ProposalId, VotePhase, ProposalState),
    #[error("vote payload digest does not match proposal {0}")]
    DigestMismatch(ProposalId),
    #[error("quorum failed for proposal {0}")]
    QuorumFailed(ProposalId),
    #[error("liveness lost: {0}")]
    LivenessLost(String),
}

struct ProposalRecord {
    proposal: Proposal,
    state: ProposalState,
    prepare_votes: HashSet<AgentId>,
    commit_votes: HashSet<AgentId>,
    created_at: std::time::Instant,
}

/// Standard BFT quorum: `2f+1` out of `n`, `f = (n-1)/3`.
fn quorum_for(n: usize) -> usize {
    let f = n.saturating_sub(1) / 3;
    2 * f + 1
}

pub struct ConsensusEngine {
    config: ConsensusConfig,
    reputation: Arc<ReputationEngine>,
    participants: DashMap<AgentId, ()>,
    current_view: AtomicU64,
    next_sequence: AtomicU64,
    proposals: DashMap<ProposalId, ProposalRecord>,
    view_change_votes: DashMap<u64, HashSet<AgentId>>,
    committed_log: Mutex<Vec<CommittedEntry>>,
    vector_clock: Mutex<VectorClock<AgentId>>,
    events: broadcast::Sender<ConsensusEvent>,
}

impl ConsensusEngine {
    pub fn new(config: ConsensusConfig, reputation: Arc<ReputationEngine>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            reputation,
            participants: DashMap::new(),
            current_view: AtomicU64::new(0),
            next_sequence: AtomicU64::new(0),
            proposals: DashMap::new(),
            view_change_votes: DashMap::new(),
            committed_log: Mutex::new(Vec::new()),
            vector_clock: Mutex::new(VectorClock::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConsensusEvent> {
        self.events.subscribe()
    }

    pub fn current_view(&self) -> u64 {
        self.current_view.load(Ordering::SeqCst)
    }

    /// Register a node as part of the cluster the quorum is computed over.
    /// Does not itself grant trust — that is `modelmesh-reputation`'s job.
    pub fn register_participant(&self, agent_id: impl Into<AgentId>) {
        self.participants.insert(agent_id.into(), ());
    }

    /// Spawn the periodic stall/liveness sweep as a background task.
    pub fn start(self: &Arc<Self>) {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(5));
            loop {
                ticker.tick().await;
                engine.sweep_stalled_proposals();
            }
        });
    }

    fn active_participant_count(&self) -> usize {
        self.participants
            .iter()
            .filter(|e| self.reputation.is_agent_trusted(e.key()))
            .count()
    }

    fn emit(&self, event: ConsensusEvent) {
        let _ = self.events.send(event);
    }

    fn admit_sender(&self, sender: &str) -> Result<(), ConsensusError> {
        if self.reputation.is_agent_trusted(sender) {
            Ok(())
        } else {
            warn!(sender, "consensus message from untrusted agent dropped");
            self.emit(ConsensusEvent::MessageRejected {
                sender: sender.to_string(),
                reason: "sender not trusted".to_string(),
            });
            Err(ConsensusError::Untrusted(sender.to_string()))
        }
    }

    /// Admit any inbound message, dispatching to the relevant handler.
    /// Returns `Ok(None)` for messages that don't advance a proposal.
    pub fn admit(&self, message: ConsensusMessage) -> Result<Option<ProposalOutcome>, ConsensusError> {
        self.admit_sender(message.sender())?;
        match message {
            ConsensusMessage::Propose(proposal) => {
                self.admit_proposal(proposal)?;
                Ok(None)
            }
            ConsensusMessage::Vote(vote) => self.admit_vote(vote).map(Some),
            ConsensusMessage::ViewChange(vc) => {
                self.admit_view_change(vc)?;
                Ok(None)
            }
        }
    }

    /// Create and admit a new proposal as its own proposer.
    pub fn propose(&self, proposer: impl Into<AgentId>, payload: serde_json::Value) -> Result<Proposal, ConsensusError> {
        let proposer = proposer.into();
        self.admit_sender(&proposer)?;
        let proposal = Proposal {
            id: Uuid::new_v4(),
            view: self.current_view(),
            sequence: self.next_sequence.fetch_add(1, Ordering::SeqCst),
            proposer,
            payload_digest: digest_payload(&payload),
            payload,
            timestamp: Utc::now(),
        };
        self.admit_proposal(proposal.clone())?;
        Ok(proposal)
    }

    fn admit_proposal(&self, proposal: Proposal) -> Result<(), ConsensusError> {
        if self.proposals.contains_key(&proposal.id) {
            return Ok(());
        }
        info!(proposal_id = %proposal.id, view = proposal.view, sequence = proposal.sequence, "proposal admitted");
        self.proposals.insert(
            proposal.id,
            ProposalRecord {
                proposal,
                state: ProposalState::Proposed,
                prepare_votes: HashSet::new(),
                commit_votes: HashSet::new(),
                created_at: std::time::Instant::now(),
            },
        );
        Ok(())
    }

    pub fn admit_vote(&self, vote: Vote) -> Result<ProposalOutcome, ConsensusError> {
        self.admit_sender(&vote.voter)?;
        let mut record = self
            .proposals
            .get_mut(&vote.proposal_id)
            .ok_or(ConsensusError::UnknownProposal(vote.proposal_id))?;

        if vote.payload_digest != record.proposal.payload_digest {
            return Err(ConsensusError::DigestMismatch(vote.proposal_id));
        }

        let n = self.active_participant_count();
        let quorum = quorum_for(n);

        match vote.phase {
            VotePhase::Prepare => {
                if !matches!(record.state, ProposalState::Proposed | ProposalState::Preparing) {
                    return Err(ConsensusError::WrongPhase(vote.proposal_id, vote.phase, record.state));
                }
                record.state = ProposalState::Preparing;
                record.prepare_votes.insert(vote.voter);
                if record.prepare_votes.len() >= quorum {
                    record.state = ProposalState::Committing;
                    Ok(ProposalOutcome::Prepared)
                } else {
                    Ok(ProposalOutcome::Pending)
                }
            }
            VotePhase::Commit => {
                if !matches!(record.state, ProposalState::Prepared | ProposalState::Committing) {
                    return Err(ConsensusError::WrongPhase(vote.proposal_id, vote.phase, record.state));
                }
                record.commit_votes.insert(vote.voter);
                if record.commit_votes.len() >= quorum {
                    record.state = ProposalState::Committed;
                    let proposal_id = record.proposal.id;
                    let view = record.proposal.view;
                    let sequence = record.proposal.sequence;
                    let entry = CommittedEntry {
                        proposal: record.proposal.clone(),
                        view,
                        sequence,
                        prepare_votes: record.prepare_votes.clone(),
                        commit_votes: record.commit_votes.clone(),
                        committed_at: Utc::now(),
                    };
                    drop(record);
                    self.vector_clock.lock().increment(entry.proposal.proposer.clone());
                    self.committed_log.lock().push(entry);
                    self.proposals.remove(&proposal_id);
                    self.emit(ConsensusEvent::ProposalCommitted { proposal_id, view, sequence });
                    Ok(ProposalOutcome::Committed)
                } else {
                    Ok(ProposalOutcome::Pending)
                }
            }
        }
    }

    /// Abort a proposal outright (e.g. the orchestrator gave up waiting).
    pub fn abort(&self, proposal_id: ProposalId, reason: impl Into<String>) -> Result<(), ConsensusError> {
        let reason = reason.into();
        let mut record = self
            .proposals
            .get_mut(&proposal_id)
            .ok_or(ConsensusError::UnknownProposal(proposal_id))?;
        record.state = ProposalState::Aborted;
        drop(record);
        self.proposals.remove(&proposal_id);
        warn!(%proposal_id, reason, "proposal aborted");
        self.emit(ConsensusEvent::ProposalAborted { proposal_id, reason });
        Ok(())
    }

    pub fn admit_view_change(&self, vc: ViewChangeMessage) -> Result<Option<u64>, ConsensusError> {
        self.admit_sender(&vc.peer_id)?;
        if vc.new_view <= self.current_view() {
            return Ok(None);
        }
        let mut voters = self.view_change_votes.entry(vc.new_view).or_default();
        voters.insert(vc.peer_id);
        let n = self.active_participant_count();
        if voters.len() >= quorum_for(n) {
            drop(voters);
            self.current_view.store(vc.new_view, Ordering::SeqCst);
            self.view_change_votes.remove(&vc.new_view);
            info!(new_view = vc.new_view, "view change completed");
            self.emit(ConsensusEvent::ViewChanged { new_view: vc.new_view });
            Ok(Some(vc.new_view))
        } else {
            Ok(None)
        }
    }

    pub fn committed_log(&self) -> Vec<ProposalId> {
        self.committed_log.lock().iter().map(|e| e.proposal.id).collect()
    }

    pub fn proposal_state(&self, proposal_id: ProposalId) -> Option<ProposalState> {
        self.proposals.get(&proposal_id).map(|r| r.state)
    }

    /// Abort proposals that have sat unresolved past `proposal_timeout`,
    /// emitting `QuorumFailed`/`LivenessLost` and a security event. No
    /// liveness is lost as long as quarantined-plus-faulty participants
    /// stay at or below `f`.
    fn sweep_stalled_proposals(&self) {
        let stalled: Vec<ProposalId> = self
            .proposals
            .iter()
            .filter(|e| e.created_at.elapsed() > self.config.proposal_timeout)
            .map(|e| e.proposal.id)
            .collect();

        for proposal_id in stalled {
            self.emit(ConsensusEvent::QuorumFailed { proposal_id });
            let n = self.active_participant_count();
            let f = n.saturating_sub(1) / 3;
            if n.saturating_sub(f) < quorum_for(n).saturating_sub(f) {
                self.emit(ConsensusEvent::LivenessLost {
                    reason: format!("only {n} trusted participants remain, below quorum threshold"),
                });
            }
            let _ = self.abort(proposal_id, "proposal timed out awaiting quorum");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelmesh_reputation::{AgentIdentity, ReputationConfig};

    fn agent(id: &str) -> AgentIdentity {
        AgentIdentity {
            id: id.to_string(),
            public_key: "pk".to_string(),
            leader: false,
            last_active: Utc::now(),
        }
    }

    fn engine_with_agents(ids: &[&str]) -> (Arc<ConsensusEngine>, Arc<ReputationEngine>) {
        let reputation = Arc::new(ReputationEngine::new(ReputationConfig::default()));
        for id in ids {
            reputation.register_agent(&agent(id));
        }
        let engine = Arc::new(ConsensusEngine::new(ConsensusConfig::default(), reputation.clone()));
        for id in ids {
            engine.register_participant(*id);
        }
        (engine, reputation)
    }

    fn vote(proposal: &Proposal, voter: &str, phase: VotePhase) -> Vote {
        Vote {
            proposal_id: proposal.id,
            view: proposal.view,
            sequence: proposal.sequence,
            phase,
            voter: voter.to_string(),
            payload_digest: proposal.payload_digest.clone(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn quorum_is_2f_plus_1() {
        assert_eq!(quorum_for(4), 3);
        assert_eq!(quorum_for(7), 5);
        assert_eq!(quorum_for(1), 1);
    }

    #[test]
    fn full_prepare_commit_cycle_reaches_committed() {
        let (engine, _rep) = engine_with_agents(&["a", "b", "c", "d"]);
        let proposal = engine.propose("a", serde_json::json!({"action": "scale_fleet"})).unwrap();

        for voter in ["a", "b", "c"] {
            let outcome = engine.admit_vote(vote(&proposal, voter, VotePhase::Prepare)).unwrap();
            if voter == "c" {
                assert_eq!(outcome, ProposalOutcome::Prepared);
            }
        }

        let mut committed = None;
        for voter in ["a", "b", "c"] {
            committed = Some(engine.admit_vote(vote(&proposal, voter, VotePhase::Commit)).unwrap());
        }
        assert_eq!(committed, Some(ProposalOutcome::Committed));
        assert_eq!(engine.proposal_state(proposal.id), None);
        assert_eq!(engine.committed_log(), vec![proposal.id]);
    }

    #[test]
    fn quarantined_sender_is_never_admitted() {
        let (engine, reputation) = engine_with_agents(&["a", "bad-actor"]);
        // Five rounds of double-voting on the same proposal id drives
        // bad-actor's score below the 0.3 quarantine threshold (matches
        // modelmesh-reputation's own `quarantine_gates_trust` test).
        for _ in 0..5 {
            let votes = vec![
                modelmesh_reputation::ObservedVote {
                    proposal_id: "p".to_string(),
                    sender: "bad-actor".to_string(),
                    decision: "commit".to_string(),
                    weight: 1.0,
                    timestamp: Utc::now(),
                },
                modelmesh_reputation::ObservedVote {
                    proposal_id: "p".to_string(),
                    sender: "bad-actor".to_string(),
                    decision: "abort".to_string(),
                    weight: 1.0,
                    timestamp: Utc::now(),
                },
            ];
            let _ = reputation.analyze_behavior("bad-actor", &[], &votes);
        }
        assert!(!reputation.is_agent_trusted("bad-actor"));

        let proposal = engine.propose("a", serde_json::json!({"action": "noop"})).unwrap();
        let result = engine.admit_vote(vote(&proposal, "bad-actor", VotePhase::Prepare));
        assert!(matches!(result, Err(ConsensusError::Untrusted(_))));
    }

    #[test]
    fn view_change_requires_quorum_of_distinct_agents() {
        let (engine, _rep) = engine_with_agents(&["a", "b", "c", "d"]);
        let msg = |peer: &str| ViewChangeMessage {
            new_view: 1,
            peer_id: peer.to_string(),
            last_committed: 0,
            timestamp: Utc::now(),
        };
        assert_eq!(engine.admit_view_change(msg("a")).unwrap(), None);
        assert_eq!(engine.admit_view_change(msg("b")).unwrap(), None);
        assert_eq!(engine.admit_view_change(msg("c")).unwrap(), Some(1));
        assert_eq!(engine.current_view(), 1);
    }

    #[test]
    fn digest_mismatch_is_rejected() {
        let (engine, _rep) = engine_with_agents(&["a", "b", "c", "d"]);
        let proposal = engine.propose("a", serde_json::json!({"action": "x"})).unwrap();
        let mut bad_vote = vote(&proposal, "b", VotePhase::Prepare);
        bad_vote.payload_digest = "not-the-real-digest".to_string();
        assert!(matches!(
            engine.admit_vote(bad_vote),
            Err(ConsensusError::DigestMismatch(_))
        ));
    }
}
