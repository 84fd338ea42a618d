//! Per-agent behavior history, malicious-behavior rule engine, and
//! quarantine/trust scoring.
//!
//! A fixed set of detectors run over a rolling time window,
//! each producing a severity- and confidence-weighted penalty that is
//! subtracted from the agent's score. The consensus core holds a read-only
//! handle into the records this crate owns; it never writes to them.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// The ten recognized attack patterns. Only six (`DoubleVoting` through
/// `ViewChangeAbuse` minus `FakeSignatures`) have a concrete detector below;
/// the rest are recognized variants a caller may record directly via
/// evidence from an external signature/network layer this crate doesn't
/// itself have visibility into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaliciousBehaviorType {
    DoubleVoting,
    ConflictingMessages,
    TimingManipulation,
    FakeSignatures,
    SpamFlooding,
    Collusion,
    ViewChangeAbuse,
    ConsensusDisruption,
    SybilAttack,
    EclipseAttack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    fn multiplier(self) -> f64 {
        match self {
            Severity::Low => 0.5,
            Severity::Medium => 1.0,
            Severity::High => 1.5,
            Severity::Critical => 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TrustLevel {
    Untrusted,
    Low,
    Medium,
    High,
    Verified,
}

impl TrustLevel {
    fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            TrustLevel::Verified
        } else if score >= 0.7 {
            TrustLevel::High
        } else if score >= 0.5 {
            TrustLevel::Medium
        } else if score >= 0.3 {
            TrustLevel::Low
        } else {
            TrustLevel::Untrusted
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaliciousBehaviorRecord {
    pub behavior_type: MaliciousBehaviorType,
    pub severity: Severity,
    pub confidence: f64,
    pub evidence: Value,
    pub timestamp: DateTime<Utc>,
}

/// A message observed by the caller (consensus core), reduced to the fields
/// the rule engine needs. Consensus constructs these from its own wire
/// `ConsensusMessage` type; this crate has no dependency on consensus.
#[derive(Debug, Clone)]
pub struct ObservedMessage {
    pub msg_type: String,
    pub view: u64,
    pub sequence: u64,
    pub payload_digest: String,
    pub sender: String,
    pub timestamp: DateTime<Utc>,
    pub has_last_committed: bool,
}

/// A vote observed by the caller, reduced the same way.
#[derive(Debug, Clone)]
pub struct ObservedVote {
    pub proposal_id: String,
    pub sender: String,
    pub decision: String,
    pub weight: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AgentIdentity {
    pub id: String,
    pub public_key: String,
    pub leader: bool,
    pub last_active: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationSample {
    pub timestamp: DateTime<Utc>,
    pub score: f64,
}

#[derive(Debug)]
struct ReputationState {
    score: f64,
    samples: Vec<ReputationSample>,
    behavior_flags: HashSet<MaliciousBehaviorType>,
    trust_level: TrustLevel,
    interaction_history: HashMap<String, u64>,
}

/// Shared, (mostly) read-only reputation record. Consensus holds `Arc`
/// clones of these; only this crate ever takes the write lock.
#[derive(Debug)]
pub struct ReputationRecord {
    pub agent_id: String,
    state: RwLock<ReputationState>,
}

impl ReputationRecord {
    fn new(agent_id: String) -> Self {
        Self {
            agent_id,
            state: RwLock::new(ReputationState {
                score: 1.0,
                samples: vec![ReputationSample {
                    timestamp: Utc::now(),
                    score: 1.0,
                }],
                behavior_flags: HashSet::new(),
                trust_level: TrustLevel::Verified,
                interaction_history: HashMap::new(),
            }),
        }
    }

    pub fn score(&self) -> f64 {
        self.state.read().score
    }

    pub fn trust_level(&self) -> TrustLevel {
        self.state.read().trust_level.clone()
    }

    pub fn behavior_flags(&self) -> HashSet<MaliciousBehaviorType> {
        self.state.read().behavior_flags.clone()
    }

    pub fn samples(&self) -> Vec<ReputationSample> {
        self.state.read().samples.clone()
    }

    fn record_interaction(&self, kind: &str) {
        *self
            .state
            .write()
            .interaction_history
            .entry(kind.to_string())
            .or_insert(0) += 1;
    }

    /// Subtract `penalty` from the score, floored at zero, append a sample,
    /// flag the behavior type, and re-derive the trust level. Never
    /// increases the score; only `rehabilitate` does.
    fn apply_penalty(&self, behavior_type: MaliciousBehaviorType, penalty: f64) -> f64 {
        let mut state = self.state.write();
        state.score = (state.score - penalty).max(0.0);
        state.behavior_flags.insert(behavior_type);
        state.trust_level = TrustLevel::from_score(state.score);
        state.samples.push(ReputationSample {
            timestamp: Utc::now(),
            score: state.score,
        });
        state.score
    }

    fn rehabilitate(&self) -> f64 {
        let mut state = self.state.write();
        state.score = (state.score + 0.2).min(1.0);
        state.trust_level = TrustLevel::from_score(state.score);
        state.samples.push(ReputationSample {
            timestamp: Utc::now(),
            score: state.score,
        });
        state.score
    }
}

#[derive(Debug, Error)]
pub enum ReputationError {
    #[error("agent not registered: {0}")]
    UnknownAgent(String),
}

#[derive(Debug, Clone)]
pub struct ReputationConfig {
    pub quarantine_threshold: f64,
    pub time_window: Duration,
    pub max_messages_per_window: usize,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            quarantine_threshold: 0.3,
            time_window: Duration::from_secs(300),
            max_messages_per_window: 100,
        }
    }
}

const SUSPICIOUS_THRESHOLD: f64 = 0.6;

fn behavior_tier(t: MaliciousBehaviorType) -> Severity {
    use MaliciousBehaviorType::*;
    match t {
        FakeSignatures | ConsensusDisruption | SybilAttack | EclipseAttack => Severity::Critical,
        DoubleVoting | ConflictingMessages | ViewChangeAbuse => Severity::High,
        TimingManipulation | SpamFlooding | Collusion => Severity::Medium,
    }
}

/// Map (behavior type, confidence) to a severity band: critical types need
/// confidence > 0.8, high types > 0.7, medium types > 0.6 to be classified
/// at their tier; otherwise the finding is downgraded to `Low`.
fn classify_severity(behavior_type: MaliciousBehaviorType, confidence: f64) -> Severity {
    match behavior_tier(behavior_type) {
        Severity::Critical if confidence > 0.8 => Severity::Critical,
        Severity::High if confidence > 0.7 => Severity::High,
        Severity::Medium if confidence > 0.6 => Severity::Medium,
        _ => Severity::Low,
    }
}

fn base_penalty(t: MaliciousBehaviorType) -> f64 {
    use MaliciousBehaviorType::*;
    match t {
        DoubleVoting => 0.3,
        ConflictingMessages => 0.25,
        TimingManipulation => 0.15,
        FakeSignatures => 0.35,
        SpamFlooding => 0.2,
        Collusion => 0.2,
        ViewChangeAbuse => 0.25,
        ConsensusDisruption => 0.3,
        SybilAttack => 0.3,
        EclipseAttack => 0.3,
    }
}

/// Result of one [`ReputationEngine::analyze_behavior`] pass: every finding
/// in detection order, plus whether this pass is what pushed the agent
/// across the quarantine threshold (as opposed to it already being
/// quarantined, or not crossing it at all).
#[derive(Debug, Clone)]
pub struct BehaviorAnalysis {
    pub findings: Vec<MaliciousBehaviorRecord>,
    pub newly_quarantined: bool,
}

/// Per-agent history, rule engine, and quarantine/trust scoring.
pub struct ReputationEngine {
    config: ReputationConfig,
    agents: DashMap<String, std::sync::Arc<ReputationRecord>>,
    quarantined: DashMap<String, ()>,
    suspicious: DashMap<String, ()>,
}

impl ReputationEngine {
    pub fn new(config: ReputationConfig) -> Self {
        Self {
            config,
            agents: DashMap::new(),
            quarantined: DashMap::new(),
            suspicious: DashMap::new(),
        }
    }

    pub fn register_agent(&self, agent: &AgentIdentity) -> std::sync::Arc<ReputationRecord> {
        self.agents
            .entry(agent.id.clone())
            .or_insert_with(|| std::sync::Arc::new(ReputationRecord::new(agent.id.clone())))
            .clone()
    }

    pub fn reputation(&self, agent_id: &str) -> Option<std::sync::Arc<ReputationRecord>> {
        self.agents.get(agent_id).map(|e| e.clone())
    }

    /// `true` iff the agent is registered, not quarantined, and its score
    /// is at or above the quarantine threshold. Unknown agents are never
    /// trusted.
    pub fn is_agent_trusted(&self, agent_id: &str) -> bool {
        match self.agents.get(agent_id) {
            Some(record) => {
                !self.quarantined.contains_key(agent_id)
                    && record.score() >= self.config.quarantine_threshold
            }
            None => false,
        }
    }

    pub fn quarantined_agents(&self) -> Vec<String> {
        self.quarantined.iter().map(|e| e.key().clone()).collect()
    }

    pub fn suspicious_agents(&self) -> Vec<String> {
        self.suspicious.iter().map(|e| e.key().clone()).collect()
    }

    /// Run the rule engine over `messages`/`votes` sent by `agent_id` within
    /// the rolling time window, penalize the agent's reputation for each
    /// finding, and return the findings in detection order. Within one call
    /// the score only ever moves down; `rehabilitate` is the only way back
    /// up.
    pub fn analyze_behavior(
        &self,
        agent_id: &str,
        messages: &[ObservedMessage],
        votes: &[ObservedVote],
    ) -> Result<BehaviorAnalysis, ReputationError> {
        let record = self
            .agents
            .get(agent_id)
            .map(|e| e.clone())
            .ok_or_else(|| ReputationError::UnknownAgent(agent_id.to_string()))?;

        let now = Utc::now();
        let window = chrono::Duration::from_std(self.config.time_window).unwrap();
        let cutoff = now - window;

        let windowed_messages: Vec<&ObservedMessage> =
            messages.iter().filter(|m| m.timestamp >= cutoff).collect();
        let windowed_votes: Vec<&ObservedVote> =
            votes.iter().filter(|v| v.timestamp >= cutoff).collect();

        record.record_interaction("messages_observed");

        let mut findings = Vec::new();
        findings.extend(detect_double_voting(&windowed_votes));
        findings.extend(detect_conflicting_messages(&windowed_messages));
        findings.extend(detect_timing_manipulation(&windowed_messages));
        findings.extend(detect_spam_flooding(
            &windowed_messages,
            self.config.max_messages_per_window,
        ));
        findings.extend(detect_collusion(&windowed_votes));
        findings.extend(detect_view_change_abuse(&windowed_messages));

        let mut newly_quarantined = false;
        for finding in &findings {
            let penalty =
                base_penalty(finding.behavior_type) * finding.confidence * finding.severity.multiplier();
            let new_score = record.apply_penalty(finding.behavior_type, penalty);
            debug!(
                agent_id,
                behavior = ?finding.behavior_type,
                severity = ?finding.severity,
                new_score,
                "malicious behavior detected, reputation penalized"
            );
            if self.requarantine(agent_id, new_score) {
                newly_quarantined = true;
            }
        }

        if findings.is_empty() {
            debug!(agent_id, "no malicious behavior detected in window");
        }

        Ok(BehaviorAnalysis {
            findings,
            newly_quarantined,
        })
    }

    /// Returns `true` iff this call is what crossed the agent into
    /// quarantine (i.e. it was not already quarantined).
    fn requarantine(&self, agent_id: &str, score: f64) -> bool {
        let mut transitioned = false;
        if score < self.config.quarantine_threshold {
            if self.quarantined.insert(agent_id.to_string(), ()).is_none() {
                warn!(agent_id, score, "agent quarantined");
                transitioned = true;
            }
        }
        if score < SUSPICIOUS_THRESHOLD {
            self.suspicious.insert(agent_id.to_string(), ());
        }
        transitioned
    }

    /// Manually restore trust: +0.2 reputation (capped at 1.0), and drop the
    /// agent from the quarantine/suspicious sets if its score now clears
    /// each threshold.
    pub fn rehabilitate(&self, agent_id: &str, reason: &str) -> Result<(), ReputationError> {
        let record = self
            .agents
            .get(agent_id)
            .map(|e| e.clone())
            .ok_or_else(|| ReputationError::UnknownAgent(agent_id.to_string()))?;

        let new_score = record.rehabilitate();
        if new_score >= self.config.quarantine_threshold {
            self.quarantined.remove(agent_id);
        }
        if new_score >= SUSPICIOUS_THRESHOLD {
            self.suspicious.remove(agent_id);
        }
        tracing::info!(agent_id, reason, new_score, "agent rehabilitated");
        Ok(())
    }
}

fn detect_double_voting(votes: &[&ObservedVote]) -> Option<MaliciousBehaviorRecord> {
    let mut by_proposal: HashMap<&str, Vec<&ObservedVote>> = HashMap::new();
    for v in votes {
        by_proposal.entry(v.proposal_id.as_str()).or_default().push(v);
    }
    let (proposal, dup) = by_proposal.into_iter().find(|(_, v)| v.len() > 1)?;
    let confidence = 0.95;
    Some(MaliciousBehaviorRecord {
        behavior_type: MaliciousBehaviorType::DoubleVoting,
        severity: classify_severity(MaliciousBehaviorType::DoubleVoting, confidence),
        confidence,
        evidence: serde_json::json!({
            "proposal_id": proposal,
            "vote_count": dup.len(),
        }),
        timestamp: Utc::now(),
    })
}

fn detect_conflicting_messages(messages: &[&ObservedMessage]) -> Option<MaliciousBehaviorRecord> {
    let mut by_key: HashMap<(String, u64, u64), HashSet<String>> = HashMap::new();
    for m in messages {
        by_key
            .entry((m.msg_type.clone(), m.view, m.sequence))
            .or_default()
            .insert(m.payload_digest.clone());
    }
    let conflict = by_key.into_iter().find(|(_, digests)| digests.len() > 1)?;
    let confidence = 0.85;
    Some(MaliciousBehaviorRecord {
        behavior_type: MaliciousBehaviorType::ConflictingMessages,
        severity: classify_severity(MaliciousBehaviorType::ConflictingMessages, confidence),
        confidence,
        evidence: serde_json::json!({
            "type_view_sequence": format!("{:?}", conflict.0),
            "distinct_digests": conflict.1.len(),
        }),
        timestamp: Utc::now(),
    })
}

fn detect_timing_manipulation(messages: &[&ObservedMessage]) -> Option<MaliciousBehaviorRecord> {
    if messages.len() < 2 {
        return None;
    }
    let mut sorted: Vec<&ObservedMessage> = messages.to_vec();
    sorted.sort_by_key(|m| m.timestamp);
    let gaps_ms: Vec<f64> = sorted
        .windows(2)
        .map(|w| (w[1].timestamp - w[0].timestamp).num_milliseconds() as f64)
        .collect();

    let too_fast = gaps_ms.iter().any(|&g| g < 10.0);
    let artificial_regularity = gaps_ms.len() >= 5 && variance(&gaps_ms) < 100.0;

    if !too_fast && !artificial_regularity {
        return None;
    }
    let confidence = 0.75;
    Some(MaliciousBehaviorRecord {
        behavior_type: MaliciousBehaviorType::TimingManipulation,
        severity: classify_severity(MaliciousBehaviorType::TimingManipulation, confidence),
        confidence,
        evidence: serde_json::json!({
            "too_fast": too_fast,
            "artificial_regularity": artificial_regularity,
            "gap_variance": variance(&gaps_ms),
        }),
        timestamp: Utc::now(),
    })
}

fn variance(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let mean = xs.iter().sum::<f64>() / xs.len() as f64;
    xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / xs.len() as f64
}

fn detect_spam_flooding(
    messages: &[&ObservedMessage],
    max_per_window: usize,
) -> Option<MaliciousBehaviorRecord> {
    if messages.len() <= max_per_window {
        return None;
    }
    let confidence = 0.80;
    Some(MaliciousBehaviorRecord {
        behavior_type: MaliciousBehaviorType::SpamFlooding,
        severity: classify_severity(MaliciousBehaviorType::SpamFlooding, confidence),
        confidence,
        evidence: serde_json::json!({ "message_count": messages.len(), "limit": max_per_window }),
        timestamp: Utc::now(),
    })
}

fn detect_collusion(votes: &[&ObservedVote]) -> Option<MaliciousBehaviorRecord> {
    if votes.is_empty() {
        return None;
    }
    let mut by_pattern: HashMap<(String, u64), usize> = HashMap::new();
    for v in votes {
        *by_pattern
            .entry((v.decision.clone(), v.weight.to_bits()))
            .or_insert(0) += 1;
    }
    let max_count = by_pattern.values().copied().max().unwrap_or(0);
    let fraction = max_count as f64 / votes.len() as f64;
    if fraction <= 0.8 {
        return None;
    }
    let confidence = 0.70;
    Some(MaliciousBehaviorRecord {
        behavior_type: MaliciousBehaviorType::Collusion,
        severity: classify_severity(MaliciousBehaviorType::Collusion, confidence),
        confidence,
        evidence: serde_json::json!({ "matching_fraction": fraction }),
        timestamp: Utc::now(),
    })
}

fn detect_view_change_abuse(messages: &[&ObservedMessage]) -> Option<MaliciousBehaviorRecord> {
    let view_changes: Vec<&&ObservedMessage> = messages
        .iter()
        .filter(|m| m.msg_type == "view_change")
        .collect();
    if view_changes.is_empty() {
        return None;
    }
    let too_many = view_changes.len() > 3;
    let missing_last_committed = view_changes.iter().any(|m| !m.has_last_committed);
    if !too_many && !missing_last_committed {
        return None;
    }
    let confidence = 0.80;
    Some(MaliciousBehaviorRecord {
        behavior_type: MaliciousBehaviorType::ViewChangeAbuse,
        severity: classify_severity(MaliciousBehaviorType::ViewChangeAbuse, confidence),
        confidence,
        evidence: serde_json::json!({
            "view_change_count": view_changes.len(),
            "missing_last_committed": missing_last_committed,
        }),
        timestamp: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(id: &str) -> AgentIdentity {
        AgentIdentity {
            id: id.to_string(),
            public_key: "pk".to_string(),
            leader: false,
            last_active: Utc::now(),
        }
    }

    fn vote(proposal_id: &str, sender: &str, decision: &str, weight: f64) -> ObservedVote {
        ObservedVote {
            proposal_id: proposal_id.to_string(),
            sender: sender.to_string(),
            decision: decision.to_string(),
            weight,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn double_voting_penalizes_to_expected_score() {
        let engine = ReputationEngine::new(ReputationConfig::default());
        engine.register_agent(&agent("agent-7"));
        let votes = vec![
            vote("proposal-1", "agent-7", "commit", 1.0),
            vote("proposal-1", "agent-7", "abort", 1.0),
        ];
        let analysis = engine
            .analyze_behavior("agent-7", &[], &votes)
            .unwrap();
        assert_eq!(analysis.findings.len(), 1);
        assert_eq!(analysis.findings[0].behavior_type, MaliciousBehaviorType::DoubleVoting);
        assert!(analysis.findings[0].severity >= Severity::High);
        assert!(!analysis.newly_quarantined);

        let score = engine.reputation("agent-7").unwrap().score();
        assert!((score - 0.5725).abs() < 1e-9);
        assert!(engine.is_agent_trusted("agent-7"));
    }

    #[test]
    fn spam_flooding_penalizes_to_expected_score() {
        let engine = ReputationEngine::new(ReputationConfig::default());
        engine.register_agent(&agent("agent-3"));
        let messages: Vec<ObservedMessage> = (0..101)
            .map(|i| ObservedMessage {
                msg_type: "prepare".to_string(),
                view: 1,
                sequence: i,
                payload_digest: format!("d{i}"),
                sender: "agent-3".to_string(),
                timestamp: Utc::now(),
                has_last_committed: true,
            })
            .collect();
        let analysis = engine
            .analyze_behavior("agent-3", &messages, &[])
            .unwrap();
        assert!(analysis
            .findings
            .iter()
            .any(|f| f.behavior_type == MaliciousBehaviorType::SpamFlooding));

        let score = engine.reputation("agent-3").unwrap().score();
        assert!((score - 0.84).abs() < 1e-9);
    }

    #[test]
    fn quarantine_gates_trust() {
        let engine = ReputationEngine::new(ReputationConfig::default());
        engine.register_agent(&agent("bad-actor"));
        let mut quarantine_transitions = 0;
        for _ in 0..5 {
            let votes = vec![
                vote("p", "bad-actor", "commit", 1.0),
                vote("p", "bad-actor", "abort", 1.0),
            ];
            let analysis = engine.analyze_behavior("bad-actor", &[], &votes).unwrap();
            if analysis.newly_quarantined {
                quarantine_transitions += 1;
            }
        }
        assert_eq!(quarantine_transitions, 1);
        assert!(!engine.is_agent_trusted("bad-actor"));
        assert!(engine.quarantined_agents().contains(&"bad-actor".to_string()));
    }

    #[test]
    fn rehabilitate_restores_trust() {
        let engine = ReputationEngine::new(ReputationConfig::default());
        engine.register_agent(&agent("bad-actor"));
        for _ in 0..5 {
            let votes = vec![
                vote("p", "bad-actor", "commit", 1.0),
                vote("p", "bad-actor", "abort", 1.0),
            ];
            let _ = engine.analyze_behavior("bad-actor", &[], &votes);
        }
        assert!(!engine.is_agent_trusted("bad-actor"));
        engine.rehabilitate("bad-actor", "manual review cleared agent").unwrap();
        assert!(engine.is_agent_trusted("bad-actor"));
    }

    #[test]
    fn unknown_agent_is_never_trusted() {
        let engine = ReputationEngine::new(ReputationConfig::default());
        assert!(!engine.is_agent_trusted("ghost"));
    }

    #[test]
    fn reputation_never_increases_within_one_analysis_pass() {
        let engine = ReputationEngine::new(ReputationConfig::default());
        engine.register_agent(&agent("agent-x"));
        let before = engine.reputation("agent-x").unwrap().score();
        let votes = vec![
            vote("p", "agent-x", "commit", 1.0),
            vote("p", "agent-x", "abort", 1.0),
        ];
        let _ = engine.analyze_behavior("agent-x", &[], &votes);
        let after = engine.reputation("agent-x").unwrap().score();
        assert!(after <= before);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Any interleaving of double-voting rounds (each one a penalty)
            /// and rehabilitations (each a +0.2 restore) keeps the score
            /// clamped to `[0, 1]` — the two clamps in `apply_penalty` and
            /// `rehabilitate` must hold regardless of ordering.
            #[test]
            fn score_stays_in_unit_range(steps in prop::collection::vec(any::<bool>(), 0..30)) {
                let engine = ReputationEngine::new(ReputationConfig::default());
                engine.register_agent(&agent("agent-p"));
                for (i, penalize) in steps.into_iter().enumerate() {
                    if penalize {
                        let votes = vec![
                            vote(&format!("p{i}"), "agent-p", "commit", 1.0),
                            vote(&format!("p{i}"), "agent-p", "abort", 1.0),
                        ];
                        let _ = engine.analyze_behavior("agent-p", &[], &votes);
                    } else {
                        let _ = engine.rehabilitate("agent-p", "periodic review");
                    }
                    let score = engine.reputation("agent-p").unwrap().score();
                    prop_assert!((0.0..=1.0).contains(&score));
                }
            }
        }
    }
}
