//! Vote recording and deterministic winner election (C3).
//!
//! Grounded in `cloudllm::orchestration::Orchestration`'s `agent_order: Vec<String>`
//! pattern (insertion order kept alongside a `HashMap` for deterministic iteration):
//! `VoteTally` keeps votes in a `HashMap<AgentId, Vote>` for O(1) replace-by-voter,
//! but tie-breaking needs the *answer's* acceptance order, which is supplied
//! externally (it lives in [`crate::answer_registry::AnswerRegistry`]) rather than
//! duplicated here.

use crate::types::{AgentId, AnswerLabel, Vote};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of [`VoteTally::cast_or_replace`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome {
    Ok,
    Rejected(VoteRejection),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteRejection {
    /// `target_label` does not match any label known to the caller at cast time.
    UnknownLabel,
}

impl VoteRejection {
    pub fn message(&self, target_label: &str) -> String {
        match self {
            VoteRejection::UnknownLabel => {
                format!("no answer labeled {target_label} exists; vote for an existing label")
            }
        }
    }
}

/// Per-attempt vote tally (spec.md §4.3).
pub struct VoteTally {
    /// Current vote per voter; replacing a vote overwrites the prior entry (L1).
    votes: HashMap<AgentId, Vote>,
}

impl VoteTally {
    pub fn new() -> Self {
        Self {
            votes: HashMap::new(),
        }
    }

    /// Cast a vote, or replace the voter's existing vote if any.
    ///
    /// `known_labels` is the set of labels currently valid (as reported by
    /// [`crate::answer_registry::AnswerRegistry::list`]) — votes for anything else
    /// are rejected (I5, P2). Idempotent: replaying the same `(voter, target)` is a
    /// no-op on the resulting tally (L1).
    pub fn cast_or_replace(
        &mut self,
        voter_id: &str,
        target_label: &str,
        reason: impl Into<Arc<str>>,
        known_labels: &[AnswerLabel],
    ) -> VoteOutcome {
        if !known_labels.iter().any(|l| l == target_label) {
            return VoteOutcome::Rejected(VoteRejection::UnknownLabel);
        }
        self.votes.insert(
            voter_id.to_string(),
            Vote {
                voter_id: voter_id.to_string(),
                target_label: target_label.to_string(),
                reason: reason.into(),
                cast_at: Utc::now(),
            },
        );
        log::debug!("vote recorded: {voter_id} -> {target_label}");
        VoteOutcome::Ok
    }

    /// `true` once `voter_id` has a recorded vote.
    pub fn has_voted(&self, voter_id: &str) -> bool {
        self.votes.contains_key(voter_id)
    }

    /// The vote currently recorded for `voter_id`, if any.
    pub fn vote_of(&self, voter_id: &str) -> Option<&Vote> {
        self.votes.get(voter_id)
    }

    pub fn all_votes(&self) -> impl Iterator<Item = &Vote> {
        self.votes.values()
    }

    /// Count of votes per label.
    fn counts(&self) -> HashMap<AnswerLabel, usize> {
        let mut counts: HashMap<AnswerLabel, usize> = HashMap::new();
        for vote in self.votes.values() {
            *counts.entry(vote.target_label.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Compute the current leader.
    ///
    /// `registry_order` must list labels in registry acceptance order (earliest
    /// first) so ties break deterministically toward whichever answer was
    /// registered first (§4.3, P8). Returns `None` if no votes have been cast.
    pub fn leader(&self, registry_order: &[AnswerLabel]) -> Option<LeaderResult> {
        let counts = self.counts();
        if counts.is_empty() {
            return None;
        }
        let max_count = *counts.values().max().expect("counts non-empty");
        let mut tied_labels: Vec<&AnswerLabel> = counts
            .iter()
            .filter(|(_, &c)| c == max_count)
            .map(|(label, _)| label)
            .collect();
        tied_labels.sort();

        let winner = registry_order
            .iter()
            .find(|label| tied_labels.contains(label))
            .or_else(|| tied_labels.first().copied())
            .expect("at least one tied label")
            .clone();

        Some(LeaderResult {
            label: winner,
            count: max_count,
            tied: tied_labels.len() > 1,
        })
    }

    /// Is every agent in `active_agents` either voted, or out of answer budget
    /// with nothing left it could do? (I8 quorum.)
    ///
    /// `is_exhausted` is supplied by the caller (it needs `AnswerRegistry` state to
    /// evaluate the answer cap), keeping this module free of a dependency on
    /// `AnswerRegistry`.
    pub fn all_participants_decided(
        &self,
        active_agents: &[AgentId],
        is_exhausted: impl Fn(&str) -> bool,
    ) -> bool {
        active_agents
            .iter()
            .all(|id| self.has_voted(id) || is_exhausted(id))
    }
}

impl Default for VoteTally {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of [`VoteTally::leader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderResult {
    pub label: AnswerLabel,
    pub count: usize,
    /// `true` when more than one label shares `count` votes; `label` was chosen
    /// via the FIFO acceptance-order tie-break.
    pub tied: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_vote_for_unknown_label() {
        let mut tally = VoteTally::new();
        let outcome = tally.cast_or_replace("a", "z.1", "because", &["a.1".into()]);
        assert_eq!(
            outcome,
            VoteOutcome::Rejected(VoteRejection::UnknownLabel)
        );
    }

    #[test]
    fn replacing_a_vote_is_idempotent_and_overwrites() {
        let mut tally = VoteTally::new();
        let known = vec!["a.1".to_string(), "b.1".to_string()];
        tally.cast_or_replace("v", "a.1", "r1", &known);
        tally.cast_or_replace("v", "a.1", "r1", &known);
        assert_eq!(tally.leader(&known).unwrap().count, 1);

        tally.cast_or_replace("v", "b.1", "changed my mind", &known);
        let leader = tally.leader(&known).unwrap();
        assert_eq!(leader.label, "b.1");
        assert_eq!(leader.count, 1);
    }

    #[test]
    fn tie_breaks_toward_earliest_registered_label() {
        let mut tally = VoteTally::new();
        let order = vec!["a.1".to_string(), "b.1".to_string()];
        tally.cast_or_replace("v1", "b.1", "", &order);
        tally.cast_or_replace("v2", "a.1", "", &order);
        let leader = tally.leader(&order).unwrap();
        assert_eq!(leader.label, "a.1");
        assert!(leader.tied);
    }

    #[test]
    fn strict_majority_wins_without_tie() {
        let mut tally = VoteTally::new();
        let order = vec!["a.1".to_string(), "b.1".to_string()];
        tally.cast_or_replace("v1", "a.1", "", &order);
        tally.cast_or_replace("v2", "a.1", "", &order);
        tally.cast_or_replace("v3", "b.1", "", &order);
        let leader = tally.leader(&order).unwrap();
        assert_eq!(leader.label, "a.1");
        assert!(!leader.tied);
    }

    #[test]
    fn quorum_requires_every_active_agent_decided() {
        let mut tally = VoteTally::new();
        let order = vec!["a.1".to_string()];
        tally.cast_or_replace("a", "a.1", "", &order);
        let active = vec!["a".to_string(), "b".to_string()];
        assert!(!tally.all_participants_decided(&active, |_| false));
        assert!(tally.all_participants_decided(&active, |id| id == "b"));
    }
}
