//! Cross-agent answer injection and inject-vs-restart decisions (C4).
//!
//! Grounded in `cloudllm::multi_participant_session::MultiParticipantSession`'s
//! per-participant delivery bookkeeping (it tracks which participants have
//! already seen which turns so a transcript is never replayed twice): this
//! module tracks, per (agent, answer label) pair, whether that answer has
//! already been delivered to that agent, so re-running the router after a
//! restart never double-injects (L2).

use crate::types::{AgentId, AnswerLabel};
use std::collections::HashSet;
use std::time::Duration;

/// What the coordinator should do for one agent once new peer answers exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectionDecision {
    /// Send the new answers as a mid-stream system turn; the agent keeps running.
    Inject { labels: Vec<AnswerLabel> },
    /// Too little time remains before the round's soft deadline to usefully
    /// digest an injection — cancel and restart the agent fresh instead (§4.4).
    Restart,
    /// Nothing new to deliver.
    Nothing,
}

/// Routes newly-accepted answers to every agent that hasn't seen them yet.
///
/// One `InjectionRouter` is scoped to a single coordination attempt; it is reset
/// (a fresh instance) whenever [`crate::coordination_loop::CoordinationLoop`]
/// starts a new attempt, since the answer/label space restarts too.
pub struct InjectionRouter {
    /// `(agent_id, label)` pairs already delivered.
    delivered: HashSet<(AgentId, AnswerLabel)>,
    /// Below this remaining budget before an agent's soft deadline, prefer a
    /// restart over an injection (§4.4: injecting too close to the deadline
    /// leaves no time to act on it).
    min_remaining_for_injection: Duration,
}

impl InjectionRouter {
    pub fn new(min_remaining_for_injection: Duration) -> Self {
        Self {
            delivered: HashSet::new(),
            min_remaining_for_injection,
        }
    }

    /// Decide what to do for `agent_id`, given the full set of labels currently
    /// in the registry (in acceptance order) and how much time remains before
    /// that agent's soft deadline.
    ///
    /// Injection is per-label idempotent: a label already delivered to this
    /// agent is skipped even if it's passed again in `all_labels` (L2).
    pub fn route(
        &mut self,
        agent_id: &str,
        all_labels: &[AnswerLabel],
        remaining_until_soft: Duration,
    ) -> InjectionDecision {
        let undelivered: Vec<AnswerLabel> = all_labels
            .iter()
            .filter(|label| !self.delivered.contains(&(agent_id.to_string(), (*label).clone())))
            .cloned()
            .collect();

        if undelivered.is_empty() {
            return InjectionDecision::Nothing;
        }

        if remaining_until_soft < self.min_remaining_for_injection {
            log::debug!(
                "agent {agent_id} has {:?} left before its soft deadline; restarting instead of injecting {} answer(s)",
                remaining_until_soft,
                undelivered.len()
            );
            return InjectionDecision::Restart;
        }

        for label in &undelivered {
            self.delivered.insert((agent_id.to_string(), label.clone()));
        }
        InjectionDecision::Inject { labels: undelivered }
    }

    /// Mark every currently-known label as delivered to `agent_id` without
    /// actually injecting — used when an agent is restarted, since its next
    /// round starts from a fresh transcript seeded with the full answer set
    /// directly (§4.4), not via injection.
    pub fn mark_all_delivered(&mut self, agent_id: &str, all_labels: &[AnswerLabel]) {
        for label in all_labels {
            self.delivered.insert((agent_id.to_string(), label.clone()));
        }
    }

    /// Forget delivery history for one agent, e.g. after a hard-deadline restart
    /// that intentionally wants the next round to re-observe everything.
    pub fn reset_agent(&mut self, agent_id: &str) {
        self.delivered.retain(|(id, _)| id != agent_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injects_undelivered_labels_when_time_remains() {
        let mut router = InjectionRouter::new(Duration::from_secs(5));
        let labels = vec!["a.1".to_string(), "b.1".to_string()];
        let decision = router.route("c", &labels, Duration::from_secs(30));
        assert_eq!(
            decision,
            InjectionDecision::Inject {
                labels: vec!["a.1".to_string(), "b.1".to_string()]
            }
        );
    }

    #[test]
    fn does_not_redeliver_the_same_label_twice() {
        let mut router = InjectionRouter::new(Duration::from_secs(5));
        let labels = vec!["a.1".to_string()];
        router.route("c", &labels, Duration::from_secs(30));
        let second = router.route("c", &labels, Duration::from_secs(30));
        assert_eq!(second, InjectionDecision::Nothing);
    }

    #[test]
    fn prefers_restart_when_too_close_to_soft_deadline() {
        let mut router = InjectionRouter::new(Duration::from_secs(10));
        let labels = vec!["a.1".to_string()];
        let decision = router.route("c", &labels, Duration::from_secs(2));
        assert_eq!(decision, InjectionDecision::Restart);
    }

    #[test]
    fn restart_decision_does_not_mark_as_delivered() {
        let mut router = InjectionRouter::new(Duration::from_secs(10));
        let labels = vec!["a.1".to_string()];
        router.route("c", &labels, Duration::from_secs(2));
        let decision = router.route("c", &labels, Duration::from_secs(30));
        assert_eq!(
            decision,
            InjectionDecision::Inject {
                labels: vec!["a.1".to_string()]
            }
        );
    }

    #[test]
    fn mark_all_delivered_suppresses_future_injection() {
        let mut router = InjectionRouter::new(Duration::from_secs(5));
        let labels = vec!["a.1".to_string(), "b.1".to_string()];
        router.mark_all_delivered("c", &labels);
        let decision = router.route("c", &labels, Duration::from_secs(30));
        assert_eq!(decision, InjectionDecision::Nothing);
    }
}
