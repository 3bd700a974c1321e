//! Global and per-round deadline tracking (C6).
//!
//! Grounded in `cloudllm`'s `tokio::time::Instant`/`Duration` use in its
//! session loop. Each tracked deadline doubles as a disable switch: spec.md §6
//! requires that the global timeout and every per-round timeout may be turned
//! off independently ("any may be null → feature disabled"), so every budget
//! here is an `Option<Duration>` and every resulting instant an
//! `Option<Instant>` — `None` means "never fires," not "already elapsed."

use crate::types::{AgentId, Deadline, RoundKind};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Tracks one optional global deadline plus one round [`Deadline`] per active
/// agent.
///
/// Built with the same `with_*` builder idiom `cloudllm::config::CloudLLMConfig`'s
/// callers use to construct orchestration components from a plain config struct.
pub struct TimeoutController {
    global_deadline: Option<Instant>,
    initial_round_timeout: Option<Duration>,
    subsequent_round_timeout: Option<Duration>,
    grace: Option<Duration>,
    rounds: HashMap<AgentId, Deadline>,
}

impl TimeoutController {
    pub fn new(
        orchestrator_timeout: Option<Duration>,
        initial_round_timeout: Option<Duration>,
        subsequent_round_timeout: Option<Duration>,
        grace: Option<Duration>,
    ) -> Self {
        Self {
            global_deadline: orchestrator_timeout.map(|d| Instant::now() + d),
            initial_round_timeout,
            subsequent_round_timeout,
            grace,
            rounds: HashMap::new(),
        }
    }

    /// Start (or restart) a round deadline for `agent_id`. Called at the top of
    /// every `AgentRunner` round, per spec.md §4.6: each round gets its own
    /// soft/hard pair, sized by whether it is the agent's first round this
    /// attempt or a later one.
    pub fn start_round(&mut self, agent_id: &str, kind: RoundKind) -> Deadline {
        let soft_in = match kind {
            RoundKind::Initial => self.initial_round_timeout,
            RoundKind::Subsequent => self.subsequent_round_timeout,
        };
        let deadline = Deadline::from_now(soft_in, self.grace);
        self.rounds.insert(agent_id.to_string(), deadline);
        deadline
    }

    /// Drop round tracking for an agent that has left this attempt (answered,
    /// voted, errored). The global deadline is unaffected.
    pub fn clear_round(&mut self, agent_id: &str) {
        self.rounds.remove(agent_id);
    }

    /// The deadline currently tracked for `agent_id`, if any.
    pub fn round_deadline(&self, agent_id: &str) -> Option<Deadline> {
        self.rounds.get(agent_id).copied()
    }

    /// Time remaining before the global deadline, saturating at zero. A
    /// disabled global deadline never runs out, so this saturates at
    /// `Duration::MAX` instead.
    pub fn global_remaining(&self, now: Instant) -> Duration {
        match self.global_deadline {
            Some(deadline) => deadline.saturating_duration_since(now),
            None => Duration::MAX,
        }
    }

    pub fn is_global_elapsed(&self, now: Instant) -> bool {
        self.global_deadline.is_some_and(|deadline| now >= deadline)
    }
}
