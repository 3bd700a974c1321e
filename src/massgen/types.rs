//! Core data model shared by every orchestrator component.
//!
//! Grounded in `cloudllm::orchestration::OrchestrationMessage` — a single small
//! "everything an observer needs" struct with a `DateTime<Utc>` timestamp and an
//! `Arc<str>` body — but split into the domain-specific entities spec.md §3 names
//! (`Answer`, `Vote`, `AgentState`) instead of one generic message type, since this
//! crate's entities carry stronger invariants (label uniqueness, vote replacement)
//! than a chat transcript does.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Opaque identifier for one participating agent, unique for the lifetime of a run.
pub type AgentId = String;

/// `"{agentId}.{seq}"` identifier for a registered [`Answer`].
///
/// `seq` is the 1-based count of answers that agent has submitted in the current
/// coordination attempt (I2: for each agent, labels are a contiguous `1..k` prefix).
pub type AnswerLabel = String;

/// Build the label for the `seq`-th answer submitted by `agent_id`.
pub fn make_label(agent_id: &str, seq: u32) -> AnswerLabel {
    format!("{agent_id}.{seq}")
}

/// Content-addressed identifier of a workspace snapshot.
///
/// Computed as the hex SHA-256 digest of the snapshot's content manifest (see
/// [`crate::workspace_manager::WorkspaceManager`]), so two snapshots with identical
/// content always share an id (L3: `snapshot()` on an unchanged workspace returns
/// the same `SnapshotId`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotId(pub String);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SnapshotId {
    /// The well-known id returned for an agent that has never produced a non-empty
    /// workspace.
    pub fn empty() -> Self {
        SnapshotId("empty".to_string())
    }

    /// `true` for the sentinel returned by [`SnapshotId::empty`].
    pub fn is_empty(&self) -> bool {
        self.0 == "empty"
    }
}

/// An immutable, labeled candidate answer appended to the [`crate::answer_registry::AnswerRegistry`].
///
/// Once appended, an `Answer` never changes — later refinements are new `Answer`s
/// with an incremented `seq` in their label (I1, I2).
#[derive(Debug, Clone)]
pub struct Answer {
    /// `"{agentId}.{seq}"`, unique across the whole registry (I1).
    pub label: AnswerLabel,
    /// The agent that submitted this answer.
    pub agent_id: AgentId,
    /// Full candidate answer text.
    pub text: Arc<str>,
    /// Snapshot of the submitting agent's workspace taken at submission time.
    pub workspace_snapshot_id: SnapshotId,
    /// Wall-clock time the answer was accepted into the registry.
    pub submitted_at: DateTime<Utc>,
    /// Which coordination attempt (0-based) this answer belongs to.
    pub attempt: u32,
}

/// A single agent's current vote.
///
/// An agent holds at most one vote per attempt; casting again replaces the
/// previous one (`VoteTally::cast_or_replace`, L1).
#[derive(Debug, Clone)]
pub struct Vote {
    /// The agent casting the vote.
    pub voter_id: AgentId,
    /// The label being voted for. Must reference an existing [`Answer`] (I5, P2).
    pub target_label: AnswerLabel,
    /// Free-text justification surfaced alongside the vote.
    pub reason: Arc<str>,
    /// Wall-clock time the vote was recorded.
    pub cast_at: DateTime<Utc>,
}

/// Lifecycle status of one agent within the current coordination attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    /// Created but not yet spawned / not yet producing output.
    Waiting,
    /// Actively streaming a response from its backend.
    Streaming,
    /// Terminated this round by submitting an answer.
    Answered,
    /// Terminated this round by casting a vote.
    Voted,
    /// Being torn down and recreated with fresh conversation state.
    Restarting,
    /// Failed terminally; excluded from winner election, counts as decided for quorum.
    Error,
    /// Hit its hard per-round deadline without a terminal tool call.
    Timeout,
    /// The coordination ended with this agent in a settled terminal state.
    Completed,
}

/// Mutable per-agent bookkeeping tracked by [`crate::coordination_loop::CoordinationLoop`].
#[derive(Debug, Clone)]
pub struct AgentState {
    pub status: AgentStatus,
    /// Number of answers this agent has submitted in the current attempt.
    pub answer_count: u32,
    /// The most recent label this agent submitted, if any.
    pub latest_answer_label: Option<AnswerLabel>,
    /// `true` once this agent has cast a vote in the current attempt.
    pub vote_cast: bool,
    /// Number of times this agent has been locally restarted (§4.4) this attempt.
    pub times_restarted: u32,
    /// Wall-clock time of the agent's last observed activity (chunk, tool call, …).
    pub last_activity: DateTime<Utc>,
    /// Populated when `status == AgentStatus::Error`.
    pub error: Option<String>,
}

impl AgentState {
    pub fn new() -> Self {
        Self {
            status: AgentStatus::Waiting,
            answer_count: 0,
            latest_answer_label: None,
            vote_cast: false,
            times_restarted: 0,
            last_activity: Utc::now(),
            error: None,
        }
    }

    /// `true` once this agent can take no further action this attempt: it has
    /// voted, or it has no remaining answer budget (§4.3 / I8 quorum condition).
    pub fn is_decided(&self, max_answers_per_agent: Option<u32>) -> bool {
        if self.vote_cast {
            return true;
        }
        if matches!(self.status, AgentStatus::Error | AgentStatus::Timeout) {
            return true;
        }
        if let Some(cap) = max_answers_per_agent {
            if self.answer_count >= cap {
                return true;
            }
        }
        false
    }
}

impl Default for AgentState {
    fn default() -> Self {
        Self::new()
    }
}

/// Top-level phase of one coordination attempt (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinationPhase {
    InitialAnswer,
    Enforcement,
    Presentation,
}

/// Whether an [`crate::agent_runner::AgentRunner`] round is an agent's first round
/// in this attempt (`Initial`) or a round after it has already produced output
/// (`Subsequent`) — determines which [`crate::timeout_controller::Deadline`] applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundKind {
    Initial,
    Subsequent,
}

/// A soft/hard deadline pair for one agent round.
///
/// `hard_at = soft_at + grace`. Between the two, non-terminal tool calls are
/// blocked (I7); past `hard_at` the runner is canceled. Either half may be
/// `None`, meaning that deadline is disabled (spec.md §6: "any may be null →
/// feature disabled") — `hard_at` is also `None` whenever `soft_at` is `None`,
/// since there is nothing left to add grace to.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    pub soft_at: Option<tokio::time::Instant>,
    pub hard_at: Option<tokio::time::Instant>,
}

impl Deadline {
    /// Construct a deadline `grace` after `soft_in` from now. `soft_in: None`
    /// disables the round timeout entirely; `grace: None` with `soft_in: Some`
    /// keeps the soft wrap-up warning but disables the hard cancellation.
    pub fn from_now(soft_in: Option<std::time::Duration>, grace: Option<std::time::Duration>) -> Self {
        let now = tokio::time::Instant::now();
        let soft_at = soft_in.map(|d| now + d);
        let hard_at = soft_at.and_then(|soft| grace.map(|g| soft + g));
        Self { soft_at, hard_at }
    }

    /// Time remaining before the soft deadline. A disabled soft deadline never
    /// runs out, so this saturates at `Duration::MAX` rather than zero.
    pub fn remaining_until_soft(&self, now: tokio::time::Instant) -> std::time::Duration {
        match self.soft_at {
            Some(soft) => soft.saturating_duration_since(now),
            None => std::time::Duration::MAX,
        }
    }

    pub fn is_past_soft(&self, now: tokio::time::Instant) -> bool {
        self.soft_at.is_some_and(|soft| now >= soft)
    }

    pub fn is_past_hard(&self, now: tokio::time::Instant) -> bool {
        self.hard_at.is_some_and(|hard| now >= hard)
    }
}

/// Approximate token accounting for one agent round, mirrored from
/// `cloudllm::client_wrapper::TokenUsage` so status sinks can report spend the
/// same way `OrchestrationResponse::total_tokens_used` does.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

/// Novelty enforcement strictness. Only changes the numeric overlap threshold
/// `AnswerRegistry::submit` applies (§4.2); `Lenient` disables the check entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoveltyRequirement {
    Lenient,
    Balanced,
    Strict,
}

impl NoveltyRequirement {
    /// Maximum allowed token-overlap ratio, or `None` when novelty is not enforced.
    pub fn threshold(self) -> Option<f64> {
        match self {
            NoveltyRequirement::Lenient => None,
            NoveltyRequirement::Balanced => Some(0.70),
            NoveltyRequirement::Strict => Some(0.50),
        }
    }
}

/// Controls the system-prompt wording agents receive about how picky to be when
/// deciding whether to vote or submit a new answer (§4.7 "Voting sensitivity").
/// Does not change orchestrator-enforced behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VotingSensitivity {
    Lenient,
    Balanced,
    Strict,
}

impl VotingSensitivity {
    /// The system-instruction fragment shown to agents for this sensitivity.
    pub fn instruction(self) -> &'static str {
        match self {
            VotingSensitivity::Lenient => {
                "Vote for any answer that reasonably addresses the task; do not hold out for perfection."
            }
            VotingSensitivity::Balanced => {
                "Vote for an existing answer if it is solid; submit a new one only if you can meaningfully improve on it."
            }
            VotingSensitivity::Strict => {
                "Only vote if an existing answer is excellent. Prefer submitting a better answer when in doubt."
            }
        }
    }
}

/// Free-form key/value metadata carried by a few event/result types, mirroring
/// `OrchestrationMessage::metadata`.
pub type Metadata = HashMap<String, String>;
