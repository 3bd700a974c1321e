//! Structured coordination events and the observer trait (§10 of `SPEC_FULL.md`).
//!
//! Modeled directly on `cloudllm::event::EventHandler`: one trait with async,
//! no-op-by-default methods, implementors shared via `Arc<dyn EventHandler>`
//! across every component that needs to report something happened. The teacher
//! splits agent-level and orchestration-level events into two methods
//! (`on_agent_event` / `on_orchestration_event`); this crate's events are all
//! coordination-scoped, so there is a single `on_event` method, but the
//! no-op-default + `Send + Sync` shape is unchanged.

use crate::types::{AgentId, AnswerLabel, CoordinationPhase, SnapshotId, TokenUsage};
use async_trait::async_trait;
use std::sync::Arc;

/// One observable occurrence during a coordination attempt.
///
/// `CoordinationLoop` emits one of these per state transition, in addition to
/// its own `log::` calls — this enum is for structured external consumption
/// (tests, a `StatusSnapshotter`, a UI renderer), the `log` calls are for a
/// human operator tailing output.
#[derive(Debug, Clone)]
pub enum CoordinationEvent {
    AttemptStarted { attempt: u32, agent_ids: Vec<AgentId> },
    RoundStarted { agent_id: AgentId },
    ChunkReceived { agent_id: AgentId, kind: ChunkKind },
    AnswerRegistered { agent_id: AgentId, label: AnswerLabel },
    AnswerRejected { agent_id: AgentId, reason: String },
    VoteCast { voter_id: AgentId, target_label: AnswerLabel },
    VoteRejected { voter_id: AgentId, reason: String },
    InjectionSent { agent_id: AgentId, labels: Vec<AnswerLabel> },
    AgentRestarted { agent_id: AgentId, times_restarted: u32 },
    SoftDeadlineElapsed { agent_id: AgentId },
    HardDeadlineElapsed { agent_id: AgentId },
    GlobalDeadlineElapsed,
    PhaseChanged { phase: CoordinationPhase },
    WinnerElected { label: AnswerLabel, agent_id: AgentId, tied: bool },
    SnapshotTaken { agent_id: AgentId, snapshot_id: SnapshotId },
    AgentErrored { agent_id: AgentId, message: String },
    AttemptRestarted { previous_attempt: u32, next_attempt: u32 },
    AttemptCompleted { attempt: u32, tokens: Option<TokenUsage> },
}

/// Coarse classification of one streamed chunk, mirroring the
/// `content` / `reasoning` / `tool_call` / `tool_result` / `usage` / `done`
/// split spec.md §4.1 requires of the backend adapter interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Content,
    Reasoning,
    ToolCall,
    ToolResult,
    Usage,
    Done,
}

/// Observer of [`CoordinationEvent`]s. Implementors are shared read-only across
/// every component via `Arc<dyn EventHandler>`, exactly as `cloudllm::event`
/// shares its `EventHandler` trait objects between session and orchestration.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Called once per event. The default implementation does nothing, so test
    /// and library code can implement only the events they care about.
    async fn on_event(&self, _event: &CoordinationEvent) {}
}

/// An [`EventHandler`] that discards every event; the default when a caller
/// does not supply one.
pub struct NullEventHandler;

#[async_trait]
impl EventHandler for NullEventHandler {}

/// Convenience alias for the shared-ownership form every component stores.
pub type SharedEventHandler = Arc<dyn EventHandler>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingHandler {
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn on_event(&self, event: &CoordinationEvent) {
            self.events.lock().unwrap().push(format!("{event:?}"));
        }
    }

    #[tokio::test]
    async fn recording_handler_observes_events() {
        let handler = RecordingHandler {
            events: Mutex::new(Vec::new()),
        };
        handler
            .on_event(&CoordinationEvent::GlobalDeadlineElapsed)
            .await;
        assert_eq!(handler.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn null_handler_is_a_no_op() {
        let handler = NullEventHandler;
        handler
            .on_event(&CoordinationEvent::PhaseChanged {
                phase: CoordinationPhase::InitialAnswer,
            })
            .await;
    }
}
