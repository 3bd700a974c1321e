// src/lib.rs
//
// Concurrent coordination core for multi-agent LLM collaboration: parallel
// streaming, cross-agent injection, timeout enforcement, vote-based
// consensus, and workspace snapshotting.

mod massgen;

// Re-exported as crate-root paths (`crate::types`, `crate::agent_runner`, …)
// so every submodule can refer to its neighbors the same way regardless of
// their physical nesting under `src/massgen/`.
pub use massgen::{
    agent_runner, answer_registry, config, coordination_loop, event, injection_router,
    presentation, status_snapshotter, timeout_controller, types, vote_tally, workspace_manager,
};

// Convenience re-exports of the types most callers need.
pub use agent_runner::{AgentBackend, AgentResult, Chunk, ConversationTurn, DoneReason, Role, ToolGate};
pub use config::MassGenConfig;
pub use coordination_loop::{CoordinationError, CoordinationLoop, CoordinationOutcome};
pub use event::{CoordinationEvent, EventHandler, SharedEventHandler};
pub use presentation::{OutputSink, PresentationOutcome, PresentationStage};
pub use types::{AgentId, Answer, AnswerLabel, NoveltyRequirement, Vote, VotingSensitivity};
