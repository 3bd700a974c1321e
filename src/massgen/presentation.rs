//! Final-answer presentation and the optional post-evaluation restart (C8).
//!
//! Grounded in `cloudllm::client_wrapper::ClientWrapper::send_message_stream`'s
//! streaming-to-a-sink shape; here the "sink" is the [`OutputSink`] trait
//! rather than a concrete UI, matching spec.md §1's decision to keep UI
//! renderers external collaborators.

use crate::agent_runner::{AgentBackend, Chunk, ConversationTurn, DoneReason, Role};
use crate::event::{CoordinationEvent, SharedEventHandler};
use crate::types::AgentId;
use crate::workspace_manager::WorkspaceManager;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Receives the winner's presentation content as it streams, tagged with the
/// presenting agent and the fact that this is the final presentation phase.
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn on_chunk(&self, agent_id: &str, text: &str);
}

/// An [`OutputSink`] that discards everything; useful in tests that only
/// assert on the returned [`PresentationOutcome`].
pub struct NullOutputSink;

#[async_trait]
impl OutputSink for NullOutputSink {
    async fn on_chunk(&self, _agent_id: &str, _text: &str) {}
}

/// Name of the tool call a presenting agent uses to request a whole-session
/// restart after self-auditing its final answer (§4.7 phase 5).
pub const TOOL_REQUEST_RESTART: &str = "request_restart";

/// Outcome of [`PresentationStage::present`].
#[derive(Debug, Clone)]
pub struct PresentationOutcome {
    pub final_text: Arc<str>,
    /// `Some(reason)` when the winner called `request_restart` during
    /// self-audit; the caller decides whether `max_orchestration_restarts`
    /// still allows honoring it.
    pub restart_reason: Option<String>,
}

/// Re-runs the elected winner with voting/answer tools stripped, streams its
/// final answer to an [`OutputSink`], and promotes its workspace (§4.8).
pub struct PresentationStage {
    workspace: Arc<Mutex<WorkspaceManager>>,
    output: Arc<dyn OutputSink>,
    events: SharedEventHandler,
}

impl PresentationStage {
    pub fn new(
        workspace: Arc<Mutex<WorkspaceManager>>,
        output: Arc<dyn OutputSink>,
        events: SharedEventHandler,
    ) -> Self {
        Self {
            workspace,
            output,
            events,
        }
    }

    /// Run the presentation round for `agent_id`, whose elected answer is
    /// `winning_label`/`winning_text`.
    pub async fn present(
        &self,
        agent_id: &AgentId,
        winning_label: &str,
        winning_text: &str,
        backend: Arc<dyn AgentBackend>,
        extra_instruction: Option<&str>,
    ) -> PresentationOutcome {
        self.workspace.lock().await.promote_winner(agent_id);

        let mut prompt = format!(
            "Your answer {winning_label} was elected by the group. Present it now as the final \
             response to the user, incorporating any last polish. Then call `{TOOL_REQUEST_RESTART}` \
             only if you find a real defect that the whole group should revisit; otherwise finish \
             normally.\n\nElected answer:\n{winning_text}"
        );
        if let Some(extra) = extra_instruction {
            prompt.push_str(&format!("\n\nNote from the previous attempt: {extra}"));
        }
        let conversation = vec![ConversationTurn::new(Role::System, prompt)];

        let (chunk_tx, mut chunk_rx) = mpsc::channel::<Chunk>(64);
        let stream_backend = backend.clone();
        tokio::spawn(async move {
            stream_backend.stream(&conversation, chunk_tx).await;
        });

        let mut final_text = String::new();
        let mut restart_reason = None;

        while let Some(chunk) = chunk_rx.recv().await {
            match chunk {
                Chunk::Content(text) => {
                    final_text.push_str(&text);
                    self.output.on_chunk(agent_id, &text).await;
                    self.events
                        .on_event(&CoordinationEvent::ChunkReceived {
                            agent_id: agent_id.clone(),
                            kind: crate::event::ChunkKind::Content,
                        })
                        .await;
                }
                Chunk::ToolCall { name, args, .. } if name == TOOL_REQUEST_RESTART => {
                    restart_reason = args
                        .get("reason")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string())
                        .or_else(|| Some("no reason given".to_string()));
                }
                Chunk::Done(DoneReason::Error) | Chunk::Done(DoneReason::Cancelled) => break,
                Chunk::Done(_) => break,
                _ => {}
            }
        }

        if final_text.is_empty() {
            final_text.push_str(winning_text);
        }

        PresentationOutcome {
            final_text: Arc::from(final_text),
            restart_reason,
        }
    }
}
