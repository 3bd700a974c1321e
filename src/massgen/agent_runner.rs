//! Drives one agent through one round of streaming (C1).
//!
//! Grounded in `cloudllm::client_wrapper::ClientWrapper`: a small trait seam
//! (`send_message` / `send_message_stream` / `model_name`) between the
//! session layer and a concrete vendor client. `AgentBackend` plays the same
//! role here. The teacher's trait methods take `&self` so a client can be
//! shared behind an `Arc` and called concurrently from multiple tasks; this
//! crate needs exactly that, since a runner must be able to inject a system
//! turn into a backend that is simultaneously mid-stream.

use crate::answer_registry::{AnswerRegistry, SubmissionOutcome};
use crate::event::{ChunkKind, CoordinationEvent, SharedEventHandler};
use crate::types::{AgentId, AnswerLabel, Deadline, TokenUsage};
use crate::vote_tally::{VoteOutcome, VoteTally};
use crate::workspace_manager::WorkspaceManager;
use async_trait::async_trait;
use futures_util::future::OptionFuture;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

/// One role in a conversation turn, mirrored from `cloudllm::client_wrapper::Role`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One turn of conversation handed to a backend at the start of a round.
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: Arc<str>,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<Arc<str>>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Why a backend's stream ended without (necessarily) a terminal tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneReason {
    Length,
    Stop,
    Cancelled,
    Error,
}

/// One unit pushed from a backend into the runner while streaming (§6).
#[derive(Debug, Clone)]
pub enum Chunk {
    Content(Arc<str>),
    Reasoning(Arc<str>),
    ToolCall {
        id: String,
        name: String,
        args: serde_json::Value,
    },
    ToolResult {
        id: String,
        result: serde_json::Value,
    },
    Usage(TokenUsage),
    Done(DoneReason),
}

/// Names of the two tool calls that resolve an agent's round (§4.1, glossary
/// "Terminal tool").
pub const TOOL_NEW_ANSWER: &str = "new_answer";
pub const TOOL_VOTE: &str = "vote";

fn is_terminal_tool(name: &str) -> bool {
    name == TOOL_NEW_ANSWER || name == TOOL_VOTE
}

/// The backend adapter interface AgentRunner consumes (§6). Implementors own
/// their own interior synchronization so `stream`, `inject_system_turn`, and
/// `cancel` can be called concurrently through a shared `Arc<dyn AgentBackend>`.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Stream a completion for `conversation`, pushing chunks into `tx` until
    /// the model turn ends. Returns once a `Chunk::Done` has been sent (or the
    /// receiver has been dropped).
    async fn stream(&self, conversation: &[ConversationTurn], tx: mpsc::Sender<Chunk>);

    /// Append a synthetic system-role turn, effective at the backend's next
    /// model turn boundary (§6).
    async fn inject_system_turn(&self, text: Arc<str>);

    /// Abort the in-flight stream (cooperative; §5 cancellation semantics).
    async fn cancel(&self);

    /// Signal a context-length failure and ask the backend to compress
    /// earlier turns. Returns `true` if compression succeeded and a retry
    /// should be attempted, `false` if the backend could not recover.
    async fn report_context_length_error(&self) -> bool;
}

/// Decision returned by a [`ToolGate`] for a proposed tool call (§6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    BlockWithMessage(String),
}

/// The tool gate interface AgentRunner consumes. Terminal tools
/// (`vote`, `new_answer`) bypass the gate entirely; everything else is
/// checked here once an agent's round has crossed its hard deadline (I7, P6).
#[async_trait]
pub trait ToolGate: Send + Sync {
    async fn allow(&self, tool_name: &str, agent_id: &str) -> GateDecision;
}

/// Classification of how a runner's round ended (§4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    ContextLength,
    Fatal,
}

/// Terminal outcome of [`AgentRunner::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentResult {
    Answered(AnswerLabel),
    Voted(AnswerLabel),
    NoProgress { reason: String },
    Errored { kind: ErrorKind, detail: String },
    TimedOut,
}

const WRAP_UP_MESSAGE: &str =
    "Time is short: wrap up and either vote for an existing answer or submit your own now.";

/// Drives one agent through one round: streams its backend, classifies
/// chunks, enforces the round's deadline, and mediates `vote`/`new_answer`
/// against the shared registry/tally/workspace (§4.1, §5).
pub struct AgentRunner {
    agent_id: AgentId,
    registry: Arc<Mutex<AnswerRegistry>>,
    tally: Arc<Mutex<VoteTally>>,
    workspace: Arc<Mutex<WorkspaceManager>>,
    gate: Arc<dyn ToolGate>,
    events: SharedEventHandler,
}

impl AgentRunner {
    pub fn new(
        agent_id: impl Into<AgentId>,
        registry: Arc<Mutex<AnswerRegistry>>,
        tally: Arc<Mutex<VoteTally>>,
        workspace: Arc<Mutex<WorkspaceManager>>,
        gate: Arc<dyn ToolGate>,
        events: SharedEventHandler,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            registry,
            tally,
            workspace,
            gate,
            events,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Run one round. `inject_rx` is this runner's mailbox (§9): the loop (via
    /// `InjectionRouter`) pushes peer-answer notifications into it, and this
    /// method forwards them to the backend at the next available point rather
    /// than the caller calling back into the backend directly.
    pub async fn run(
        &mut self,
        backend: Arc<dyn AgentBackend>,
        conversation: Vec<ConversationTurn>,
        deadline: Deadline,
        mut inject_rx: mpsc::Receiver<Arc<str>>,
    ) -> AgentResult {
        let (chunk_tx, mut chunk_rx) = mpsc::channel::<Chunk>(64);
        let stream_backend = backend.clone();
        let stream_task = tokio::spawn(async move {
            stream_backend.stream(&conversation, chunk_tx).await;
        });

        let mut soft_warned = false;
        let mut compression_retried = false;

        loop {
            // Either half of `deadline` may be disabled (spec.md §6); an
            // `OptionFuture` over a `None` instant resolves to `None`
            // immediately instead of sleeping forever, so `select!`'s pattern
            // guard (`Some(())`) simply never matches and that arm sits out
            // this iteration rather than firing early.
            let hard_sleep: OptionFuture<_> = deadline.hard_at.map(tokio::time::sleep_until).into();
            let soft_sleep: OptionFuture<_> = if soft_warned {
                None
            } else {
                deadline.soft_at.map(tokio::time::sleep_until)
            }
            .into();

            tokio::select! {
                biased;

                Some(()) = hard_sleep => {
                    backend.cancel().await;
                    stream_task.abort();
                    self.events
                        .on_event(&CoordinationEvent::HardDeadlineElapsed {
                            agent_id: self.agent_id.clone(),
                        })
                        .await;
                    return AgentResult::TimedOut;
                }

                Some(()) = soft_sleep => {
                    soft_warned = true;
                    backend.inject_system_turn(Arc::from(WRAP_UP_MESSAGE)).await;
                    self.events
                        .on_event(&CoordinationEvent::SoftDeadlineElapsed {
                            agent_id: self.agent_id.clone(),
                        })
                        .await;
                }

                maybe_text = inject_rx.recv() => {
                    if let Some(text) = maybe_text {
                        backend.inject_system_turn(text).await;
                    }
                }

                maybe_chunk = chunk_rx.recv() => {
                    match maybe_chunk {
                        Some(chunk) => {
                            if let Some(result) = self
                                .handle_chunk(chunk, &backend, deadline, &mut compression_retried)
                                .await
                            {
                                return result;
                            }
                        }
                        None => {
                            return AgentResult::NoProgress {
                                reason: "backend stream closed without a terminal call".to_string(),
                            };
                        }
                    }
                }
            }
        }
    }

    async fn handle_chunk(
        &mut self,
        chunk: Chunk,
        backend: &Arc<dyn AgentBackend>,
        deadline: Deadline,
        compression_retried: &mut bool,
    ) -> Option<AgentResult> {
        match chunk {
            Chunk::Content(_) => {
                self.emit(ChunkKind::Content).await;
                None
            }
            Chunk::Reasoning(_) => {
                self.emit(ChunkKind::Reasoning).await;
                None
            }
            Chunk::Usage(_) => {
                self.emit(ChunkKind::Usage).await;
                None
            }
            Chunk::ToolResult { .. } => {
                self.emit(ChunkKind::ToolResult).await;
                None
            }
            Chunk::ToolCall { name, args, .. } => {
                self.emit(ChunkKind::ToolCall).await;
                self.handle_tool_call(&name, args, backend, deadline).await
            }
            Chunk::Done(reason) => {
                self.emit(ChunkKind::Done).await;
                self.handle_done(reason, backend, compression_retried).await
            }
        }
    }

    async fn emit(&self, kind: ChunkKind) {
        self.events
            .on_event(&CoordinationEvent::ChunkReceived {
                agent_id: self.agent_id.clone(),
                kind,
            })
            .await;
    }

    async fn handle_tool_call(
        &mut self,
        name: &str,
        args: serde_json::Value,
        backend: &Arc<dyn AgentBackend>,
        deadline: Deadline,
    ) -> Option<AgentResult> {
        if !is_terminal_tool(name) {
            if deadline.is_past_hard(Instant::now()) {
                backend
                    .inject_system_turn(Arc::from(
                        "only vote/new_answer are permitted now; submit your result",
                    ))
                    .await;
                return None;
            }
            match self.gate.allow(name, &self.agent_id).await {
                GateDecision::Allow => None,
                GateDecision::BlockWithMessage(msg) => {
                    backend.inject_system_turn(Arc::from(msg)).await;
                    None
                }
            }
        } else if name == TOOL_NEW_ANSWER {
            self.handle_new_answer(args, backend).await
        } else {
            self.handle_vote(args, backend).await
        }
    }

    async fn handle_new_answer(
        &mut self,
        args: serde_json::Value,
        backend: &Arc<dyn AgentBackend>,
    ) -> Option<AgentResult> {
        let text = args
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let snapshot_id = match self.workspace.lock().await.snapshot(&self.agent_id) {
            Ok(id) => {
                self.events
                    .on_event(&CoordinationEvent::SnapshotTaken {
                        agent_id: self.agent_id.clone(),
                        snapshot_id: id.clone(),
                    })
                    .await;
                id
            }
            Err(e) => {
                log::warn!("workspace snapshot failed for {}: {e}", self.agent_id);
                crate::types::SnapshotId::empty()
            }
        };

        let outcome = self
            .registry
            .lock()
            .await
            .submit(&self.agent_id, text, snapshot_id);

        match outcome {
            SubmissionOutcome::Accepted(label) => {
                self.events
                    .on_event(&CoordinationEvent::AnswerRegistered {
                        agent_id: self.agent_id.clone(),
                        label: label.clone(),
                    })
                    .await;
                Some(AgentResult::Answered(label))
            }
            SubmissionOutcome::Rejected(reason) => {
                self.events
                    .on_event(&CoordinationEvent::AnswerRejected {
                        agent_id: self.agent_id.clone(),
                        reason: reason.message(),
                    })
                    .await;
                backend.inject_system_turn(Arc::from(reason.message())).await;
                None
            }
        }
    }

    async fn handle_vote(
        &mut self,
        args: serde_json::Value,
        backend: &Arc<dyn AgentBackend>,
    ) -> Option<AgentResult> {
        let target = args
            .get("target_label")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let reason = args
            .get("reason")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let known_labels: Vec<AnswerLabel> = self
            .registry
            .lock()
            .await
            .list()
            .iter()
            .map(|a| a.label.clone())
            .collect();

        let outcome = self
            .tally
            .lock()
            .await
            .cast_or_replace(&self.agent_id, &target, reason, &known_labels);

        match outcome {
            VoteOutcome::Ok => {
                self.events
                    .on_event(&CoordinationEvent::VoteCast {
                        voter_id: self.agent_id.clone(),
                        target_label: target.clone(),
                    })
                    .await;
                Some(AgentResult::Voted(target))
            }
            VoteOutcome::Rejected(rejection) => {
                let message = rejection.message(&target);
                self.events
                    .on_event(&CoordinationEvent::VoteRejected {
                        voter_id: self.agent_id.clone(),
                        reason: message.clone(),
                    })
                    .await;
                backend.inject_system_turn(Arc::from(message)).await;
                None
            }
        }
    }

    async fn handle_done(
        &mut self,
        reason: DoneReason,
        backend: &Arc<dyn AgentBackend>,
        compression_retried: &mut bool,
    ) -> Option<AgentResult> {
        match reason {
            DoneReason::Length => {
                if *compression_retried {
                    return Some(AgentResult::Errored {
                        kind: ErrorKind::ContextLength,
                        detail: "context length exceeded after compression retry".to_string(),
                    });
                }
                *compression_retried = true;
                if backend.report_context_length_error().await {
                    log::info!("{} compressed context, continuing round", self.agent_id);
                    None
                } else {
                    Some(AgentResult::Errored {
                        kind: ErrorKind::ContextLength,
                        detail: "compression failed".to_string(),
                    })
                }
            }
            DoneReason::Stop => Some(AgentResult::NoProgress {
                reason: "stream ended without a terminal tool call".to_string(),
            }),
            DoneReason::Cancelled => Some(AgentResult::TimedOut),
            DoneReason::Error => Some(AgentResult::Errored {
                kind: ErrorKind::Transient,
                detail: "backend reported an error".to_string(),
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tokio::sync::Mutex as AsyncMutex;

    /// A scripted backend: plays a fixed sequence of chunks, records injected
    /// system turns, and never needs real network I/O. Mirrors
    /// `MockClient: ClientWrapper` in the teacher's test suite.
    pub struct MockBackend {
        pub script: AsyncMutex<Vec<Chunk>>,
        pub injected: AsyncMutex<Vec<Arc<str>>>,
        pub cancelled: AsyncMutex<bool>,
        pub compression_succeeds: bool,
    }

    impl MockBackend {
        pub fn new(script: Vec<Chunk>) -> Self {
            Self {
                script: AsyncMutex::new(script),
                injected: AsyncMutex::new(Vec::new()),
                cancelled: AsyncMutex::new(false),
                compression_succeeds: true,
            }
        }
    }

    #[async_trait]
    impl AgentBackend for MockBackend {
        async fn stream(&self, _conversation: &[ConversationTurn], tx: mpsc::Sender<Chunk>) {
            let script = self.script.lock().await.clone();
            for chunk in script {
                if tx.send(chunk).await.is_err() {
                    return;
                }
            }
        }

        async fn inject_system_turn(&self, text: Arc<str>) {
            self.injected.lock().await.push(text);
        }

        async fn cancel(&self) {
            *self.cancelled.lock().await = true;
        }

        async fn report_context_length_error(&self) -> bool {
            self.compression_succeeds
        }
    }

    pub struct AllowAllGate;

    #[async_trait]
    impl ToolGate for AllowAllGate {
        async fn allow(&self, _tool_name: &str, _agent_id: &str) -> GateDecision {
            GateDecision::Allow
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::event::NullEventHandler;
    use crate::types::{NoveltyRequirement, SnapshotId};
    use serde_json::json;
    use std::time::Duration;

    fn harness() -> (
        Arc<Mutex<AnswerRegistry>>,
        Arc<Mutex<VoteTally>>,
        Arc<Mutex<WorkspaceManager>>,
        tempfile::TempDir,
    ) {
        let tmp = tempfile::tempdir().unwrap();
        let registry = Arc::new(Mutex::new(AnswerRegistry::new(None, NoveltyRequirement::Lenient, 0)));
        let tally = Arc::new(Mutex::new(VoteTally::new()));
        let workspace = Arc::new(Mutex::new(WorkspaceManager::new(tmp.path()).unwrap()));
        (registry, tally, workspace, tmp)
    }

    fn far_deadline() -> Deadline {
        Deadline::from_now(Some(Duration::from_secs(3600)), Some(Duration::from_secs(3600)))
    }

    #[tokio::test]
    async fn new_answer_tool_call_resolves_answered() {
        let (registry, tally, workspace, _tmp) = harness();
        let mut runner = AgentRunner::new(
            "a",
            registry,
            tally,
            workspace,
            Arc::new(AllowAllGate),
            Arc::new(NullEventHandler),
        );
        let backend: Arc<dyn AgentBackend> = Arc::new(MockBackend::new(vec![
            Chunk::Content(Arc::from("thinking...")),
            Chunk::ToolCall {
                id: "1".to_string(),
                name: TOOL_NEW_ANSWER.to_string(),
                args: json!({"text": "Paris is the capital of France."}),
            },
        ]));
        let (_inject_tx, inject_rx) = mpsc::channel(1);
        let result = runner
            .run(backend, vec![], far_deadline(), inject_rx)
            .await;
        assert_eq!(result, AgentResult::Answered("a.1".to_string()));
    }

    #[tokio::test]
    async fn vote_for_unknown_label_is_rejected_and_stream_continues() {
        let (registry, tally, workspace, _tmp) = harness();
        registry
            .lock()
            .await
            .submit("a", "an answer", SnapshotId::empty());
        let mut runner = AgentRunner::new(
            "b",
            registry,
            tally,
            workspace,
            Arc::new(AllowAllGate),
            Arc::new(NullEventHandler),
        );
        let backend: Arc<dyn AgentBackend> = Arc::new(MockBackend::new(vec![
            Chunk::ToolCall {
                id: "1".to_string(),
                name: TOOL_VOTE.to_string(),
                args: json!({"target_label": "z.9", "reason": "nope"}),
            },
            Chunk::ToolCall {
                id: "2".to_string(),
                name: TOOL_VOTE.to_string(),
                args: json!({"target_label": "a.1", "reason": "correct"}),
            },
        ]));
        let (_inject_tx, inject_rx) = mpsc::channel(1);
        let result = runner
            .run(backend, vec![], far_deadline(), inject_rx)
            .await;
        assert_eq!(result, AgentResult::Voted("a.1".to_string()));
    }

    #[tokio::test]
    async fn stream_ending_without_terminal_call_is_no_progress() {
        let (registry, tally, workspace, _tmp) = harness();
        let mut runner = AgentRunner::new(
            "a",
            registry,
            tally,
            workspace,
            Arc::new(AllowAllGate),
            Arc::new(NullEventHandler),
        );
        let backend: Arc<dyn AgentBackend> =
            Arc::new(MockBackend::new(vec![Chunk::Done(DoneReason::Stop)]));
        let (_inject_tx, inject_rx) = mpsc::channel(1);
        let result = runner
            .run(backend, vec![], far_deadline(), inject_rx)
            .await;
        assert!(matches!(result, AgentResult::NoProgress { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn hard_deadline_cancels_and_times_out() {
        let (registry, tally, workspace, _tmp) = harness();
        let mut runner = AgentRunner::new(
            "a",
            registry,
            tally,
            workspace,
            Arc::new(AllowAllGate),
            Arc::new(NullEventHandler),
        );
        // A backend that never sends anything: the deadline must still fire.
        let backend: Arc<dyn AgentBackend> = Arc::new(MockBackend::new(vec![]));
        let deadline = Deadline::from_now(Some(Duration::from_millis(10)), Some(Duration::from_millis(10)));
        let (_inject_tx, inject_rx) = mpsc::channel(1);
        let result = runner.run(backend, vec![], deadline, inject_rx).await;
        assert_eq!(result, AgentResult::TimedOut);
    }

    #[tokio::test]
    async fn a_disabled_deadline_never_times_out_a_terminal_round() {
        let (registry, tally, workspace, _tmp) = harness();
        let mut runner = AgentRunner::new(
            "a",
            registry,
            tally,
            workspace,
            Arc::new(AllowAllGate),
            Arc::new(NullEventHandler),
        );
        let backend: Arc<dyn AgentBackend> = Arc::new(MockBackend::new(vec![Chunk::ToolCall {
            id: "1".to_string(),
            name: TOOL_NEW_ANSWER.to_string(),
            args: json!({"text": "no rush"}),
        }]));
        let deadline = Deadline::from_now(None, None);
        let (_inject_tx, inject_rx) = mpsc::channel(1);
        let result = runner.run(backend, vec![], deadline, inject_rx).await;
        assert_eq!(result, AgentResult::Answered("a.1".to_string()));
    }
}
