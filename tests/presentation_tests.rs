use async_trait::async_trait;
use massgen::agent_runner::{AgentBackend, Chunk, ConversationTurn, DoneReason};
use massgen::event::{CoordinationEvent, EventHandler, NullEventHandler};
use massgen::presentation::{NullOutputSink, OutputSink, PresentationStage, TOOL_REQUEST_RESTART};
use massgen::workspace_manager::WorkspaceManager;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

struct ScriptedBackend {
    script: Mutex<Vec<Chunk>>,
}

impl ScriptedBackend {
    fn new(script: Vec<Chunk>) -> Self {
        Self {
            script: Mutex::new(script),
        }
    }
}

#[async_trait]
impl AgentBackend for ScriptedBackend {
    async fn stream(&self, _conversation: &[ConversationTurn], tx: mpsc::Sender<Chunk>) {
        let script = self.script.lock().await.clone();
        for chunk in script {
            if tx.send(chunk).await.is_err() {
                return;
            }
        }
    }

    async fn inject_system_turn(&self, _text: Arc<str>) {}
    async fn cancel(&self) {}
    async fn report_context_length_error(&self) -> bool {
        true
    }
}

struct CapturingOutputSink {
    chunks: Mutex<Vec<String>>,
}

#[async_trait]
impl OutputSink for CapturingOutputSink {
    async fn on_chunk(&self, _agent_id: &str, text: &str) {
        self.chunks.lock().await.push(text.to_string());
    }
}

struct CountingEventHandler {
    chunk_events: std::sync::atomic::AtomicUsize,
}

#[async_trait]
impl EventHandler for CountingEventHandler {
    async fn on_event(&self, event: &CoordinationEvent) {
        if matches!(event, CoordinationEvent::ChunkReceived { .. }) {
            self.chunk_events
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }
}

#[tokio::test]
async fn presentation_streams_to_the_output_sink_and_emits_chunk_events() {
    let tmp = tempfile::tempdir().unwrap();
    let workspace = Arc::new(Mutex::new(WorkspaceManager::new(tmp.path()).unwrap()));
    let output = Arc::new(CapturingOutputSink {
        chunks: Mutex::new(Vec::new()),
    });
    let events = Arc::new(CountingEventHandler {
        chunk_events: std::sync::atomic::AtomicUsize::new(0),
    });
    let stage = PresentationStage::new(workspace.clone(), output.clone(), events.clone());

    let backend: Arc<dyn AgentBackend> = Arc::new(ScriptedBackend::new(vec![
        Chunk::Content(Arc::from("The ")),
        Chunk::Content(Arc::from("answer is 42.")),
        Chunk::Done(DoneReason::Stop),
    ]));

    let outcome = stage
        .present(&"alice".to_string(), "alice.1", "fallback", backend, None)
        .await;

    assert_eq!(&*outcome.final_text, "The answer is 42.");
    assert_eq!(output.chunks.lock().await.len(), 2);
    assert_eq!(
        events.chunk_events.load(std::sync::atomic::Ordering::SeqCst),
        2
    );
    assert_eq!(workspace.lock().await.final_workspace_agent(), Some("alice"));
}

#[tokio::test]
async fn extra_instruction_from_a_prior_attempt_is_included_without_affecting_the_outcome() {
    let tmp = tempfile::tempdir().unwrap();
    let workspace = Arc::new(Mutex::new(WorkspaceManager::new(tmp.path()).unwrap()));
    let stage = PresentationStage::new(workspace, Arc::new(NullOutputSink), Arc::new(NullEventHandler));

    let backend: Arc<dyn AgentBackend> = Arc::new(ScriptedBackend::new(vec![Chunk::ToolCall {
        id: "1".to_string(),
        name: TOOL_REQUEST_RESTART.to_string(),
        args: json!({}),
    }]));

    let outcome = stage
        .present(
            &"alice".to_string(),
            "alice.1",
            "fallback text",
            backend,
            Some("the group flagged a factual error last round"),
        )
        .await;

    assert_eq!(outcome.restart_reason.as_deref(), Some("no reason given"));
    assert_eq!(&*outcome.final_text, "fallback text");
}
