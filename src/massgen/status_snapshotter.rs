//! Periodic external-monitor snapshot (C9).
//!
//! Grounded in `cloudllm::thought_chain::ThoughtChain`'s append-only-log
//! durability discipline (write fully, then make visible) adapted to a single
//! overwritten file: atomicity here is temp-file-then-rename rather than
//! append, since `status.json` always describes current state, not history.
//! Serialization uses `serde`/`serde_json`, already in the teacher's
//! dependency graph for its own message/config (de)serialization.

use crate::types::{AgentId, AgentStatus, AnswerLabel, CoordinationPhase};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// Per-agent subset of state surfaced to external monitors (§4.9).
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatusView {
    pub status: String,
    pub answer_count: u32,
    pub vote_cast: bool,
    pub times_restarted: u32,
}

impl From<&crate::types::AgentState> for AgentStatusView {
    fn from(state: &crate::types::AgentState) -> Self {
        Self {
            status: status_name(state.status).to_string(),
            answer_count: state.answer_count,
            vote_cast: state.vote_cast,
            times_restarted: state.times_restarted,
        }
    }
}

fn status_name(status: AgentStatus) -> &'static str {
    match status {
        AgentStatus::Waiting => "waiting",
        AgentStatus::Streaming => "streaming",
        AgentStatus::Answered => "answered",
        AgentStatus::Voted => "voted",
        AgentStatus::Restarting => "restarting",
        AgentStatus::Error => "error",
        AgentStatus::Timeout => "timeout",
        AgentStatus::Completed => "completed",
    }
}

/// `meta` block of `status.json` (§4.9).
#[derive(Debug, Clone, Serialize)]
pub struct StatusMeta {
    pub session_id: String,
    pub elapsed_seconds: f64,
    /// Seconds left before the global deadline fires, or `None` when the
    /// orchestrator timeout is disabled (§6).
    pub global_remaining_seconds: Option<f64>,
}

/// `coordination` block.
#[derive(Debug, Clone, Serialize)]
pub struct StatusCoordination {
    pub phase: String,
    pub active_agent: Option<AgentId>,
    pub is_final_presentation: bool,
}

/// `results` block.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResults {
    pub vote_counts: HashMap<AnswerLabel, usize>,
    pub winner: Option<AnswerLabel>,
    pub final_answer_preview: Option<String>,
}

/// Full `status.json` document (§4.9, §6).
#[derive(Debug, Clone, Serialize)]
pub struct StatusDocument {
    pub meta: StatusMeta,
    pub coordination: StatusCoordination,
    pub agents: HashMap<AgentId, AgentStatusView>,
    pub results: StatusResults,
}

impl StatusDocument {
    /// Truncate `text` to the first 200 characters for the `final_answer_preview`
    /// field, as §4.9 specifies, without splitting a multi-byte UTF-8 char.
    pub fn preview(text: &str) -> String {
        match text.char_indices().nth(200) {
            Some((idx, _)) => text[..idx].to_string(),
            None => text.to_string(),
        }
    }
}

fn phase_name(phase: CoordinationPhase) -> &'static str {
    match phase {
        CoordinationPhase::InitialAnswer => "initial_answer",
        CoordinationPhase::Enforcement => "enforcement",
        CoordinationPhase::Presentation => "presentation",
    }
}

/// Writes `status.json` into a session log directory, atomically, on a fixed
/// interval and once more at completion (§4.9).
pub struct StatusSnapshotter {
    path: PathBuf,
    session_id: String,
    started_at: DateTime<Utc>,
    interval: std::time::Duration,
}

impl StatusSnapshotter {
    pub fn new(log_dir: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            path: log_dir.into().join("status.json"),
            session_id: session_id.into(),
            started_at: Utc::now(),
            interval: std::time::Duration::from_secs(2),
        }
    }

    pub fn with_interval(mut self, interval: std::time::Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> std::time::Duration {
        self.interval
    }

    /// Build the document for the current instant. The caller assembles the
    /// raw pieces (this module has no access to the loop's internals) so it
    /// stays a pure, independently testable formatter plus the I/O writer.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        &self,
        phase: CoordinationPhase,
        active_agent: Option<AgentId>,
        is_final_presentation: bool,
        agents: &HashMap<AgentId, crate::types::AgentState>,
        vote_counts: HashMap<AnswerLabel, usize>,
        winner: Option<AnswerLabel>,
        final_answer: Option<&str>,
        global_remaining_seconds: Option<f64>,
    ) -> StatusDocument {
        StatusDocument {
            meta: StatusMeta {
                session_id: self.session_id.clone(),
                elapsed_seconds: (Utc::now() - self.started_at).num_milliseconds() as f64 / 1000.0,
                global_remaining_seconds,
            },
            coordination: StatusCoordination {
                phase: phase_name(phase).to_string(),
                active_agent,
                is_final_presentation,
            },
            agents: agents
                .iter()
                .map(|(id, state)| (id.clone(), AgentStatusView::from(state)))
                .collect(),
            results: StatusResults {
                vote_counts,
                winner: winner.clone(),
                final_answer_preview: final_answer.map(StatusDocument::preview),
            },
        }
    }

    /// Atomically write `doc` to `status.json`: write to a sibling temp file,
    /// then rename over the target, so readers never observe a partial write.
    pub fn write(&self, doc: &StatusDocument) -> io::Result<()> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;
        let tmp_path = parent.join(format!(
            ".status.json.tmp.{}",
            uuid::Uuid::new_v4().simple()
        ));
        let body = serde_json::to_vec_pretty(doc)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(&tmp_path, body)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
