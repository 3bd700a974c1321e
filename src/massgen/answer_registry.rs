//! Append-only store of labeled answers (C2).
//!
//! Grounded in `cloudllm::orchestration`'s convergence-scoring `jaccard_similarity`
//! (word-set overlap over lowercased, alphanumeric-trimmed tokens) — this module
//! reuses that exact tokenization for the novelty check spec.md §4.2 requires,
//! adapted to the overlap formula the spec fixes (`|A∩B| / min(|A|,|B|)` rather
//! than Jaccard's `|A∩B| / |A∪B|`, since novelty cares about containment, not
//! symmetric similarity).

use crate::types::{make_label, AgentId, Answer, AnswerLabel, NoveltyRequirement, SnapshotId};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;

/// Outcome of [`AnswerRegistry::submit`].
#[derive(Debug, Clone)]
pub enum SubmissionOutcome {
    /// The answer was appended; carries its assigned label.
    Accepted(AnswerLabel),
    /// The answer was rejected and not appended.
    Rejected(RejectionReason),
}

/// Why a submission was rejected (§4.2, §7).
#[derive(Debug, Clone)]
pub enum RejectionReason {
    /// `answer_count[agent] >= max_answers_per_agent`.
    CapExceeded { cap: u32 },
    /// Token overlap with `offending_label` exceeded the configured threshold.
    InsufficientNovelty {
        offending_label: AnswerLabel,
        overlap: f64,
        threshold: f64,
    },
}

impl RejectionReason {
    /// Human-readable explanation suitable for returning to the agent as a
    /// tool-result error string (§7 "Rejected submission").
    pub fn message(&self) -> String {
        match self {
            RejectionReason::CapExceeded { cap } => format!(
                "answer cap reached ({cap} answers already submitted this attempt); vote instead"
            ),
            RejectionReason::InsufficientNovelty {
                offending_label,
                overlap,
                threshold,
            } => format!(
                "too similar to {offending_label} (overlap {overlap:.2} exceeds threshold {threshold:.2}); \
                 either refine substantially or vote for {offending_label}"
            ),
        }
    }
}

/// Append-only, insertion-ordered store of [`Answer`]s for a single coordination
/// attempt (spec.md §4.2).
pub struct AnswerRegistry {
    answers: Vec<Answer>,
    answer_count: std::collections::HashMap<AgentId, u32>,
    max_answers_per_agent: Option<u32>,
    novelty: NoveltyRequirement,
    attempt: u32,
}

impl AnswerRegistry {
    pub fn new(max_answers_per_agent: Option<u32>, novelty: NoveltyRequirement, attempt: u32) -> Self {
        Self {
            answers: Vec::new(),
            answer_count: std::collections::HashMap::new(),
            max_answers_per_agent,
            novelty,
            attempt,
        }
    }

    /// Submit a candidate answer from `agent_id`.
    ///
    /// Assigns `label = "{agent_id}.{n+1}"`, enforces the per-agent cap (I3) and,
    /// under `balanced`/`strict` novelty, the token-overlap ceiling (I4) against
    /// every existing answer from any agent. On acceptance the answer is appended
    /// in registry order — which is also acceptance order and tie-break order for
    /// elections (§4.3, concurrency §5).
    pub fn submit(
        &mut self,
        agent_id: &str,
        text: impl Into<Arc<str>>,
        workspace_snapshot_id: SnapshotId,
    ) -> SubmissionOutcome {
        let current = self.answer_count.get(agent_id).copied().unwrap_or(0);
        if let Some(cap) = self.max_answers_per_agent {
            if current >= cap {
                return SubmissionOutcome::Rejected(RejectionReason::CapExceeded { cap });
            }
        }

        let text: Arc<str> = text.into();

        if let Some(threshold) = self.novelty.threshold() {
            let candidate_tokens = tokenize(&text);
            for existing in &self.answers {
                let existing_tokens = tokenize(&existing.text);
                let overlap = token_overlap(&candidate_tokens, &existing_tokens);
                if overlap > threshold {
                    return SubmissionOutcome::Rejected(RejectionReason::InsufficientNovelty {
                        offending_label: existing.label.clone(),
                        overlap,
                        threshold,
                    });
                }
            }
        }

        let seq = current + 1;
        let label = make_label(agent_id, seq);
        self.answer_count.insert(agent_id.to_string(), seq);
        self.answers.push(Answer {
            label: label.clone(),
            agent_id: agent_id.to_string(),
            text,
            workspace_snapshot_id,
            submitted_at: Utc::now(),
            attempt: self.attempt,
        });
        log::debug!("answer registered: {label}");
        SubmissionOutcome::Accepted(label)
    }

    /// All answers in stable insertion order.
    pub fn list(&self) -> &[Answer] {
        &self.answers
    }

    /// Look up a single answer by label.
    pub fn get(&self, label: &str) -> Option<&Answer> {
        self.answers.iter().find(|a| a.label == label)
    }

    /// How many answers `agent_id` has submitted so far this attempt.
    pub fn answer_count(&self, agent_id: &str) -> u32 {
        self.answer_count.get(agent_id).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }
}

/// Lowercase, alphanumeric-extracted token set for novelty/overlap comparison.
///
/// Same normalization as `cloudllm::orchestration::Orchestration::jaccard_similarity`:
/// lowercase, split on whitespace, trim non-alphanumeric edges, drop words of length
/// <= 2. The exact tokenizer is intentionally frozen here (spec.md §9 open question)
/// rather than left to a stopword list, so novelty checks are reproducible in tests.
fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .filter(|w| w.len() > 2)
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

/// `|A∩B| / min(|A|,|B|)` as spec.md §4.2 defines novelty overlap — containment
/// rather than Jaccard's union-normalized similarity, since a short answer fully
/// contained in a longer one should still be flagged as non-novel.
fn token_overlap(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let denom = a.len().min(b.len());
    intersection as f64 / denom as f64
}
