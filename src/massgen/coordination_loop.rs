//! The top-level coordination state machine (C7).
//!
//! Grounded in `cloudllm::orchestration::Orchestration`'s `run` loop shape
//! (fan out → collect → decide) and in its `agent_order` pattern for keeping
//! iteration deterministic; the single-writer event consumer described in
//! spec.md §5 is implemented the way the teacher's async code generally
//! structures concurrent work: each participant runs on its own task, and a
//! single `tokio::sync::mpsc` channel funnels their outcomes back to one
//! consumer loop that is the only place attempt-level state changes.

use crate::agent_runner::{AgentBackend, AgentResult, ConversationTurn, Role, ToolGate};
use crate::answer_registry::AnswerRegistry;
use crate::config::MassGenConfig;
use crate::event::{CoordinationEvent, SharedEventHandler};
use crate::injection_router::{InjectionDecision, InjectionRouter};
use crate::presentation::{OutputSink, PresentationStage};
use crate::status_snapshotter::StatusSnapshotter;
use crate::timeout_controller::TimeoutController;
use crate::types::{AgentId, AgentState, AgentStatus, AnswerLabel, CoordinationPhase, RoundKind};
use crate::vote_tally::VoteTally;
use crate::workspace_manager::{WorkspaceError, WorkspaceManager};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Fatal setup failure; everything else ends the session with a
/// [`CoordinationOutcome`] instead (§7: "the loop never raises to its caller
/// except for catastrophic global failures").
#[derive(Debug)]
pub enum CoordinationError {
    NoAgentsConfigured,
    Workspace(WorkspaceError),
}

impl std::fmt::Display for CoordinationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinationError::NoAgentsConfigured => write!(f, "no agents configured"),
            CoordinationError::Workspace(e) => write!(f, "workspace setup failed: {e}"),
        }
    }
}

impl std::error::Error for CoordinationError {}

/// How a whole session ended (§7).
#[derive(Debug, Clone)]
pub enum CoordinationOutcome {
    ElectedWinner {
        agent_id: AgentId,
        label: AnswerLabel,
        final_text: Arc<str>,
    },
    NoAnswer {
        reason: String,
    },
    GlobalTimeout {
        leader: Option<AnswerLabel>,
        final_text: Option<Arc<str>>,
    },
}

struct ElectedAnswer {
    agent_id: AgentId,
    label: AnswerLabel,
    text: Arc<str>,
    workspace: Arc<Mutex<WorkspaceManager>>,
}

/// Everything `run()` needs to write a final `status.json` after `present()`
/// returns, once the per-attempt state (`agent_states`, `registry`, `tally`)
/// backing `build_status_document` has gone out of scope (§4.9: "and once at
/// completion").
struct AttemptSummary {
    agent_states: HashMap<AgentId, AgentState>,
    vote_counts: HashMap<AnswerLabel, usize>,
    winner: Option<AnswerLabel>,
}

enum AttemptOutcome {
    Elected(ElectedAnswer, AttemptSummary),
    NoAnswer { reason: String, summary: AttemptSummary },
    GlobalTimeout { elected: Option<ElectedAnswer>, summary: AttemptSummary },
}

struct RunningAgent {
    inject_tx: mpsc::Sender<Arc<str>>,
    handle: JoinHandle<()>,
}

/// Drives the whole coordination session for one configured set of agents.
///
/// Built with the teacher's `with_*` chain idiom
/// (`CoordinationLoop::new(..).with_gate(..).with_output(..)`), matching
/// `Orchestration::new(...).with_mode(...).with_max_tokens(...)`.
pub struct CoordinationLoop {
    config: MassGenConfig,
    agents: Vec<(AgentId, Arc<dyn AgentBackend>)>,
    gate: Arc<dyn ToolGate>,
    output: Arc<dyn OutputSink>,
    events: SharedEventHandler,
    workspace_root: PathBuf,
    status: Option<StatusSnapshotter>,
}

impl CoordinationLoop {
    pub fn new(
        config: MassGenConfig,
        agents: Vec<(AgentId, Arc<dyn AgentBackend>)>,
        workspace_root: impl Into<PathBuf>,
        gate: Arc<dyn ToolGate>,
        output: Arc<dyn OutputSink>,
        events: SharedEventHandler,
    ) -> Self {
        Self {
            config,
            agents,
            gate,
            output,
            events,
            workspace_root: workspace_root.into(),
            status: None,
        }
    }

    pub fn with_status_snapshotter(mut self, snapshotter: StatusSnapshotter) -> Self {
        self.status = Some(snapshotter);
        self
    }

    fn backend_for(&self, agent_id: &str) -> Arc<dyn AgentBackend> {
        self.agents
            .iter()
            .find(|(id, _)| id == agent_id)
            .map(|(_, backend)| backend.clone())
            .expect("agent_id refers to a configured agent")
    }

    /// Run the whole session to completion: one or more attempts, each ending
    /// in presentation, bounded by `max_orchestration_restarts` (P9).
    pub async fn run(&self, question: impl Into<Arc<str>>) -> Result<CoordinationOutcome, CoordinationError> {
        if self.agents.is_empty() {
            return Err(CoordinationError::NoAgentsConfigured);
        }
        let question = question.into();

        let controller = Arc::new(Mutex::new(TimeoutController::new(
            self.config.orchestrator_timeout_seconds.map(Duration::from_secs),
            self.config.initial_round_timeout_seconds.map(Duration::from_secs),
            self.config.subsequent_round_timeout_seconds.map(Duration::from_secs),
            self.config.round_timeout_grace_seconds.map(Duration::from_secs),
        )));

        let mut attempt = 0u32;
        let mut extra_instruction: Option<Arc<str>> = None;

        loop {
            self.events
                .on_event(&CoordinationEvent::AttemptStarted {
                    attempt,
                    agent_ids: self.agents.iter().map(|(id, _)| id.clone()).collect(),
                })
                .await;

            let outcome = self
                .run_attempt(attempt, question.clone(), extra_instruction.clone(), &controller)
                .await?;

            match outcome {
                AttemptOutcome::NoAnswer { reason, summary } => {
                    self.write_final_status(&controller, summary, None, None).await;
                    return Ok(CoordinationOutcome::NoAnswer { reason });
                }
                AttemptOutcome::GlobalTimeout { elected: None, summary } => {
                    self.write_final_status(&controller, summary, None, None).await;
                    return Ok(CoordinationOutcome::NoAnswer {
                        reason: "global_timeout".to_string(),
                    });
                }
                AttemptOutcome::GlobalTimeout { elected: Some(elected), summary } => {
                    let label = elected.label.clone();
                    let presented = self.present(attempt, &elected, extra_instruction.as_deref()).await;
                    self.write_final_status(&controller, summary, Some(label.clone()), Some(presented.final_text.clone()))
                        .await;
                    return Ok(CoordinationOutcome::GlobalTimeout {
                        leader: Some(label),
                        final_text: Some(presented.final_text),
                    });
                }
                AttemptOutcome::Elected(elected, summary) => {
                    let label = elected.label.clone();
                    let agent_id = elected.agent_id.clone();
                    let presented = self.present(attempt, &elected, extra_instruction.as_deref()).await;
                    self.events
                        .on_event(&CoordinationEvent::WinnerElected {
                            label: label.clone(),
                            agent_id: agent_id.clone(),
                            tied: false,
                        })
                        .await;

                    if let Some(reason) = presented.restart_reason {
                        if attempt < self.config.max_orchestration_restarts {
                            self.events
                                .on_event(&CoordinationEvent::AttemptRestarted {
                                    previous_attempt: attempt,
                                    next_attempt: attempt + 1,
                                })
                                .await;
                            attempt += 1;
                            extra_instruction = Some(Arc::from(reason));
                            continue;
                        }
                    }

                    self.write_final_status(&controller, summary, Some(label.clone()), Some(presented.final_text.clone()))
                        .await;
                    return Ok(CoordinationOutcome::ElectedWinner {
                        agent_id,
                        label,
                        final_text: presented.final_text,
                    });
                }
            }
        }
    }

    async fn present(
        &self,
        attempt: u32,
        elected: &ElectedAnswer,
        extra_instruction: Option<&str>,
    ) -> crate::presentation::PresentationOutcome {
        let stage = PresentationStage::new(elected.workspace.clone(), self.output.clone(), self.events.clone());
        let backend = self.backend_for(&elected.agent_id);
        let outcome = stage
            .present(&elected.agent_id, &elected.label, &elected.text, backend, extra_instruction)
            .await;
        self.events
            .on_event(&CoordinationEvent::AttemptCompleted { attempt, tokens: None })
            .await;
        outcome
    }

    /// Write `status.json` one last time after `present()` has returned, with
    /// `is_final_presentation=true` and the real winner/phase (§4.9: "and once
    /// at completion").
    async fn write_final_status(
        &self,
        controller: &Arc<Mutex<TimeoutController>>,
        summary: AttemptSummary,
        winner: Option<AnswerLabel>,
        final_answer: Option<Arc<str>>,
    ) {
        let Some(snapshotter) = &self.status else { return };
        let global_remaining_seconds = self.global_remaining_seconds(controller).await;
        let doc = snapshotter.build(
            CoordinationPhase::Presentation,
            None,
            true,
            &summary.agent_states,
            summary.vote_counts,
            winner.or(summary.winner),
            final_answer.as_deref(),
            global_remaining_seconds,
        );
        if let Err(e) = snapshotter.write(&doc) {
            log::warn!("failed to write final status.json: {e}");
        }
    }

    async fn spawn_round(
        &self,
        agent_id: AgentId,
        backend: Arc<dyn AgentBackend>,
        registry: Arc<Mutex<AnswerRegistry>>,
        tally: Arc<Mutex<VoteTally>>,
        workspace: Arc<Mutex<WorkspaceManager>>,
        conversation: Vec<ConversationTurn>,
        deadline: crate::types::Deadline,
        results_tx: mpsc::Sender<(AgentId, AgentResult)>,
    ) -> (mpsc::Sender<Arc<str>>, JoinHandle<()>) {
        let (inject_tx, inject_rx) = mpsc::channel(16);
        let gate = self.gate.clone();
        let events = self.events.clone();
        let id_for_task = agent_id.clone();
        let handle = tokio::spawn(async move {
            let mut runner =
                crate::agent_runner::AgentRunner::new(id_for_task.clone(), registry, tally, workspace, gate, events);
            let result = runner.run(backend, conversation, deadline, inject_rx).await;
            let _ = results_tx.send((id_for_task, result)).await;
        });
        (inject_tx, handle)
    }

    async fn conversation_with_registered_answers(
        &self,
        seed: &[ConversationTurn],
        registry: &Arc<Mutex<AnswerRegistry>>,
    ) -> Vec<ConversationTurn> {
        let mut convo = seed.to_vec();
        let reg = registry.lock().await;
        for answer in reg.list() {
            convo.push(ConversationTurn::new(
                Role::System,
                format!(
                    "Agent {} submitted answer {}: {}",
                    answer.agent_id, answer.label, answer.text
                ),
            ));
        }
        convo
    }

    /// Also materializes a read-only peer view of each labeled answer's source
    /// workspace for `agent_id` (§4.5), so the injected text and the
    /// filesystem agree about what's newly visible.
    async fn injection_message(
        &self,
        agent_id: &str,
        labels: &[AnswerLabel],
        registry: &Arc<Mutex<AnswerRegistry>>,
        workspace: &Arc<Mutex<WorkspaceManager>>,
    ) -> Arc<str> {
        let reg = registry.lock().await;
        let mut parts = Vec::with_capacity(labels.len());
        for label in labels {
            let Some(answer) = reg.get(label) else { continue };
            let mut part =
                format!("Agent {} has submitted answer {}, here it is: {}", answer.agent_id, answer.label, answer.text);
            match workspace.lock().await.peer_view(agent_id, &answer.agent_id) {
                Ok(Some(path)) => part.push_str(&format!(" (workspace view at {})", path.display())),
                Ok(None) => {}
                Err(e) => log::warn!("peer view for {agent_id} of {}: {e}", answer.agent_id),
            }
            parts.push(part);
        }
        Arc::from(parts.join("\n"))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_attempt(
        &self,
        attempt: u32,
        question: Arc<str>,
        extra_instruction: Option<Arc<str>>,
        controller: &Arc<Mutex<TimeoutController>>,
    ) -> Result<AttemptOutcome, CoordinationError> {
        let registry = Arc::new(Mutex::new(AnswerRegistry::new(
            self.config.max_new_answers_per_agent,
            self.config.answer_novelty_requirement,
            attempt,
        )));
        let tally = Arc::new(Mutex::new(VoteTally::new()));
        let workspace = Arc::new(Mutex::new(
            WorkspaceManager::new(self.workspace_root.join(format!("attempt-{attempt}")))
                .map_err(CoordinationError::Workspace)?,
        ));
        let mut injection_router = InjectionRouter::new(
            self.config
                .round_timeout_grace_seconds
                .map(Duration::from_secs)
                .unwrap_or(Duration::ZERO),
        );
        let mut agent_states: HashMap<AgentId, AgentState> =
            self.agents.iter().map(|(id, _)| (id.clone(), AgentState::new())).collect();

        let mut seed = vec![ConversationTurn::new(Role::User, question)];
        if let Some(extra) = &extra_instruction {
            seed.push(ConversationTurn::new(Role::System, extra.clone()));
        }

        let (results_tx, mut results_rx) = mpsc::channel::<(AgentId, AgentResult)>(32);
        let mut running: HashMap<AgentId, RunningAgent> = HashMap::new();

        for (agent_id, backend) in &self.agents {
            let deadline = {
                let mut ctl = controller.lock().await;
                ctl.start_round(agent_id, RoundKind::Initial)
            };
            let (inject_tx, handle) = self
                .spawn_round(
                    agent_id.clone(),
                    backend.clone(),
                    registry.clone(),
                    tally.clone(),
                    workspace.clone(),
                    seed.clone(),
                    deadline,
                    results_tx.clone(),
                )
                .await;
            running.insert(agent_id.clone(), RunningAgent { inject_tx, handle });
            if let Some(state) = agent_states.get_mut(agent_id) {
                state.status = AgentStatus::Streaming;
            }
            self.events
                .on_event(&CoordinationEvent::RoundStarted { agent_id: agent_id.clone() })
                .await;
        }

        let mut phase = CoordinationPhase::InitialAnswer;
        self.events.on_event(&CoordinationEvent::PhaseChanged { phase }).await;

        let status_interval = self
            .status
            .as_ref()
            .map(|s| s.interval())
            .unwrap_or(Duration::from_secs(2));
        let mut tick = tokio::time::interval(status_interval);

        loop {
            tokio::select! {
                maybe = results_rx.recv() => {
                    let Some((agent_id, result)) = maybe else { continue };
                    running.remove(&agent_id);
                    {
                        let mut ctl = controller.lock().await;
                        ctl.clear_round(&agent_id);
                    }
                    // The first result back ends the pure fan-out phase: from
                    // here on the loop is reacting to injections/restarts/votes.
                    if matches!(phase, CoordinationPhase::InitialAnswer) {
                        phase = CoordinationPhase::Enforcement;
                        self.events.on_event(&CoordinationEvent::PhaseChanged { phase }).await;
                    }
                    self.apply_result(
                        &agent_id,
                        &result,
                        &mut agent_states,
                        &registry,
                        &mut running,
                        &mut injection_router,
                        &tally,
                        &workspace,
                        &results_tx,
                        controller,
                        &seed,
                    )
                    .await;
                }
                _ = tick.tick() => {
                    if let Some(snapshotter) = &self.status {
                        let doc = self
                            .build_status_document(snapshotter, phase, &agent_states, &registry, &tally, controller)
                            .await;
                        if let Err(e) = snapshotter.write(&doc) {
                            log::warn!("failed to write status.json: {e}");
                        }
                    }
                    let elapsed = {
                        let ctl = controller.lock().await;
                        ctl.is_global_elapsed(tokio::time::Instant::now())
                    };
                    if elapsed {
                        self.events.on_event(&CoordinationEvent::GlobalDeadlineElapsed).await;
                        for (_, running_agent) in running.drain() {
                            running_agent.handle.abort();
                        }
                        let (elected, summary) = self.elect(&agent_states, &registry, &tally, &workspace).await;
                        return Ok(AttemptOutcome::GlobalTimeout { elected, summary });
                    }
                }
            }

            if let Some(outcome) = self.check_consensus(&agent_states, &registry, &tally, &workspace).await {
                return Ok(outcome);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_result(
        &self,
        agent_id: &AgentId,
        result: &AgentResult,
        agent_states: &mut HashMap<AgentId, AgentState>,
        registry: &Arc<Mutex<AnswerRegistry>>,
        running: &mut HashMap<AgentId, RunningAgent>,
        injection_router: &mut InjectionRouter,
        tally: &Arc<Mutex<VoteTally>>,
        workspace: &Arc<Mutex<WorkspaceManager>>,
        results_tx: &mpsc::Sender<(AgentId, AgentResult)>,
        controller: &Arc<Mutex<TimeoutController>>,
        seed: &[ConversationTurn],
    ) {
        if let Some(state) = agent_states.get_mut(agent_id) {
            state.last_activity = chrono::Utc::now();
            match result {
                AgentResult::Answered(label) => {
                    state.status = AgentStatus::Answered;
                    state.answer_count += 1;
                    state.latest_answer_label = Some(label.clone());
                }
                AgentResult::Voted(_) => {
                    state.status = AgentStatus::Voted;
                    state.vote_cast = true;
                }
                AgentResult::NoProgress { .. } => {
                    state.status = AgentStatus::Waiting;
                }
                AgentResult::Errored { detail, .. } => {
                    state.status = AgentStatus::Error;
                    state.error = Some(detail.clone());
                }
                AgentResult::TimedOut => {
                    state.status = AgentStatus::Timeout;
                }
            }
        }

        if let AgentResult::Errored { detail, .. } = result {
            self.events
                .on_event(&CoordinationEvent::AgentErrored {
                    agent_id: agent_id.clone(),
                    message: detail.clone(),
                })
                .await;
        }

        let AgentResult::Answered(_) = result else { return };

        let all_labels: Vec<AnswerLabel> = { registry.lock().await.list().iter().map(|a| a.label.clone()).collect() };
        // Eligibility for injection/restart tracks whether an agent can still
        // act this attempt, not whether it currently has a live task in
        // `running`. spec.md §4.4 treats voting and injection as orthogonal,
        // so an agent that has already voted stays eligible here (a vote ends
        // its round, not its ability to be woken by a later restart); only a
        // terminal error/timeout or an exhausted answer budget removes it.
        let cap = self.config.max_new_answers_per_agent;
        let peer_ids: Vec<AgentId> = self
            .agents
            .iter()
            .map(|(id, _)| id.clone())
            .filter(|id| id != agent_id)
            .filter(|id| {
                agent_states
                    .get(id)
                    .map(|state| {
                        let capped = cap.is_some_and(|c| state.answer_count >= c);
                        !matches!(state.status, AgentStatus::Error | AgentStatus::Timeout) && !capped
                    })
                    .unwrap_or(false)
            })
            .collect();

        for peer_id in peer_ids {
            let remaining = {
                let ctl = controller.lock().await;
                ctl.round_deadline(&peer_id)
                    .map(|d| d.remaining_until_soft(tokio::time::Instant::now()))
                    .unwrap_or_default()
            };
            let decision = injection_router.route(&peer_id, &all_labels, remaining);
            match decision {
                InjectionDecision::Inject { labels } => {
                    let message = self.injection_message(&peer_id, &labels, registry, workspace).await;
                    if let Some(running_peer) = running.get(&peer_id) {
                        let _ = running_peer.inject_tx.send(message).await;
                        self.events
                            .on_event(&CoordinationEvent::InjectionSent { agent_id: peer_id.clone(), labels })
                            .await;
                    }
                }
                InjectionDecision::Restart => {
                    if let Some(running_peer) = running.remove(&peer_id) {
                        running_peer.handle.abort();
                    }
                    {
                        let mut ctl = controller.lock().await;
                        ctl.clear_round(&peer_id);
                    }
                    // Drop the peer's live workspace view before it starts a
                    // fresh round so a restarted agent can't pick up partial
                    // writes from the aborted one (§4.5).
                    if let Err(e) = workspace.lock().await.clear_live(&peer_id) {
                        log::warn!("failed to clear live workspace for {peer_id}: {e}");
                    }
                    let deadline = {
                        let mut ctl = controller.lock().await;
                        ctl.start_round(&peer_id, RoundKind::Subsequent)
                    };
                    let convo = self.conversation_with_registered_answers(seed, registry).await;
                    let backend = self.backend_for(&peer_id);
                    let (inject_tx, handle) = self
                        .spawn_round(
                            peer_id.clone(),
                            backend,
                            registry.clone(),
                            tally.clone(),
                            workspace.clone(),
                            convo,
                            deadline,
                            results_tx.clone(),
                        )
                        .await;
                    running.insert(peer_id.clone(), RunningAgent { inject_tx, handle });
                    injection_router.mark_all_delivered(&peer_id, &all_labels);
                    let times_restarted = if let Some(state) = agent_states.get_mut(&peer_id) {
                        state.times_restarted += 1;
                        state.status = AgentStatus::Streaming;
                        state.times_restarted
                    } else {
                        0
                    };
                    self.events
                        .on_event(&CoordinationEvent::AgentRestarted { agent_id: peer_id.clone(), times_restarted })
                        .await;
                }
                InjectionDecision::Nothing => {}
            }
        }
    }

    /// Vote counts plus the current tie-break leader, shared by the periodic
    /// and final status documents and by consensus/timeout election so all
    /// three agree on "who's winning right now".
    async fn tally_snapshot(
        &self,
        registry: &Arc<Mutex<AnswerRegistry>>,
        tally: &Arc<Mutex<VoteTally>>,
    ) -> (Vec<AnswerLabel>, HashMap<AnswerLabel, usize>, Option<AnswerLabel>) {
        let order: Vec<AnswerLabel> = { registry.lock().await.list().iter().map(|a| a.label.clone()).collect() };
        let t = tally.lock().await;
        let mut vote_counts = HashMap::new();
        for vote in t.all_votes() {
            *vote_counts.entry(vote.target_label.clone()).or_insert(0) += 1;
        }
        let winner = t.leader(&order).map(|l| l.label);
        (order, vote_counts, winner)
    }

    async fn global_remaining_seconds(&self, controller: &Arc<Mutex<TimeoutController>>) -> Option<f64> {
        let ctl = controller.lock().await;
        let remaining = ctl.global_remaining(tokio::time::Instant::now());
        (remaining != Duration::MAX).then(|| remaining.as_secs_f64())
    }

    async fn check_consensus(
        &self,
        agent_states: &HashMap<AgentId, AgentState>,
        registry: &Arc<Mutex<AnswerRegistry>>,
        tally: &Arc<Mutex<VoteTally>>,
        workspace: &Arc<Mutex<WorkspaceManager>>,
    ) -> Option<AttemptOutcome> {
        let active_agents: Vec<AgentId> = self.agents.iter().map(|(id, _)| id.clone()).collect();
        let cap = self.config.max_new_answers_per_agent;

        let decided = {
            let t = tally.lock().await;
            t.all_participants_decided(&active_agents, |id| {
                agent_states.get(id).map(|state| state.is_decided(cap)).unwrap_or(true)
            })
        };
        if !decided {
            return None;
        }

        let (order, vote_counts, winner) = self.tally_snapshot(registry, tally).await;
        let summary = AttemptSummary {
            agent_states: agent_states.clone(),
            vote_counts,
            winner: winner.clone(),
        };

        if order.is_empty() {
            return Some(AttemptOutcome::NoAnswer {
                reason: "no_answers_registered".to_string(),
                summary,
            });
        }

        let label = winner.unwrap_or_else(|| order[0].clone());
        let reg = registry.lock().await;
        let answer = reg.get(&label).expect("leader label exists in registry").clone();
        Some(AttemptOutcome::Elected(
            ElectedAnswer {
                agent_id: answer.agent_id,
                label: answer.label,
                text: answer.text,
                workspace: workspace.clone(),
            },
            summary,
        ))
    }

    async fn elect(
        &self,
        agent_states: &HashMap<AgentId, AgentState>,
        registry: &Arc<Mutex<AnswerRegistry>>,
        tally: &Arc<Mutex<VoteTally>>,
        workspace: &Arc<Mutex<WorkspaceManager>>,
    ) -> (Option<ElectedAnswer>, AttemptSummary) {
        let (order, vote_counts, winner) = self.tally_snapshot(registry, tally).await;
        let summary = AttemptSummary {
            agent_states: agent_states.clone(),
            vote_counts,
            winner: winner.clone(),
        };
        if order.is_empty() {
            return (None, summary);
        }
        let label = winner.unwrap_or_else(|| order[0].clone());
        let reg = registry.lock().await;
        let elected = reg.get(&label).map(|answer| ElectedAnswer {
            agent_id: answer.agent_id.clone(),
            label: answer.label.clone(),
            text: answer.text.clone(),
            workspace: workspace.clone(),
        });
        (elected, summary)
    }

    async fn build_status_document(
        &self,
        snapshotter: &StatusSnapshotter,
        phase: CoordinationPhase,
        agent_states: &HashMap<AgentId, AgentState>,
        registry: &Arc<Mutex<AnswerRegistry>>,
        tally: &Arc<Mutex<VoteTally>>,
        controller: &Arc<Mutex<TimeoutController>>,
    ) -> crate::status_snapshotter::StatusDocument {
        let (_, vote_counts, winner) = self.tally_snapshot(registry, tally).await;
        let reg = registry.lock().await;
        let global_remaining_seconds = self.global_remaining_seconds(controller).await;
        snapshotter.build(
            phase,
            None,
            false,
            agent_states,
            vote_counts,
            winner,
            reg.list().last().map(|a| a.text.as_ref()),
            global_remaining_seconds,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_runner::test_support::{AllowAllGate, MockBackend};
    use crate::agent_runner::{Chunk, DoneReason};
    use crate::event::NullEventHandler;
    use crate::presentation::NullOutputSink;
    use crate::types::NoveltyRequirement;
    use serde_json::json;

    fn cfg() -> MassGenConfig {
        MassGenConfig::new()
            .with_max_new_answers_per_agent(Some(1))
            .with_answer_novelty_requirement(NoveltyRequirement::Lenient)
            .with_orchestrator_timeout_seconds(30)
            .with_initial_round_timeout_seconds(10)
            .with_subsequent_round_timeout_seconds(10)
            .with_round_timeout_grace_seconds(2)
            .with_max_orchestration_restarts(0)
    }

    #[tokio::test]
    async fn two_agents_one_converges() {
        // Both agents submit an answer and immediately exhaust their cap, so
        // quorum is reached on cap-exhaustion alone — no voting is involved,
        // which keeps this test free of a race on vote-before-registration.
        let tmp = tempfile::tempdir().unwrap();
        let a_backend: Arc<dyn AgentBackend> = Arc::new(MockBackend::new(vec![Chunk::ToolCall {
            id: "1".to_string(),
            name: crate::agent_runner::TOOL_NEW_ANSWER.to_string(),
            args: json!({"text": "Paris is the capital of France."}),
        }]));
        let b_backend: Arc<dyn AgentBackend> = Arc::new(MockBackend::new(vec![Chunk::ToolCall {
            id: "2".to_string(),
            name: crate::agent_runner::TOOL_NEW_ANSWER.to_string(),
            args: json!({"text": "The chemical symbol for gold is Au."}),
        }]));

        let loop_ = CoordinationLoop::new(
            cfg(),
            vec![("a".to_string(), a_backend), ("b".to_string(), b_backend)],
            tmp.path(),
            Arc::new(AllowAllGate),
            Arc::new(NullOutputSink),
            Arc::new(NullEventHandler),
        );

        let outcome = loop_.run("What is the capital of France?").await.unwrap();
        match outcome {
            CoordinationOutcome::ElectedWinner { label, agent_id, .. } => {
                // No votes were cast, so the earliest-registered answer wins
                // the FIFO tie-break; either agent may have registered first.
                assert!(label == "a.1" || label == "b.1");
                assert!(agent_id == "a" || agent_id == "b");
            }
            other => panic!("expected ElectedWinner, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn single_agent_auto_elects_its_own_answer() {
        let tmp = tempfile::tempdir().unwrap();
        let backend: Arc<dyn AgentBackend> = Arc::new(MockBackend::new(vec![Chunk::ToolCall {
            id: "1".to_string(),
            name: crate::agent_runner::TOOL_NEW_ANSWER.to_string(),
            args: json!({"text": "42"}),
        }]));

        let loop_ = CoordinationLoop::new(
            cfg(),
            vec![("solo".to_string(), backend)],
            tmp.path(),
            Arc::new(AllowAllGate),
            Arc::new(NullOutputSink),
            Arc::new(NullEventHandler),
        );

        let outcome = loop_.run("What is the answer to everything?").await.unwrap();
        assert!(matches!(outcome, CoordinationOutcome::ElectedWinner { .. }));
    }

    #[tokio::test]
    async fn no_agents_configured_is_a_setup_error() {
        let tmp = tempfile::tempdir().unwrap();
        let loop_ = CoordinationLoop::new(
            cfg(),
            vec![],
            tmp.path(),
            Arc::new(AllowAllGate),
            Arc::new(NullOutputSink),
            Arc::new(NullEventHandler),
        );
        let err = loop_.run("question").await.unwrap_err();
        assert!(matches!(err, CoordinationError::NoAgentsConfigured));
    }

    #[tokio::test]
    async fn global_timeout_with_no_answers_yields_no_answer() {
        let tmp = tempfile::tempdir().unwrap();
        // A backend that never completes within the tiny global budget.
        let backend: Arc<dyn AgentBackend> = Arc::new(MockBackend::new(vec![]));
        let mut config = cfg();
        config = config
            .with_orchestrator_timeout_seconds(0)
            .with_initial_round_timeout_seconds(3600);
        let loop_ = CoordinationLoop::new(
            config,
            vec![("a".to_string(), backend)],
            tmp.path(),
            Arc::new(AllowAllGate),
            Arc::new(NullOutputSink),
            Arc::new(NullEventHandler),
        );
        let outcome = loop_.run("slow question").await.unwrap();
        match outcome {
            CoordinationOutcome::NoAnswer { reason } => assert_eq!(reason, "global_timeout"),
            other => panic!("expected NoAnswer, got {other:?}"),
        }
    }

    #[allow(dead_code)]
    fn silence_unused_done_import() -> DoneReason {
        DoneReason::Stop
    }
}
