//! Coordination tuning knobs (§12 of `SPEC_FULL.md`).
//!
//! Grounded in `cloudllm::config::CloudLLMConfig`: a plain struct with public
//! fields and a `Default` impl. Intentionally minimal — no TOML/YAML/env-file
//! parsing crate is introduced; callers build a `MassGenConfig` however suits
//! their application (literal, `..Default::default()`, or their own config
//! loader translating into it).

use crate::types::{NoveltyRequirement, VotingSensitivity};

/// Tuning knobs consumed by [`crate::coordination_loop::CoordinationLoop`].
///
/// The agent set itself is supplied separately to `CoordinationLoop::new`
/// rather than embedded here, since it carries trait objects
/// (`Box<dyn AgentBackend>`) that don't belong in a plain config struct.
#[derive(Debug, Clone, Copy)]
pub struct MassGenConfig {
    /// How picky agents are told to be about voting vs. submitting a new
    /// answer (§4.7). Does not change orchestrator-enforced behavior.
    pub voting_sensitivity: VotingSensitivity,
    /// Per-agent cap on answers submitted in one attempt. `None` means
    /// unbounded (I3).
    pub max_new_answers_per_agent: Option<u32>,
    /// How aggressively near-duplicate answers are rejected (I4).
    pub answer_novelty_requirement: NoveltyRequirement,
    /// Whole-attempt wall-clock budget, in seconds, before `GlobalTimeout`.
    /// `None` disables the global deadline entirely (§6: "any may be null →
    /// feature disabled").
    pub orchestrator_timeout_seconds: Option<u64>,
    /// Soft-deadline budget for an agent's first round in an attempt. `None`
    /// disables the round's soft/hard deadlines (§6).
    pub initial_round_timeout_seconds: Option<u64>,
    /// Soft-deadline budget for an agent's rounds after its first. `None`
    /// disables the round's soft/hard deadlines (§6).
    pub subsequent_round_timeout_seconds: Option<u64>,
    /// Extra time after the soft deadline before the hard deadline fires (I7).
    /// `None` disables the hard deadline; the soft wrap-up warning still fires.
    pub round_timeout_grace_seconds: Option<u64>,
    /// Maximum number of whole-attempt restarts before settling for
    /// `CoordinationOutcome::NoAnswer` (§4.9, B2).
    pub max_orchestration_restarts: u32,
}

impl Default for MassGenConfig {
    fn default() -> Self {
        Self {
            voting_sensitivity: VotingSensitivity::Balanced,
            max_new_answers_per_agent: Some(3),
            answer_novelty_requirement: NoveltyRequirement::Balanced,
            orchestrator_timeout_seconds: Some(1800),
            initial_round_timeout_seconds: Some(300),
            subsequent_round_timeout_seconds: Some(180),
            round_timeout_grace_seconds: Some(30),
            max_orchestration_restarts: 2,
        }
    }
}

impl MassGenConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_voting_sensitivity(mut self, sensitivity: VotingSensitivity) -> Self {
        self.voting_sensitivity = sensitivity;
        self
    }

    pub fn with_max_new_answers_per_agent(mut self, max: Option<u32>) -> Self {
        self.max_new_answers_per_agent = max;
        self
    }

    pub fn with_answer_novelty_requirement(mut self, novelty: NoveltyRequirement) -> Self {
        self.answer_novelty_requirement = novelty;
        self
    }

    /// Accepts a bare `u64` (enabled) or `None` (disabled) thanks to the
    /// blanket `impl<T> From<T> for Option<T>`.
    pub fn with_orchestrator_timeout_seconds(mut self, seconds: impl Into<Option<u64>>) -> Self {
        self.orchestrator_timeout_seconds = seconds.into();
        self
    }

    pub fn with_initial_round_timeout_seconds(mut self, seconds: impl Into<Option<u64>>) -> Self {
        self.initial_round_timeout_seconds = seconds.into();
        self
    }

    pub fn with_subsequent_round_timeout_seconds(mut self, seconds: impl Into<Option<u64>>) -> Self {
        self.subsequent_round_timeout_seconds = seconds.into();
        self
    }

    pub fn with_round_timeout_grace_seconds(mut self, seconds: impl Into<Option<u64>>) -> Self {
        self.round_timeout_grace_seconds = seconds.into();
        self
    }

    pub fn with_max_orchestration_restarts(mut self, max: u32) -> Self {
        self.max_orchestration_restarts = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_reasonable() {
        let cfg = MassGenConfig::default();
        assert_eq!(cfg.max_orchestration_restarts, 2);
        assert!(cfg.max_new_answers_per_agent.is_some());
    }

    #[test]
    fn builder_methods_chain() {
        let cfg = MassGenConfig::new()
            .with_voting_sensitivity(VotingSensitivity::Strict)
            .with_max_new_answers_per_agent(None)
            .with_orchestrator_timeout_seconds(60);
        assert_eq!(cfg.voting_sensitivity, VotingSensitivity::Strict);
        assert_eq!(cfg.max_new_answers_per_agent, None);
        assert_eq!(cfg.orchestrator_timeout_seconds, Some(60));
    }

    #[test]
    fn timeouts_can_be_disabled_with_a_bare_none() {
        let cfg = MassGenConfig::new()
            .with_orchestrator_timeout_seconds(None)
            .with_round_timeout_grace_seconds(None);
        assert_eq!(cfg.orchestrator_timeout_seconds, None);
        assert_eq!(cfg.round_timeout_grace_seconds, None);
    }
}
