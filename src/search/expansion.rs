use crate::goal::Goal;
use crate::goal::Tac;
use crate::LogValue;
use crate::Millis;
use crate::Prior;
use crate::LOG_ZERO;
use serde::Deserialize;
use serde::Serialize;

/// one hyper-edge the environment observed while expanding a
/// goal: applying `tactic` at `goal` produced `children`. stored
/// on the node and emitted as effect training samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    pub goal: Goal,
    pub tactic: Tac,
    pub children: Vec<Goal>,
}

/// everything the external expander returns for one goal: the
/// candidate tactics with their child tuples and priors, the
/// critic estimate in log space, observed effects, and timing
/// telemetry. the error variant carries a message instead of
/// tactics and leads to a dead node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expansion {
    pub goal: Goal,
    pub expander_duration: Millis,
    pub generation_duration: Millis,
    pub env_durations: Vec<Millis>,
    pub effects: Vec<Effect>,
    pub log_critic: LogValue,
    pub tactics: Vec<Tac>,
    pub children_for_tactic: Vec<Vec<Goal>>,
    pub priors: Vec<Prior>,
    pub error: Option<String>,
}

impl Expansion {
    pub fn success(
        goal: Goal,
        log_critic: LogValue,
        tactics: Vec<Tac>,
        children_for_tactic: Vec<Vec<Goal>>,
        priors: Vec<Prior>,
        effects: Vec<Effect>,
    ) -> Self {
        Self {
            goal,
            expander_duration: 0,
            generation_duration: 0,
            env_durations: vec![],
            effects,
            log_critic,
            tactics,
            children_for_tactic,
            priors,
            error: None,
        }
    }

    pub fn failure(goal: Goal, error: impl Into<String>) -> Self {
        Self {
            goal,
            expander_duration: 0,
            generation_duration: 0,
            env_durations: vec![],
            effects: vec![],
            log_critic: LOG_ZERO,
            tactics: vec![],
            children_for_tactic: vec![],
            priors: vec![],
            error: Some(error.into()),
        }
    }

    pub fn timed(self, expander: Millis, generation: Millis, env: Vec<Millis>) -> Self {
        Self {
            expander_duration: expander,
            generation_duration: generation,
            env_durations: env,
            ..self
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
