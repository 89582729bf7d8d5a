use crate::goal::Goal;
use crate::goal::Tac;
use crate::LogValue;
use crate::Probability;
use serde::Deserialize;
use serde::Serialize;

/// where a sampled node sits relative to the proof of the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InProof {
    NotInProof,
    IsInProof,
    InMinimalProof,
}

/// critic training sample: the value estimate of one goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticSample {
    pub goal: Goal,
    /// `exp` of the node value, in [0, 1]
    pub q_estimate: Probability,
    pub solved: bool,
    /// the node is terminal without being a solved leaf
    pub bad: bool,
    /// raw critic estimate in log space
    pub critic: LogValue,
    pub visit_count: usize,
}

/// tactic-policy training sample: the tactics worth learning at
/// one goal. `target_pi` is parallel to `tactics`; `q_estimates`
/// is parallel as well but only present under q-conditioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TacticSample {
    pub goal: Goal,
    pub tactics: Vec<Tac>,
    pub target_pi: Vec<Probability>,
    pub inproof: InProof,
    pub q_estimates: Vec<f64>,
    pub visit_count: usize,
}

/// effect training sample: one observed hyper-edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectSample {
    pub goal: Goal,
    pub tactic: Tac,
    pub children: Vec<Goal>,
}
