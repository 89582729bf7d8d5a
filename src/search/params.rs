use crate::graph::metric::Metric;
use crate::policy::PolicyType;
use serde::Deserialize;
use serde::Serialize;

/// the q assigned to a tactic that is already known to solve its
/// goal when the selection policy is computed. counts below are
/// real visits, virtual counts the in-flight reservations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QValueSolved {
    /// `1 / (counts + virtual)`
    OneOverCounts,
    /// `counts / (counts + virtual)`
    CountOverCounts,
    /// constant 1
    One,
    /// `1 / (1 + virtual)`
    OneOverVirtualCounts,
    /// `1 / max(1, counts + virtual)`
    OneOverCountsNoFpu,
    /// `max(1, counts) / max(1, counts + virtual)`
    CountOverCountsNoFpu,
}

/// which nodes may emit tactic training samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeMask {
    /// every node
    NoMask,
    /// nodes with at least one solving tactic
    Solving,
    /// nodes participating in some proof of the root
    Proof,
    /// nodes participating in the metric-minimal proof
    MinimalProof,
    /// `MinimalProof` once the root is proven, `Solving` before
    MinimalProofSolving,
}

/// tuning knobs of one search instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SearchParams {
    /// puct / rpo exploration coefficient
    pub exploration: f64,
    pub policy_type: PolicyType,
    /// stop once this many expansions were merged
    pub num_expansions: usize,
    /// simulations per selection batch
    pub succ_expansions: usize,
    /// stop as soon as the root is solved
    pub early_stopping: bool,
    /// reserved: ignore critic values during backup
    pub no_critic: bool,
    /// a simulation equal to an already backed-up one only
    /// refreshes values, never counts
    pub backup_once: bool,
    /// back up log 1 at solved nodes regardless of critic
    pub backup_one_for_solved: bool,
    /// discount factor applied once per backup level, in log space
    pub depth_penalty: f64,
    /// minimum visits before a node emits tactic samples
    pub count_threshold: usize,
    /// minimum policy probability for a tactic to be sampled
    pub tactic_p_threshold: f64,
    /// emit q-conditioned tactic samples instead of regular ones
    pub tactic_sample_q_conditioning: bool,
    /// restrict solved-node tactic samples to minimum-proof tactics
    pub only_learn_best_tactics: bool,
    /// first-play-urgency baseline q for untried tactics
    pub tactic_init_value: f64,
    pub q_value_solved: QValueSolved,
    /// 0 selects the argmax; otherwise sample `p^(1/T)` normalized
    pub policy_temperature: f64,
    /// which cost the extracted "minimum proof" minimizes
    pub metric: Metric,
    pub node_mask: NodeMask,
    /// bernoulli keep-rate for effect samples
    pub effect_subsampling_rate: f64,
    /// bernoulli keep-rate for critic samples
    pub critic_subsampling_rate: f64,
    /// treat solved non-root nodes as leaves while the root is
    /// still unproven
    pub early_stopping_solved_if_root_not_proven: bool,
    /// virtual count added per in-flight reservation
    pub virtual_loss: usize,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            exploration: 1.0,
            policy_type: PolicyType::AlphaZero,
            num_expansions: 1000,
            succ_expansions: 16,
            early_stopping: true,
            no_critic: false,
            backup_once: false,
            backup_one_for_solved: false,
            depth_penalty: 1.0,
            count_threshold: 0,
            tactic_p_threshold: 0.0,
            tactic_sample_q_conditioning: false,
            only_learn_best_tactics: false,
            tactic_init_value: 0.0,
            q_value_solved: QValueSolved::OneOverCounts,
            policy_temperature: 0.0,
            metric: Metric::Depth,
            node_mask: NodeMask::NoMask,
            effect_subsampling_rate: 1.0,
            critic_subsampling_rate: 1.0,
            early_stopping_solved_if_root_not_proven: false,
            virtual_loss: 1,
        }
    }
}
