use super::metric::Metric;
use super::metric::MetricMap;
use crate::goal::Goal;
use crate::goal::Tac;
use crate::policy::Policy;
use crate::search::error::SearchError;
use crate::search::expansion::Effect;
use crate::search::params::NodeMask;
use crate::search::params::QValueSolved;
use crate::search::sample::CriticSample;
use crate::search::sample::EffectSample;
use crate::search::sample::InProof;
use crate::search::sample::TacticSample;
use crate::LogValue;
use crate::Prior;
use crate::Probability;
use crate::LOG_ZERO;
use crate::PRIOR_SUM_HI;
use crate::PRIOR_SUM_LO;
use crate::SOLVED_LOG_VALUE;
use rand::rngs::SmallRng;
use rand::Rng;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::BTreeSet;

fn invalid(detail: &str) -> SearchError {
    SearchError::InvalidExpansion {
        detail: detail.to_string(),
    }
}

/// per-goal state of the hypergraph. a node owns the candidate
/// tactics delivered by the expander, the child tuple and prior
/// of each, and every statistic the search accumulates on top:
/// kill and solve sets, expandable flags, visit counts, virtual
/// reservations, the running log-sum of backed-up values, the
/// critic estimate, and the minimum-proof bookkeeping per metric.
///
/// nodes are created once per goal and never deleted; only their
/// tactics can be killed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    goal: Goal,
    tactics: Vec<Tac>,
    children_for_tactic: Vec<Vec<Goal>>,
    priors: Vec<Prior>,
    expandable: Vec<bool>,
    killed: BTreeSet<usize>,
    solving: BTreeSet<usize>,
    solved: bool,
    solved_leaf: bool,
    in_proof: bool,
    error: bool,
    policy: Policy,
    q_value_solved: QValueSolved,
    tactic_init: f64,
    log_critic: LogValue,
    old_critic: LogValue,
    effects: Vec<Effect>,
    log_w: Vec<LogValue>,
    counts: Vec<usize>,
    virtual_counts: Vec<usize>,
    reset_mask: Vec<bool>,
    minimum_length: MetricMap<Option<usize>>,
    minimum_tactics: MetricMap<Vec<usize>>,
    minimum_tactic_length: MetricMap<BTreeMap<usize, usize>>,
    in_minimum_proof: MetricMap<bool>,
}

impl Node {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        goal: Goal,
        tactics: Vec<Tac>,
        children_for_tactic: Vec<Vec<Goal>>,
        priors: Vec<Prior>,
        policy: Policy,
        log_critic: LogValue,
        q_value_solved: QValueSolved,
        tactic_init: f64,
        effects: Vec<Effect>,
    ) -> Result<Self, SearchError> {
        if tactics.is_empty() {
            return Err(invalid("expansion carries no tactics"));
        }
        if children_for_tactic.len() != tactics.len() || priors.len() != tactics.len() {
            return Err(invalid("children and priors must parallel the tactics"));
        }
        if log_critic > 0.0 {
            return Err(invalid("critic estimate above log 1"));
        }
        let sum = priors.iter().sum::<f64>();
        if !(PRIOR_SUM_LO..=PRIOR_SUM_HI).contains(&sum) {
            return Err(invalid("priors do not sum to one"));
        }
        if !tactics.iter().any(|t| t.is_valid) {
            return Err(invalid("every tactic is a placeholder"));
        }
        let closes = tactics
            .iter()
            .zip(&children_for_tactic)
            .map(|(tactic, children)| tactic.is_valid && children.is_empty())
            .collect::<Vec<bool>>();
        let all = closes.iter().all(|&c| c);
        let none = closes.iter().all(|&c| !c);
        if !all && !none {
            return Err(invalid("closing and non-closing tactics mixed"));
        }
        let n = tactics.len();
        let mut node = Self {
            goal,
            tactics,
            children_for_tactic,
            priors,
            expandable: vec![true; n],
            killed: BTreeSet::new(),
            solving: BTreeSet::new(),
            solved: false,
            solved_leaf: false,
            in_proof: false,
            error: false,
            policy,
            q_value_solved,
            tactic_init,
            log_critic,
            old_critic: 0.0,
            effects,
            log_w: vec![0.0; n],
            counts: vec![0; n],
            virtual_counts: vec![0; n],
            reset_mask: vec![true; n],
            minimum_length: MetricMap::default(),
            minimum_tactics: MetricMap::default(),
            minimum_tactic_length: MetricMap::default(),
            in_minimum_proof: MetricMap::default(),
        };
        if all {
            node.solved = true;
            node.solved_leaf = true;
            node.solving = (0..n).collect();
        }
        for i in 0..n {
            if !node.tactics[i].is_valid {
                node.kill_tactic(i);
            }
        }
        Ok(node)
    }

    /// the node for a goal the expander could not handle: no
    /// tactics, terminal and bad by construction.
    pub fn failed(goal: Goal, effects: Vec<Effect>, policy: Policy) -> Self {
        Self {
            goal,
            tactics: vec![],
            children_for_tactic: vec![],
            priors: vec![],
            expandable: vec![],
            killed: BTreeSet::new(),
            solving: BTreeSet::new(),
            solved: false,
            solved_leaf: false,
            in_proof: false,
            error: true,
            policy,
            q_value_solved: QValueSolved::OneOverCounts,
            tactic_init: 0.0,
            log_critic: LOG_ZERO,
            old_critic: 0.0,
            effects,
            log_w: vec![],
            counts: vec![],
            virtual_counts: vec![],
            reset_mask: vec![],
            minimum_length: MetricMap::default(),
            minimum_tactics: MetricMap::default(),
            minimum_tactic_length: MetricMap::default(),
            in_minimum_proof: MetricMap::default(),
        }
    }

    pub fn goal(&self) -> &Goal {
        &self.goal
    }

    pub fn name(&self) -> &str {
        self.goal.name()
    }

    pub fn n_tactics(&self) -> usize {
        self.tactics.len()
    }

    pub fn tactic(&self, tactic_id: usize) -> &Tac {
        &self.tactics[tactic_id]
    }

    pub fn is_valid(&self, tactic_id: usize) -> bool {
        self.tactics[tactic_id].is_valid
    }

    pub fn children(&self, tactic_id: usize) -> &[Goal] {
        &self.children_for_tactic[tactic_id]
    }

    pub fn is_solved(&self) -> bool {
        self.solved
    }

    pub fn is_solved_leaf(&self) -> bool {
        self.solved_leaf
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    pub fn is_terminal(&self) -> bool {
        self.solved_leaf || self.children_for_tactic.is_empty() || self.all_tactics_killed()
    }

    /// terminal without being a solved leaf: nothing below this
    /// node can ever close it.
    pub fn is_bad(&self) -> bool {
        self.is_terminal() && !self.solved_leaf
    }

    pub fn killed(&self, tactic_id: usize) -> bool {
        self.killed.contains(&tactic_id)
    }

    pub fn all_tactics_killed(&self) -> bool {
        self.killed.len() == self.tactics.len()
    }

    pub fn solving(&self) -> impl Iterator<Item = usize> + '_ {
        self.solving.iter().copied()
    }

    pub fn n_solving(&self) -> usize {
        self.solving.len()
    }

    pub fn log_critic(&self) -> LogValue {
        self.log_critic
    }

    /// the critic estimate this node held before every tactic was
    /// killed and its value forced to log 0.
    pub fn old_critic(&self) -> LogValue {
        self.old_critic
    }

    pub fn visit_sum(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn count(&self, tactic_id: usize) -> usize {
        self.counts[tactic_id]
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    /// idempotent. returns true when this kill left every tactic
    /// dead, in which case the caller owns the upward cascade.
    pub fn kill_tactic(&mut self, tactic_id: usize) -> bool {
        if tactic_id >= self.tactics.len() {
            return false;
        }
        if self.killed.contains(&tactic_id) {
            debug_assert!(!self.expandable[tactic_id]);
            return false;
        }
        self.killed.insert(tactic_id);
        self.expandable[tactic_id] = false;
        if self.all_tactics_killed() {
            debug_assert!(self.log_critic > LOG_ZERO || self.error);
            self.old_critic = self.log_critic;
            self.log_critic = LOG_ZERO;
            return true;
        }
        false
    }

    /// returns true if this was the first tactic to solve the goal,
    /// which is what triggers upward propagation.
    pub fn solved_by(&mut self, tactic_id: usize) -> bool {
        self.solving.insert(tactic_id);
        !std::mem::replace(&mut self.solved, true)
    }

    pub fn set_in_proof(&mut self) {
        self.in_proof = true;
    }

    pub fn is_in_proof(&self) -> bool {
        self.in_proof
    }

    pub fn expandable(&self, tactic_id: usize) -> bool {
        self.expandable[tactic_id]
    }

    pub fn any_expandable(&self) -> bool {
        self.expandable.iter().any(|&e| e)
    }

    pub fn set_expandable_all(&mut self, expandable: bool) {
        self.expandable.fill(expandable);
    }

    pub fn set_expandable(&mut self, tactic_id: usize, expandable: bool) {
        self.expandable[tactic_id] = expandable;
    }

    /// the selection distribution over this node's tactics.
    /// invalid tactics are masked; with `force_expansion`, so are
    /// valid tactics that cannot reach an unexplored goal, as long
    /// as at least one valid tactic still can.
    pub fn compute_policy(&self, force_expansion: bool) -> Result<Vec<Probability>, SearchError> {
        let n = self.tactics.len();
        let mut full = self
            .counts
            .iter()
            .zip(&self.virtual_counts)
            .map(|(&c, &v)| c + v)
            .collect::<Vec<usize>>();
        let mut q = full
            .iter()
            .zip(&self.log_w)
            .map(|(&f, &w)| match f > 0 {
                true => w.exp() / f as f64,
                false => self.tactic_init,
            })
            .collect::<Vec<f64>>();
        for &i in &self.solving {
            q[i] = match self.q_value_solved {
                QValueSolved::OneOverCounts => match full[i] > 0 {
                    true => 1.0 / full[i] as f64,
                    false => q[i],
                },
                QValueSolved::CountOverCounts => match full[i] > 0 {
                    true => self.counts[i] as f64 / full[i] as f64,
                    false => q[i],
                },
                QValueSolved::One => 1.0,
                QValueSolved::OneOverVirtualCounts => 1.0 / (1 + self.virtual_counts[i]) as f64,
                QValueSolved::OneOverCountsNoFpu => 1.0 / full[i].max(1) as f64,
                QValueSolved::CountOverCountsNoFpu => {
                    self.counts[i].max(1) as f64 / full[i].max(1) as f64
                }
            };
        }
        let expandable_only = force_expansion
            && (0..n).any(|i| self.expandable[i] && self.tactics[i].is_valid);
        for i in 0..n {
            if !self.tactics[i].is_valid || (expandable_only && !self.expandable[i]) {
                q[i] = LOG_ZERO;
                full[i] = 0;
            }
        }
        let result = self.policy.distribution(&q, &self.priors, &full)?;
        debug_assert!(!expandable_only || self.killed.iter().all(|&i| result[i] <= 1e-9));
        Ok(result)
    }

    /// fold one backed-up value into the running log-sum for a
    /// tactic. the first update after a reset replaces the slot
    /// outright; later ones use the one-sided logaddexp, which
    /// assumes the accumulated value dominates the new one.
    pub fn update(&mut self, tactic_id: usize, backup_value: LogValue) {
        self.counts[tactic_id] += 1;
        if self.reset_mask[tactic_id] {
            self.log_w[tactic_id] = backup_value;
            self.reset_mask[tactic_id] = false;
        } else {
            self.log_w[tactic_id] += (backup_value - self.log_w[tactic_id]).exp().ln_1p();
        }
    }

    /// the node value in log space: 0 when solved, -inf when
    /// terminally dead, the critic estimate before any visit, and
    /// the average action value of the current best tactic after.
    pub fn get_value(&self) -> LogValue {
        if self.solved {
            return SOLVED_LOG_VALUE;
        }
        if self.is_terminal() {
            return LOG_ZERO;
        }
        if self.visit_sum() == 0 {
            return self.log_critic.min(0.0);
        }
        let policy = self
            .compute_policy(false)
            .expect("non-terminal node has a valid tactic");
        let best = crate::argmax(&policy);
        if self.counts[best] == 0 {
            return self.log_critic.min(0.0);
        }
        (self.log_w[best] - (self.counts[best] as f64).ln()).min(0.0)
    }

    pub fn add_virtual_count(&mut self, tactic_id: usize, count: usize) {
        self.virtual_counts[tactic_id] += count;
    }

    pub fn subtract_virtual_count(&mut self, tactic_id: usize, count: usize) {
        assert!(
            self.virtual_counts[tactic_id] >= count,
            "virtual counts must never go negative"
        );
        self.virtual_counts[tactic_id] -= count;
    }

    pub fn has_virtual_count(&self) -> bool {
        self.virtual_counts.iter().any(|&v| v > 0)
    }

    /// a node is worth a tactic sample once solved or visited
    /// often enough.
    pub fn should_send(&self, count_threshold: usize) -> bool {
        self.solved || self.visit_sum() >= count_threshold
    }

    pub fn effect_samples(&self, rng: &mut SmallRng, rate: f64) -> Vec<EffectSample> {
        self.effects
            .iter()
            .filter(|_| rng.random::<f64>() <= rate)
            .map(|effect| EffectSample {
                goal: self.goal.clone(),
                tactic: effect.tactic.clone(),
                children: effect.children.clone(),
            })
            .collect()
    }

    pub fn critic_sample(&self, rng: &mut SmallRng, rate: f64) -> Option<CriticSample> {
        if rng.random::<f64>() > rate {
            return None;
        }
        Some(CriticSample {
            goal: self.goal.clone(),
            q_estimate: self.get_value().exp(),
            solved: self.solved,
            bad: self.is_bad(),
            critic: self.log_critic,
            visit_count: self.visit_sum(),
        })
    }

    pub fn tactic_sample(
        &self,
        metric: Metric,
        node_mask: NodeMask,
        only_learn_best_tactics: bool,
        p_threshold: f64,
        count_threshold: usize,
        q_conditioning: bool,
    ) -> Option<TacticSample> {
        if !self.should_send(count_threshold) {
            return None;
        }
        match node_mask {
            NodeMask::NoMask => {}
            NodeMask::Solving if self.solving.is_empty() => return None,
            NodeMask::Proof if !self.in_proof => return None,
            NodeMask::MinimalProof if !self.in_minimum_proof.get(metric) => return None,
            NodeMask::MinimalProofSolving => unreachable!("lowered by the driver"),
            _ => {}
        }
        let (tactics, target_pi, q_estimates) = match q_conditioning {
            true => self.sample_q_conditioning(count_threshold),
            false => {
                let (tactics, targets) =
                    self.sample_regular(metric, node_mask, only_learn_best_tactics, p_threshold);
                (tactics, targets, vec![])
            }
        };
        if tactics.is_empty() {
            return None;
        }
        let inproof = if *self.in_minimum_proof.get(metric) {
            InProof::InMinimalProof
        } else if self.in_proof {
            InProof::IsInProof
        } else {
            InProof::NotInProof
        };
        Some(TacticSample {
            goal: self.goal.clone(),
            tactics,
            target_pi,
            inproof,
            q_estimates,
            visit_count: self.visit_sum(),
        })
    }

    /// q-conditioned selection: tactics that solve, are invalid,
    /// or were visited often enough, each labeled with a scalar q
    /// (1 solving, 0 invalid, average action value otherwise) and
    /// a placeholder target of -1.
    fn sample_q_conditioning(&self, count_threshold: usize) -> (Vec<Tac>, Vec<f64>, Vec<f64>) {
        let selected = (0..self.tactics.len())
            .filter(|i| {
                self.solving.contains(i)
                    || !self.tactics[*i].is_valid
                    || self.counts[*i] >= count_threshold
            })
            .collect::<Vec<usize>>();
        let q_estimates = selected
            .iter()
            .map(|&i| {
                if self.solving.contains(&i) {
                    1.0
                } else if !self.tactics[i].is_valid {
                    0.0
                } else if self.counts[i] == 0 {
                    self.tactic_init
                } else {
                    self.log_w[i].exp() / self.counts[i] as f64
                }
            })
            .collect::<Vec<f64>>();
        let tactics = selected
            .iter()
            .map(|&i| self.tactics[i].clone())
            .collect::<Vec<Tac>>();
        let targets = vec![-1.0; tactics.len()];
        (tactics, targets, q_estimates)
    }

    /// regular selection: unsolved nodes emit tactics above the
    /// policy threshold with the computed policy as target;
    /// solved nodes emit their solving (or minimum-proof) tactics
    /// with a uniform target.
    fn sample_regular(
        &self,
        metric: Metric,
        node_mask: NodeMask,
        only_learn_best_tactics: bool,
        p_threshold: f64,
    ) -> (Vec<Tac>, Vec<f64>) {
        if self.all_tactics_killed() {
            return (vec![], vec![]);
        }
        let policy = self
            .compute_policy(false)
            .expect("live node has a valid tactic");
        let (selected, targets) = match self.solving.is_empty() {
            true => {
                let selected = (0..self.tactics.len())
                    .filter(|&i| self.tactics[i].is_valid && policy[i] > p_threshold)
                    .collect::<Vec<usize>>();
                let targets = selected.iter().map(|&i| policy[i]).collect::<Vec<f64>>();
                (selected, targets)
            }
            false => {
                let selected = match only_learn_best_tactics || node_mask == NodeMask::MinimalProof
                {
                    true => self.minimum_tactics.get(metric).clone(),
                    false => self.solving.iter().copied().collect(),
                };
                debug_assert!(!selected.is_empty());
                let uniform = 1.0 / self.tactics.len() as f64;
                let targets = vec![uniform; selected.len()];
                (selected, targets)
            }
        };
        let tactics = selected
            .iter()
            .map(|&i| self.tactics[i].clone())
            .collect::<Vec<Tac>>();
        (tactics, targets)
    }

    pub fn minimum_length(&self, metric: Metric) -> Option<usize> {
        *self.minimum_length.get(metric)
    }

    pub fn set_minimum_length(&mut self, metric: Metric, value: usize) {
        self.minimum_length.set(metric, Some(value));
    }

    /// the best tactic under a metric, available once the proof
    /// sizes were computed on a solved graph.
    pub fn minimum_tactic(&self, metric: Metric) -> Option<usize> {
        self.minimum_tactics.get(metric).first().copied()
    }

    pub fn minimum_tactics(&self, metric: Metric) -> &[usize] {
        self.minimum_tactics.get(metric)
    }

    pub fn has_minimum_tactic(&self, metric: Metric, tactic_id: usize) -> bool {
        self.minimum_tactics.get(metric).contains(&tactic_id)
    }

    pub fn add_minimum_tactic(&mut self, metric: Metric, tactic_id: usize) {
        self.minimum_tactics.get_mut(metric).push(tactic_id);
    }

    pub fn has_minimum_tactic_length(&self, metric: Metric, tactic_id: usize) -> bool {
        self.minimum_tactic_length.get(metric).contains_key(&tactic_id)
    }

    pub fn set_minimum_tactic_length(&mut self, metric: Metric, tactic_id: usize, value: usize) {
        self.minimum_tactic_length
            .get_mut(metric)
            .insert(tactic_id, value);
    }

    pub fn set_in_minimum_proof(&mut self, metric: Metric, value: bool) {
        self.in_minimum_proof.set(metric, value);
    }

    pub fn is_in_minimum_proof(&self, metric: Metric) -> bool {
        *self.in_minimum_proof.get(metric)
    }

    /// wipe the per-metric bookkeeping so a later pass re-derives
    /// it from the current graph.
    pub fn reset_minimum_proof_stats(&mut self) {
        self.minimum_length = MetricMap::default();
        self.minimum_tactics = MetricMap::default();
        self.minimum_tactic_length = MetricMap::default();
        self.in_minimum_proof = MetricMap::default();
        self.in_proof = false;
    }
}
