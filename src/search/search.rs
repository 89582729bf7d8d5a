use super::error::SearchError;
use super::expansion::Expansion;
use super::params::NodeMask;
use super::params::SearchParams;
use super::sample::CriticSample;
use super::sample::EffectSample;
use super::sample::TacticSample;
use super::simulation::Simulation;
use crate::goal::proof::Proof;
use crate::goal::Goal;
use crate::graph::graph::Graph;
use crate::graph::metric::Metric;
use crate::graph::node::Node;
use crate::policy::Policy;
use crate::LogValue;
use crate::LOG_ZERO;
use crate::SOLVED_LOG_VALUE;
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;

fn fresh_rng() -> SmallRng {
    SmallRng::seed_from_u64(crate::seed())
}

/// everything a finished search hands back: the root goal, the
/// metric-minimal proof when one exists, and the three families
/// of training samples. `proof_samples` are tactic samples drawn
/// under the minimal-proof mask regardless of the configured one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub goal: Goal,
    pub proof: Option<Proof>,
    pub critic_samples: Vec<CriticSample>,
    pub tactic_samples: Vec<TacticSample>,
    pub effect_samples: Vec<EffectSample>,
    pub metric: Metric,
    pub proof_samples: Vec<TacticSample>,
}

/// the search driver. alternates between handing the caller a
/// batch of goals to expand (`theorems_to_expand`) and merging
/// the resulting expansions back in (`expand_and_backup`), while
/// keeping the in-flight simulations, their virtual-loss
/// reservations, and the dedup bookkeeping consistent. a single
/// instance is single-threaded; the caller parallelizes the
/// expander between the two calls.
#[derive(Debug, Serialize, Deserialize)]
pub struct Search {
    graph: Graph,
    policy: Policy,
    params: SearchParams,
    #[serde(skip, default = "fresh_rng")]
    rng: SmallRng,
    expansion_count: usize,
    simulations: BTreeMap<u64, Simulation>,
    next_simulation: u64,
    waiting: BTreeMap<String, Vec<u64>>,
    expanding: BTreeSet<String>,
    backedup: BTreeSet<u64>,
    propagate_needed: bool,
    done: bool,
}

impl Search {
    pub fn new(root: Goal, params: SearchParams) -> Self {
        Self {
            graph: Graph::new(root),
            policy: Policy::new(params.policy_type, params.exploration),
            params,
            rng: fresh_rng(),
            expansion_count: 0,
            simulations: BTreeMap::new(),
            next_simulation: 0,
            waiting: BTreeMap::new(),
            expanding: BTreeSet::new(),
            backedup: BTreeSet::new(),
            propagate_needed: true,
            done: false,
        }
    }

    /// replace the root goal. only legal before any expansion was
    /// merged.
    pub fn set_root(&mut self, goal: Goal) -> Result<(), SearchError> {
        if !self.graph.is_empty() {
            return Err(SearchError::AlreadyStarted);
        }
        self.graph = Graph::new(goal);
        Ok(())
    }

    /// swap the parameters, rebuilding the policy kernel.
    pub fn set_params(&mut self, params: SearchParams) {
        self.policy = Policy::new(params.policy_type, params.exploration);
        self.params = params;
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn expansion_count(&self) -> usize {
        self.expansion_count
    }

    pub fn is_proven(&self) -> bool {
        self.graph.is_proven()
    }

    /// the root cannot be proven anymore: either its node became
    /// bad, or a failed selection re-propagated and found nothing
    /// left to explore.
    pub fn dead_root(&self) -> bool {
        (self.propagate_needed && self.graph.unexplored_is_empty()) || self.graph.root_is_bad()
    }

    pub fn is_done(&self) -> bool {
        self.done || self.dead_root()
    }

    /// select the next batch of goals the caller must expand. an
    /// empty batch marks the search as over.
    pub fn theorems_to_expand(&mut self) -> Result<Vec<Goal>, SearchError> {
        self.propagate_needed = false;
        let mut batch: BTreeMap<String, Goal> = BTreeMap::new();
        for _ in 0..self.params.succ_expansions {
            let (sim, to_expand) = loop {
                match self.find_leaves() {
                    Ok((sim, _, to_expand)) => break (sim, to_expand),
                    Err(SearchError::CycleDetected) => continue,
                    Err(error) => return Err(error),
                }
            };
            if to_expand.is_empty() {
                self.cleanup(&sim);
                break;
            }
            self.register(sim, &to_expand, &mut batch);
        }
        if batch.is_empty() {
            log::debug!("no goal left to offer, search is over");
            self.done = true;
        }
        Ok(batch.into_values().collect())
    }

    /// merge expansions, back up every completed simulation, and
    /// settle the stopping conditions.
    pub fn expand_and_backup(&mut self, expansions: Vec<Expansion>) -> Result<(), SearchError> {
        self.ingest(expansions)?;
        self.backup();
        debug_assert!(self.graph.nodes().all(|node| !node.has_virtual_count()));
        if self.graph.is_proven() && !self.graph.initial_minimum_captured() {
            self.graph.build_in_proof();
            self.graph.proof_sizes_and_depths();
            self.graph.capture_initial_minimum();
            self.graph.reset_minimum_proof_stats();
        }
        if self.graph.is_proven() {
            self.done = self.done || self.params.early_stopping;
        }
        debug_assert!(self.graph.len() == self.expansion_count);
        self.done = self.done || self.expansion_count >= self.params.num_expansions;
        Ok(())
    }

    /// extract the proof (when proven) and all training samples.
    pub fn result(&mut self) -> Result<SearchResult, SearchError> {
        self.graph.consistency_check();
        debug_assert!(self.graph.nodes().all(|node| !node.has_virtual_count()));
        self.graph.build_in_proof();
        self.graph.proof_sizes_and_depths();
        let proof = match self.graph.is_proven() {
            true => {
                let root = self.graph.root().clone();
                Some(self.graph.minimal_proof(self.params.metric, &root)?)
            }
            false => None,
        };
        let (critic_samples, tactic_samples, effect_samples) = self.train_samples();
        let proof_samples = self.proof_samples();
        Ok(SearchResult {
            goal: self.graph.root().clone(),
            proof,
            critic_samples,
            tactic_samples,
            effect_samples,
            metric: self.params.metric,
            proof_samples,
        })
    }

    /// solved non-root nodes count as selection leaves while the
    /// root is unproven, when so configured.
    fn is_selection_leaf(&self, node: &Node) -> bool {
        node.is_solved()
            && !self.graph.is_proven()
            && self.params.early_stopping_solved_if_root_not_proven
    }

    /// one top-down trace. walks from the root following the
    /// computed policy, reserving virtual loss along the way,
    /// until every branch ends in a terminal node or a goal that
    /// needs expansion. a tactic whose children intersect the
    /// path's seen set closes a cycle: it is killed in the graph,
    /// the trace's reservations are undone, expandability is
    /// re-propagated, and the slot retries.
    #[allow(clippy::type_complexity)]
    fn find_leaves(&mut self) -> Result<(Simulation, Vec<Goal>, Vec<Goal>), SearchError> {
        let root = self.graph.root().clone();
        let mut sim = Simulation::new(root.clone());
        let mut terminal: Vec<Goal> = vec![];
        let mut to_expand: Vec<Goal> = vec![];
        let mut queue = VecDeque::from([root]);
        while let Some(current) = queue.pop_front() {
            let name = current.name().to_string();
            if self.graph.node(&name).is_none() {
                to_expand.push(current);
                continue;
            }
            let (leaf_value, policy) = {
                let node = self.graph.node(&name).expect("present");
                if node.is_terminal() || self.is_selection_leaf(node) {
                    (Some(node.get_value()), None)
                } else if self.params.early_stopping && node.is_solved() {
                    (Some(SOLVED_LOG_VALUE), None)
                } else {
                    (None, Some(node.compute_policy(true)?))
                }
            };
            if let Some(value) = leaf_value {
                sim.set_value(&name, value);
                sim.set_solved(&name, true);
                terminal.push(current);
                continue;
            }
            let policy = policy.expect("non-terminal nodes carry a policy");
            let tactic_id = match self.params.policy_temperature == 0.0 {
                true => crate::argmax(&policy),
                false => {
                    let weights = policy
                        .iter()
                        .map(|p| p.powf(1.0 / self.params.policy_temperature))
                        .collect::<Vec<f64>>();
                    let sum = weights.iter().sum::<f64>();
                    let weights = weights.iter().map(|w| w / sum).collect::<Vec<f64>>();
                    WeightedIndex::new(&weights)
                        .expect("at least one positive weight")
                        .sample(&mut self.rng)
                }
            };
            let (tactic, children) = {
                let node = self.graph.node(&name).expect("present");
                debug_assert!(!node.killed(tactic_id));
                (
                    node.tactic(tactic_id).clone(),
                    node.children(tactic_id).to_vec(),
                )
            };
            sim.set_tactic(&name, tactic, tactic_id);
            let seen = sim.path_seen(&name).cloned().unwrap_or_default();
            if children.iter().any(|child| seen.contains(child.name())) {
                log::debug!("cycle via tactic {tactic_id} @ {}", current);
                self.graph.kill_tactic(&name, tactic_id);
                self.cleanup(&sim);
                self.propagate_needed = true;
                self.repropagate()?;
                return Err(SearchError::CycleDetected);
            }
            self.graph
                .node_mut(&name)
                .expect("present")
                .add_virtual_count(tactic_id, self.params.virtual_loss);
            sim.set_virtual_added(&name, true);
            let depth = sim.depth(&name) + 1;
            for child in children {
                match sim.contains(child.name()) {
                    true => sim.link_goal(&child, &current, depth),
                    false => {
                        sim.add_goal(child.clone(), &current, depth);
                        queue.push_front(child);
                    }
                }
            }
            sim.forget_seen(&name);
        }
        debug_assert!(!terminal.is_empty() || !to_expand.is_empty());
        debug_assert!(to_expand.iter().all(|g| self.graph.node(g.name()).is_none()));
        debug_assert!(sim.leaf_count() == terminal.len() + to_expand.len());
        for leaf in terminal.iter().chain(&to_expand) {
            sim.forget_seen(leaf.name());
        }
        Ok((sim, terminal, to_expand))
    }

    /// file a finished trace: it waits on each distinct expansion
    /// leaf, and leaves nobody else asked for yet join the batch.
    fn register(&mut self, mut sim: Simulation, to_expand: &[Goal], batch: &mut BTreeMap<String, Goal>) {
        sim.reset_pending();
        let id = self.next_simulation;
        self.next_simulation += 1;
        let mut seen = BTreeSet::new();
        for leaf in to_expand {
            let name = leaf.name().to_string();
            if seen.insert(name.clone()) {
                self.waiting.entry(name.clone()).or_default().push(id);
                sim.increment_pending();
            }
            if self.expanding.insert(name.clone()) {
                batch.insert(name, leaf.clone());
            }
        }
        log::trace!("simulation {id} waits on {} goals", sim.pending());
        self.simulations.insert(id, sim);
    }

    /// turn a batch of expansions into nodes, deliver each value
    /// to the simulations waiting on it, and merge the nodes into
    /// the graph.
    fn ingest(&mut self, expansions: Vec<Expansion>) -> Result<(), SearchError> {
        log::debug!("merging {} expansions", expansions.len());
        let mut batch: Vec<Node> = Vec::with_capacity(expansions.len());
        for mut expansion in expansions {
            let goal = expansion.goal.clone();
            if let Some(error) = expansion.error.take() {
                log::debug!("expander failed at {}: {error}", goal);
                batch.push(Node::failed(goal.clone(), expansion.effects, self.policy));
                self.receive_expansion(&goal, LOG_ZERO, false)?;
                continue;
            }
            if expansion.tactics.is_empty() {
                return Err(SearchError::InvalidExpansion {
                    detail: "success expansion with no tactics".to_string(),
                });
            }
            let closing = expansion.children_for_tactic.first().is_some_and(Vec::is_empty);
            let log_critic = match closing {
                true => SOLVED_LOG_VALUE,
                false => expansion.log_critic,
            };
            let node = Node::new(
                goal.clone(),
                expansion.tactics,
                expansion.children_for_tactic,
                expansion.priors,
                self.policy,
                log_critic,
                self.params.q_value_solved,
                self.params.tactic_init_value,
                expansion.effects,
            )?;
            self.receive_expansion(&goal, log_critic, true)?;
            batch.push(node);
        }
        self.expansion_count += batch.len();
        self.graph.add_nodes(batch)
    }

    /// record an expansion's value into every waiting simulation
    /// and forget the goal in the tracking maps.
    fn receive_expansion(
        &mut self,
        goal: &Goal,
        value: LogValue,
        solved: bool,
    ) -> Result<(), SearchError> {
        let name = goal.name();
        let Some(ids) = self.waiting.remove(name) else {
            return Err(SearchError::InvalidExpansion {
                detail: format!("expansion for a goal that was never requested: {goal}"),
            });
        };
        for id in ids {
            self.simulations
                .get_mut(&id)
                .expect("waiting simulations are in flight")
                .receive_expansion(name, value, solved);
        }
        self.expanding.remove(name);
        Ok(())
    }

    /// back up every simulation whose expansions all arrived.
    /// under `backup_once`, a trace whose digest was backed up
    /// before only refreshes values without touching counts.
    fn backup(&mut self) {
        let ready = self
            .simulations
            .iter()
            .filter(|(_, sim)| sim.should_backup())
            .map(|(&id, _)| id)
            .collect::<Vec<u64>>();
        for id in ready {
            let mut sim = self.simulations.remove(&id).expect("listed above");
            let only_value = match self.params.backup_once {
                true => !self.backedup.insert(sim.digest()),
                false => false,
            };
            log::trace!("backing up simulation {id} (only_value {only_value})");
            self.backup_simulation(&mut sim, only_value);
        }
    }

    /// bottom-up value propagation over one trace. a node is
    /// ready once all of its recorded children carry values; its
    /// own value is the log-space product of theirs (conjunction
    /// over AND-children), optionally clamped to log 1 at solved
    /// nodes and discounted per level. reservations are released
    /// along the way.
    fn backup_simulation(&mut self, sim: &mut Simulation, only_value: bool) {
        let mut updated_root = false;
        let mut propagated: BTreeMap<String, usize> = BTreeMap::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        for leaf in sim.leaves() {
            let name = leaf.name().to_string();
            if sim.virtual_added(&name) {
                self.graph
                    .node_mut(&name)
                    .expect("leaves are nodes by backup time")
                    .subtract_virtual_count(sim.tactic_id(&name), self.params.virtual_loss);
            }
            debug_assert!(sim.value(&name) <= 0.0);
            if sim.parents(&name).is_empty() {
                debug_assert!(name == self.graph.root().name());
                updated_root = true;
                continue;
            }
            for parent in sim.parents(&name) {
                let parent_name = parent.name().to_string();
                let count = propagated.entry(parent_name.clone()).or_insert(0);
                *count += 1;
                debug_assert!(*count <= sim.children_of(&parent_name).len());
                if *count == sim.children_of(&parent_name).len() {
                    queue.push_back(parent_name);
                }
            }
        }
        while let Some(name) = queue.pop_front() {
            let child_values = sim.child_values(&name);
            debug_assert!(child_values.iter().all(|&v| v <= 0.0));
            let mut sum_log = child_values.iter().sum::<LogValue>();
            let solved = self
                .graph
                .node(&name)
                .expect("internal goals are nodes")
                .is_solved();
            if solved && self.params.backup_one_for_solved {
                sum_log = 0.0;
            }
            if self.params.depth_penalty < 1.0 {
                sum_log += self.params.depth_penalty.ln();
            }
            debug_assert!(sum_log <= 0.0);
            sim.set_value(&name, sum_log);
            if sim.virtual_added(&name) {
                self.graph
                    .node_mut(&name)
                    .expect("present")
                    .subtract_virtual_count(sim.tactic_id(&name), self.params.virtual_loss);
            }
            if !only_value {
                self.graph
                    .node_mut(&name)
                    .expect("present")
                    .update(sim.tactic_id(&name), sum_log);
            }
            if sim.parents(&name).is_empty() {
                updated_root = true;
                continue;
            }
            let parents = sim
                .parents(&name)
                .iter()
                .map(|p| p.name().to_string())
                .collect::<Vec<String>>();
            for parent_name in parents {
                let count = propagated.entry(parent_name.clone()).or_insert(0);
                *count += 1;
                if *count == sim.children_of(&parent_name).len() {
                    queue.push_back(parent_name);
                }
            }
        }
        debug_assert!(updated_root);
    }

    /// undo every virtual-loss reservation a trace placed.
    fn cleanup(&mut self, sim: &Simulation) {
        for goal in sim.goals() {
            let name = goal.name();
            if self.graph.node(name).is_none() {
                continue;
            }
            if sim.virtual_added(name) {
                self.graph
                    .node_mut(name)
                    .expect("present")
                    .subtract_virtual_count(sim.tactic_id(name), self.params.virtual_loss);
            }
        }
    }

    /// refresh unexplored goals and expandable flags, but only
    /// when a failed selection flagged the need.
    fn repropagate(&mut self) -> Result<(), SearchError> {
        if !self.propagate_needed {
            return Ok(());
        }
        let ignore_solved = self.params.early_stopping
            || (!self.graph.is_proven() && self.params.early_stopping_solved_if_root_not_proven);
        self.graph.refresh(ignore_solved)
    }

    /// all training samples, critic samples ordered solved-first.
    fn train_samples(&mut self) -> (Vec<CriticSample>, Vec<TacticSample>, Vec<EffectSample>) {
        let node_mask = match self.params.node_mask {
            NodeMask::MinimalProofSolving => match self.graph.is_proven() {
                true => NodeMask::MinimalProof,
                false => NodeMask::Solving,
            },
            mask => mask,
        };
        let mut solved: Vec<CriticSample> = vec![];
        let mut unsolved: Vec<CriticSample> = vec![];
        let mut tactic_samples: Vec<TacticSample> = vec![];
        let mut effect_samples: Vec<EffectSample> = vec![];
        let Self {
            graph, rng, params, ..
        } = self;
        for node in graph.nodes() {
            effect_samples.extend(node.effect_samples(rng, params.effect_subsampling_rate));
            if let Some(sample) = node.critic_sample(rng, params.critic_subsampling_rate) {
                match node.is_solved() {
                    true => solved.push(sample),
                    false => unsolved.push(sample),
                }
            }
            if let Some(sample) = node.tactic_sample(
                params.metric,
                node_mask,
                params.only_learn_best_tactics,
                params.tactic_p_threshold,
                params.count_threshold,
                params.tactic_sample_q_conditioning,
            ) {
                tactic_samples.push(sample);
            }
        }
        solved.extend(unsolved);
        (solved, tactic_samples, effect_samples)
    }

    /// tactic samples over the minimal proof, emitted regardless
    /// of the configured node mask. only exist once proven.
    fn proof_samples(&self) -> Vec<TacticSample> {
        if !self.graph.is_proven() {
            return vec![];
        }
        self.graph
            .nodes()
            .filter_map(|node| {
                node.tactic_sample(
                    self.params.metric,
                    NodeMask::MinimalProof,
                    self.params.only_learn_best_tactics,
                    self.params.tactic_p_threshold,
                    self.params.count_threshold,
                    self.params.tactic_sample_q_conditioning,
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goal::tactic::Tactic;
    use crate::goal::theorem::Theorem;
    use crate::goal::Tac;
    use crate::policy::PolicyType;
    use crate::search::expansion::Effect;
    use crate::search::sample::InProof;

    fn goal(name: &str) -> Goal {
        Goal::from(Theorem::new(name, vec![]))
    }

    fn tac(name: &str) -> Tac {
        Tac::from(Tactic::new(name))
    }

    fn names(batch: &[Goal]) -> Vec<String> {
        batch.iter().map(|g| g.name().to_string()).collect()
    }

    /// a successful expansion carrying one effect per tactic.
    fn expansion(name: &str, log_critic: f64, tactics: &[(&str, Vec<&str>)]) -> Expansion {
        let g = goal(name);
        let tacs = tactics.iter().map(|(t, _)| tac(t)).collect::<Vec<Tac>>();
        let children = tactics
            .iter()
            .map(|(_, c)| c.iter().map(|n| goal(n)).collect())
            .collect::<Vec<Vec<Goal>>>();
        let effects = tacs
            .iter()
            .zip(&children)
            .map(|(t, c)| Effect {
                goal: g.clone(),
                tactic: t.clone(),
                children: c.clone(),
            })
            .collect();
        let priors = vec![1.0 / tactics.len() as f64; tactics.len()];
        Expansion::success(g, log_critic, tacs, children, priors, effects)
    }

    fn closing(name: &str, tactic: &str) -> Expansion {
        expansion(name, 0.0, &[(tactic, vec![])])
    }

    #[test]
    fn immediate_solve() {
        let mut search = Search::new(goal("A"), SearchParams::default());
        let batch = search.theorems_to_expand().unwrap();
        assert_eq!(names(&batch), vec!["A"]);
        assert!(!search.is_done());
        search.expand_and_backup(vec![closing("A", "T0")]).unwrap();
        assert!(search.is_proven());
        assert!(search.is_done());
        let result = search.result().unwrap();
        let proof = result.proof.unwrap();
        assert_eq!(proof.goal, goal("A"));
        assert_eq!(proof.tactic.unique_string, "T0");
        assert!(proof.children.is_empty());
        assert_eq!(result.critic_samples.len(), 1);
        assert!(result.critic_samples[0].solved);
        assert!(!result.critic_samples[0].bad);
        assert!((result.critic_samples[0].q_estimate - 1.0).abs() < 1e-12);
        assert!(!result.tactic_samples.is_empty());
        assert_eq!(result.proof_samples.len(), 1);
    }

    fn drive_branching(params: SearchParams) -> Search {
        let mut search = Search::new(goal("A"), params);
        assert_eq!(names(&search.theorems_to_expand().unwrap()), vec!["A"]);
        search
            .expand_and_backup(vec![expansion("A", 0.0, &[("T0", vec!["B0", "B1", "B2"])])])
            .unwrap();
        assert_eq!(
            names(&search.theorems_to_expand().unwrap()),
            vec!["B0", "B1", "B2"]
        );
        search
            .expand_and_backup(vec![
                closing("B0", "T0"),
                expansion("B1", 0.0, &[("T0", vec!["B3"])]),
                expansion("B2", 0.0, &[("T0", vec!["B4"])]),
            ])
            .unwrap();
        assert_eq!(names(&search.theorems_to_expand().unwrap()), vec!["B3", "B4"]);
        search
            .expand_and_backup(vec![closing("B3", "T1"), closing("B4", "T1")])
            .unwrap();
        search
    }

    #[test]
    fn simple_branching() {
        let mut search = drive_branching(SearchParams::default());
        assert!(search.is_proven());
        assert!(search.is_done());
        let result = search.result().unwrap();
        let proof = result.proof.unwrap();
        assert_eq!(proof.goal, goal("A"));
        assert_eq!(proof.children.len(), 3);
        assert!(proof.children[0].children.is_empty());
        assert_eq!(proof.children[1].children.len(), 1);
        assert_eq!(proof.children[2].children.len(), 1);
        assert!(proof.children[1].children[0].children.is_empty());
        assert_eq!(proof.size(), 6);
        assert_eq!(result.proof_samples.len(), 6);
        assert_eq!(result.effect_samples.len(), 6);
        assert_eq!(result.critic_samples.len(), 6);
        assert!(result.critic_samples.iter().all(|s| s.solved && !s.bad));
    }

    #[test]
    fn count_threshold_filters_to_the_minimal_proof() {
        let params = SearchParams {
            count_threshold: 10,
            ..SearchParams::default()
        };
        let mut search = drive_branching(params);
        let result = search.result().unwrap();
        assert!(!result.tactic_samples.is_empty());
        assert!(result
            .tactic_samples
            .iter()
            .all(|s| s.inproof == InProof::InMinimalProof));
    }

    #[test]
    fn cycles_kill_the_root() {
        let mut search = Search::new(goal("A"), SearchParams::default());
        assert_eq!(names(&search.theorems_to_expand().unwrap()), vec!["A"]);
        search
            .expand_and_backup(vec![expansion(
                "A",
                0.0,
                &[("T0", vec!["A"]), ("T1", vec!["B"])],
            )])
            .unwrap();
        // the self-loop dies during selection and only B is offered
        assert_eq!(names(&search.theorems_to_expand().unwrap()), vec!["B"]);
        search
            .expand_and_backup(vec![expansion("B", 0.0, &[("T2", vec!["A"])])])
            .unwrap();
        // the remaining branch cycles through B, killing the root
        let batch = search.theorems_to_expand().unwrap();
        assert!(batch.is_empty());
        assert!(search.is_done());
        assert!(!search.is_proven());
        assert!(search.dead_root());
        let result = search.result().unwrap();
        assert!(result.proof.is_none());
        assert!(result.tactic_samples.is_empty());
        assert!(result.proof_samples.is_empty());
        assert!(!result.critic_samples.is_empty());
        assert!(result.critic_samples.iter().all(|s| s.bad));
        assert!(result.critic_samples.iter().all(|s| s.q_estimate == 0.0));
        assert_eq!(result.effect_samples.len(), 3);
    }

    #[test]
    fn edges_into_dead_nodes_kill_the_root() {
        let mut search = Search::new(goal("A"), SearchParams::default());
        assert_eq!(names(&search.theorems_to_expand().unwrap()), vec!["A"]);
        search
            .expand_and_backup(vec![expansion(
                "A",
                0.0,
                &[("T0", vec!["B1"]), ("T1", vec!["B2"])],
            )])
            .unwrap();
        assert_eq!(names(&search.theorems_to_expand().unwrap()), vec!["B1"]);
        search
            .expand_and_backup(vec![expansion("B1", 0.0, &[("T0", vec!["A"])])])
            .unwrap();
        assert_eq!(names(&search.theorems_to_expand().unwrap()), vec!["B2"]);
        // B2 reaches into the corpse of B1, so everything dies
        search
            .expand_and_backup(vec![expansion("B2", 0.0, &[("T1", vec!["B1"])])])
            .unwrap();
        assert!(search.is_done());
        assert!(search.dead_root());
        assert!(!search.is_proven());
        let result = search.result().unwrap();
        assert!(result.proof.is_none());
        assert_eq!(result.critic_samples.len(), 3);
        assert!(result.critic_samples.iter().all(|s| s.bad));
        assert_eq!(result.effect_samples.len(), 4);
        assert!(result.tactic_samples.is_empty());
        assert!(result.proof_samples.is_empty());
    }

    #[test]
    fn sibling_convergence_dedups_selection() {
        let mut search = Search::new(goal("A"), SearchParams::default());
        assert_eq!(names(&search.theorems_to_expand().unwrap()), vec!["A"]);
        search
            .expand_and_backup(vec![expansion("A", 0.0, &[("T0", vec!["B1", "B2"])])])
            .unwrap();
        assert_eq!(names(&search.theorems_to_expand().unwrap()), vec!["B1", "B2"]);
        search
            .expand_and_backup(vec![
                expansion("B1", 0.0, &[("T1", vec!["B3"])]),
                expansion("B2", 0.0, &[("T2", vec!["B3"])]),
            ])
            .unwrap();
        // both siblings reach B3; it must be offered exactly once
        assert_eq!(names(&search.theorems_to_expand().unwrap()), vec!["B3"]);
        search.expand_and_backup(vec![closing("B3", "T3")]).unwrap();
        assert!(search.is_proven());
        let result = search.result().unwrap();
        assert_eq!(result.proof.unwrap().size(), 5);
    }

    #[test]
    fn backup_once_counts_each_distinct_walk_once() {
        let drive = |backup_once: bool| {
            let params = SearchParams {
                succ_expansions: 4,
                backup_once,
                ..SearchParams::default()
            };
            let mut search = Search::new(goal("A"), params);
            search.theorems_to_expand().unwrap();
            search
                .expand_and_backup(vec![expansion("A", 0.0, &[("T0", vec!["B"])])])
                .unwrap();
            search.theorems_to_expand().unwrap();
            search
                .expand_and_backup(vec![expansion("B", -0.5, &[("T1", vec!["C"])])])
                .unwrap();
            search
        };
        let plain = drive(false);
        assert_eq!(plain.graph().node(goal("A").name()).unwrap().count(0), 4);
        let deduped = drive(true);
        assert_eq!(deduped.graph().node(goal("A").name()).unwrap().count(0), 1);
    }

    #[test]
    fn expansion_budget_stops_the_search() {
        let params = SearchParams {
            num_expansions: 1,
            ..SearchParams::default()
        };
        let mut search = Search::new(goal("A"), params);
        search.theorems_to_expand().unwrap();
        search
            .expand_and_backup(vec![expansion("A", 0.0, &[("T0", vec!["B"])])])
            .unwrap();
        assert!(search.is_done());
        assert!(!search.is_proven());
    }

    #[test]
    fn expander_errors_kill_the_root() {
        let mut search = Search::new(goal("A"), SearchParams::default());
        search.theorems_to_expand().unwrap();
        search
            .expand_and_backup(vec![Expansion::failure(goal("A"), "env timeout")])
            .unwrap();
        assert!(search.dead_root());
        assert!(search.is_done());
        let result = search.result().unwrap();
        assert!(result.proof.is_none());
        assert_eq!(result.critic_samples.len(), 1);
        assert!(result.critic_samples[0].bad);
        assert_eq!(result.critic_samples[0].q_estimate, 0.0);
    }

    #[test]
    fn root_is_fixed_once_started() {
        let mut search = Search::new(goal("A"), SearchParams::default());
        search.set_root(goal("A2")).unwrap();
        search.theorems_to_expand().unwrap();
        search
            .expand_and_backup(vec![expansion("A2", 0.0, &[("T0", vec!["B"])])])
            .unwrap();
        assert!(matches!(
            search.set_root(goal("A3")),
            Err(SearchError::AlreadyStarted)
        ));
    }

    #[test]
    fn unsolicited_expansions_are_rejected() {
        let mut search = Search::new(goal("A"), SearchParams::default());
        let result = search.expand_and_backup(vec![closing("Z", "T0")]);
        assert!(matches!(result, Err(SearchError::InvalidExpansion { .. })));
    }

    #[test]
    fn empty_success_expansions_are_rejected() {
        let mut search = Search::new(goal("A"), SearchParams::default());
        search.theorems_to_expand().unwrap();
        let hollow = Expansion::success(goal("A"), 0.0, vec![], vec![], vec![], vec![]);
        assert!(matches!(
            search.expand_and_backup(vec![hollow]),
            Err(SearchError::InvalidExpansion { .. })
        ));
    }

    #[test]
    fn virtual_counts_balance_after_each_call() {
        let mut search = Search::new(goal("A"), SearchParams::default());
        search.theorems_to_expand().unwrap();
        search
            .expand_and_backup(vec![expansion("A", 0.0, &[("T0", vec!["B0", "B1"])])])
            .unwrap();
        assert!(search.graph().nodes().all(|n| !n.has_virtual_count()));
        search.theorems_to_expand().unwrap();
        search
            .expand_and_backup(vec![
                expansion("B0", -0.1, &[("T1", vec!["C0"])]),
                expansion("B1", -0.2, &[("T2", vec!["C1"])]),
            ])
            .unwrap();
        assert!(search.graph().nodes().all(|n| !n.has_virtual_count()));
    }

    #[test]
    fn temperature_sampling_stays_on_live_tactics() {
        let params = SearchParams {
            policy_temperature: 1.0,
            tactic_init_value: 0.5,
            succ_expansions: 8,
            ..SearchParams::default()
        };
        let mut search = Search::new(goal("A"), params);
        search.theorems_to_expand().unwrap();
        search
            .expand_and_backup(vec![expansion(
                "A",
                0.0,
                &[("T0", vec!["B0"]), ("T1", vec!["B1"])],
            )])
            .unwrap();
        let batch = search.theorems_to_expand().unwrap();
        assert!(!batch.is_empty());
        assert!(batch.iter().all(|g| g.name() == "B0" || g.name() == "B1"));
    }

    /// grow a graph where B is solved early while its sibling
    /// branch C keeps the root open, then watch whether selection
    /// still walks through B.
    fn drive_solved_sibling(stop_on_solved: bool) -> Search {
        let params = SearchParams {
            early_stopping: false,
            early_stopping_solved_if_root_not_proven: stop_on_solved,
            succ_expansions: 1,
            ..SearchParams::default()
        };
        let mut search = Search::new(goal("A"), params);
        assert_eq!(names(&search.theorems_to_expand().unwrap()), vec!["A"]);
        search
            .expand_and_backup(vec![expansion("A", 0.0, &[("T0", vec!["B", "C"])])])
            .unwrap();
        assert_eq!(names(&search.theorems_to_expand().unwrap()), vec!["B", "C"]);
        search
            .expand_and_backup(vec![
                expansion("B", 0.0, &[("T0", vec!["D"])]),
                expansion("C", 0.0, &[("T0", vec!["E"])]),
            ])
            .unwrap();
        assert_eq!(names(&search.theorems_to_expand().unwrap()), vec!["D", "E"]);
        search
            .expand_and_backup(vec![
                closing("D", "T1"),
                expansion("E", 0.0, &[("T0", vec!["F"])]),
            ])
            .unwrap();
        assert!(search.graph().node(goal("B").name()).unwrap().is_solved());
        assert!(!search.is_proven());
        assert_eq!(names(&search.theorems_to_expand().unwrap()), vec!["F"]);
        search.expand_and_backup(vec![closing("F", "T1")]).unwrap();
        assert!(search.is_proven());
        search
    }

    #[test]
    fn solved_siblings_become_leaves_when_configured() {
        let search = drive_solved_sibling(true);
        // B was backed up once while unsolved and never revisited
        assert_eq!(search.graph().node(goal("B").name()).unwrap().count(0), 1);
    }

    #[test]
    fn solved_siblings_keep_collecting_visits_by_default() {
        let search = drive_solved_sibling(false);
        assert_eq!(search.graph().node(goal("B").name()).unwrap().count(0), 2);
    }

    #[test]
    fn q_conditioning_labels_every_sample() {
        let params = SearchParams {
            tactic_sample_q_conditioning: true,
            ..SearchParams::default()
        };
        let mut search = drive_branching(params);
        let result = search.result().unwrap();
        assert!(!result.tactic_samples.is_empty());
        for sample in &result.tactic_samples {
            assert_eq!(sample.q_estimates.len(), sample.tactics.len());
            assert!(sample.target_pi.iter().all(|&t| t == -1.0));
        }
    }

    #[test]
    fn minimal_proof_solving_mask_lowers_when_proven() {
        let params = SearchParams {
            node_mask: NodeMask::MinimalProofSolving,
            ..SearchParams::default()
        };
        let mut search = drive_branching(params);
        let result = search.result().unwrap();
        assert_eq!(result.tactic_samples.len(), 6);
        assert!(result
            .tactic_samples
            .iter()
            .all(|s| s.inproof == InProof::InMinimalProof));
    }

    #[test]
    fn search_state_round_trips_through_json() {
        let mut search = drive_branching(SearchParams::default());
        let json = serde_json::to_string(&search).unwrap();
        let mut back: Search = serde_json::from_str(&json).unwrap();
        assert_eq!(back.expansion_count(), search.expansion_count());
        assert!(back.is_proven());
        assert!(back.is_done());
        let proof = back.result().unwrap().proof.unwrap();
        assert_eq!(proof, search.result().unwrap().proof.unwrap());
    }

    /// run the full protocol against a scripted expander until
    /// the search declares itself done.
    fn drive_to_completion(params: SearchParams, script: &[(&str, Expansion)]) -> Search {
        let script = script
            .iter()
            .map(|(name, expansion)| (name.to_string(), expansion.clone()))
            .collect::<BTreeMap<String, Expansion>>();
        let mut search = Search::new(goal("A"), params);
        for _ in 0..64 {
            if search.is_done() {
                break;
            }
            let batch = search.theorems_to_expand().unwrap();
            if batch.is_empty() {
                break;
            }
            let expansions = batch
                .iter()
                .map(|g| script[g.name()].clone())
                .collect::<Vec<Expansion>>();
            search.expand_and_backup(expansions).unwrap();
        }
        assert!(search.is_done());
        assert!(search.graph().nodes().all(|n| !n.has_virtual_count()));
        search
    }

    #[test]
    fn scripted_proof_closes_under_both_kernels() {
        let script = [
            ("A", expansion("A", -0.1, &[("T0", vec!["B", "C"]), ("T1", vec!["D"])])),
            ("B", expansion("B", -0.2, &[("T2", vec!["D"])])),
            ("C", closing("C", "T3")),
            ("D", closing("D", "T4")),
        ];
        for policy_type in [PolicyType::AlphaZero, PolicyType::Rpo] {
            let params = SearchParams {
                policy_type,
                tactic_init_value: 0.4,
                ..SearchParams::default()
            };
            let mut search = drive_to_completion(params, &script);
            assert!(search.is_proven());
            let result = search.result().unwrap();
            let proof = result.proof.unwrap();
            assert_eq!(proof.goal, goal("A"));
            // the one-step branch through D is the minimal proof
            assert_eq!(proof.tactic.unique_string, "T1");
            assert_eq!(proof.size(), 2);
            assert!(!result.proof_samples.is_empty());
        }
    }

    #[test]
    fn depth_penalty_discounts_each_level() {
        let params = SearchParams {
            succ_expansions: 1,
            depth_penalty: 0.5,
            ..SearchParams::default()
        };
        let mut search = Search::new(goal("A"), params);
        search.theorems_to_expand().unwrap();
        search
            .expand_and_backup(vec![expansion("A", 0.0, &[("T0", vec!["B"])])])
            .unwrap();
        search.theorems_to_expand().unwrap();
        search
            .expand_and_backup(vec![expansion("B", -1.0, &[("T1", vec!["C"])])])
            .unwrap();
        // one backup level: value(B) = -1, value(A) = -1 + ln 0.5
        let a = search.graph().node(goal("A").name()).unwrap();
        assert!((a.get_value() - (-1.0 + 0.5f64.ln())).abs() < 1e-12);
    }
}
