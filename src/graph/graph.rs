use super::ancestors::Ancestors;
use super::metric::Metric;
use super::metric::MetricMap;
use super::node::Node;
use crate::goal::proof::Proof;
use crate::goal::Goal;
use crate::search::error::SearchError;
use crate::MAX_PROOF_LENGTH;
use serde::Deserialize;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::BinaryHeap;
use std::collections::VecDeque;

/// the AND/OR hypergraph. nodes live in an arena keyed by the
/// canonical goal string; hyper-edges are (parent, tactic index)
/// pairs kept in two ancestor maps. the permanent map records
/// every edge ever introduced and never shrinks; the live map
/// loses edges as tactics are killed. `unexplored` holds the
/// goals reachable through live edges that are not yet nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    root: Goal,
    nodes: BTreeMap<String, Node>,
    ancestors: Ancestors,
    permanent: Ancestors,
    unexplored: BTreeSet<String>,
    minimum_proof_size: MetricMap<Option<usize>>,
    initial_minimum_proof_size: MetricMap<Option<usize>>,
}

impl Graph {
    pub fn new(root: Goal) -> Self {
        let mut ancestors = Ancestors::default();
        let mut permanent = Ancestors::default();
        ancestors.add(&root, None, 0);
        permanent.add(&root, None, 0);
        let unexplored = BTreeSet::from([root.name().to_string()]);
        Self {
            root,
            nodes: BTreeMap::new(),
            ancestors,
            permanent,
            unexplored,
            minimum_proof_size: MetricMap::default(),
            initial_minimum_proof_size: MetricMap::default(),
        }
    }

    pub fn root(&self) -> &Goal {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.nodes.get_mut(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn is_proven(&self) -> bool {
        self.nodes
            .get(self.root.name())
            .is_some_and(Node::is_solved)
    }

    pub fn root_is_bad(&self) -> bool {
        self.nodes.get(self.root.name()).is_some_and(Node::is_bad)
    }

    pub fn unexplored_is_empty(&self) -> bool {
        self.unexplored.is_empty()
    }

    /// merge a batch of freshly expanded nodes. each arriving goal
    /// must be reachable through a live edge and not be a node
    /// yet. bad arrivals cascade-kill every edge pointing at them;
    /// the hyper-edges of live arrivals are recorded in both
    /// ancestor maps, with edges onto already-dead children killed
    /// on the spot. ends by propagating newly solved status
    /// upward.
    pub fn add_nodes(&mut self, batch: Vec<Node>) -> Result<(), SearchError> {
        let mut newly_solved = VecDeque::new();
        for node in batch {
            let name = node.name().to_string();
            if !self.ancestors.contains_goal(&name) {
                return Err(SearchError::BadAncestry {
                    detail: format!("{name} is not reachable from the root"),
                });
            }
            if self.nodes.contains_key(&name) {
                return Err(SearchError::BadAncestry {
                    detail: format!("{name} was already expanded"),
                });
            }
            let bad = node.is_bad();
            let solved = node.is_solved();
            let goal = node.goal().clone();
            let edges = (0..node.n_tactics())
                .flat_map(|i| node.children(i).iter().cloned().map(move |c| (i, c)))
                .collect::<Vec<(usize, Goal)>>();
            self.nodes.insert(name.clone(), node);
            if bad {
                log::debug!("dead expansion at {name}");
                let parents = self
                    .ancestors
                    .of(&name)
                    .filter_map(|(p, t)| p.clone().map(|p| (p, *t)))
                    .collect::<Vec<(Goal, usize)>>();
                for (parent, tactic_id) in parents {
                    self.kill_tactic(parent.name(), tactic_id);
                }
                continue;
            }
            if solved {
                newly_solved.push_back(name);
                continue;
            }
            let mut dead_tactics = BTreeSet::new();
            for (tactic_id, child) in edges {
                self.permanent.add(&child, Some(goal.clone()), tactic_id);
                self.ancestors.add(&child, Some(goal.clone()), tactic_id);
                if self.nodes.get(child.name()).is_some_and(Node::is_bad) {
                    dead_tactics.insert(tactic_id);
                }
            }
            for tactic_id in dead_tactics {
                self.kill_tactic(&name, tactic_id);
            }
        }
        self.propagate_solved(newly_solved);
        Ok(())
    }

    /// kill one tactic and cascade. removing a tactic erases its
    /// hyper-edges from the live ancestry; a node whose last
    /// tactic dies becomes bad, so every live edge arriving at it
    /// is enqueued in turn (front of the deque, for locality).
    pub fn kill_tactic(&mut self, name: &str, tactic_id: usize) {
        let mut to_kill = VecDeque::from([(name.to_string(), tactic_id)]);
        while let Some((current, tid)) = to_kill.pop_front() {
            let node = &self.nodes[&current];
            if node.killed(tid) {
                continue;
            }
            log::trace!("kill tactic {tid} @ {current}");
            let goal = node.goal().clone();
            let children = node.children(tid).to_vec();
            for child in children {
                if self.ancestors.contains(child.name(), &goal, tid) {
                    self.ancestors.erase(child.name(), &goal, tid);
                    if self.ancestors.count(child.name()) == 0
                        && !self.nodes.contains_key(child.name())
                    {
                        self.unexplored.remove(child.name());
                    }
                }
            }
            let node = self.nodes.get_mut(&current).expect("kill target exists");
            if node.kill_tactic(tid) {
                let parents = self
                    .ancestors
                    .of(&current)
                    .filter_map(|(p, t)| p.as_ref().map(|p| (p.name().to_string(), *t)))
                    .collect::<Vec<(String, usize)>>();
                for edge in parents {
                    to_kill.push_front(edge);
                }
            }
        }
    }

    /// rebuild `unexplored` from scratch: walk the live subgraph
    /// from the root, skipping killed tactics (and solved nodes
    /// when asked to), and collect every child that is not a node.
    pub fn find_unexplored(&mut self, ignore_solved: bool) {
        self.unexplored.clear();
        if !self.nodes.contains_key(self.root.name()) {
            self.unexplored.insert(self.root.name().to_string());
            return;
        }
        let mut queue = VecDeque::from([self.root.name().to_string()]);
        let mut seen = BTreeSet::new();
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            let node = &self.nodes[&current];
            if node.is_solved() && ignore_solved {
                continue;
            }
            for tactic_id in 0..node.n_tactics() {
                if node.killed(tactic_id) {
                    continue;
                }
                for child in node.children(tactic_id) {
                    match self.nodes.contains_key(child.name()) {
                        true => queue.push_front(child.name().to_string()),
                        false => {
                            self.unexplored.insert(child.name().to_string());
                        }
                    }
                }
            }
        }
    }

    /// clear every expandable flag, then walk upward from each
    /// unexplored goal through live ancestry, marking the tactics
    /// along the way. a tactic is expandable iff following it can
    /// still reach an unexplored goal.
    pub fn propagate_expandable(&mut self) {
        let Self {
            nodes,
            ancestors,
            unexplored,
            ..
        } = self;
        for node in nodes.values_mut() {
            node.set_expandable_all(false);
        }
        let mut queue = VecDeque::new();
        for name in unexplored.iter() {
            for (parent, tactic_id) in ancestors.of(name) {
                let Some(parent) = parent else { continue };
                let node = nodes
                    .get_mut(parent.name())
                    .expect("live ancestors are nodes");
                if node.killed(*tactic_id) {
                    continue;
                }
                node.set_expandable(*tactic_id, true);
                queue.push_back(parent.name().to_string());
            }
        }
        let mut seen = BTreeSet::new();
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            for (parent, tactic_id) in ancestors.of(&current) {
                let Some(parent) = parent else { continue };
                let node = nodes
                    .get_mut(parent.name())
                    .expect("live ancestors are nodes");
                if node.killed(*tactic_id) {
                    continue;
                }
                node.set_expandable(*tactic_id, true);
                queue.push_front(parent.name().to_string());
            }
        }
    }

    fn expandable_consistent(&self) -> bool {
        self.nodes.values().all(|node| {
            (0..node.n_tactics()).all(|i| !(node.killed(i) && node.expandable(i)))
        })
    }

    /// rebuild the unexplored set and the expandable flags, then
    /// sanity-check the result: if goals remain unexplored the
    /// root must offer a way to reach them.
    pub fn refresh(&mut self, ignore_solved: bool) -> Result<(), SearchError> {
        self.find_unexplored(ignore_solved);
        self.propagate_expandable();
        debug_assert!(self.expandable_consistent());
        if self.unexplored.is_empty() {
            return Ok(());
        }
        if self.unexplored.len() == 1 && self.unexplored.contains(self.root.name()) {
            return Ok(());
        }
        if self.nodes[self.root.name()].any_expandable() {
            return Ok(());
        }
        Err(SearchError::PropagateInconsistency)
    }

    /// drain the newly-solved queue upward: whenever a valid
    /// parent tactic sees all of its children solved, the parent
    /// is marked solved and enqueued in turn.
    fn propagate_solved(&mut self, mut newly: VecDeque<String>) {
        let mut to_check = VecDeque::new();
        loop {
            while let Some(name) = newly.pop_front() {
                debug_assert!(self.nodes[&name].is_solved());
                for (parent, tactic_id) in self.permanent.of(&name) {
                    let Some(parent) = parent else { continue };
                    to_check.push_back((parent.name().to_string(), *tactic_id));
                }
            }
            let Some((name, tactic_id)) = to_check.pop_front() else {
                break;
            };
            let node = &self.nodes[&name];
            if !node.is_valid(tactic_id) {
                continue;
            }
            let all_solved = node
                .children(tactic_id)
                .iter()
                .all(|c| self.nodes.get(c.name()).is_some_and(Node::is_solved));
            if all_solved {
                let node = self.nodes.get_mut(&name).expect("parent is a node");
                if node.solved_by(tactic_id) {
                    log::debug!("{name} solved");
                    newly.push_back(name);
                }
            }
        }
    }

    /// structural sanity of the whole graph; violations are bugs,
    /// not recoverable conditions.
    pub fn consistency_check(&self) {
        for node in self.nodes.values() {
            assert!(
                node.is_solved() == (node.n_solving() > 0),
                "solved must match the solving set at {}",
                node.name(),
            );
        }
        for node in self.nodes.values() {
            for tactic_id in 0..node.n_tactics() {
                if node.killed(tactic_id) {
                    continue;
                }
                for child in node.children(tactic_id) {
                    assert!(
                        self.ancestors.contains(child.name(), node.goal(), tactic_id),
                        "live hyper-edge missing from live ancestry at {}",
                        node.name(),
                    );
                }
            }
        }
        for node in self.nodes.values() {
            let should_be_solved = (0..node.n_tactics()).any(|tactic_id| {
                node.is_valid(tactic_id)
                    && node
                        .children(tactic_id)
                        .iter()
                        .all(|c| self.nodes.get(c.name()).is_some_and(Node::is_solved))
            });
            assert!(
                should_be_solved == node.is_solved(),
                "solved flag out of sync at {}",
                node.name(),
            );
        }
    }

    /// mark every node reachable from the solved root through
    /// solving tactics as participating in a proof.
    pub fn build_in_proof(&mut self) {
        if !self.is_proven() {
            return;
        }
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([self.root.clone()]);
        while let Some(current) = queue.pop_front() {
            if !self.nodes.contains_key(current.name()) {
                continue;
            }
            if !seen.insert(current.name().to_string()) {
                continue;
            }
            let node = self.nodes.get_mut(current.name()).expect("node seen above");
            debug_assert!(node.n_solving() > 0);
            node.set_in_proof();
            let next = node
                .solving()
                .collect::<Vec<usize>>()
                .into_iter()
                .flat_map(|tactic_id| node.children(tactic_id).to_vec())
                .collect::<Vec<Goal>>();
            queue.extend(next);
        }
    }

    /// dijkstra-style minimum proof computation, per metric. the
    /// frontier starts at solved leaves and flows through
    /// permanent ancestry; the heap is keyed (priority, goal key,
    /// tactic) so ties break deterministically. once the root has
    /// a minimum, nodes on minimal tactics are flagged.
    pub fn proof_sizes_and_depths(&mut self) {
        for metric in Metric::ALL {
            let mut heap = BinaryHeap::new();
            for (name, node) in &self.nodes {
                if !node.is_solved_leaf() {
                    continue;
                }
                for tactic_id in node.solving() {
                    let priority = match metric {
                        Metric::Time => node.tactic(tactic_id).duration as usize,
                        _ => 1,
                    };
                    heap.push(Reverse((priority, name.clone(), tactic_id)));
                }
            }
            while let Some(Reverse((priority, name, tactic_id))) = heap.pop() {
                {
                    let node = self.nodes.get_mut(&name).expect("heap entries are nodes");
                    if !node.has_minimum_tactic_length(metric, tactic_id) {
                        node.set_minimum_tactic_length(metric, tactic_id, priority);
                        if priority <= node.minimum_length(metric).unwrap_or(MAX_PROOF_LENGTH) {
                            debug_assert!(!node.has_minimum_tactic(metric, tactic_id));
                            node.add_minimum_tactic(metric, tactic_id);
                        }
                    }
                    match node.minimum_length(metric) {
                        Some(minimum) => {
                            debug_assert!(minimum <= priority);
                            continue;
                        }
                        None => node.set_minimum_length(metric, priority),
                    }
                }
                let parents = self
                    .permanent
                    .of(&name)
                    .filter_map(|(p, t)| p.as_ref().map(|p| (p.name().to_string(), *t)))
                    .collect::<Vec<(String, usize)>>();
                for (parent, parent_tactic) in parents {
                    let parent_node = &self.nodes[&parent];
                    let base = match metric {
                        Metric::Time => parent_node.tactic(parent_tactic).duration as usize,
                        _ => 1,
                    };
                    let Some(combined) =
                        self.combine_children(metric, parent_node.children(parent_tactic))
                    else {
                        continue;
                    };
                    let new_priority = base + combined;
                    if new_priority < MAX_PROOF_LENGTH {
                        heap.push(Reverse((new_priority, parent, parent_tactic)));
                    }
                }
            }
        }
        if !self.is_proven() {
            return;
        }
        for metric in Metric::ALL {
            let minimum = self.nodes[self.root.name()]
                .minimum_length(metric)
                .expect("proven root has a minimum length");
            self.minimum_proof_size.set(metric, Some(minimum));
            let mut seen = BTreeSet::new();
            let mut queue = VecDeque::from([self.root.clone()]);
            while let Some(current) = queue.pop_front() {
                if !seen.insert(current.name().to_string()) {
                    continue;
                }
                let node = self
                    .nodes
                    .get_mut(current.name())
                    .expect("minimum proof stays inside the graph");
                node.set_in_minimum_proof(metric, true);
                debug_assert!(node.is_in_proof());
                let tactics = node.minimum_tactics(metric).to_vec();
                debug_assert!(!tactics.is_empty());
                for tactic_id in tactics {
                    queue.extend(node.children(tactic_id).to_vec());
                }
            }
        }
    }

    /// how a tactic's children combine under a metric: the worst
    /// child for depth, the total for size and time. none while
    /// any child lacks a minimum.
    fn combine_children(&self, metric: Metric, children: &[Goal]) -> Option<usize> {
        let mut combined = 0;
        for child in children {
            let length = self.nodes.get(child.name())?.minimum_length(metric)?;
            combined = match metric {
                Metric::Depth => combined.max(length),
                Metric::Size | Metric::Time => combined + length,
            };
        }
        Some(combined)
    }

    /// the metric-minimal proof tree below a goal.
    pub fn minimal_proof(&self, metric: Metric, goal: &Goal) -> Result<Proof, SearchError> {
        let node = self.nodes.get(goal.name()).ok_or(SearchError::NotFound)?;
        if !node.is_solved() {
            return Err(SearchError::NotSolved);
        }
        if !node.is_in_proof() {
            return Err(SearchError::NotInProof);
        }
        let tactic_id = node.minimum_tactic(metric).ok_or(SearchError::NotInProof)?;
        let mut children = Vec::new();
        for child in node.children(tactic_id) {
            children.push(self.minimal_proof(metric, child)?);
        }
        Ok(Proof {
            goal: node.goal().clone(),
            tactic: node.tactic(tactic_id).clone(),
            children,
        })
    }

    pub fn minimum_proof_size(&self, metric: Metric) -> Option<usize> {
        *self.minimum_proof_size.get(metric)
    }

    pub fn initial_minimum_captured(&self) -> bool {
        Metric::ALL
            .iter()
            .any(|&metric| self.initial_minimum_proof_size.get(metric).is_some())
    }

    /// record the minimum proof sizes of the first proof ever
    /// found, before the per-node bookkeeping is wiped.
    pub fn capture_initial_minimum(&mut self) {
        for metric in Metric::ALL {
            let minimum = self.nodes[self.root.name()].minimum_length(metric);
            debug_assert!(minimum.is_some());
            debug_assert!(self.nodes[self.root.name()].is_in_minimum_proof(metric));
            self.initial_minimum_proof_size.set(metric, minimum);
        }
    }

    /// wipe all per-node minimum-proof bookkeeping so future
    /// proofs re-derive it; the graph-level floor reverts to the
    /// initially captured sizes.
    pub fn reset_minimum_proof_stats(&mut self) {
        self.minimum_proof_size = self.initial_minimum_proof_size.clone();
        for node in self.nodes.values_mut() {
            node.reset_minimum_proof_stats();
        }
    }
}
