use crate::goal::Goal;
use crate::goal::Tac;
use crate::LogValue;
use serde::Deserialize;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::hash::Hash;
use std::hash::Hasher;

/// one top-down trace from the root to a set of leaves. per
/// visited goal the simulation remembers the chosen tactic, the
/// ordered children, the depth, the value filled in on expansion
/// or backup, whether a virtual-loss reservation was placed, and
/// a per-path seen set for cycle detection (freed as soon as the
/// goal's children are chosen). `pending` counts the leaves still
/// waiting on the expander; at zero the trace is ready to back
/// up.
///
/// a goal reached along two converging branches is visited once
/// and linked below both parents, so its value backs up into
/// each.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Simulation {
    root: Goal,
    goals: BTreeMap<String, Goal>,
    tactics: BTreeMap<String, Tac>,
    tactic_ids: BTreeMap<String, usize>,
    depths: BTreeMap<String, usize>,
    children: BTreeMap<String, Vec<Goal>>,
    parents: BTreeMap<String, Vec<Goal>>,
    values: BTreeMap<String, LogValue>,
    solved: BTreeMap<String, bool>,
    virtual_added: BTreeMap<String, bool>,
    seen: BTreeMap<String, BTreeSet<String>>,
    pending: usize,
}

impl Simulation {
    pub fn new(root: Goal) -> Self {
        let name = root.name().to_string();
        Self {
            goals: BTreeMap::from([(name.clone(), root.clone())]),
            tactics: BTreeMap::new(),
            tactic_ids: BTreeMap::new(),
            depths: BTreeMap::from([(name.clone(), 0)]),
            children: BTreeMap::from([(name.clone(), vec![])]),
            parents: BTreeMap::from([(name.clone(), vec![])]),
            values: BTreeMap::new(),
            solved: BTreeMap::new(),
            virtual_added: BTreeMap::from([(name.clone(), false)]),
            seen: BTreeMap::from([(name.clone(), BTreeSet::from([name]))]),
            root,
            pending: 0,
        }
    }

    pub fn root(&self) -> &Goal {
        &self.root
    }

    pub fn contains(&self, name: &str) -> bool {
        self.goals.contains_key(name)
    }

    pub fn goals(&self) -> impl Iterator<Item = &Goal> {
        self.goals.values()
    }

    /// first visit of a goal below `parent`.
    pub fn add_goal(&mut self, goal: Goal, parent: &Goal, depth: usize) {
        let name = goal.name().to_string();
        debug_assert!(self.goals.contains_key(parent.name()));
        debug_assert!(!self.goals.contains_key(&name));
        let mut seen = self
            .seen
            .get(parent.name())
            .cloned()
            .unwrap_or_default();
        seen.insert(name.clone());
        self.seen.insert(name.clone(), seen);
        self.children
            .get_mut(parent.name())
            .expect("parent was visited")
            .push(goal.clone());
        self.children.insert(name.clone(), vec![]);
        self.parents.insert(name.clone(), vec![parent.clone()]);
        self.depths.insert(name.clone(), depth);
        self.virtual_added.insert(name.clone(), false);
        self.goals.insert(name, goal);
    }

    /// a converging branch reached a goal this trace already
    /// visited: record the extra hyper-edge without re-visiting.
    pub fn link_goal(&mut self, goal: &Goal, parent: &Goal, depth: usize) {
        let name = goal.name().to_string();
        debug_assert!(self.goals.contains_key(&name));
        self.children
            .get_mut(parent.name())
            .expect("parent was visited")
            .push(goal.clone());
        self.parents
            .get_mut(&name)
            .expect("linked goal was visited")
            .push(parent.clone());
        let slot = self.depths.get_mut(&name).expect("visited goals have depth");
        *slot = (*slot).min(depth);
    }

    pub fn depth(&self, name: &str) -> usize {
        *self.depths.get(name).expect("visited goals have depth")
    }

    pub fn set_value(&mut self, name: &str, value: LogValue) {
        self.values.insert(name.to_string(), value);
    }

    pub fn value(&self, name: &str) -> LogValue {
        *self.values.get(name).expect("value was recorded")
    }

    pub fn set_solved(&mut self, name: &str, solved: bool) {
        self.solved.insert(name.to_string(), solved);
    }

    pub fn set_tactic(&mut self, name: &str, tactic: Tac, tactic_id: usize) {
        self.tactics.insert(name.to_string(), tactic);
        self.tactic_ids.insert(name.to_string(), tactic_id);
    }

    pub fn tactic_id(&self, name: &str) -> usize {
        *self.tactic_ids.get(name).expect("tactic was chosen")
    }

    pub fn virtual_added(&self, name: &str) -> bool {
        *self
            .virtual_added
            .get(name)
            .expect("visited goals track reservations")
    }

    pub fn set_virtual_added(&mut self, name: &str, added: bool) {
        self.virtual_added.insert(name.to_string(), added);
    }

    pub fn path_seen(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.seen.get(name)
    }

    pub fn forget_seen(&mut self, name: &str) -> bool {
        self.seen.remove(name).is_some()
    }

    /// goals with no recorded children: expansion targets plus
    /// terminal nodes.
    pub fn leaves(&self) -> Vec<Goal> {
        self.children
            .iter()
            .filter(|(_, children)| children.is_empty())
            .map(|(name, _)| self.goals[name].clone())
            .collect()
    }

    pub fn leaf_count(&self) -> usize {
        self.children
            .values()
            .filter(|children| children.is_empty())
            .count()
    }

    pub fn parents(&self, name: &str) -> &[Goal] {
        self.parents
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn children_of(&self, name: &str) -> &[Goal] {
        self.children
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn child_values(&self, name: &str) -> Vec<LogValue> {
        self.children_of(name)
            .iter()
            .map(|child| self.value(child.name()))
            .collect()
    }

    pub fn reset_pending(&mut self) {
        self.pending = 0;
    }

    pub fn increment_pending(&mut self) {
        self.pending += 1;
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    /// the expander answered for one of this trace's leaves.
    pub fn receive_expansion(&mut self, name: &str, value: LogValue, solved: bool) {
        debug_assert!(self.pending > 0);
        self.set_value(name, value);
        self.set_solved(name, solved);
        self.pending -= 1;
    }

    pub fn should_backup(&self) -> bool {
        self.pending == 0
    }

    /// order-independent fingerprint of the trace: the root plus,
    /// per visited goal, the chosen tactic and the ordered
    /// children. two traces that walked the same edges digest
    /// identically, which is what `backup_once` deduplicates on.
    pub fn digest(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.root.name().hash(&mut hasher);
        for (name, children) in &self.children {
            name.hash(&mut hasher);
            if let Some(tactic) = self.tactics.get(name) {
                tactic.unique_string.hash(&mut hasher);
            }
            for child in children {
                child.name().hash(&mut hasher);
            }
        }
        hasher.finish()
    }
}

impl PartialEq for Simulation {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
            && self.children.len() == other.children.len()
            && self.children.iter().all(|(name, children)| {
                self.tactics.get(name) == other.tactics.get(name)
                    && other.children.get(name).is_some_and(|theirs| {
                        children.len() == theirs.len()
                            && children.iter().zip(theirs).all(|(a, b)| a == b)
                    })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goal::tactic::Tactic;
    use crate::goal::theorem::Theorem;

    fn goal(name: &str) -> Goal {
        Goal::from(Theorem::new(name, vec![]))
    }

    fn tac(name: &str) -> Tac {
        Tac::from(Tactic::new(name))
    }

    fn branch(sim: &mut Simulation, parent: &str, tactic: &str, children: &[&str]) {
        let parent = goal(parent);
        let depth = sim.depth(parent.name()) + 1;
        sim.set_tactic(parent.name(), tac(tactic), 0);
        for child in children {
            sim.add_goal(goal(child), &parent, depth);
        }
    }

    #[test]
    fn depths_grow_from_the_root() {
        let mut sim = Simulation::new(goal("a"));
        assert_eq!(sim.depth("a"), 0);
        branch(&mut sim, "a", "t", &["b"]);
        branch(&mut sim, "b", "t", &["c"]);
        assert_eq!(sim.depth("b"), 1);
        assert_eq!(sim.depth("c"), 2);
    }

    #[test]
    fn seen_sets_follow_the_path() {
        let mut sim = Simulation::new(goal("a"));
        branch(&mut sim, "a", "t", &["b", "c"]);
        branch(&mut sim, "b", "t", &["d"]);
        let seen = sim.path_seen("d").unwrap();
        assert!(seen.contains("a"));
        assert!(seen.contains("b"));
        assert!(seen.contains("d"));
        assert!(!seen.contains("c"));
    }

    #[test]
    fn leaves_are_the_childless_goals() {
        let mut sim = Simulation::new(goal("a"));
        branch(&mut sim, "a", "t", &["b", "c"]);
        branch(&mut sim, "b", "t", &["d"]);
        let mut leaves = sim
            .leaves()
            .iter()
            .map(|g| g.name().to_string())
            .collect::<Vec<String>>();
        leaves.sort();
        assert_eq!(leaves, vec!["c", "d"]);
        assert_eq!(sim.leaf_count(), 2);
    }

    #[test]
    fn linked_goals_feed_both_parents() {
        let mut sim = Simulation::new(goal("a"));
        branch(&mut sim, "a", "t", &["b", "c"]);
        branch(&mut sim, "b", "t1", &["d"]);
        sim.set_tactic("c", tac("t2"), 0);
        sim.link_goal(&goal("d"), &goal("c"), 2);
        sim.set_value("d", -0.5);
        assert_eq!(sim.child_values("b"), vec![-0.5]);
        assert_eq!(sim.child_values("c"), vec![-0.5]);
        assert_eq!(sim.parents("d").len(), 2);
        assert_eq!(sim.leaf_count(), 1);
    }

    #[test]
    fn pending_tracks_outstanding_expansions() {
        let mut sim = Simulation::new(goal("a"));
        branch(&mut sim, "a", "t", &["b", "c"]);
        sim.increment_pending();
        sim.increment_pending();
        assert!(!sim.should_backup());
        sim.receive_expansion("b", -0.1, false);
        sim.receive_expansion("c", 0.0, true);
        assert!(sim.should_backup());
    }

    #[test]
    fn equal_walks_digest_equally() {
        let build = || {
            let mut sim = Simulation::new(goal("a"));
            branch(&mut sim, "a", "t", &["b", "c"]);
            sim
        };
        let one = build();
        let two = build();
        assert_eq!(one, two);
        assert_eq!(one.digest(), two.digest());
    }

    #[test]
    fn diverging_tactics_digest_differently() {
        let mut one = Simulation::new(goal("a"));
        branch(&mut one, "a", "t0", &["b"]);
        let mut two = Simulation::new(goal("a"));
        branch(&mut two, "a", "t1", &["b"]);
        assert_ne!(one, two);
        assert_ne!(one.digest(), two.digest());
    }

    #[test]
    fn diverging_children_digest_differently() {
        let mut one = Simulation::new(goal("a"));
        branch(&mut one, "a", "t", &["b"]);
        let mut two = Simulation::new(goal("a"));
        branch(&mut two, "a", "t", &["b", "c"]);
        assert_ne!(one, two);
        assert_ne!(one.digest(), two.digest());
    }
}
