use crate::goal::Goal;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::BTreeSet;

/// an incoming hyper-edge: the parent goal (none for the root's
/// pseudo edge) and the index of the tactic at that parent.
pub type AncestorEdge = (Option<Goal>, usize);

/// goal key to the set of hyper-edges arriving at that goal. the
/// graph keeps two of these: a permanent one that records every
/// edge ever introduced, and a live one that shrinks as tactics
/// are killed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ancestors {
    edges: BTreeMap<String, BTreeSet<AncestorEdge>>,
}

impl Ancestors {
    pub fn add(&mut self, goal: &Goal, parent: Option<Goal>, tactic_id: usize) {
        self.edges
            .entry(goal.name().to_string())
            .or_default()
            .insert((parent, tactic_id));
    }

    /// whether any edge was ever recorded for this goal.
    pub fn contains_goal(&self, name: &str) -> bool {
        self.edges.contains_key(name)
    }

    pub fn contains(&self, name: &str, parent: &Goal, tactic_id: usize) -> bool {
        self.edges
            .get(name)
            .is_some_and(|set| set.contains(&(Some(parent.clone()), tactic_id)))
    }

    pub fn erase(&mut self, name: &str, parent: &Goal, tactic_id: usize) -> bool {
        self.edges
            .get_mut(name)
            .is_some_and(|set| set.remove(&(Some(parent.clone()), tactic_id)))
    }

    /// number of live edges arriving at this goal.
    pub fn count(&self, name: &str) -> usize {
        self.edges.get(name).map(BTreeSet::len).unwrap_or_default()
    }

    pub fn of(&self, name: &str) -> impl Iterator<Item = &AncestorEdge> {
        self.edges.get(name).into_iter().flatten()
    }
}
