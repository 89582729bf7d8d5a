use super::Goal;
use super::Tac;
use serde::Deserialize;
use serde::Serialize;

/// a finished proof tree. applying `tactic` at `goal` yields the
/// child obligations in order; an empty children list means the
/// tactic closes the goal outright.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proof {
    pub goal: Goal,
    pub tactic: Tac,
    pub children: Vec<Proof>,
}

impl Proof {
    /// number of tactic applications in the tree.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(Proof::size).sum::<usize>()
    }

    /// longest root-to-leaf chain of tactic applications.
    pub fn depth(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(Proof::depth)
            .max()
            .unwrap_or_default()
    }
}
