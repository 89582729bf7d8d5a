use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeSet;

/// the namespaces opened for a goal. kept sorted so that the
/// order in which a caller supplies them never influences goal
/// identity or anything derived from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub namespaces: BTreeSet<String>,
}

impl<const N: usize> From<[&str; N]> for Context {
    fn from(namespaces: [&str; N]) -> Self {
        Self {
            namespaces: namespaces.iter().map(|n| n.to_string()).collect(),
        }
    }
}
