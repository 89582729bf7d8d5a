/// typed failures of the search core. `CycleDetected` is handled
/// inside the driver and never reaches callers; everything else
/// aborts the current call and leaves retrying to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    /// an expansion violated its contract: priors off, positive
    /// log-critic, arity mismatch, or an empty tactic list on the
    /// success variant.
    InvalidExpansion { detail: String },

    /// the policy kernel was invoked with every action masked.
    NoValidTactic,

    /// numeric failure inside the policy kernel.
    Numeric { detail: String },

    /// unexplored goals exist yet no tactic at the root is
    /// expandable.
    PropagateInconsistency,

    /// a tactic would close a cycle along the current simulation
    /// path.
    CycleDetected,

    /// `set_root` after the first expansion was merged.
    AlreadyStarted,

    /// minimal-proof query for a goal the graph never saw.
    NotFound,

    /// minimal-proof query for an unsolved goal.
    NotSolved,

    /// minimal-proof query for a goal outside the proof.
    NotInProof,

    /// a node arrived without a live ancestor, or twice.
    BadAncestry { detail: String },
}

impl std::fmt::Display for SearchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidExpansion { detail } => write!(f, "invalid expansion: {detail}"),
            Self::NoValidTactic => write!(f, "no valid tactic left to select"),
            Self::Numeric { detail } => write!(f, "numeric failure: {detail}"),
            Self::PropagateInconsistency => {
                write!(f, "unexplored goals remain but the root is not expandable")
            }
            Self::CycleDetected => write!(f, "tactic closes a cycle on the current path"),
            Self::AlreadyStarted => write!(f, "root can only be replaced before any expansion"),
            Self::NotFound => write!(f, "goal not present in the graph"),
            Self::NotSolved => write!(f, "goal not solved"),
            Self::NotInProof => write!(f, "goal not part of any proof"),
            Self::BadAncestry { detail } => write!(f, "bad ancestry: {detail}"),
        }
    }
}

impl std::error::Error for SearchError {}
