pub mod context;
pub mod hypothesis;
pub mod proof;
pub mod tactic;
pub mod theorem;

/// shared goal handle. goals are interned once per canonical string
/// and referenced everywhere else; they live as long as the search.
pub type Goal = std::sync::Arc<theorem::Theorem>;

/// shared tactic handle.
pub type Tac = std::sync::Arc<tactic::Tactic>;
