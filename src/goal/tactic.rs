use crate::Arbitrary;
use crate::Millis;
use serde::Deserialize;
use serde::Serialize;
use std::hash::Hash;
use std::hash::Hasher;

/// a prover step. a tactic is either fully specified (`is_valid`)
/// or a parse/environment placeholder, in which case the search
/// kills it the moment its node is created. equality and hashing
/// go through the unique string alone, so two deliveries of the
/// same tactic with different timings are the same tactic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tactic {
    pub unique_string: String,
    pub is_valid: bool,
    pub duration: Millis,
}

impl Tactic {
    pub fn new(unique_string: impl Into<String>) -> Self {
        Self {
            unique_string: unique_string.into(),
            is_valid: true,
            duration: 1,
        }
    }

    pub fn invalid(unique_string: impl Into<String>) -> Self {
        Self {
            unique_string: unique_string.into(),
            is_valid: false,
            duration: 1,
        }
    }

    pub fn timed(self, duration: Millis) -> Self {
        Self { duration, ..self }
    }
}

impl PartialEq for Tactic {
    fn eq(&self, other: &Self) -> bool {
        self.unique_string == other.unique_string
    }
}

impl Eq for Tactic {}

impl PartialOrd for Tactic {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Tactic {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.unique_string.cmp(&other.unique_string)
    }
}

impl Hash for Tactic {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.unique_string.hash(state);
    }
}

impl std::fmt::Display for Tactic {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.unique_string)
    }
}

impl Arbitrary for Tactic {
    fn random() -> Self {
        Self::new(format!("tac{}", rand::random::<u32>()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_ignores_timing_and_validity() {
        let fast = Tactic::new("intro");
        let slow = Tactic::invalid("intro").timed(500);
        assert_eq!(fast, slow);
    }

    #[test]
    fn identity_follows_unique_string() {
        assert_ne!(Tactic::new("intro"), Tactic::new("ring"));
    }

    #[test]
    fn random_tactics_are_valid_and_distinct() {
        assert!(Tactic::random().is_valid);
        assert_ne!(Tactic::random(), Tactic::random());
    }
}
