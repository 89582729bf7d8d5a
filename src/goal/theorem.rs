use super::context::Context;
use super::hypothesis::Hypothesis;
use super::tactic::Tactic;
use crate::Arbitrary;
use serde::Deserialize;
use serde::Serialize;
use std::hash::Hash;
use std::hash::Hasher;

/// a proof obligation. the payload (conclusion, hypotheses,
/// context, history, metadata) is opaque to the search; identity
/// is the canonical string derived from the conclusion and the
/// hypotheses sorted by identifier, so hypothesis order never
/// changes who a theorem is. metadata is stored and returned
/// verbatim, never interpreted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Theorem {
    pub conclusion: String,
    pub hypotheses: Vec<Hypothesis>,
    pub context: Context,
    pub past_tactics: Vec<Tactic>,
    pub metadata: serde_json::Value,
    unique: String,
}

impl Theorem {
    pub fn new(conclusion: impl Into<String>, hypotheses: Vec<Hypothesis>) -> Self {
        let conclusion = conclusion.into();
        let unique = Self::canonical(&conclusion, &hypotheses);
        Self {
            conclusion,
            hypotheses,
            context: Context::default(),
            past_tactics: Vec::new(),
            metadata: serde_json::Value::Null,
            unique,
        }
    }

    pub fn with_context(self, context: Context) -> Self {
        Self { context, ..self }
    }

    pub fn with_past_tactics(self, past_tactics: Vec<Tactic>) -> Self {
        Self { past_tactics, ..self }
    }

    pub fn with_metadata(self, metadata: serde_json::Value) -> Self {
        Self { metadata, ..self }
    }

    /// the canonical string this theorem is known by.
    pub fn name(&self) -> &str {
        &self.unique
    }

    /// sorted hypotheses rendered as `identifier|||type|||`, then
    /// the conclusion appended.
    fn canonical(conclusion: &str, hypotheses: &[Hypothesis]) -> String {
        let mut sorted = hypotheses.to_vec();
        sorted.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        let mut unique = String::new();
        for hypothesis in sorted {
            unique.push_str(&hypothesis.identifier);
            unique.push_str("|||");
            unique.push_str(&hypothesis.ty);
            unique.push_str("|||");
        }
        unique.push_str(conclusion);
        unique
    }
}

impl PartialEq for Theorem {
    fn eq(&self, other: &Self) -> bool {
        self.unique == other.unique
    }
}

impl Eq for Theorem {}

impl PartialOrd for Theorem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Theorem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.unique.cmp(&other.unique)
    }
}

impl Hash for Theorem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.unique.hash(state);
    }
}

impl std::fmt::Display for Theorem {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.conclusion)
    }
}

impl Arbitrary for Theorem {
    fn random() -> Self {
        Self::new(format!("thm{}", rand::random::<u32>()), vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn digest(theorem: &Theorem) -> u64 {
        let mut hasher = DefaultHasher::new();
        theorem.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn hypothesis_order_is_irrelevant() {
        let h1 = Hypothesis::from(("h1", "nat"));
        let h2 = Hypothesis::from(("h2", "x > 0"));
        let a = Theorem::new("x + 0 = x", vec![h1.clone(), h2.clone()]);
        let b = Theorem::new("x + 0 = x", vec![h2, h1]);
        assert_eq!(a.name(), b.name());
        assert_eq!(a, b);
        assert_eq!(digest(&a), digest(&b));
    }

    #[test]
    fn random_theorems_are_distinct() {
        assert_ne!(Theorem::random(), Theorem::random());
    }

    #[test]
    fn hypotheses_change_identity() {
        let bare = Theorem::new("x + 0 = x", vec![]);
        let hyped = Theorem::new("x + 0 = x", vec![Hypothesis::from(("h", "nat"))]);
        assert_ne!(bare, hyped);
    }

    #[test]
    fn payload_round_trips_through_json() {
        let theorem = Theorem::new("goal", vec![Hypothesis::from(("h", "nat"))])
            .with_metadata(serde_json::json!({"file": "algebra.lean", "line": 7}));
        let json = serde_json::to_string(&theorem).unwrap();
        let back: Theorem = serde_json::from_str(&json).unwrap();
        assert_eq!(back, theorem);
        assert_eq!(back.metadata, theorem.metadata);
        assert_eq!(back.name(), theorem.name());
    }

    #[test]
    fn metadata_is_not_identity() {
        let plain = Theorem::new("goal", vec![]);
        let tagged = Theorem::new("goal", vec![]).with_metadata(serde_json::json!({"k": 1}));
        assert_eq!(plain, tagged);
    }
}
