use serde::Deserialize;
use serde::Serialize;

/// a named hypothesis of a goal. both fields are opaque to the
/// search; the identifier doubles as the sort key when we derive
/// the canonical form of a theorem.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hypothesis {
    pub identifier: String,
    #[serde(rename = "type")]
    pub ty: String,
}

impl From<(&str, &str)> for Hypothesis {
    fn from((identifier, ty): (&str, &str)) -> Self {
        Self {
            identifier: identifier.to_string(),
            ty: ty.to_string(),
        }
    }
}

impl std::fmt::Display for Hypothesis {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} : {}", self.identifier, self.ty)
    }
}
