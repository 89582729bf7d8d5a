use serde::Deserialize;
use serde::Serialize;

/// the cost function a "minimum proof" minimizes: the longest
/// chain of tactic applications, the total number of tactic
/// applications, or the total tactic wallclock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Metric {
    Depth,
    Size,
    Time,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Depth, Metric::Size, Metric::Time];
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Metric::Depth => write!(f, "depth"),
            Metric::Size => write!(f, "size"),
            Metric::Time => write!(f, "time"),
        }
    }
}

/// one slot of storage per metric.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricMap<T> {
    slots: [T; 3],
}

impl<T> MetricMap<T> {
    pub fn get(&self, metric: Metric) -> &T {
        &self.slots[metric as usize]
    }

    pub fn get_mut(&mut self, metric: Metric) -> &mut T {
        &mut self.slots[metric as usize]
    }

    pub fn set(&mut self, metric: Metric, value: T) {
        self.slots[metric as usize] = value;
    }
}
