pub mod goal;
pub mod graph;
pub mod policy;
pub mod search;

/// dimensional analysis types
pub type Probability = f64;
pub type LogValue = f64;
pub type Prior = f64;
pub type Millis = u64;

/// log-space zero and one
pub const LOG_ZERO: LogValue = f64::NEG_INFINITY;
pub const SOLVED_LOG_VALUE: LogValue = 0.0;

// prior normalization tolerance
pub(crate) const PRIOR_SUM_LO: f64 = 0.99;
pub(crate) const PRIOR_SUM_HI: f64 = 1.01;

// rpo bisection parameters
pub(crate) const RPO_ITERATIONS: usize = 50;
pub(crate) const RPO_TOLERANCE: f64 = 1e-3;
pub(crate) const RPO_EPSILON: f64 = 1e-10;

// larger than any reachable proof, small enough to add twice
// without overflowing
pub(crate) const MAX_PROOF_LENGTH: usize = usize::MAX / 2;

/// trait for random generation of test payloads
pub trait Arbitrary {
    fn random() -> Self;
}

/// first index of the maximum value. ties resolve to the
/// earliest maximal index, which keeps argmax selection
/// deterministic.
pub(crate) fn argmax(values: &[f64]) -> usize {
    let mut best = f64::NEG_INFINITY;
    let mut index = 0;
    for (i, &value) in values.iter().enumerate() {
        if value > best {
            best = value;
            index = i;
        }
    }
    index
}

/// seed for a fresh search: the decimal SEED environment
/// variable when set, otherwise os entropy.
pub fn seed() -> u64 {
    std::env::var("SEED")
        .ok()
        .and_then(|seed| seed.parse().ok())
        .unwrap_or_else(rand::random::<u64>)
}

/// initialize terminal logging
pub fn init() {
    let config = simplelog::ConfigBuilder::new()
        .set_location_level(log::LevelFilter::Off)
        .set_target_level(log::LevelFilter::Off)
        .set_thread_level(log::LevelFilter::Off)
        .build();
    let _ = simplelog::TermLogger::init(
        log::LevelFilter::Debug,
        config,
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );
}
