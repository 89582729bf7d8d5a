use crate::search::error::SearchError;
use crate::LogValue;
use crate::Prior;
use crate::Probability;
use crate::LOG_ZERO;
use crate::RPO_EPSILON;
use crate::RPO_ITERATIONS;
use crate::RPO_TOLERANCE;
use serde::Deserialize;
use serde::Serialize;

/// which closed form turns action values into a selection
/// distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyType {
    AlphaZero,
    Rpo,
}

/// the tree policy. given per-tactic action values, priors and
/// visit counts, produces the probability with which selection
/// follows each tactic. masked tactics carry `LOG_ZERO` action
/// values and always come out at probability zero.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Policy {
    kind: PolicyType,
    exploration: f64,
}

impl Policy {
    pub fn new(kind: PolicyType, exploration: f64) -> Self {
        Self { kind, exploration }
    }

    pub fn distribution(
        &self,
        q: &[LogValue],
        priors: &[Prior],
        counts: &[usize],
    ) -> Result<Vec<Probability>, SearchError> {
        let mut unmasked = q.iter().enumerate().filter(|&(_, &v)| v > LOG_ZERO);
        let first = unmasked.next();
        let second = unmasked.next();
        match (first, second) {
            (None, _) => Err(SearchError::NoValidTactic),
            (Some((only, _)), None) => {
                let mut result = vec![0.0; q.len()];
                result[only] = 1.0;
                Ok(result)
            }
            _ => match self.kind {
                PolicyType::AlphaZero => Ok(self.alpha_zero(q, priors, counts)),
                PolicyType::Rpo => self.rpo(q, priors, counts),
            },
        }
    }

    /// puct scoring: `q + c * prior * sqrt(N) / (1 + n)`, masked
    /// entries score zero, normalized by the score sum.
    fn alpha_zero(&self, q: &[LogValue], priors: &[Prior], counts: &[usize]) -> Vec<Probability> {
        let visits = counts.iter().sum::<usize>() as f64;
        let scores = q
            .iter()
            .zip(priors)
            .zip(counts)
            .map(|((&value, &prior), &count)| match value > LOG_ZERO {
                true => value + self.exploration * prior * visits.sqrt() / (1.0 + count as f64),
                false => 0.0,
            })
            .collect::<Vec<f64>>();
        let sum = scores.iter().sum::<f64>();
        scores.into_iter().map(|score| score / sum).collect()
    }

    /// regularized policy optimization. with no visits the
    /// multiplier vanishes and the normalized unmasked action
    /// values are returned directly; otherwise the distribution
    /// is `prior * m / (alpha - q)` for the bisected alpha.
    fn rpo(
        &self,
        q: &[LogValue],
        priors: &[Prior],
        counts: &[usize],
    ) -> Result<Vec<Probability>, SearchError> {
        let visits = counts.iter().sum::<usize>() as f64;
        let multiplier = visits.sqrt() / (visits + q.len() as f64) * self.exploration;
        if multiplier <= 0.0 {
            let values = q
                .iter()
                .map(|&value| if value > LOG_ZERO { value } else { 0.0 })
                .collect::<Vec<f64>>();
            let sum = values.iter().sum::<f64>();
            return Ok(values.into_iter().map(|value| value / sum).collect());
        }
        let scaled = priors
            .iter()
            .map(|prior| prior * multiplier)
            .collect::<Vec<f64>>();
        let lo = q
            .iter()
            .zip(priors)
            .map(|(&value, &prior)| value + multiplier * prior)
            .fold(f64::NEG_INFINITY, f64::max);
        let hi = q
            .iter()
            .map(|&value| value + multiplier)
            .fold(f64::NEG_INFINITY, f64::max);
        let alpha = Self::bisect(lo, hi, q, &scaled)?;
        let raw = scaled
            .iter()
            .zip(q)
            .map(|(&s, &value)| s / (alpha - value).max(RPO_EPSILON))
            .collect::<Vec<f64>>();
        let sum = raw.iter().sum::<f64>();
        Ok(raw.into_iter().map(|p| p / sum).collect())
    }

    /// bisect for the alpha solving `sum(scaled / (alpha - q)) = 1`.
    /// bounded iterations; exhausting them is a numeric failure.
    fn bisect(
        mut lo: f64,
        mut hi: f64,
        q: &[LogValue],
        scaled: &[f64],
    ) -> Result<f64, SearchError> {
        for _ in 0..RPO_ITERATIONS {
            debug_assert!(lo < hi);
            let mid = (lo + hi) / 2.0;
            let mut sum = 0.0;
            for (&s, &value) in scaled.iter().zip(q) {
                let diff = mid - value;
                if diff == 0.0 {
                    return Err(SearchError::Numeric {
                        detail: "rpo bisection hit a zero denominator".to_string(),
                    });
                }
                sum += s / diff;
            }
            if sum - 1.0 < RPO_TOLERANCE {
                return Ok(mid);
            }
            if sum > 1.0 {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        Err(SearchError::Numeric {
            detail: "rpo bisection failed to converge".to_string(),
        })
    }
}
