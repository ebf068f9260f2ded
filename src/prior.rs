//! Cold-start priors expressed as pseudo-outcomes.
//!
//! A prior of `(successes, failures)` is folded into an arm exactly as if that many binary
//! outcomes had been recorded (reward 1 per success, 0 per failure). Downstream math (average
//! reward, conversion rate, Thompson posteriors, UCB) therefore needs no special case.

use crate::ArmStatistics;

/// Beta-style prior counts for one arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArmPrior {
    pub successes: u64,
    pub failures: u64,
}

impl ArmPrior {
    pub fn new(successes: u64, failures: u64) -> Self {
        Self {
            successes,
            failures,
        }
    }

    /// Convert an expected rate and a pseudo-sample size into rounded counts.
    ///
    /// Returns `None` if `rate` is not a probability.
    pub fn from_rate(rate: f64, strength: u64) -> Option<Self> {
        if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
            return None;
        }
        let successes = ((strength as f64) * rate).round() as u64;
        Some(Self {
            successes: successes.min(strength),
            failures: strength.saturating_sub(successes),
        })
    }

    pub fn total(&self) -> u64 {
        self.successes.saturating_add(self.failures)
    }
}

/// Fold `prior` into `out` as pseudo-outcomes. Timestamps are left untouched.
pub fn apply_prior(out: &mut ArmStatistics, prior: ArmPrior) {
    if prior.total() == 0 {
        return;
    }
    out.pulls = out.pulls.saturating_add(prior.total());
    out.successes = out.successes.saturating_add(prior.successes);
    out.failures = out.failures.saturating_add(prior.failures);
    // Successes carry reward 1 (and 1^2), failures carry 0.
    out.total_reward += prior.successes as f64;
    out.sum_of_squares += prior.successes as f64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_op_when_prior_empty() {
        let mut s = ArmStatistics::new("a");
        apply_prior(&mut s, ArmPrior::default());
        assert_eq!(s, ArmStatistics::new("a"));
    }

    #[test]
    fn prior_reads_like_recorded_outcomes() {
        let mut s = ArmStatistics::new("a");
        apply_prior(&mut s, ArmPrior::new(3, 7));
        assert_eq!(s.pulls, 10);
        assert_eq!(s.successes, 3);
        assert_eq!(s.failures, 7);
        assert!((s.average_reward() - 0.3).abs() < 1e-12);
        assert!((s.conversion_rate() - 0.3).abs() < 1e-12);
        assert!(s.first_seen.is_none());
    }

    #[test]
    fn from_rate_rounds_and_preserves_total() {
        let p = ArmPrior::from_rate(0.25, 10).unwrap();
        assert_eq!(p.total(), 10);
        assert_eq!(p.successes, 3); // 2.5 rounds away from zero
        assert!(ArmPrior::from_rate(1.5, 10).is_none());
        assert!(ArmPrior::from_rate(f64::NAN, 10).is_none());
    }
}
