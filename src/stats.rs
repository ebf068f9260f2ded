//! Per-arm running statistics.
//!
//! [`ArmStatistics`] is a plain value: the store mutates it only through
//! [`ArmStatistics::apply_reward`] under that arm's lock, and every reader works on a copy.
//!
//! Derived quantities use defined-zero semantics instead of failing:
//! - `average_reward = total_reward / pulls` (0 when `pulls == 0`)
//! - `conversion_rate = successes / (successes + failures)` (0 when both are 0)
//! - `variance` is the Bessel-corrected sample variance (0 when `pulls <= 1`)
//!
//! With the `serde` feature the field names serialize as `key, isControl, pulls, successes,
//! failures, totalReward, sumOfSquares, firstSeen, lastSeen`. That shape is the one format
//! other processes may rely on; keep it stable.

use chrono::{DateTime, Utc};

/// Counters for one arm of one experiment.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ArmStatistics {
    pub key: String,
    pub is_control: bool,
    pub pulls: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_reward: f64,
    pub sum_of_squares: f64,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl ArmStatistics {
    /// Empty statistics for a treatment arm.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            is_control: false,
            pulls: 0,
            successes: 0,
            failures: 0,
            total_reward: 0.0,
            sum_of_squares: 0.0,
            first_seen: None,
            last_seen: None,
        }
    }

    /// Empty statistics for the control arm.
    pub fn control(key: impl Into<String>) -> Self {
        Self {
            is_control: true,
            ..Self::new(key)
        }
    }

    /// Apply one observed outcome.
    pub fn apply_reward(&mut self, reward: f64, is_success: bool, at: DateTime<Utc>) {
        self.pulls = self.pulls.saturating_add(1);
        self.total_reward += reward;
        self.sum_of_squares += reward * reward;
        if is_success {
            self.successes = self.successes.saturating_add(1);
        } else {
            self.failures = self.failures.saturating_add(1);
        }
        self.first_seen = Some(match self.first_seen {
            Some(first) => first.min(at),
            None => at,
        });
        self.last_seen = Some(at);
    }

    /// Value-returning form of [`apply_reward`](Self::apply_reward).
    #[must_use]
    pub fn with_reward(mut self, reward: f64, is_success: bool, at: DateTime<Utc>) -> Self {
        self.apply_reward(reward, is_success, at);
        self
    }

    pub fn average_reward(&self) -> f64 {
        if self.pulls == 0 {
            0.0
        } else {
            self.total_reward / self.pulls as f64
        }
    }

    pub fn conversion_rate(&self) -> f64 {
        let n = self.successes.saturating_add(self.failures);
        if n == 0 {
            0.0
        } else {
            self.successes as f64 / n as f64
        }
    }

    /// Sample variance of recorded rewards.
    pub fn variance(&self) -> f64 {
        if self.pulls <= 1 {
            return 0.0;
        }
        let n = self.pulls as f64;
        let mean = self.total_reward / n;
        // Cancellation can push this fractionally below zero.
        ((self.sum_of_squares - n * mean * mean) / (n - 1.0)).max(0.0)
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    #[test]
    fn empty_arm_reads_as_zero() {
        let s = ArmStatistics::new("a");
        assert_eq!(s.average_reward(), 0.0);
        assert_eq!(s.conversion_rate(), 0.0);
        assert_eq!(s.variance(), 0.0);
        assert!(s.first_seen.is_none());
    }

    #[test]
    fn apply_reward_updates_every_counter() {
        let mut s = ArmStatistics::new("a");
        s.apply_reward(1.0, true, t(10));
        s.apply_reward(0.0, false, t(5));
        s.apply_reward(2.0, true, t(20));

        assert_eq!(s.pulls, 3);
        assert_eq!(s.successes, 2);
        assert_eq!(s.failures, 1);
        assert_eq!(s.total_reward, 3.0);
        assert_eq!(s.sum_of_squares, 5.0);
        assert_eq!(s.first_seen, Some(t(5)));
        assert_eq!(s.last_seen, Some(t(20)));
        assert!((s.average_reward() - 1.0).abs() < 1e-12);
        assert!((s.conversion_rate() - 2.0 / 3.0).abs() < 1e-12);
        // Sample variance of {1, 0, 2} is 1.
        assert!((s.variance() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn single_pull_has_zero_variance() {
        let s = ArmStatistics::new("a").with_reward(7.5, true, t(0));
        assert_eq!(s.variance(), 0.0);
    }

    #[test]
    fn constant_rewards_never_go_negative() {
        let mut s = ArmStatistics::new("a");
        for i in 0..1000 {
            s.apply_reward(0.1, true, t(i));
        }
        assert!(s.variance() >= 0.0);
        assert!(s.variance() < 1e-9);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serde_round_trip_is_identical() {
        let s = ArmStatistics::control("control")
            .with_reward(1.0, true, t(1))
            .with_reward(0.25, false, t(2));
        let json = serde_json::to_string(&s).unwrap();
        for field in [
            "\"key\"",
            "\"isControl\"",
            "\"pulls\"",
            "\"successes\"",
            "\"failures\"",
            "\"totalReward\"",
            "\"sumOfSquares\"",
            "\"firstSeen\"",
            "\"lastSeen\"",
        ] {
            assert!(json.contains(field), "missing {field} in {json}");
        }
        let back: ArmStatistics = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
