//! Percentage and staged rollouts on top of [`crate::bucket`].
//!
//! A rollout routes an identity to `included_key` when its bucket falls under the current
//! percentage and to `excluded_key` otherwise. Staged rollouts change the percentage over
//! time; hashing is keyed by experiment name, seed and identity (never by stage), so moving to
//! a later stage re-buckets no one.

use chrono::{DateTime, Utc};

use crate::bucket::is_included;
use crate::error::{ConfigError, Result};

/// One step of a staged rollout.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RolloutStage {
    pub starts_at: DateTime<Utc>,
    pub percentage: i32,
    #[cfg_attr(feature = "serde", serde(default))]
    pub description: String,
}

impl RolloutStage {
    pub fn new(starts_at: DateTime<Utc>, percentage: i32) -> Self {
        Self {
            starts_at,
            percentage,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// How the inclusion percentage is determined.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RolloutSchedule {
    /// A single percentage for the lifetime of the experiment.
    Fixed(i32),
    /// The most recent stage whose `starts_at <= now` applies; 0% before the first stage.
    Staged(Vec<RolloutStage>),
}

/// Percentage rollout between two keys.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RolloutSpec {
    pub schedule: RolloutSchedule,
    pub included_key: String,
    pub excluded_key: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub seed: Option<String>,
}

impl RolloutSpec {
    /// Fixed-percentage rollout.
    pub fn percentage(
        percentage: i32,
        included_key: impl Into<String>,
        excluded_key: impl Into<String>,
    ) -> Self {
        Self {
            schedule: RolloutSchedule::Fixed(percentage),
            included_key: included_key.into(),
            excluded_key: excluded_key.into(),
            seed: None,
        }
    }

    /// Staged rollout. Stages are kept ordered by `starts_at`.
    pub fn staged(
        mut stages: Vec<RolloutStage>,
        included_key: impl Into<String>,
        excluded_key: impl Into<String>,
    ) -> Self {
        stages.sort_by_key(|s| s.starts_at);
        Self {
            schedule: RolloutSchedule::Staged(stages),
            included_key: included_key.into(),
            excluded_key: excluded_key.into(),
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: impl Into<String>) -> Self {
        self.seed = Some(seed.into());
        self
    }

    /// Percentage in effect at `now`, clamped to `[0, 100]`.
    pub fn effective_percentage(&self, now: DateTime<Utc>) -> i32 {
        let raw = match &self.schedule {
            RolloutSchedule::Fixed(p) => *p,
            RolloutSchedule::Staged(stages) => stages
                .iter()
                .filter(|s| s.starts_at <= now)
                .max_by_key(|s| s.starts_at)
                .map(|s| s.percentage)
                .unwrap_or(0),
        };
        raw.clamp(0, 100)
    }

    /// Whether `identity` is inside the rollout at `now`.
    pub fn includes(&self, identity: &str, experiment: &str, now: DateTime<Utc>) -> bool {
        is_included(
            identity,
            experiment,
            self.effective_percentage(now),
            self.seed.as_deref(),
        )
    }

    /// The key `identity` is routed to at `now`.
    pub fn pick(&self, identity: &str, experiment: &str, now: DateTime<Utc>) -> &str {
        if self.includes(identity, experiment, now) {
            &self.included_key
        } else {
            &self.excluded_key
        }
    }

    /// Reject percentages outside `[0, 100]` and empty stage lists.
    pub fn validate(&self, experiment: &str) -> Result<()> {
        let check = |p: i32| {
            if (0..=100).contains(&p) {
                Ok(())
            } else {
                Err(ConfigError::PercentageOutOfRange {
                    experiment: experiment.to_string(),
                    percentage: i64::from(p),
                })
            }
        };
        match &self.schedule {
            RolloutSchedule::Fixed(p) => check(*p),
            RolloutSchedule::Staged(stages) => {
                if stages.is_empty() {
                    return Err(ConfigError::EmptyStages(experiment.to_string()));
                }
                stages.iter().try_for_each(|s| check(s.percentage))
            }
        }
    }

    /// Both keys this rollout can route to.
    pub fn keys(&self) -> [&str; 2] {
        [&self.included_key, &self.excluded_key]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn staged() -> RolloutSpec {
        RolloutSpec::staged(
            vec![
                RolloutStage::new(t0() + Duration::days(7), 50).with_description("half"),
                RolloutStage::new(t0(), 10).with_description("canary"),
                RolloutStage::new(t0() + Duration::days(14), 100),
            ],
            "new",
            "old",
        )
    }

    #[test]
    fn staged_resolves_most_recent_started_stage() {
        let r = staged();
        assert_eq!(r.effective_percentage(t0() - Duration::seconds(1)), 0);
        assert_eq!(r.effective_percentage(t0()), 10);
        assert_eq!(r.effective_percentage(t0() + Duration::days(8)), 50);
        assert_eq!(r.effective_percentage(t0() + Duration::days(30)), 100);
    }

    #[test]
    fn staged_constructor_orders_stages() {
        let RolloutSchedule::Staged(stages) = staged().schedule else {
            panic!("expected staged schedule");
        };
        assert!(stages.windows(2).all(|w| w[0].starts_at <= w[1].starts_at));
    }

    #[test]
    fn effective_percentage_is_clamped() {
        let r = RolloutSpec::percentage(150, "a", "b");
        assert_eq!(r.effective_percentage(t0()), 100);
        let r = RolloutSpec::percentage(-3, "a", "b");
        assert_eq!(r.effective_percentage(t0()), 0);
    }

    #[test]
    fn later_stages_keep_earlier_inclusions() {
        let r = staged().with_seed("s1");
        for i in 0..500 {
            let id = format!("user-{i}");
            if r.includes(&id, "exp", t0()) {
                assert!(r.includes(&id, "exp", t0() + Duration::days(8)));
                assert_eq!(r.pick(&id, "exp", t0() + Duration::days(8)), "new");
            }
        }
    }

    #[test]
    fn validate_rejects_bad_percentages_and_empty_stages() {
        assert!(RolloutSpec::percentage(50, "a", "b").validate("e").is_ok());
        assert!(matches!(
            RolloutSpec::percentage(101, "a", "b").validate("e"),
            Err(ConfigError::PercentageOutOfRange { percentage: 101, .. })
        ));
        assert_eq!(
            RolloutSpec::staged(vec![], "a", "b").validate("e"),
            Err(ConfigError::EmptyStages("e".to_string()))
        );
    }
}
