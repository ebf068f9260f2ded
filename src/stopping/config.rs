//! Declarative stopping configuration.
//!
//! [`StoppingConfig`] is plain data (serde-friendly) describing which rules an experiment uses.
//! [`StoppingConfig::build`] validates it and assembles the [`StoppingRuleEngine`] in a fixed
//! order: minimum sample size, significance (optionally conjoined with practical significance),
//! practical significance, maximum duration, sequential analysis.

use chrono::Duration;
use std::sync::Arc;

use super::{
    AllOfRule, MaxDurationRule, MinimumSampleSizeRule, PracticalSignificanceRule,
    SequentialAnalysisRule, StatisticalSignificanceRule, StoppingRuleEngine, TestTail,
};
use crate::clock::Clock;
use crate::error::{ConfigError, Result};

/// Parameters for the two-proportion z-test rule.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SignificanceConfig {
    pub confidence: f64,
    /// Per-variant trials required before the test runs.
    pub min_sample_size: u64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub tail: TestTail,
}

impl Default for SignificanceConfig {
    fn default() -> Self {
        Self {
            confidence: 0.95,
            min_sample_size: 100,
            tail: TestTail::TwoSided,
        }
    }
}

/// How sequential boundaries are obtained.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SequentialBoundaries {
    /// O'Brien-Fleming spending with overall two-sided `alpha`.
    OBrienFleming { alpha: f64 },
    /// One z boundary per checkpoint.
    Custom(Vec<f64>),
}

/// Parameters for the group-sequential rule.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SequentialConfig {
    pub checkpoints: Vec<u64>,
    pub boundaries: SequentialBoundaries,
}

impl SequentialConfig {
    pub fn obrien_fleming(checkpoints: Vec<u64>, alpha: f64) -> Self {
        Self {
            checkpoints,
            boundaries: SequentialBoundaries::OBrienFleming { alpha },
        }
    }

    fn build(&self) -> Result<SequentialAnalysisRule> {
        match &self.boundaries {
            SequentialBoundaries::OBrienFleming { alpha } => {
                SequentialAnalysisRule::obrien_fleming(self.checkpoints.clone(), *alpha)
            }
            SequentialBoundaries::Custom(b) => {
                SequentialAnalysisRule::with_boundaries(self.checkpoints.clone(), b.clone())
            }
        }
    }
}

/// Which stopping rules an experiment runs.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StoppingConfig {
    /// Gate: every variant needs this many pulls before any other rule is consulted.
    pub minimum_sample_size: Option<u64>,
    pub significance: Option<SignificanceConfig>,
    /// Minimum relative lift.
    pub minimum_effect: Option<f64>,
    /// When both significance and `minimum_effect` are set, stop only when both agree instead
    /// of letting either stop on its own.
    pub require_practical_significance: bool,
    /// Whole seconds.
    pub max_duration_secs: Option<i64>,
    pub sequential: Option<SequentialConfig>,
}

impl Default for StoppingConfig {
    fn default() -> Self {
        Self {
            minimum_sample_size: Some(100),
            significance: Some(SignificanceConfig::default()),
            minimum_effect: None,
            require_practical_significance: false,
            max_duration_secs: None,
            sequential: None,
        }
    }
}

impl StoppingConfig {
    /// A configuration with no rules; evaluation always keeps running.
    pub fn none() -> Self {
        Self {
            minimum_sample_size: None,
            significance: None,
            ..Default::default()
        }
    }

    pub fn with_minimum_sample_size(mut self, threshold: u64) -> Self {
        self.minimum_sample_size = Some(threshold);
        self
    }

    pub fn with_significance(mut self, significance: SignificanceConfig) -> Self {
        self.significance = Some(significance);
        self
    }

    pub fn with_minimum_effect(mut self, minimum_effect: f64) -> Self {
        self.minimum_effect = Some(minimum_effect);
        self
    }

    pub fn requiring_practical_significance(mut self) -> Self {
        self.require_practical_significance = true;
        self
    }

    /// Limits are kept in whole seconds. A positive sub-second remainder rounds up, so
    /// `Duration::milliseconds(500)` becomes one second rather than zero.
    pub fn with_max_duration(mut self, max: Duration) -> Self {
        let secs = max.num_seconds();
        let secs = if max > Duration::seconds(secs) { secs + 1 } else { secs };
        self.max_duration_secs = Some(secs);
        self
    }

    pub fn with_sequential(mut self, sequential: SequentialConfig) -> Self {
        self.sequential = Some(sequential);
        self
    }

    /// Check every parameter without building.
    pub fn validate(&self) -> Result<()> {
        if let Some(s) = &self.significance {
            StatisticalSignificanceRule::new(s.confidence, s.min_sample_size)?;
        }
        if let Some(e) = self.minimum_effect {
            PracticalSignificanceRule::new(e)?;
        }
        if let Some(secs) = self.max_duration_secs {
            if secs <= 0 {
                return Err(ConfigError::InvalidDuration(secs));
            }
        }
        if let Some(seq) = &self.sequential {
            seq.build()?;
        }
        Ok(())
    }

    /// Assemble the rule chain. `clock` drives the maximum-duration rule.
    pub fn build(&self, clock: Arc<dyn Clock>) -> Result<StoppingRuleEngine> {
        self.validate()?;
        let mut engine = StoppingRuleEngine::new();

        if let Some(threshold) = self.minimum_sample_size {
            engine = engine.with_rule(MinimumSampleSizeRule::new(threshold));
        }

        let significance = self
            .significance
            .map(|s| {
                StatisticalSignificanceRule::new(s.confidence, s.min_sample_size)
                    .map(|r| r.with_tail(s.tail))
            })
            .transpose()?;
        let practical = self
            .minimum_effect
            .map(PracticalSignificanceRule::new)
            .transpose()?;

        match (significance, practical) {
            (Some(sig), Some(prac)) if self.require_practical_significance => {
                engine = engine.with_rule(AllOfRule::new().with_rule(sig).with_rule(prac));
            }
            (sig, prac) => {
                if let Some(sig) = sig {
                    engine = engine.with_rule(sig);
                }
                if let Some(prac) = prac {
                    engine = engine.with_rule(prac);
                }
            }
        }

        if let Some(secs) = self.max_duration_secs {
            engine = engine.with_rule(MaxDurationRule::new(Duration::seconds(secs), clock));
        }
        if let Some(seq) = &self.sequential {
            engine = engine.with_rule(seq.build()?);
        }
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    fn clock() -> Arc<dyn Clock> {
        Arc::new(SystemClock)
    }

    #[test]
    fn sub_second_limits_round_up_to_whole_seconds() {
        let cfg = StoppingConfig::none().with_max_duration(Duration::milliseconds(500));
        assert_eq!(cfg.max_duration_secs, Some(1));
        assert!(cfg.validate().is_ok());

        let cfg = StoppingConfig::none().with_max_duration(Duration::milliseconds(90_250));
        assert_eq!(cfg.max_duration_secs, Some(91));
        let cfg = StoppingConfig::none().with_max_duration(Duration::days(2));
        assert_eq!(cfg.max_duration_secs, Some(172_800));
    }

    #[test]
    fn default_builds_gate_and_z_test() {
        let engine = StoppingConfig::default().build(clock()).unwrap();
        let names: Vec<_> = engine.rules().map(|r| r.name()).collect();
        assert_eq!(names, ["minimum_sample_size", "statistical_significance"]);
    }

    #[test]
    fn none_builds_empty_engine() {
        assert!(StoppingConfig::none().build(clock()).unwrap().is_empty());
    }

    #[test]
    fn practical_requirement_conjoins_rules() {
        let cfg = StoppingConfig::default()
            .with_minimum_effect(0.05)
            .requiring_practical_significance()
            .with_max_duration(Duration::days(30))
            .with_sequential(SequentialConfig::obrien_fleming(vec![1000, 2000], 0.05));
        let names: Vec<_> = cfg.build(clock()).unwrap().rules().map(|r| r.name()).collect();
        assert_eq!(
            names,
            ["minimum_sample_size", "all_of", "max_duration", "sequential_analysis"]
        );
    }

    #[test]
    fn invalid_parameters_are_refused() {
        let bad = StoppingConfig::default().with_significance(SignificanceConfig {
            confidence: 1.2,
            ..Default::default()
        });
        assert_eq!(bad.validate(), Err(ConfigError::InvalidConfidence(1.2)));

        let bad = StoppingConfig::none().with_minimum_effect(-0.1);
        assert!(bad.build(clock()).is_err());

        let bad = StoppingConfig::none().with_max_duration(Duration::zero());
        assert!(matches!(bad.validate(), Err(ConfigError::InvalidDuration(0))));

        let bad = StoppingConfig::none().with_max_duration(Duration::seconds(-3));
        assert_eq!(bad.validate(), Err(ConfigError::InvalidDuration(-3)));

        let bad = StoppingConfig::none().with_sequential(SequentialConfig {
            checkpoints: vec![100, 200],
            boundaries: SequentialBoundaries::Custom(vec![3.0]),
        });
        assert!(matches!(bad.validate(), Err(ConfigError::InvalidCheckpoints(_))));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn missing_fields_take_defaults() {
        let cfg: StoppingConfig = serde_json::from_str(r#"{"minimum_effect": 0.02}"#).unwrap();
        assert_eq!(cfg.minimum_sample_size, Some(100));
        assert_eq!(cfg.minimum_effect, Some(0.02));
        assert!(cfg.significance.is_some());
    }
}
