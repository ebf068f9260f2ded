//! Configuration errors.
//!
//! Only experiment definition and registration can fail. The selection, recording and
//! evaluation paths absorb degenerate inputs into defined fallback values instead.

use thiserror::Error;

/// Crate result alias.
pub type Result<T, E = ConfigError> = std::result::Result<T, E>;

/// An experiment definition that the core refuses to run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("experiment `{experiment}`: percentage {percentage} is outside [0, 100]")]
    PercentageOutOfRange { experiment: String, percentage: i64 },

    #[error("experiment `{0}`: candidate arm set is empty")]
    EmptyCandidates(String),

    #[error("experiment `{experiment}`: arm `{arm}` is defined more than once")]
    DuplicateArm { experiment: String, arm: String },

    #[error("experiment `{experiment}`: {weights} weights for {arms} arms")]
    WeightCountMismatch {
        experiment: String,
        weights: usize,
        arms: usize,
    },

    #[error("experiment `{0}`: weights must sum to a positive total")]
    NonPositiveWeights(String),

    #[error("experiment `{experiment}`: weight {weight} is negative")]
    InvalidWeight { experiment: String, weight: i64 },

    #[error("experiment `{experiment}`: epsilon {epsilon} is outside [0, 1]")]
    InvalidEpsilon { experiment: String, epsilon: f64 },

    #[error("experiment `{experiment}`: exploration constant {c} must be finite and >= 0")]
    InvalidExplorationConstant { experiment: String, c: f64 },

    #[error("experiment `{experiment}`: prior (mu {mu}, kappa {kappa}, alpha {alpha}, beta {beta}) is improper")]
    InvalidPrior {
        experiment: String,
        mu: f64,
        kappa: f64,
        alpha: f64,
        beta: f64,
    },

    #[error("confidence level {0} must be strictly between 0 and 1")]
    InvalidConfidence(f64),

    #[error("minimum effect size {0} must be finite and >= 0")]
    InvalidEffectSize(f64),

    #[error("maximum duration of {0}s must be positive")]
    InvalidDuration(i64),

    #[error("sequential checkpoints are invalid: {0}")]
    InvalidCheckpoints(String),

    #[error("experiment `{0}`: staged rollout has no stages")]
    EmptyStages(String),

    #[error("experiment `{experiment}`: key `{key}` is not a defined arm")]
    UnknownArm { experiment: String, key: String },

    #[error("experiment `{0}` is already registered")]
    DuplicateExperiment(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_experiment() {
        let e = ConfigError::PercentageOutOfRange {
            experiment: "checkout".to_string(),
            percentage: 140,
        };
        let msg = e.to_string();
        assert!(msg.contains("checkout"), "{msg}");
        assert!(msg.contains("140"), "{msg}");
    }
}
