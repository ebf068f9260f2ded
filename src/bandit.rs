//! Adaptive arm selection over statistics snapshots.
//!
//! [`select_arm`] is a pure function of `(stats, config, rng)`. Order of `stats` is the
//! registration order and every tie-break resolves to the lowest index.
//!
//! Policy, in order:
//! 1. **Minimum pulls gate** (`min_pulls_before_exploitation > 0`): while any arm is below the
//!    threshold, pick the least-pulled arm.
//! 2. The configured [`BanditAlgorithm`]:
//!    - `EpsilonGreedy`: with probability `epsilon` a uniform random arm, else
//!      `argmax(average_reward)`. `epsilon = 0` is exactly deterministic.
//!    - `Thompson`: argmax of one posterior draw per arm (see [`crate::thompson`]).
//!    - `Ucb`: untried arms first (in order); then
//!      `argmax(avg_i + c * sqrt(ln(total_pulls) / pulls_i))`. No randomness.

use rand::Rng;

use crate::error::{ConfigError, Result};
use crate::thompson::{thompson_select, NormalInverseGamma, RewardKind};
use crate::{ArmStatistics, SelectionReason};

/// Which adaptive algorithm to run.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BanditAlgorithm {
    EpsilonGreedy {
        epsilon: f64,
    },
    Thompson {
        kind: RewardKind,
        /// Prior for [`RewardKind::Continuous`]; ignored for binary rewards.
        prior: NormalInverseGamma,
    },
    Ucb {
        c: f64,
    },
}

impl BanditAlgorithm {
    pub fn epsilon_greedy(epsilon: f64) -> Self {
        Self::EpsilonGreedy { epsilon }
    }

    pub fn thompson(kind: RewardKind) -> Self {
        Self::Thompson {
            kind,
            prior: NormalInverseGamma::default(),
        }
    }

    pub fn ucb(c: f64) -> Self {
        Self::Ucb { c }
    }
}

impl Default for BanditAlgorithm {
    fn default() -> Self {
        Self::thompson(RewardKind::Binary)
    }
}

/// Bandit configuration for one experiment.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BanditConfig {
    pub algorithm: BanditAlgorithm,
    /// Force the least-pulled arm while any arm has fewer pulls than this. `0` disables.
    #[cfg_attr(feature = "serde", serde(default))]
    pub min_pulls_before_exploitation: u64,
}

impl BanditConfig {
    pub fn new(algorithm: BanditAlgorithm) -> Self {
        Self {
            algorithm,
            min_pulls_before_exploitation: 0,
        }
    }

    pub fn with_min_pulls(mut self, min_pulls: u64) -> Self {
        self.min_pulls_before_exploitation = min_pulls;
        self
    }

    /// Reject parameters that could only fail at call time.
    pub fn validate(&self, experiment: &str) -> Result<()> {
        match self.algorithm {
            BanditAlgorithm::EpsilonGreedy { epsilon } => {
                if !(epsilon.is_finite() && (0.0..=1.0).contains(&epsilon)) {
                    return Err(ConfigError::InvalidEpsilon {
                        experiment: experiment.to_string(),
                        epsilon,
                    });
                }
            }
            BanditAlgorithm::Ucb { c } => {
                if !(c.is_finite() && c >= 0.0) {
                    return Err(ConfigError::InvalidExplorationConstant {
                        experiment: experiment.to_string(),
                        c,
                    });
                }
            }
            BanditAlgorithm::Thompson { prior, .. } => {
                if !prior.is_proper() {
                    return Err(ConfigError::InvalidPrior {
                        experiment: experiment.to_string(),
                        mu: prior.mu,
                        kappa: prior.kappa,
                        alpha: prior.alpha,
                        beta: prior.beta,
                    });
                }
            }
        }
        Ok(())
    }
}

/// An index into the statistics slice plus the reason it was picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmChoice {
    pub index: usize,
    pub reason: SelectionReason,
}

impl ArmChoice {
    fn new(index: usize, reason: SelectionReason) -> Self {
        Self { index, reason }
    }
}

/// First index of the maximum score. NaN scores never win.
fn argmax(scores: impl IntoIterator<Item = f64>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, x) in scores.into_iter().enumerate() {
        if x.is_nan() {
            continue;
        }
        if best.map_or(true, |(_, b)| x > b) {
            best = Some((i, x));
        }
    }
    best.map(|(i, _)| i)
}

/// Index of the arm with the highest average reward (lowest index on ties).
pub fn best_average(stats: &[ArmStatistics]) -> Option<usize> {
    argmax(stats.iter().map(ArmStatistics::average_reward))
}

/// Per-arm UCB scores. Untried arms score `+inf`.
pub fn ucb_scores(stats: &[ArmStatistics], c: f64) -> Vec<f64> {
    let total: u64 = stats.iter().map(|s| s.pulls).sum();
    let ln_total = (total.max(1) as f64).ln();
    stats
        .iter()
        .map(|s| {
            if s.pulls == 0 {
                f64::INFINITY
            } else {
                s.average_reward() + c * (ln_total / s.pulls as f64).sqrt()
            }
        })
        .collect()
}

fn least_pulled_below(stats: &[ArmStatistics], threshold: u64) -> Option<usize> {
    if threshold == 0 {
        return None;
    }
    stats
        .iter()
        .enumerate()
        .filter(|(_, s)| s.pulls < threshold)
        // min_by_key keeps the first minimum.
        .min_by_key(|(_, s)| s.pulls)
        .map(|(i, _)| i)
}

/// Pick an arm. Returns `None` only when `stats` is empty.
pub fn select_arm<R: Rng + ?Sized>(
    stats: &[ArmStatistics],
    cfg: &BanditConfig,
    rng: &mut R,
) -> Option<ArmChoice> {
    if stats.is_empty() {
        return None;
    }

    if let Some(i) = least_pulled_below(stats, cfg.min_pulls_before_exploitation) {
        return Some(ArmChoice::new(i, SelectionReason::ForcedExploration));
    }

    let greedy = best_average(stats).unwrap_or(0);
    let exploit_or_explore = |i: usize| {
        if i == greedy {
            ArmChoice::new(i, SelectionReason::Exploit)
        } else {
            ArmChoice::new(i, SelectionReason::Explore)
        }
    };

    let choice = match cfg.algorithm {
        BanditAlgorithm::EpsilonGreedy { epsilon } => {
            let u: f64 = rng.random();
            if u < epsilon {
                ArmChoice::new(rng.random_range(0..stats.len()), SelectionReason::Explore)
            } else {
                ArmChoice::new(greedy, SelectionReason::Exploit)
            }
        }
        BanditAlgorithm::Thompson { kind, prior } => {
            exploit_or_explore(thompson_select(stats, kind, prior, rng).unwrap_or(greedy))
        }
        BanditAlgorithm::Ucb { c } => {
            if let Some(i) = stats.iter().position(|s| s.pulls == 0) {
                ArmChoice::new(i, SelectionReason::Explore)
            } else {
                exploit_or_explore(argmax(ucb_scores(stats, c)).unwrap_or(greedy))
            }
        }
    };
    Some(choice)
}
