//! Thompson sampling over arm statistics.
//!
//! Two posterior families, chosen by [`RewardKind`]:
//!
//! - **Binary** rewards: `theta_i ~ Beta(successes_i + 1, failures_i + 1)` (uniform prior).
//! - **Continuous** rewards: Normal-Inverse-Gamma with prior `(mu0, kappa0, alpha0, beta0)`,
//!   updated from the tracked sufficient statistics `(pulls, total_reward, sum_of_squares)`.
//!   One draw is `sigma^2 ~ InvGamma(alpha_n, beta_n)` followed by
//!   `mu ~ Normal(mu_n, sigma^2 / kappa_n)`; `mu` is the arm's sampled value.
//!
//! All randomness comes from the caller's generator, so a seeded `StdRng` reproduces the same
//! choices for the same statistics.

use rand::Rng;
use rand_distr::{Beta, Distribution, Gamma, Normal};

use crate::ArmStatistics;

/// Shape of the rewards an experiment records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RewardKind {
    /// Success/failure outcomes; the Beta posterior reads `successes` and `failures`.
    #[default]
    Binary,
    /// Real-valued rewards; the Normal-Inverse-Gamma posterior reads the reward moments.
    Continuous,
}

/// Normal-Inverse-Gamma parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NormalInverseGamma {
    pub mu: f64,
    pub kappa: f64,
    pub alpha: f64,
    pub beta: f64,
}

impl Default for NormalInverseGamma {
    /// Weak prior centered on zero.
    fn default() -> Self {
        Self {
            mu: 0.0,
            kappa: 1.0,
            alpha: 1.0,
            beta: 1.0,
        }
    }
}

impl NormalInverseGamma {
    /// `mu` finite; `kappa`, `alpha` and `beta` finite and positive.
    pub fn is_proper(&self) -> bool {
        self.mu.is_finite()
            && [self.kappa, self.alpha, self.beta]
                .iter()
                .all(|x| x.is_finite() && *x > 0.0)
    }

    /// Posterior after observing the rewards summarized by `stats`.
    pub fn posterior(&self, stats: &ArmStatistics) -> Self {
        if stats.pulls == 0 {
            return *self;
        }
        let n = stats.pulls as f64;
        let mean = stats.total_reward / n;
        let centered_ss = (stats.sum_of_squares - n * mean * mean).max(0.0);

        let kappa = self.kappa + n;
        let mu = (self.kappa * self.mu + n * mean) / kappa;
        let alpha = self.alpha + n / 2.0;
        let shift = mean - self.mu;
        let beta = self.beta + 0.5 * centered_ss + self.kappa * n * shift * shift / (2.0 * kappa);
        Self {
            mu,
            kappa,
            alpha,
            beta,
        }
    }

    /// Draw a mean from this distribution. Degenerate parameters return `mu`.
    pub fn sample_mean<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        if !self.is_proper() {
            return self.mu;
        }
        // InvGamma(alpha, beta) is 1 / Gamma(shape = alpha, scale = 1 / beta).
        let precision = match Gamma::new(self.alpha, 1.0 / self.beta) {
            Ok(g) => g.sample(rng),
            Err(_) => return self.mu,
        };
        if !(precision.is_finite() && precision > 0.0) {
            return self.mu;
        }
        let variance = 1.0 / precision;
        match Normal::new(self.mu, (variance / self.kappa).sqrt()) {
            Ok(d) => d.sample(rng),
            Err(_) => self.mu,
        }
    }
}

/// Draw from the arm's `Beta(successes + 1, failures + 1)` posterior.
pub fn sample_beta_posterior<R: Rng + ?Sized>(stats: &ArmStatistics, rng: &mut R) -> f64 {
    let alpha = stats.successes as f64 + 1.0;
    let beta = stats.failures as f64 + 1.0;
    match Beta::new(alpha, beta) {
        Ok(dist) => dist.sample(rng),
        Err(_) => alpha / (alpha + beta),
    }
}

/// Index of the arm with the largest posterior draw. Ties go to the lowest index.
///
/// Returns `None` only for an empty slice.
pub fn thompson_select<R: Rng + ?Sized>(
    stats: &[ArmStatistics],
    kind: RewardKind,
    prior: NormalInverseGamma,
    rng: &mut R,
) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, s) in stats.iter().enumerate() {
        let x = match kind {
            RewardKind::Binary => sample_beta_posterior(s, rng),
            RewardKind::Continuous => prior.posterior(s).sample_mean(rng),
        };
        // NaN draws never win.
        if x.is_nan() {
            continue;
        }
        if best.map_or(true, |(_, b)| x > b) {
            best = Some((i, x));
        }
    }
    best.map(|(i, _)| i).or(if stats.is_empty() { None } else { Some(0) })
}
