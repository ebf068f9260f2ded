//! The built-in stopping rules.
//!
//! Significance-style rules compare the control with the best treatment (highest conversion
//! rate among non-control variants). Sample sizes for proportions are `successes + failures`.

use chrono::Duration;
use std::sync::Arc;

use super::{ExperimentData, StoppingRule};
use crate::clock::Clock;
use crate::error::{ConfigError, Result};
use crate::normal::{normal_quantile, one_tailed_p_value, two_tailed_p_value};
use crate::{ArmStatistics, DecisionEvidence, StoppingDecision};

fn trials(v: &ArmStatistics) -> u64 {
    v.successes.saturating_add(v.failures)
}

/// Two-proportion z statistic of `treatment` against `control` with a pooled standard error.
///
/// `None` when either side has no trials or the standard error is zero (both rates 0 or 1).
pub fn two_proportion_z(control: &ArmStatistics, treatment: &ArmStatistics) -> Option<f64> {
    let n_c = trials(control);
    let n_t = trials(treatment);
    if n_c == 0 || n_t == 0 {
        return None;
    }
    let (n_c, n_t) = (n_c as f64, n_t as f64);
    let pooled = (control.successes + treatment.successes) as f64 / (n_c + n_t);
    let se = (pooled * (1.0 - pooled) * (1.0 / n_c + 1.0 / n_t)).sqrt();
    if !(se.is_finite() && se > 0.0) {
        return None;
    }
    Some((treatment.conversion_rate() - control.conversion_rate()) / se)
}

/// Relative lift of `treatment` over `control`; 0 when the control rate is 0.
pub fn relative_lift(control: &ArmStatistics, treatment: &ArmStatistics) -> f64 {
    let rc = control.conversion_rate();
    if rc == 0.0 {
        0.0
    } else {
        (treatment.conversion_rate() - rc) / rc
    }
}

fn winner_by_sign(control: &ArmStatistics, treatment: &ArmStatistics, sign: f64) -> String {
    if sign > 0.0 {
        treatment.key.clone()
    } else {
        control.key.clone()
    }
}

fn validate_confidence(confidence: f64) -> Result<()> {
    if confidence.is_finite() && confidence > 0.0 && confidence < 1.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidConfidence(confidence))
    }
}

// ============================================================================
// Minimum sample size
// ============================================================================

/// Stop-eligible only once every variant has at least `threshold` pulls.
///
/// This is a gate: while it reports "keep running", no other rule is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinimumSampleSizeRule {
    pub threshold: u64,
}

impl MinimumSampleSizeRule {
    pub fn new(threshold: u64) -> Self {
        Self { threshold }
    }
}

impl StoppingRule for MinimumSampleSizeRule {
    fn name(&self) -> &'static str {
        "minimum_sample_size"
    }

    fn evaluate(&self, data: &ExperimentData) -> StoppingDecision {
        if data.variants.is_empty() {
            return StoppingDecision::keep_running("minimum sample size: no variants yet");
        }
        let min_pulls = data.min_pulls();
        let evidence = DecisionEvidence::SampleSize {
            min_pulls,
            threshold: self.threshold,
        };
        if min_pulls >= self.threshold {
            StoppingDecision::stop(
                format!("minimum sample size {} reached", self.threshold),
                None,
                None,
            )
            .with_evidence(evidence)
        } else {
            StoppingDecision::keep_running(format!(
                "minimum sample size not reached: {min_pulls} < {}",
                self.threshold
            ))
            .with_evidence(evidence)
        }
    }

    fn is_gate(&self) -> bool {
        true
    }
}

// ============================================================================
// Statistical significance
// ============================================================================

/// Which tail(s) the z-test p-value covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TestTail {
    /// `p = 2 * (1 - Phi(|z|))`.
    #[default]
    TwoSided,
    /// `p = 1 - Phi(|z|)`: the leader is better than the other side.
    OneSided,
}

/// Two-proportion z-test between the control and the best treatment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatisticalSignificanceRule {
    confidence: f64,
    min_sample_size: u64,
    tail: TestTail,
}

impl StatisticalSignificanceRule {
    /// `confidence` must lie strictly inside `(0, 1)`.
    pub fn new(confidence: f64, min_sample_size: u64) -> Result<Self> {
        validate_confidence(confidence)?;
        Ok(Self {
            confidence,
            min_sample_size,
            tail: TestTail::TwoSided,
        })
    }

    pub fn with_tail(mut self, tail: TestTail) -> Self {
        self.tail = tail;
        self
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }
}

impl StoppingRule for StatisticalSignificanceRule {
    fn name(&self) -> &'static str {
        "statistical_significance"
    }

    fn evaluate(&self, data: &ExperimentData) -> StoppingDecision {
        let (Some(control), Some(treatment)) = (data.control(), data.best_treatment()) else {
            return StoppingDecision::keep_running("significance: need a control and a treatment");
        };
        if trials(control) < self.min_sample_size || trials(treatment) < self.min_sample_size {
            return StoppingDecision::keep_running(format!(
                "significance: fewer than {} samples per variant",
                self.min_sample_size
            ));
        }
        let Some(z) = two_proportion_z(control, treatment) else {
            return StoppingDecision::keep_running("significance: no variance between variants");
        };
        let p_value = match self.tail {
            TestTail::TwoSided => two_tailed_p_value(z),
            TestTail::OneSided => one_tailed_p_value(z),
        };
        let evidence = DecisionEvidence::ZTest {
            control: control.key.clone(),
            treatment: treatment.key.clone(),
            z,
            p_value,
        };
        let alpha = 1.0 - self.confidence;
        if p_value < alpha {
            let winner = winner_by_sign(control, treatment, z);
            StoppingDecision::stop(
                format!("significant at {:.1}% (p = {p_value:.4})", self.confidence * 100.0),
                Some(winner),
                Some(1.0 - p_value),
            )
            .with_evidence(evidence)
        } else {
            StoppingDecision::keep_running(format!(
                "not significant: p = {p_value:.4} >= {alpha:.4}"
            ))
            .with_evidence(evidence)
        }
    }
}

// ============================================================================
// Practical significance
// ============================================================================

/// Stop only when the relative lift is at least `minimum_effect` in magnitude.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PracticalSignificanceRule {
    minimum_effect: f64,
}

impl PracticalSignificanceRule {
    pub fn new(minimum_effect: f64) -> Result<Self> {
        if !(minimum_effect.is_finite() && minimum_effect >= 0.0) {
            return Err(ConfigError::InvalidEffectSize(minimum_effect));
        }
        Ok(Self { minimum_effect })
    }

    pub fn minimum_effect(&self) -> f64 {
        self.minimum_effect
    }
}

impl StoppingRule for PracticalSignificanceRule {
    fn name(&self) -> &'static str {
        "practical_significance"
    }

    fn evaluate(&self, data: &ExperimentData) -> StoppingDecision {
        let (Some(control), Some(treatment)) = (data.control(), data.best_treatment()) else {
            return StoppingDecision::keep_running("practical: need a control and a treatment");
        };
        let lift = relative_lift(control, treatment);
        let evidence = DecisionEvidence::Lift {
            control: control.key.clone(),
            treatment: treatment.key.clone(),
            lift,
            minimum_effect: self.minimum_effect,
        };
        if lift.abs() >= self.minimum_effect {
            StoppingDecision::stop(
                format!("lift {:+.2}% meets minimum effect {:.2}%", lift * 100.0, self.minimum_effect * 100.0),
                Some(winner_by_sign(control, treatment, lift)),
                None,
            )
            .with_evidence(evidence)
        } else {
            StoppingDecision::keep_running(format!(
                "lift {:+.2}% below minimum effect {:.2}%",
                lift * 100.0,
                self.minimum_effect * 100.0
            ))
            .with_evidence(evidence)
        }
    }
}

// ============================================================================
// Maximum duration
// ============================================================================

/// Stop unconditionally once the experiment has run for `max_duration`, naming the variant
/// with the highest conversion rate.
#[derive(Debug, Clone)]
pub struct MaxDurationRule {
    max_duration: Duration,
    clock: Arc<dyn Clock>,
}

impl MaxDurationRule {
    pub fn new(max_duration: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_duration,
            clock,
        }
    }
}

impl StoppingRule for MaxDurationRule {
    fn name(&self) -> &'static str {
        "max_duration"
    }

    fn evaluate(&self, data: &ExperimentData) -> StoppingDecision {
        let elapsed = self.clock.now() - data.started_at;
        let evidence = DecisionEvidence::Elapsed {
            elapsed_secs: elapsed.num_seconds(),
            max_secs: self.max_duration.num_seconds(),
        };
        if elapsed >= self.max_duration {
            StoppingDecision::stop(
                format!("maximum duration of {}s reached", self.max_duration.num_seconds()),
                data.leader().map(|v| v.key.clone()),
                None,
            )
            .with_evidence(evidence)
        } else {
            StoppingDecision::keep_running(format!(
                "running for {}s of {}s",
                elapsed.num_seconds(),
                self.max_duration.num_seconds()
            ))
            .with_evidence(evidence)
        }
    }
}

// ============================================================================
// Sequential analysis
// ============================================================================

/// Group-sequential test with per-checkpoint z boundaries.
///
/// `checkpoints` are per-variant sample sizes (the smaller of control and best treatment).
/// The look in effect is the latest checkpoint reached; before the first checkpoint the rule
/// never stops. Stop when `|z| >= boundary[look]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SequentialAnalysisRule {
    checkpoints: Vec<u64>,
    boundaries: Vec<f64>,
}

impl SequentialAnalysisRule {
    /// O'Brien-Fleming boundaries: `z_k = z_{1 - alpha/2} * sqrt(K / k)` for look `k` of `K`.
    pub fn obrien_fleming(checkpoints: Vec<u64>, alpha: f64) -> Result<Self> {
        if !(alpha.is_finite() && alpha > 0.0 && alpha < 1.0) {
            return Err(ConfigError::InvalidConfidence(1.0 - alpha));
        }
        let looks = checkpoints.len() as f64;
        let z = normal_quantile(1.0 - alpha / 2.0);
        let boundaries = (1..=checkpoints.len())
            .map(|k| z * (looks / k as f64).sqrt())
            .collect();
        Self::with_boundaries(checkpoints, boundaries)
    }

    /// Caller-supplied boundaries, one per checkpoint.
    pub fn with_boundaries(checkpoints: Vec<u64>, boundaries: Vec<f64>) -> Result<Self> {
        if checkpoints.is_empty() {
            return Err(ConfigError::InvalidCheckpoints("no checkpoints".to_string()));
        }
        if checkpoints.len() != boundaries.len() {
            return Err(ConfigError::InvalidCheckpoints(format!(
                "{} checkpoints but {} boundaries",
                checkpoints.len(),
                boundaries.len()
            )));
        }
        if checkpoints[0] == 0 || checkpoints.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::InvalidCheckpoints(
                "checkpoints must be positive and strictly increasing".to_string(),
            ));
        }
        if boundaries.iter().any(|b| !(b.is_finite() && *b > 0.0)) {
            return Err(ConfigError::InvalidCheckpoints(
                "boundaries must be finite and positive".to_string(),
            ));
        }
        Ok(Self {
            checkpoints,
            boundaries,
        })
    }

    pub fn checkpoints(&self) -> &[u64] {
        &self.checkpoints
    }

    pub fn boundaries(&self) -> &[f64] {
        &self.boundaries
    }
}

impl StoppingRule for SequentialAnalysisRule {
    fn name(&self) -> &'static str {
        "sequential_analysis"
    }

    fn evaluate(&self, data: &ExperimentData) -> StoppingDecision {
        let (Some(control), Some(treatment)) = (data.control(), data.best_treatment()) else {
            return StoppingDecision::keep_running("sequential: need a control and a treatment");
        };
        let samples = trials(control).min(trials(treatment));
        let reached = self.checkpoints.iter().take_while(|&&c| c <= samples).count();
        if reached == 0 {
            return StoppingDecision::keep_running(format!(
                "sequential: {samples} samples, first checkpoint at {}",
                self.checkpoints[0]
            ));
        }
        let look = reached - 1;
        let boundary = self.boundaries[look];
        let Some(z) = two_proportion_z(control, treatment) else {
            return StoppingDecision::keep_running("sequential: no variance between variants");
        };
        let evidence = DecisionEvidence::Sequential {
            checkpoint: reached,
            samples,
            z,
            boundary,
        };
        if z.abs() >= boundary {
            StoppingDecision::stop(
                format!("sequential boundary crossed at look {reached}: |z| = {:.3} >= {boundary:.3}", z.abs()),
                Some(winner_by_sign(control, treatment, z)),
                Some(1.0 - two_tailed_p_value(z)),
            )
            .with_evidence(evidence)
        } else {
            StoppingDecision::keep_running(format!(
                "sequential look {reached}: |z| = {:.3} < {boundary:.3}",
                z.abs()
            ))
            .with_evidence(evidence)
        }
    }
}

// ============================================================================
// Conjunction
// ============================================================================

/// Stops only when every inner rule stops; the first inner rule names the winner.
///
/// Pairs a statistical test with a practical-significance floor.
#[derive(Debug, Default)]
pub struct AllOfRule {
    rules: Vec<Box<dyn StoppingRule>>,
}

impl AllOfRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: impl StoppingRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }
}

impl StoppingRule for AllOfRule {
    fn name(&self) -> &'static str {
        "all_of"
    }

    fn evaluate(&self, data: &ExperimentData) -> StoppingDecision {
        let mut first: Option<StoppingDecision> = None;
        let mut reasons: Vec<String> = Vec::with_capacity(self.rules.len());
        for rule in &self.rules {
            let d = rule.evaluate(data);
            if !d.should_stop {
                return d;
            }
            reasons.push(d.reason.clone());
            first.get_or_insert(d);
        }
        match first {
            Some(d) => StoppingDecision {
                reason: reasons.join("; "),
                ..d
            },
            None => StoppingDecision::keep_running("all_of: no rules"),
        }
    }
}
