//! Stopping rules: deciding when an experiment has enough evidence.
//!
//! An [`ExperimentData`] snapshot goes through an ordered chain of [`StoppingRule`]s:
//!
//! 1. Gate rules (the minimum sample size) run first wherever they sit in the chain. If a gate
//!    reports "keep running", that is the answer and nothing else is consulted.
//! 2. The remaining rules run in registration order; the first one reporting `should_stop`
//!    wins.
//! 3. If none stops, the last rule's "keep running" decision is returned so its diagnostic
//!    reason survives.
//!
//! Rules are pure functions of the snapshot (plus an injected clock for time-based rules) and
//! never mutate it.

use chrono::{DateTime, Utc};
use std::fmt;
use tracing::{debug, info};

use crate::{ArmStatistics, StoppingDecision};

mod config;
mod rules;

pub use config::*;
pub use rules::*;

/// Read-only view of one experiment for rule evaluation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExperimentData {
    pub experiment: String,
    pub started_at: DateTime<Utc>,
    /// Per-variant statistics in registration order.
    pub variants: Vec<ArmStatistics>,
}

impl ExperimentData {
    pub fn new(
        experiment: impl Into<String>,
        started_at: DateTime<Utc>,
        variants: Vec<ArmStatistics>,
    ) -> Self {
        Self {
            experiment: experiment.into(),
            started_at,
            variants,
        }
    }

    /// The control variant: the first flagged `is_control`, else the first variant.
    pub fn control(&self) -> Option<&ArmStatistics> {
        self.variants
            .iter()
            .find(|v| v.is_control)
            .or_else(|| self.variants.first())
    }

    /// The non-control variant with the highest conversion rate (lowest index on ties).
    pub fn best_treatment(&self) -> Option<&ArmStatistics> {
        let control_key = self.control().map(|c| c.key.as_str());
        best_by_rate(self.variants.iter().filter(|v| Some(v.key.as_str()) != control_key))
    }

    /// The variant with the highest conversion rate overall.
    pub fn leader(&self) -> Option<&ArmStatistics> {
        best_by_rate(self.variants.iter())
    }

    /// Smallest pull count across variants (0 with no variants).
    pub fn min_pulls(&self) -> u64 {
        self.variants.iter().map(|v| v.pulls).min().unwrap_or(0)
    }

    /// Sum of pulls across variants.
    pub fn total_pulls(&self) -> u64 {
        self.variants.iter().map(|v| v.pulls).sum()
    }
}

fn best_by_rate<'a>(it: impl Iterator<Item = &'a ArmStatistics>) -> Option<&'a ArmStatistics> {
    let mut best: Option<&ArmStatistics> = None;
    for v in it {
        if best.map_or(true, |b| v.conversion_rate() > b.conversion_rate()) {
            best = Some(v);
        }
    }
    best
}

/// One stopping criterion.
pub trait StoppingRule: Send + Sync + fmt::Debug {
    /// Short stable identifier used in logs.
    fn name(&self) -> &'static str;

    fn evaluate(&self, data: &ExperimentData) -> StoppingDecision;

    /// Gate rules run before every other rule and short-circuit the chain while they report
    /// "keep running".
    fn is_gate(&self) -> bool {
        false
    }
}

/// Ordered chain of stopping rules.
#[derive(Debug, Default)]
pub struct StoppingRuleEngine {
    rules: Vec<Box<dyn StoppingRule>>,
}

impl StoppingRuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule to the chain.
    pub fn with_rule(mut self, rule: impl StoppingRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn push(&mut self, rule: Box<dyn StoppingRule>) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> impl Iterator<Item = &dyn StoppingRule> {
        self.rules.iter().map(|r| r.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate the chain against `data`.
    pub fn evaluate(&self, data: &ExperimentData) -> StoppingDecision {
        let mut gate_pass: Option<StoppingDecision> = None;
        for gate in self.rules.iter().filter(|r| r.is_gate()) {
            let d = gate.evaluate(data);
            if !d.should_stop {
                debug!(experiment = %data.experiment, rule = gate.name(), reason = %d.reason, "gated");
                return d;
            }
            gate_pass = Some(d);
        }

        let mut last: Option<StoppingDecision> = None;
        for rule in self.rules.iter().filter(|r| !r.is_gate()) {
            let d = rule.evaluate(data);
            if d.should_stop {
                info!(
                    experiment = %data.experiment,
                    rule = rule.name(),
                    winner = ?d.winning_variant,
                    reason = %d.reason,
                    "stopping rule fired"
                );
                return d;
            }
            last = Some(d);
        }

        match (last, gate_pass) {
            (Some(d), _) => d,
            // Gates passed but nothing else is configured: eligibility alone is not a stop.
            (None, Some(g)) => StoppingDecision {
                should_stop: false,
                reason: format!("{}; no further stopping rules configured", g.reason),
                winning_variant: None,
                confidence: None,
                evidence: g.evidence,
            },
            (None, None) => StoppingDecision::keep_running("no stopping rules configured"),
        }
    }
}

/// Evaluate an ad-hoc ordered rule list with the same precedence as [`StoppingRuleEngine`].
pub fn evaluate_rules(data: &ExperimentData, rules: Vec<Box<dyn StoppingRule>>) -> StoppingDecision {
    StoppingRuleEngine { rules }.evaluate(data)
}
