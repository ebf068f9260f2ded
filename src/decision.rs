//! Value types crossing the core's boundary.
//!
//! Inbound: [`SelectionRequest`] and [`RewardEvent`]. Outbound: [`SelectionResult`] and
//! [`StoppingDecision`]. All are plain values; a decision is never mutated after it is built.
//!
//! Stopping decisions carry typed [`DecisionEvidence`] rather than an open metadata map.
//! Prefer adding new variants over changing existing semantics.

use chrono::{DateTime, Utc};

/// Why a selection returned the key it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SelectionReason {
    /// Deterministic hash bucketing (rollout or weighted allocation).
    Hash,
    /// Bandit chose the arm it currently believes is best.
    Exploit,
    /// Bandit explored: random draw, posterior sample, or untried arm.
    Explore,
    /// An arm was below the minimum pull count and was forced.
    ForcedExploration,
    /// Selection could not run; the default key was returned.
    Fallback,
}

/// Inbound selection context.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SelectionRequest {
    pub experiment: String,
    pub candidate_keys: Vec<String>,
    pub default_key: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub identity: Option<String>,
}

impl SelectionRequest {
    pub fn new<I, S>(experiment: impl Into<String>, candidates: I, default_key: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            experiment: experiment.into(),
            candidate_keys: candidates.into_iter().map(Into::into).collect(),
            default_key: default_key.into(),
            identity: None,
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }
}

/// The chosen key and why.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SelectionResult {
    pub chosen_key: String,
    pub reason: SelectionReason,
}

impl SelectionResult {
    pub fn new(chosen_key: impl Into<String>, reason: SelectionReason) -> Self {
        Self {
            chosen_key: chosen_key.into(),
            reason,
        }
    }

    pub(crate) fn fallback(default_key: &str) -> Self {
        Self::new(default_key, SelectionReason::Fallback)
    }
}

/// One observed outcome for an arm.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RewardEvent {
    pub experiment: String,
    pub arm_key: String,
    pub value: f64,
    pub is_success: bool,
    pub timestamp: DateTime<Utc>,
}

impl RewardEvent {
    /// Binary outcome: reward 1 on success, 0 otherwise.
    pub fn binary(
        experiment: impl Into<String>,
        arm_key: impl Into<String>,
        is_success: bool,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            experiment: experiment.into(),
            arm_key: arm_key.into(),
            value: if is_success { 1.0 } else { 0.0 },
            is_success,
            timestamp,
        }
    }
}

/// Numbers behind a stopping decision.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DecisionEvidence {
    /// Smallest per-variant pull count against the required minimum.
    SampleSize { min_pulls: u64, threshold: u64 },
    /// Two-proportion z-test between control and the best treatment.
    ZTest {
        control: String,
        treatment: String,
        z: f64,
        p_value: f64,
    },
    /// Relative lift of the best treatment over control.
    Lift {
        control: String,
        treatment: String,
        lift: f64,
        minimum_effect: f64,
    },
    /// Elapsed running time against the cap.
    Elapsed { elapsed_secs: i64, max_secs: i64 },
    /// Group-sequential look.
    Sequential {
        checkpoint: usize,
        samples: u64,
        z: f64,
        boundary: f64,
    },
}

/// Outcome of evaluating stopping rules. Built once, never mutated.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StoppingDecision {
    pub should_stop: bool,
    pub reason: String,
    pub winning_variant: Option<String>,
    pub confidence: Option<f64>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub evidence: Option<DecisionEvidence>,
}

impl StoppingDecision {
    /// Keep running.
    pub fn keep_running(reason: impl Into<String>) -> Self {
        Self {
            should_stop: false,
            reason: reason.into(),
            winning_variant: None,
            confidence: None,
            evidence: None,
        }
    }

    /// Stop, optionally naming a winner.
    pub fn stop(reason: impl Into<String>, winner: Option<String>, confidence: Option<f64>) -> Self {
        Self {
            should_stop: true,
            reason: reason.into(),
            winning_variant: winner,
            confidence,
            evidence: None,
        }
    }

    #[must_use]
    pub fn with_evidence(mut self, evidence: DecisionEvidence) -> Self {
        self.evidence = Some(evidence);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_collects_candidates() {
        let r = SelectionRequest::new("exp", ["a", "b"], "a").with_identity("u1");
        assert_eq!(r.candidate_keys, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(r.identity.as_deref(), Some("u1"));
    }

    #[test]
    fn binary_event_maps_success_to_unit_reward() {
        let now = Utc::now();
        assert_eq!(RewardEvent::binary("e", "a", true, now).value, 1.0);
        assert_eq!(RewardEvent::binary("e", "a", false, now).value, 0.0);
    }

    #[test]
    fn keep_running_has_no_winner() {
        let d = StoppingDecision::keep_running("not yet");
        assert!(!d.should_stop);
        assert!(d.winning_variant.is_none());
        assert!(d.confidence.is_none());
    }
}
