//! Experiment registry and the two request-facing operations.
//!
//! [`DecisionOrchestrator`] is the front door:
//!
//! ```text
//! orchestrator.register(definition)?;                  // validate + seed arms
//! let r = orchestrator.select_arm(&request, &mut rng); // on every request
//! orchestrator.record_reward(&event);                  // on every outcome
//! let d = orchestrator.evaluate("checkout");           // periodically
//! ```
//!
//! Selection never fails. Unknown experiments, empty candidate sets, a missing identity for a
//! hash-based mode, or a hashed key that is not among the request's candidates all degrade to
//! the request's default key with [`SelectionReason::Fallback`].

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bandit::{self, BanditConfig};
use crate::bucket::allocate_bucket;
use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigError, Result};
use crate::prior::ArmPrior;
use crate::rollout::RolloutSpec;
use crate::stopping::{ExperimentData, StoppingConfig, StoppingRuleEngine};
use crate::store::ArmStatisticsStore;
use crate::{
    ArmStatistics, RewardEvent, SelectionReason, SelectionRequest, SelectionResult,
    StoppingDecision,
};

// ============================================================================
// Configuration
// ============================================================================

/// One arm of an experiment.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArmDefinition {
    pub key: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub is_control: bool,
    /// Cold-start pseudo-outcomes folded in at registration and on every reset.
    #[cfg_attr(feature = "serde", serde(default))]
    pub prior: Option<ArmPrior>,
}

impl ArmDefinition {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            is_control: false,
            prior: None,
        }
    }

    pub fn control(key: impl Into<String>) -> Self {
        Self {
            is_control: true,
            ..Self::new(key)
        }
    }

    pub fn with_prior(mut self, prior: ArmPrior) -> Self {
        self.prior = Some(prior);
        self
    }
}

/// How an experiment routes requests.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AllocationMode {
    /// Sticky percentage rollout between two arms.
    Rollout(RolloutSpec),
    /// Sticky weighted split over all arms (weights in arm order, out of 100 buckets).
    Weighted {
        weights: Vec<i32>,
        #[cfg_attr(feature = "serde", serde(default))]
        seed: Option<String>,
    },
    /// Adaptive selection over live statistics.
    Bandit(BanditConfig),
}

/// Everything the core needs to run one experiment.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExperimentDefinition {
    pub name: String,
    pub arms: Vec<ArmDefinition>,
    pub default_key: String,
    pub mode: AllocationMode,
    #[cfg_attr(feature = "serde", serde(default))]
    pub stopping: StoppingConfig,
    /// Start of the experiment for duration-based rules. `None` means "at registration".
    #[cfg_attr(feature = "serde", serde(default))]
    pub started_at: Option<DateTime<Utc>>,
}

impl ExperimentDefinition {
    pub fn new(
        name: impl Into<String>,
        arms: Vec<ArmDefinition>,
        default_key: impl Into<String>,
        mode: AllocationMode,
    ) -> Self {
        Self {
            name: name.into(),
            arms,
            default_key: default_key.into(),
            mode,
            stopping: StoppingConfig::default(),
            started_at: None,
        }
    }

    /// Rollout experiment whose excluded key is the control and the default.
    pub fn rollout(name: impl Into<String>, spec: RolloutSpec) -> Self {
        let arms = vec![
            ArmDefinition::control(spec.excluded_key.clone()),
            ArmDefinition::new(spec.included_key.clone()),
        ];
        let default_key = spec.excluded_key.clone();
        Self::new(name, arms, default_key, AllocationMode::Rollout(spec))
    }

    pub fn with_stopping(mut self, stopping: StoppingConfig) -> Self {
        self.stopping = stopping;
        self
    }

    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = Some(started_at);
        self
    }

    fn has_arm(&self, key: &str) -> bool {
        self.arms.iter().any(|a| a.key == key)
    }

    fn unknown_arm(&self, key: &str) -> ConfigError {
        ConfigError::UnknownArm {
            experiment: self.name.clone(),
            key: key.to_string(),
        }
    }

    /// Every check that would otherwise surface per request.
    pub fn validate(&self) -> Result<()> {
        if self.arms.is_empty() {
            return Err(ConfigError::EmptyCandidates(self.name.clone()));
        }
        let mut seen = HashSet::with_capacity(self.arms.len());
        for arm in &self.arms {
            if !seen.insert(arm.key.as_str()) {
                return Err(ConfigError::DuplicateArm {
                    experiment: self.name.clone(),
                    arm: arm.key.clone(),
                });
            }
        }
        if !self.has_arm(&self.default_key) {
            return Err(self.unknown_arm(&self.default_key));
        }

        match &self.mode {
            AllocationMode::Rollout(spec) => {
                spec.validate(&self.name)?;
                if let Some(k) = spec.keys().into_iter().find(|k| !self.has_arm(k)) {
                    return Err(self.unknown_arm(k));
                }
            }
            AllocationMode::Weighted { weights, .. } => {
                self.resolve_weights(weights)?;
            }
            AllocationMode::Bandit(cfg) => cfg.validate(&self.name)?,
        }
        self.stopping.validate()
    }

    fn resolve_weights(&self, weights: &[i32]) -> Result<Vec<u32>> {
        if weights.len() != self.arms.len() {
            return Err(ConfigError::WeightCountMismatch {
                experiment: self.name.clone(),
                weights: weights.len(),
                arms: self.arms.len(),
            });
        }
        let resolved = weights
            .iter()
            .map(|&w| {
                u32::try_from(w).map_err(|_| ConfigError::InvalidWeight {
                    experiment: self.name.clone(),
                    weight: i64::from(w),
                })
            })
            .collect::<Result<Vec<u32>>>()?;
        if resolved.iter().map(|&w| u64::from(w)).sum::<u64>() == 0 {
            return Err(ConfigError::NonPositiveWeights(self.name.clone()));
        }
        Ok(resolved)
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

#[derive(Debug)]
struct Registered {
    definition: ExperimentDefinition,
    started_at: DateTime<Utc>,
    /// Validated weights for `AllocationMode::Weighted`, empty otherwise.
    weights: Vec<u32>,
    engine: StoppingRuleEngine,
}

/// Composes allocation, bandit selection, statistics and stopping rules.
#[derive(Debug)]
pub struct DecisionOrchestrator {
    store: Arc<ArmStatisticsStore>,
    experiments: DashMap<String, Arc<Registered>>,
    clock: Arc<dyn Clock>,
}

impl Default for DecisionOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionOrchestrator {
    /// Orchestrator on the system clock with a fresh store.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::with_store(Arc::new(ArmStatisticsStore::new()), clock)
    }

    /// Share an existing store, e.g. one that other recorders write to.
    pub fn with_store(store: Arc<ArmStatisticsStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            experiments: DashMap::new(),
            clock,
        }
    }

    pub fn store(&self) -> &Arc<ArmStatisticsStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Validate and start an experiment. Its arms start from their priors.
    pub fn register(&self, definition: ExperimentDefinition) -> Result<()> {
        definition.validate()?;
        let weights = match &definition.mode {
            AllocationMode::Weighted { weights, .. } => definition.resolve_weights(weights)?,
            _ => Vec::new(),
        };
        let engine = definition.stopping.build(Arc::clone(&self.clock))?;

        match self.experiments.entry(definition.name.clone()) {
            Entry::Occupied(_) => Err(ConfigError::DuplicateExperiment(definition.name)),
            Entry::Vacant(slot) => {
                self.store.reset(&definition.name);
                self.seed_arms(&definition);
                let started_at = definition.started_at.unwrap_or_else(|| self.clock.now());
                info!(
                    experiment = %definition.name,
                    arms = definition.arms.len(),
                    rules = engine.rules().count(),
                    "registered experiment"
                );
                slot.insert(Arc::new(Registered {
                    definition,
                    started_at,
                    weights,
                    engine,
                }));
                Ok(())
            }
        }
    }

    /// Stop routing to an experiment and drop its statistics.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.experiments.remove(name).is_some();
        if removed {
            self.store.reset(name);
            info!(experiment = name, "unregistered experiment");
        }
        removed
    }

    /// Registered experiment names, sorted.
    pub fn experiments(&self) -> Vec<String> {
        let mut names: Vec<String> = self.experiments.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn definition(&self, name: &str) -> Option<ExperimentDefinition> {
        self.experiments.get(name).map(|r| r.definition.clone())
    }

    fn registered(&self, name: &str) -> Option<Arc<Registered>> {
        self.experiments.get(name).map(|r| Arc::clone(r.value()))
    }

    fn seed_arms(&self, definition: &ExperimentDefinition) {
        for arm in &definition.arms {
            self.store.register_arm(&definition.name, &arm.key, arm.is_control);
            if let Some(prior) = arm.prior {
                self.store.seed_prior(&definition.name, &arm.key, prior);
            }
        }
    }

    /// Clear an experiment's statistics and re-seed its arms and priors.
    ///
    /// Returns `false` if the experiment is not registered (its stray statistics, if any, are
    /// still dropped).
    pub fn reset(&self, name: &str) -> bool {
        self.store.reset(name);
        match self.registered(name) {
            Some(reg) => {
                self.seed_arms(&reg.definition);
                true
            }
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Request path
    // -----------------------------------------------------------------------

    /// Pick a key for one request. Never fails.
    pub fn select_arm<R: Rng + ?Sized>(
        &self,
        request: &SelectionRequest,
        rng: &mut R,
    ) -> SelectionResult {
        let name = request.experiment.as_str();
        if request.candidate_keys.is_empty() {
            warn!(experiment = name, "empty candidate set; using default key");
            return SelectionResult::fallback(&request.default_key);
        }
        let Some(reg) = self.registered(name) else {
            warn!(experiment = name, "unknown experiment; using default key");
            return SelectionResult::fallback(&request.default_key);
        };

        match &reg.definition.mode {
            AllocationMode::Rollout(spec) => {
                let Some(identity) = request.identity.as_deref() else {
                    warn!(experiment = name, "rollout needs an identity; using default key");
                    return SelectionResult::fallback(&request.default_key);
                };
                let key = spec.pick(identity, name, self.clock.now());
                hashed(request, key)
            }
            AllocationMode::Weighted { seed, .. } => {
                let Some(identity) = request.identity.as_deref() else {
                    warn!(experiment = name, "weighted split needs an identity; using default key");
                    return SelectionResult::fallback(&request.default_key);
                };
                let idx = allocate_bucket(identity, name, &reg.weights, seed.as_deref());
                match reg.definition.arms.get(idx) {
                    Some(arm) => hashed(request, &arm.key),
                    None => SelectionResult::fallback(&request.default_key),
                }
            }
            AllocationMode::Bandit(cfg) => self.select_bandit(request, cfg, rng),
        }
    }

    fn select_bandit<R: Rng + ?Sized>(
        &self,
        request: &SelectionRequest,
        cfg: &BanditConfig,
        rng: &mut R,
    ) -> SelectionResult {
        let name = request.experiment.as_str();
        let snapshot = self.store.snapshot(name);
        // Candidate order drives tie-breaks, so repeated keys keep their first position.
        let mut keys: Vec<&str> = Vec::with_capacity(request.candidate_keys.len());
        for key in &request.candidate_keys {
            if !keys.contains(&key.as_str()) {
                keys.push(key.as_str());
            }
        }
        // Arms with no statistics yet read as untried.
        let stats: Vec<ArmStatistics> = keys
            .iter()
            .map(|&key| {
                snapshot
                    .iter()
                    .find(|s| s.key == key)
                    .cloned()
                    .unwrap_or_else(|| ArmStatistics::new(key))
            })
            .collect();

        match bandit::select_arm(&stats, cfg, rng) {
            Some(choice) => {
                let key = keys[choice.index];
                if choice.reason == SelectionReason::ForcedExploration {
                    debug!(experiment = name, arm = %key, pulls = stats[choice.index].pulls, "forced exploration");
                }
                SelectionResult::new(key, choice.reason)
            }
            None => SelectionResult::fallback(&request.default_key),
        }
    }

    /// Record one outcome. Arms unknown to the store are created on the fly.
    ///
    /// Events for experiments that are not registered are dropped and `false` is returned.
    pub fn record_reward(&self, event: &RewardEvent) -> bool {
        if !self.experiments.contains_key(&event.experiment) {
            warn!(experiment = %event.experiment, arm = %event.arm_key, "reward for unregistered experiment dropped");
            return false;
        }
        self.store.record(event);
        true
    }

    // -----------------------------------------------------------------------
    // Evaluation path
    // -----------------------------------------------------------------------

    /// Snapshot an experiment for rule evaluation.
    pub fn experiment_data(&self, name: &str) -> Option<ExperimentData> {
        let reg = self.registered(name)?;
        Some(ExperimentData::new(
            name,
            reg.started_at,
            self.store.snapshot(name),
        ))
    }

    /// Run the experiment's stopping rules against a fresh snapshot.
    pub fn evaluate(&self, name: &str) -> Option<StoppingDecision> {
        let data = self.experiment_data(name)?;
        self.evaluate_data(&data)
    }

    /// Run the rules of `data.experiment` against caller-supplied data.
    pub fn evaluate_data(&self, data: &ExperimentData) -> Option<StoppingDecision> {
        let reg = self.registered(&data.experiment)?;
        let decision = reg.engine.evaluate(data);
        debug!(
            experiment = %data.experiment,
            should_stop = decision.should_stop,
            reason = %decision.reason,
            "evaluated"
        );
        Some(decision)
    }

    /// Evaluate every registered experiment, in name order.
    pub fn evaluate_all(&self) -> Vec<(String, StoppingDecision)> {
        self.experiments()
            .into_iter()
            .filter_map(|name| self.evaluate(&name).map(|d| (name, d)))
            .collect()
    }
}

fn hashed(request: &SelectionRequest, key: &str) -> SelectionResult {
    if request.candidate_keys.iter().any(|c| c == key) {
        SelectionResult::new(key, SelectionReason::Hash)
    } else {
        warn!(experiment = %request.experiment, arm = key, "hashed arm is not a candidate; using default key");
        SelectionResult::fallback(&request.default_key)
    }
}
