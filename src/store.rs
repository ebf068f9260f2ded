//! Concurrent per-(experiment, arm) statistics.
//!
//! Layout: a sharded map from experiment name to that experiment's arms, each arm behind its
//! own `Arc<Mutex<ArmStatistics>>`. Recording clones the arm's `Arc` out of the map, releases
//! the shard, then locks only that arm, so updates to unrelated arms never contend on a shared
//! lock and updates to the same arm are linearizable.
//!
//! Snapshots copy each arm under its own short lock and return plain values in registration
//! order. They are consistent per arm, not across arms; selection and rule evaluation are
//! statistical and only need a recent view.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use crate::prior::{apply_prior, ArmPrior};
use crate::{ArmStatistics, RewardEvent};

type Slot = Arc<Mutex<ArmStatistics>>;

fn lock(slot: &Slot) -> MutexGuard<'_, ArmStatistics> {
    // Every critical section leaves the counters consistent, so a poisoned lock is still usable.
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct ExperimentArms {
    order: Vec<Slot>,
    index: HashMap<String, usize>,
}

impl ExperimentArms {
    fn get(&self, key: &str) -> Option<Slot> {
        self.index.get(key).map(|&i| Arc::clone(&self.order[i]))
    }

    fn get_or_insert(&mut self, key: &str) -> Slot {
        if let Some(slot) = self.get(key) {
            return slot;
        }
        let slot = Arc::new(Mutex::new(ArmStatistics::new(key)));
        self.index.insert(key.to_string(), self.order.len());
        self.order.push(Arc::clone(&slot));
        slot
    }
}

/// Owner of every mutable arm counter.
#[derive(Debug, Default)]
pub struct ArmStatisticsStore {
    experiments: DashMap<String, ExperimentArms>,
}

impl ArmStatisticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, experiment: &str, key: &str) -> Slot {
        if let Some(arms) = self.experiments.get(experiment) {
            if let Some(slot) = arms.get(key) {
                return slot;
            }
        }
        // Slow path: first sighting of this arm. Takes the shard's write lock briefly.
        self.experiments
            .entry(experiment.to_string())
            .or_default()
            .get_or_insert(key)
    }

    /// Make sure an arm exists, fixing its control flag.
    ///
    /// Arms are otherwise created lazily on their first reward. Registration order is the
    /// order snapshots report and the order bandit tie-breaks use.
    pub fn register_arm(&self, experiment: &str, key: &str, is_control: bool) {
        let slot = self.slot(experiment, key);
        lock(&slot).is_control = is_control;
    }

    /// Fold a cold-start prior into an arm as pseudo-outcomes.
    pub fn seed_prior(&self, experiment: &str, key: &str, prior: ArmPrior) {
        let slot = self.slot(experiment, key);
        apply_prior(&mut lock(&slot), prior);
        debug!(experiment, arm = key, successes = prior.successes, failures = prior.failures, "seeded prior");
    }

    /// Apply one outcome atomically to `(experiment, key)`.
    pub fn record_reward(
        &self,
        experiment: &str,
        key: &str,
        reward: f64,
        is_success: bool,
        at: DateTime<Utc>,
    ) {
        let slot = self.slot(experiment, key);
        lock(&slot).apply_reward(reward, is_success, at);
    }

    /// [`record_reward`](Self::record_reward) for an inbound event.
    pub fn record(&self, event: &RewardEvent) {
        self.record_reward(
            &event.experiment,
            &event.arm_key,
            event.value,
            event.is_success,
            event.timestamp,
        );
    }

    /// Independent copy of every arm of `experiment`, in registration order.
    ///
    /// Unknown experiments yield an empty vector.
    pub fn snapshot(&self, experiment: &str) -> Vec<ArmStatistics> {
        let slots: Vec<Slot> = match self.experiments.get(experiment) {
            Some(arms) => arms.order.clone(),
            None => return Vec::new(),
        };
        slots.iter().map(|s| lock(s).clone()).collect()
    }

    /// Copy of a single arm, if it exists.
    pub fn get(&self, experiment: &str, key: &str) -> Option<ArmStatistics> {
        let slot = self.experiments.get(experiment)?.get(key)?;
        let stats = lock(&slot).clone();
        Some(stats)
    }

    /// Drop every arm of `experiment`. Returns whether anything was removed.
    pub fn reset(&self, experiment: &str) -> bool {
        let removed = self.experiments.remove(experiment).is_some();
        if removed {
            info!(experiment, "reset arm statistics");
        }
        removed
    }

    /// Names of experiments with at least one arm.
    pub fn experiments(&self) -> Vec<String> {
        let mut names: Vec<String> = self.experiments.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
