//! `allot`: deterministic allocation, adaptive arm selection, and stopping rules for
//! experiments.
//!
//! Three problems, one small core:
//!
//! 1. **Who sees what.** Subjects are hashed into 100 buckets with SHA-256 over
//!    `seed:experiment:identity`. Inclusion is `bucket < percentage`, so assignment is
//!    reproducible on any process and raising a percentage never evicts anyone.
//! 2. **Where traffic goes next.** Bandit policies (epsilon-greedy, Thompson sampling, UCB)
//!    pick an arm from a snapshot of per-arm statistics, with an optional minimum-pulls gate.
//! 3. **When to stop.** An ordered chain of stopping rules (minimum sample size, z-test,
//!    practical significance, maximum duration, group-sequential boundaries) turns a snapshot
//!    into a single [`StoppingDecision`].
//!
//! **Goals:**
//! - **Deterministic by default**: hashing is pure; every random draw comes from a
//!   caller-supplied generator, so a seeded `StdRng` reproduces the same choices.
//! - **Never fail a request**: configuration errors surface at registration; the selection
//!   path degrades to the default key instead.
//! - **No global locks**: counters are locked per `(experiment, arm)`; readers work on copies.
//!
//! **Entry points:**
//! - [`DecisionOrchestrator`]: register experiments, [`select_arm`](DecisionOrchestrator::select_arm),
//!   [`record_reward`](DecisionOrchestrator::record_reward), [`evaluate`](DecisionOrchestrator::evaluate).
//! - [`is_included`] / [`allocate_bucket`]: the hash allocator on its own.
//! - [`select_arm`]: bandit selection over an [`ArmStatistics`] slice.
//! - [`StoppingRuleEngine`] and the [`stopping`] rules.
//! - [`evaluator::EvaluationLoop`]: periodic evaluation on a background thread.
//!
//! **Non-goals:** persistence, cross-process consensus, transport, dashboards, metrics
//! export formats.
//!
//! ```rust
//! use allot::{
//!     AllocationMode, ArmDefinition, BanditAlgorithm, BanditConfig, DecisionOrchestrator,
//!     ExperimentDefinition, RewardEvent, SelectionRequest,
//! };
//! use chrono::Utc;
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//!
//! let orchestrator = DecisionOrchestrator::new();
//! orchestrator.register(ExperimentDefinition::new(
//!     "checkout",
//!     vec![ArmDefinition::control("old"), ArmDefinition::new("new")],
//!     "old",
//!     AllocationMode::Bandit(BanditConfig::new(BanditAlgorithm::ucb(2.0))),
//! ))?;
//!
//! let mut rng = StdRng::seed_from_u64(7);
//! let request = SelectionRequest::new("checkout", ["old", "new"], "old");
//! let choice = orchestrator.select_arm(&request, &mut rng);
//! orchestrator.record_reward(&RewardEvent::binary("checkout", &choice.chosen_key, true, Utc::now()));
//!
//! let decision = orchestrator.evaluate("checkout").unwrap();
//! assert!(!decision.should_stop);
//! # Ok::<(), allot::ConfigError>(())
//! ```

#![forbid(unsafe_code)]

mod error;
pub use error::*;

pub mod clock;
pub use clock::{Clock, ManualClock, SystemClock};

mod decision;
pub use decision::*;

mod bucket;
pub use bucket::*;

mod rollout;
pub use rollout::*;

mod stats;
pub use stats::*;

mod prior;
pub use prior::*;

mod store;
pub use store::*;

mod normal;
pub use normal::*;

mod thompson;
pub use thompson::*;

mod bandit;
pub use bandit::*;

pub mod stopping;
pub use stopping::{
    AllOfRule, ExperimentData, MaxDurationRule, MinimumSampleSizeRule, PracticalSignificanceRule,
    SequentialAnalysisRule, SequentialBoundaries, SequentialConfig, SignificanceConfig,
    StatisticalSignificanceRule, StoppingConfig, StoppingRule, StoppingRuleEngine, TestTail,
};

mod orchestrator;
pub use orchestrator::*;

pub mod evaluator;
pub use evaluator::{EvaluationLoop, EvaluatorConfig};
