//! Background evaluation loop.
//!
//! A dedicated thread wakes on a `crossbeam` tick, evaluates every registered experiment, and
//! hands each decision to a callback. The loop waits on the tick and the stop channel together,
//! so a stop request is only observed between passes: a pass in flight always completes.

use crossbeam::channel::{self, Sender};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::orchestrator::DecisionOrchestrator;
use crate::StoppingDecision;

/// Loop cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EvaluatorConfig {
    pub interval: Duration,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

impl EvaluatorConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Evaluate every registered experiment once, feeding each decision to `on_decision`.
///
/// Returns the number of experiments evaluated.
pub fn run_pass<F>(orchestrator: &DecisionOrchestrator, on_decision: &mut F) -> usize
where
    F: FnMut(&str, &StoppingDecision),
{
    let decisions = orchestrator.evaluate_all();
    let stopping = decisions.iter().filter(|(_, d)| d.should_stop).count();
    for (name, decision) in &decisions {
        on_decision(name, decision);
    }
    debug!(experiments = decisions.len(), stopping, "evaluation pass");
    decisions.len()
}

/// Handle to a running evaluation thread.
///
/// Dropping the handle stops the loop and joins the thread.
#[derive(Debug)]
pub struct EvaluationLoop {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    passes: Arc<AtomicU64>,
}

impl EvaluationLoop {
    /// Start the loop. The first pass runs one `interval` after spawning.
    pub fn spawn<F>(
        orchestrator: Arc<DecisionOrchestrator>,
        cfg: EvaluatorConfig,
        mut on_decision: F,
    ) -> io::Result<Self>
    where
        F: FnMut(&str, &StoppingDecision) + Send + 'static,
    {
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let passes = Arc::new(AtomicU64::new(0));
        let passes_worker = Arc::clone(&passes);
        let interval = cfg.interval.max(Duration::from_millis(1));

        let handle = thread::Builder::new()
            .name("allot-evaluator".to_string())
            .spawn(move || {
                let ticker = channel::tick(interval);
                info!(interval_ms = interval.as_millis() as u64, "evaluation loop started");
                loop {
                    channel::select! {
                        // A message or a dropped sender both mean stop.
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            run_pass(&orchestrator, &mut on_decision);
                            passes_worker.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                info!(
                    passes = passes_worker.load(Ordering::Relaxed),
                    "evaluation loop stopped"
                );
            })?;

        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
            passes,
        })
    }

    /// Completed passes so far.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Signal the loop, wait for the current pass to finish, and return the pass count.
    pub fn stop(mut self) -> u64 {
        self.shutdown();
        self.passes()
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop.take() {
            // A full channel or a gone receiver both mean the loop is already stopping.
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("evaluation loop panicked");
            }
        }
    }
}

impl Drop for EvaluationLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandit::BanditConfig;
    use crate::orchestrator::{AllocationMode, ArmDefinition, ExperimentDefinition};
    use crate::stopping::StoppingConfig;
    use std::sync::Mutex;

    fn orchestrator() -> Arc<DecisionOrchestrator> {
        let o = DecisionOrchestrator::new();
        o.register(
            ExperimentDefinition::new(
                "exp",
                vec![ArmDefinition::control("a"), ArmDefinition::new("b")],
                "a",
                AllocationMode::Bandit(BanditConfig::default()),
            )
            .with_stopping(StoppingConfig::none()),
        )
        .unwrap();
        Arc::new(o)
    }

    #[test]
    fn run_pass_visits_every_experiment() {
        let o = orchestrator();
        let mut seen = Vec::new();
        let n = run_pass(&o, &mut |name: &str, d: &StoppingDecision| {
            seen.push((name.to_string(), d.should_stop));
        });
        assert_eq!(n, 1);
        assert_eq!(seen, vec![("exp".to_string(), false)]);
    }

    #[test]
    fn loop_runs_until_stopped() {
        let o = orchestrator();
        let seen = Arc::new(Mutex::new(0u64));
        let sink = Arc::clone(&seen);
        let lp = EvaluationLoop::spawn(
            o,
            EvaluatorConfig::default().with_interval(Duration::from_millis(5)),
            move |_, _| *sink.lock().unwrap() += 1,
        )
        .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while lp.passes() < 3 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let passes = lp.stop();
        assert!(passes >= 3, "passes={passes}");
        // One experiment, one callback per completed pass.
        assert_eq!(*seen.lock().unwrap(), passes);
    }

    #[test]
    fn dropping_the_handle_stops_the_loop() {
        let lp = EvaluationLoop::spawn(
            orchestrator(),
            EvaluatorConfig::default().with_interval(Duration::from_secs(3600)),
            |_, _| {},
        )
        .unwrap();
        drop(lp);
    }
}
