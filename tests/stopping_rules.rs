//! Stopping-rule behavior through the public API.

use std::sync::Arc;

use allot::{
    AllOfRule, ArmStatistics, DecisionEvidence, ExperimentData, ManualClock, MaxDurationRule,
    MinimumSampleSizeRule, PracticalSignificanceRule, SequentialAnalysisRule, SequentialConfig,
    StatisticalSignificanceRule, StoppingConfig, StoppingRule, StoppingRuleEngine, TestTail,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
}

fn variant(key: &str, control: bool, successes: u64, n: u64) -> ArmStatistics {
    ArmStatistics {
        is_control: control,
        pulls: n,
        successes,
        failures: n - successes,
        total_reward: successes as f64,
        sum_of_squares: successes as f64,
        ..ArmStatistics::new(key)
    }
}

fn two_arm(c: (u64, u64), t: (u64, u64)) -> ExperimentData {
    ExperimentData::new(
        "exp",
        start(),
        vec![variant("control", true, c.0, c.1), variant("treatment", false, t.0, t.1)],
    )
}

// ---------------------------------------------------------------------------
// Worked examples
// ---------------------------------------------------------------------------

#[test]
fn five_vs_seven_percent_stops_one_sided() {
    let data = two_arm((50, 1000), (70, 1000));
    let rule = StatisticalSignificanceRule::new(0.95, 100)
        .unwrap()
        .with_tail(TestTail::OneSided);
    let d = rule.evaluate(&data);
    assert!(d.should_stop);
    assert_eq!(d.winning_variant.as_deref(), Some("treatment"));
}

#[test]
fn five_vs_seven_percent_two_sided_is_borderline() {
    let data = two_arm((50, 1000), (70, 1000));
    let d = StatisticalSignificanceRule::new(0.95, 100).unwrap().evaluate(&data);
    assert!(!d.should_stop);
    match d.evidence {
        Some(DecisionEvidence::ZTest { z, p_value, .. }) => {
            assert!((z - 1.883).abs() < 1e-3, "z={z}");
            assert!(p_value > 0.05 && p_value < 0.07, "p={p_value}");
        }
        other => panic!("unexpected evidence {other:?}"),
    }
}

#[test]
fn minimum_sample_gate_overrides_everything() {
    // Ten pulls each with a huge effect: every other rule would stop.
    let data = two_arm((0, 10), (10, 10));
    let clock = Arc::new(ManualClock::new(start() + Duration::days(365)));
    let engine = StoppingRuleEngine::new()
        .with_rule(StatisticalSignificanceRule::new(0.5, 0).unwrap())
        .with_rule(PracticalSignificanceRule::new(0.0).unwrap())
        .with_rule(MaxDurationRule::new(Duration::days(1), clock))
        .with_rule(MinimumSampleSizeRule::new(1000));

    let d = engine.evaluate(&data);
    assert!(!d.should_stop);
    assert!(d.winning_variant.is_none());
    assert_eq!(
        d.evidence,
        Some(DecisionEvidence::SampleSize { min_pulls: 10, threshold: 1000 })
    );
}

#[test]
fn practical_significance_overrides_tiny_significant_lift() {
    let data = two_arm((100_000_000, 1_000_000_000), (100_100_000, 1_000_000_000));

    let z_test = StatisticalSignificanceRule::new(0.95, 100).unwrap();
    assert!(z_test.evaluate(&data).should_stop);

    let practical = PracticalSignificanceRule::new(0.05).unwrap();
    assert!(!practical.evaluate(&data).should_stop);

    let config = StoppingConfig::default()
        .with_minimum_effect(0.05)
        .requiring_practical_significance();
    let engine = config.build(Arc::new(ManualClock::new(start()))).unwrap();
    assert!(!engine.evaluate(&data).should_stop);
}

// ---------------------------------------------------------------------------
// Engine precedence
// ---------------------------------------------------------------------------

#[test]
fn max_duration_names_the_leader_once_time_is_up() {
    let clock = Arc::new(ManualClock::new(start()));
    let engine = StoppingConfig::default()
        .with_max_duration(Duration::days(14))
        .build(clock.clone())
        .unwrap();
    // Enough samples to pass the gate, not enough evidence to be significant.
    let data = two_arm((50, 500), (55, 500));

    let d = engine.evaluate(&data);
    assert!(!d.should_stop);
    assert!(d.reason.starts_with("running for"), "{}", d.reason);

    clock.advance(Duration::days(14));
    let d = engine.evaluate(&data);
    assert!(d.should_stop);
    assert_eq!(d.winning_variant.as_deref(), Some("treatment"));
    assert!(matches!(d.evidence, Some(DecisionEvidence::Elapsed { .. })));
}

#[test]
fn conjunction_reports_both_reasons() {
    let rule = AllOfRule::new()
        .with_rule(StatisticalSignificanceRule::new(0.9, 0).unwrap())
        .with_rule(PracticalSignificanceRule::new(0.1).unwrap());
    let d = rule.evaluate(&two_arm((50, 1000), (70, 1000)));
    assert!(d.should_stop);
    assert!(d.reason.contains("significant") && d.reason.contains("lift"), "{}", d.reason);
}

#[test]
fn multi_arm_compares_control_with_best_treatment() {
    let data = ExperimentData::new(
        "exp",
        start(),
        vec![
            variant("t1", false, 60, 1000),
            variant("control", true, 50, 1000),
            variant("t2", false, 120, 1000),
        ],
    );
    assert_eq!(data.control().unwrap().key, "control");
    assert_eq!(data.best_treatment().unwrap().key, "t2");
    let d = StatisticalSignificanceRule::new(0.99, 100).unwrap().evaluate(&data);
    assert!(d.should_stop);
    assert_eq!(d.winning_variant.as_deref(), Some("t2"));
}

// ---------------------------------------------------------------------------
// Sequential analysis and peeking
// ---------------------------------------------------------------------------

#[test]
fn obrien_fleming_controls_peeking() {
    let checkpoints = vec![200, 400, 600, 800, 1000];
    let sequential = SequentialAnalysisRule::obrien_fleming(checkpoints.clone(), 0.05).unwrap();
    let naive = SequentialAnalysisRule::with_boundaries(checkpoints.clone(), vec![1.95; 5]).unwrap();

    let at = start();
    let mut rng = StdRng::seed_from_u64(2024);
    let trials = 400;
    let (mut obf_stops, mut naive_stops) = (0usize, 0usize);
    for _ in 0..trials {
        // A/A test: both arms convert at 10%.
        let mut control = ArmStatistics::control("control");
        let mut treatment = ArmStatistics::new("treatment");
        let (mut obf_hit, mut naive_hit) = (false, false);
        for n in 1..=1000u64 {
            let c = rng.random_bool(0.1);
            let t = rng.random_bool(0.1);
            control.apply_reward(if c { 1.0 } else { 0.0 }, c, at);
            treatment.apply_reward(if t { 1.0 } else { 0.0 }, t, at);
            if checkpoints.contains(&n) {
                let data = ExperimentData::new("aa", at, vec![control.clone(), treatment.clone()]);
                obf_hit |= sequential.evaluate(&data).should_stop;
                naive_hit |= naive.evaluate(&data).should_stop;
            }
        }
        obf_stops += usize::from(obf_hit);
        naive_stops += usize::from(naive_hit);
    }
    let obf_rate = obf_stops as f64 / trials as f64;
    let naive_rate = naive_stops as f64 / trials as f64;
    // O'Brien-Fleming boundaries sit above the fixed 1.95 boundary at every look.
    assert!(obf_stops <= naive_stops);
    assert!(obf_rate < 0.10, "obf_rate={obf_rate}");
    assert!(naive_rate > 0.07, "naive_rate={naive_rate}");
}

#[test]
fn sequential_config_builds_obrien_fleming() {
    let engine = StoppingConfig::none()
        .with_sequential(SequentialConfig::obrien_fleming(vec![500, 1000], 0.05))
        .build(Arc::new(ManualClock::new(start())))
        .unwrap();
    // z about 5.3 at the first look, against a boundary of about 2.77.
    let d = engine.evaluate(&two_arm((25, 500), (75, 500)));
    assert!(d.should_stop);
    assert!(matches!(
        d.evidence,
        Some(DecisionEvidence::Sequential { checkpoint: 1, .. })
    ));
}
