use crate::engine::stats::Stats;
use std::time::Duration;

#[test]
fn attempt_identity_holds_at_quiescence() {
    let stats = Stats::new();
    for _ in 0..5 {
        stats.call_started();
    }
    stats.call_answered(Duration::from_secs(10));
    stats.call_answered(Duration::from_secs(20));
    stats.call_failed();

    let s = stats.snapshot();
    assert_eq!(s.total_attempts, 5);
    assert_eq!(s.answered, 2);
    assert_eq!(s.failed, 1);
    assert_eq!(s.active_now, 2);
    assert_eq!(
        s.total_attempts,
        s.answered + s.failed + s.active_now as u64
    );
}

#[test]
fn derived_kpis_compute_on_snapshot() {
    let stats = Stats::new();
    for _ in 0..4 {
        stats.call_started();
    }
    stats.call_answered(Duration::from_secs(30));
    stats.call_answered(Duration::from_secs(90));
    stats.call_failed();
    stats.call_failed();

    let s = stats.snapshot();
    assert!((s.asr_pct - 50.0).abs() < f64::EPSILON);
    assert!((s.acd_s - 60.0).abs() < f64::EPSILON);
    assert!(s.cps > 0.0);
}

#[test]
fn empty_snapshot_divides_nothing() {
    let s = Stats::new().snapshot();
    assert_eq!(s.total_attempts, 0);
    assert_eq!(s.asr_pct, 0.0);
    assert_eq!(s.acd_s, 0.0);
}

#[test]
fn rollup_attributes_deltas_to_the_current_hour() {
    let stats = Stats::new();
    for _ in 0..3 {
        stats.call_started();
    }
    stats.call_answered(Duration::from_secs(5));
    stats.rollup();

    let s = stats.snapshot();
    assert_eq!(s.hourly.len(), 1);
    let bucket = s.hourly.values().next().unwrap();
    assert_eq!(bucket.attempts, 3);
    assert_eq!(bucket.answered, 1);
    assert_eq!(bucket.peak_concurrent, 3);

    // nothing new since the last roll-up: the bucket must not double-count
    stats.rollup();
    let s = stats.snapshot();
    assert_eq!(s.hourly.values().next().unwrap().attempts, 3);
}

#[test]
fn peak_concurrency_tracks_the_high_water_mark() {
    let stats = Stats::new();
    for _ in 0..3 {
        stats.call_started();
    }
    for _ in 0..3 {
        stats.call_failed();
    }
    stats.call_started();

    let s = stats.snapshot();
    assert_eq!(s.active_now, 1);
    assert_eq!(s.hourly.values().next().unwrap().peak_concurrent, 3);
}

#[test]
fn snapshot_is_a_value_copy() {
    let stats = Stats::new();
    stats.call_started();
    let before = stats.snapshot();
    stats.call_started();
    assert_eq!(before.total_attempts, 1);
    assert_eq!(stats.snapshot().total_attempts, 2);
}
