use chrono::Local;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Per-local-hour roll-up bucket.
#[derive(Debug, Default, Clone, Serialize)]
pub struct HourlyStats {
    pub attempts: u64,
    pub answered: u64,
    pub failed: u64,
    pub peak_concurrent: i64,
}

#[derive(Default)]
struct Hourly {
    buckets: BTreeMap<String, HourlyStats>,
    // totals already attributed to a bucket by a previous roll-up
    rolled_attempts: u64,
    rolled_answered: u64,
    rolled_failed: u64,
}

/// Lock-free counters on the hot path; derived KPIs are computed on
/// snapshot. A call moves `active_now` up at birth and down exactly once at
/// death, whichever way it ends.
pub struct Stats {
    started: Instant,
    total_attempts: AtomicU64,
    answered: AtomicU64,
    failed: AtomicU64,
    active_now: AtomicI64,
    answered_secs: AtomicU64,
    hourly: Mutex<Hourly>,
}

/// Value copy handed to observers; never aliases internal state.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub total_attempts: u64,
    pub answered: u64,
    pub failed: u64,
    pub active_now: i64,
    pub elapsed_s: f64,
    pub cps: f64,
    pub asr_pct: f64,
    pub acd_s: f64,
    pub hourly: BTreeMap<String, HourlyStats>,
}

impl Stats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started: Instant::now(),
            total_attempts: AtomicU64::new(0),
            answered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            active_now: AtomicI64::new(0),
            answered_secs: AtomicU64::new(0),
            hourly: Mutex::new(Hourly::default()),
        })
    }

    fn hour_key() -> String {
        Local::now().format("%Y-%m-%d %H:00").to_string()
    }

    pub fn call_started(&self) {
        self.total_attempts.fetch_add(1, Ordering::Relaxed);
        let active = self.active_now.fetch_add(1, Ordering::Relaxed) + 1;
        let mut hourly = self.hourly.lock().unwrap();
        let bucket = hourly.buckets.entry(Self::hour_key()).or_default();
        if active > bucket.peak_concurrent {
            bucket.peak_concurrent = active;
        }
    }

    pub fn call_answered(&self, duration: Duration) {
        self.answered.fetch_add(1, Ordering::Relaxed);
        self.answered_secs
            .fetch_add(duration.as_secs(), Ordering::Relaxed);
        self.active_now.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn call_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.active_now.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_now(&self) -> i64 {
        self.active_now.load(Ordering::Relaxed)
    }

    pub fn total_attempts(&self) -> u64 {
        self.total_attempts.load(Ordering::Relaxed)
    }

    /// Attribute everything counted since the previous roll-up to the
    /// current local-time hour.
    pub fn rollup(&self) {
        let attempts = self.total_attempts.load(Ordering::Relaxed);
        let answered = self.answered.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);

        let mut hourly = self.hourly.lock().unwrap();
        let d_attempts = attempts.saturating_sub(hourly.rolled_attempts);
        let d_answered = answered.saturating_sub(hourly.rolled_answered);
        let d_failed = failed.saturating_sub(hourly.rolled_failed);
        hourly.rolled_attempts = attempts;
        hourly.rolled_answered = answered;
        hourly.rolled_failed = failed;

        let bucket = hourly.buckets.entry(Self::hour_key()).or_default();
        bucket.attempts += d_attempts;
        bucket.answered += d_answered;
        bucket.failed += d_failed;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let total_attempts = self.total_attempts.load(Ordering::Relaxed);
        let answered = self.answered.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let active_now = self.active_now.load(Ordering::Relaxed);
        let answered_secs = self.answered_secs.load(Ordering::Relaxed);
        let elapsed_s = self.started.elapsed().as_secs_f64();

        let cps = if elapsed_s > 0.0 {
            total_attempts as f64 / elapsed_s
        } else {
            0.0
        };
        let asr_pct = if total_attempts > 0 {
            answered as f64 / total_attempts as f64 * 100.0
        } else {
            0.0
        };
        let acd_s = if answered > 0 {
            answered_secs as f64 / answered as f64
        } else {
            0.0
        };

        StatsSnapshot {
            total_attempts,
            answered,
            failed,
            active_now,
            elapsed_s,
            cps,
            asr_pct,
            acd_s,
            hourly: self.hourly.lock().unwrap().buckets.clone(),
        }
    }
}
