use crate::config::AutopilotConfig;
use crate::engine::shaper::Shaper;
use crate::engine::stats::Stats;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const MIN_SAMPLE: u64 = 100;
const DEAD_BAND_PCT: f64 = 5.0;
const CPS_FLOOR: f64 = 0.1;
const CPS_CEILING: f64 = 10.0;

/// Closed-loop controller: nudges the shaper's target CPS so measured ASR
/// converges on the configured target. Proportional, bounded per step, and
/// toggleable at runtime; a toggle takes effect at the next tick.
pub struct Autopilot {
    enabled: AtomicBool,
    target_asr_pct: f64,
    max_cps_step: f64,
    interval: Duration,
}

impl Autopilot {
    pub fn new(config: &AutopilotConfig) -> Arc<Self> {
        Arc::new(Self {
            enabled: AtomicBool::new(config.enabled),
            target_asr_pct: config.target_asr_pct,
            max_cps_step: config.max_cps_step,
            interval: Duration::from_secs(config.adjustment_interval_s),
        })
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::Relaxed);
        info!("autopilot {}", if on { "enabled" } else { "disabled" });
    }

    pub fn toggle(&self) -> bool {
        let now_on = !self.enabled.fetch_xor(true, Ordering::Relaxed);
        info!("autopilot {}", if now_on { "enabled" } else { "disabled" });
        now_on
    }

    /// One adjustment pass; returns the new target when one was applied.
    pub fn adjust(&self, shaper: &Shaper, stats: &Stats) -> Option<f64> {
        let snapshot = stats.snapshot();
        if snapshot.total_attempts < MIN_SAMPLE {
            debug!(
                "autopilot: {} attempts, waiting for {}",
                snapshot.total_attempts, MIN_SAMPLE
            );
            return None;
        }
        let asr = snapshot.asr_pct;
        if (self.target_asr_pct - asr).abs() <= DEAD_BAND_PCT {
            return None;
        }
        // ASR below target raises offered load; |delta| <= max_cps_step
        let delta = (self.target_asr_pct - asr) / 100.0 * self.max_cps_step;
        let target = (shaper.target_cps() + delta).clamp(CPS_FLOOR, CPS_CEILING);
        shaper.set_target_cps(target);
        info!(
            "autopilot: asr {:.1}% vs target {:.1}%, cps target now {:.2}",
            asr, self.target_asr_pct, target
        );
        Some(target)
    }

    pub async fn run(&self, shaper: Arc<Shaper>, stats: Arc<Stats>, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await; // the first tick fires immediately
        loop {
            select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }
            if self.enabled() {
                self.adjust(&shaper, &stats);
            }
        }
        debug!("autopilot stopped");
    }
}
