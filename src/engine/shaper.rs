use crate::config::{CallParams, ScheduleConfig};
use crate::engine::stats::Stats;
use chrono::{Datelike, Local, Timelike, Weekday};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const TICK: Duration = Duration::from_millis(100);
const DECAY_INTERVAL: Duration = Duration::from_secs(10);
const DECAY_FACTOR: f64 = 0.9;
// 0.9^n never reaches zero; collapse the tail
const DECAY_FLOOR: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampPhase {
    Idle,
    RampUp,
    Steady,
    RampDown,
}

struct ShaperState {
    current_cps: f64,
    target_cps: f64,
    phase: RampPhase,
    ramp_from: f64,
    ramp_started: Instant,
    last_decay: Instant,
    accumulator: f64,
    last_tick: Instant,
}

/// Paces call creation: linear ramp-up to the target CPS, schedule gating
/// with a staged ramp-down, concurrency floor/ceiling against live stats,
/// and a fractional token accumulator so sub-1.0 CPS rates survive ticks.
pub struct Shaper {
    state: Mutex<ShaperState>,
    params: CallParams,
    schedule: ScheduleConfig,
    stats: Arc<Stats>,
}

impl Shaper {
    pub fn new(params: CallParams, schedule: ScheduleConfig, stats: Arc<Stats>) -> Arc<Self> {
        let now = Instant::now();
        Arc::new(Self {
            state: Mutex::new(ShaperState {
                current_cps: 0.0,
                target_cps: params.target_cps,
                phase: RampPhase::Idle,
                ramp_from: 0.0,
                ramp_started: now,
                last_decay: now,
                accumulator: 0.0,
                last_tick: now,
            }),
            params,
            schedule,
            stats,
        })
    }

    pub fn target_cps(&self) -> f64 {
        self.state.lock().unwrap().target_cps
    }

    /// The autopilot (and the config endpoint) write only the target; the
    /// tick loop reconciles `current_cps` toward it through the ramp.
    pub fn set_target_cps(&self, cps: f64) {
        self.state.lock().unwrap().target_cps = cps.max(0.0);
    }

    pub fn current_cps(&self) -> f64 {
        self.state.lock().unwrap().current_cps
    }

    pub fn phase(&self) -> RampPhase {
        self.state.lock().unwrap().phase
    }

    /// Start (or restart) generation: ramp from zero toward the target.
    pub fn begin_ramp_up(&self) {
        let mut st = self.state.lock().unwrap();
        let now = Instant::now();
        st.current_cps = 0.0;
        st.accumulator = 0.0;
        st.phase = RampPhase::RampUp;
        st.ramp_from = 0.0;
        st.ramp_started = now;
        st.last_tick = now;
    }

    pub async fn run(&self, events: mpsc::UnboundedSender<()>, token: CancellationToken) {
        let mut interval = tokio::time::interval(TICK);
        loop {
            select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }
            let local = Local::now();
            let weekend = matches!(local.weekday(), Weekday::Sat | Weekday::Sun);
            let spawns = self.tick_at(Instant::now(), local.hour(), weekend);
            for _ in 0..spawns {
                if events.send(()).is_err() {
                    return;
                }
            }
        }
        debug!("shaper stopped");
    }

    /// One pacing tick. Separated from the loop so time and schedule inputs
    /// can be driven explicitly.
    pub(crate) fn tick_at(&self, now: Instant, local_hour: u32, weekend: bool) -> u32 {
        let mut st = self.state.lock().unwrap();
        let dt = now.saturating_duration_since(st.last_tick).as_secs_f64();
        st.last_tick = now;

        match st.phase {
            RampPhase::RampUp => {
                let ramp_up = self.params.ramp_up_s as f64;
                let frac = if ramp_up <= 0.0 {
                    1.0
                } else {
                    now.saturating_duration_since(st.ramp_started).as_secs_f64() / ramp_up
                };
                if frac >= 1.0 {
                    st.current_cps = st.target_cps;
                    st.phase = RampPhase::Steady;
                    info!("ramp-up complete at {:.2} cps", st.current_cps);
                } else {
                    st.current_cps = st.ramp_from + (st.target_cps - st.ramp_from) * frac;
                }
            }
            RampPhase::Steady => {
                if (st.current_cps - st.target_cps).abs() > f64::EPSILON {
                    st.phase = RampPhase::RampUp;
                    st.ramp_from = st.current_cps;
                    st.ramp_started = now;
                }
            }
            RampPhase::Idle | RampPhase::RampDown => {}
        }
        st.current_cps = st.current_cps.max(0.0);

        let open = !self.schedule.enabled || self.schedule.window(weekend).contains(local_hour);
        if !open {
            match st.phase {
                RampPhase::RampDown => {
                    if now.saturating_duration_since(st.last_decay) >= DECAY_INTERVAL {
                        st.current_cps *= DECAY_FACTOR;
                        if st.current_cps < DECAY_FLOOR {
                            st.current_cps = 0.0;
                        }
                        st.last_decay = now;
                    }
                    if st.current_cps == 0.0 {
                        st.phase = RampPhase::Idle;
                    }
                }
                RampPhase::Idle => {}
                _ => {
                    if st.current_cps > 0.0 {
                        info!("schedule window closed, ramping down from {:.2} cps", st.current_cps);
                        st.phase = RampPhase::RampDown;
                        st.last_decay = now;
                    } else {
                        st.phase = RampPhase::Idle;
                    }
                }
            }
            return 0;
        }
        if matches!(st.phase, RampPhase::RampDown | RampPhase::Idle) {
            // window reopened; climb back from wherever the decay left us
            info!("schedule window open, ramping up from {:.2} cps", st.current_cps);
            st.phase = RampPhase::RampUp;
            st.ramp_from = st.current_cps;
            st.ramp_started = now;
        }

        let active = self.stats.active_now();
        let mut spawns = 0u32;
        if active < self.params.min_concurrent as i64 {
            // below the floor: one unconditional spawn per tick
            spawns += 1;
        } else if active >= self.params.max_concurrent as i64 {
            return 0;
        }

        // token spawns never push past the ceiling, even within one tick
        let headroom = (self.params.max_concurrent as i64 - active).max(0) as u32;
        st.accumulator += st.current_cps * dt;
        while st.accumulator >= 1.0 && spawns < headroom {
            spawns += 1;
            st.accumulator -= 1.0;
        }
        if st.accumulator < 0.0 {
            st.accumulator = 0.0;
        }
        spawns
    }
}
