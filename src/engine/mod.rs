pub mod autopilot;
pub mod numbers;
pub mod shaper;
pub mod stats;

#[cfg(test)]
mod tests;

use crate::config::{CallParams, Config};
use crate::sip::dialog::{run_call, CallPlan, DialogContext};
use crate::sip::ports::RtpPortPool;
use crate::sip::transport::SipTransport;
use anyhow::{anyhow, Result};
use autopilot::Autopilot;
use numbers::{NumberPair, NumberPool};
use rand::Rng;
use shaper::Shaper;
use stats::{Stats, StatsSnapshot};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const RTP_PORT_START: u16 = 10000;
const RTP_PORT_END: u16 = 20000;
const REPORT_INTERVAL: Duration = Duration::from_secs(10);
const ROLLUP_INTERVAL: Duration = Duration::from_secs(300);

/// Owns every component's lifecycle and doubles as the control facade the
/// HTTP layer consumes. `start` is idempotent while running; `stop` is safe
/// to call at any time and returns once in-flight dialogs have drained.
pub struct Engine {
    config: Arc<Config>,
    local_ip: IpAddr,
    stats: Arc<Stats>,
    numbers: Arc<NumberPool>,
    shaper: Arc<Shaper>,
    autopilot: Arc<Autopilot>,
    next_call_id: AtomicU64,
    running: tokio::sync::Mutex<Option<Running>>,
    running_flag: AtomicBool,
}

struct Running {
    token: CancellationToken,
    loops: Vec<JoinHandle<()>>,
    drain_tx: mpsc::Sender<()>,
    drain_rx: mpsc::Receiver<()>,
}

impl Engine {
    pub fn new(config: Arc<Config>, local_ip: IpAddr, numbers: NumberPool) -> Arc<Self> {
        let stats = Stats::new();
        let shaper = Shaper::new(
            config.call_params.clone(),
            config.schedule.clone(),
            stats.clone(),
        );
        let autopilot = Autopilot::new(&config.autopilot);
        Arc::new(Self {
            config,
            local_ip,
            stats,
            numbers: Arc::new(numbers),
            shaper,
            autopilot,
            next_call_id: AtomicU64::new(1),
            running: tokio::sync::Mutex::new(None),
            running_flag: AtomicBool::new(false),
        })
    }

    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            info!("engine already running");
            return Ok(());
        }

        let peer = tokio::net::lookup_host((self.config.peer.host.as_str(), self.config.peer.port))
            .await?
            .next()
            .ok_or_else(|| anyhow!("peer {} did not resolve", self.config.peer.host))?;
        let transport = SipTransport::connect(self.local_ip, self.config.sip_port, peer).await?;
        let ports = RtpPortPool::new(RTP_PORT_START, RTP_PORT_END)?;

        let params = &self.config.call_params;
        info!(
            "starting call generation: acd={}-{}s asr={:.0}% concurrent={}-{} cps={:.2}",
            params.acd_min_s,
            params.acd_max_s,
            params.asr_pct,
            params.min_concurrent,
            params.max_concurrent,
            params.target_cps,
        );

        let token = CancellationToken::new();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (drain_tx, drain_rx) = mpsc::channel(1);
        self.shaper.begin_ramp_up();

        let ctx = Arc::new(DialogContext {
            transport: transport.clone(),
            stats: self.stats.clone(),
            peer_host: self.config.peer.host.clone(),
            peer_port: self.config.peer.port,
            local_ip: self.local_ip,
            local_port: transport.local_addr.port(),
            rtp_enabled: params.rtp_enabled,
        });

        let mut loops = Vec::new();
        {
            let transport = transport.clone();
            let token = token.child_token();
            loops.push(tokio::spawn(async move {
                transport.recv_loop(token).await;
            }));
        }
        {
            let shaper = self.shaper.clone();
            let token = token.child_token();
            loops.push(tokio::spawn(async move {
                shaper.run(event_tx, token).await;
            }));
        }
        {
            let engine = self.clone();
            let token = token.clone();
            let drain_tx = drain_tx.clone();
            loops.push(tokio::spawn(async move {
                engine.launch_loop(ctx, ports, event_rx, token, drain_tx).await;
            }));
        }
        {
            let autopilot = self.autopilot.clone();
            let shaper = self.shaper.clone();
            let stats = self.stats.clone();
            let token = token.child_token();
            loops.push(tokio::spawn(async move {
                autopilot.run(shaper, stats, token).await;
            }));
        }
        {
            let stats = self.stats.clone();
            let token = token.child_token();
            loops.push(tokio::spawn(async move {
                rollup_loop(stats, token).await;
            }));
        }
        {
            let stats = self.stats.clone();
            let token = token.child_token();
            loops.push(tokio::spawn(async move {
                report_loop(stats, token).await;
            }));
        }

        *running = Some(Running {
            token,
            loops,
            drain_tx,
            drain_rx,
        });
        self.running_flag.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Turn shaper events into dialog tasks. Skips silently on an empty
    /// number pool; blocks on the port pool when every port is borrowed.
    async fn launch_loop(
        self: Arc<Self>,
        ctx: Arc<DialogContext>,
        ports: Arc<RtpPortPool>,
        mut events: mpsc::UnboundedReceiver<()>,
        token: CancellationToken,
        drain_tx: mpsc::Sender<()>,
    ) {
        let params = self.config.call_params.clone();
        loop {
            select! {
                _ = token.cancelled() => break,
                event = events.recv() => {
                    if event.is_none() {
                        break;
                    }
                    let Some(pair) = self.numbers.draw() else {
                        debug!("number pool empty, skipping call event");
                        continue;
                    };
                    let port = select! {
                        _ = token.cancelled() => break,
                        guard = ports.acquire() => match guard {
                            Ok(guard) => guard,
                            Err(e) => {
                                warn!("rtp port acquire failed: {}", e);
                                continue;
                            }
                        },
                    };
                    let plan = CallPlan {
                        local_id: self.next_call_id.fetch_add(1, Ordering::Relaxed),
                        pair,
                        answered: decide_answered(&params),
                        hold: sample_hold(&params),
                    };
                    let ctx = ctx.clone();
                    let call_token = token.child_token();
                    let drain = drain_tx.clone();
                    tokio::spawn(async move {
                        run_call(ctx, plan, port, call_token).await;
                        drop(drain);
                    });
                }
            }
        }
        debug!("call launcher stopped");
    }

    pub async fn stop(&self) {
        let Some(mut running) = self.running.lock().await.take() else {
            info!("engine not running");
            return;
        };
        self.running_flag.store(false, Ordering::Relaxed);
        running.token.cancel();
        for handle in running.loops {
            handle.await.ok();
        }
        // every dialog task owns a clone; recv returns None once all drop
        drop(running.drain_tx);
        running.drain_rx.recv().await;

        let s = self.stats.snapshot();
        info!(
            "engine stopped: attempts={} answered={} failed={} asr={:.1}% acd={:.1}s",
            s.total_attempts, s.answered, s.failed, s.asr_pct, s.acd_s
        );
    }

    pub fn is_running(&self) -> bool {
        self.running_flag.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn set_autopilot(&self, enabled: bool) {
        self.autopilot.set_enabled(enabled);
    }

    pub fn toggle_autopilot(&self) -> bool {
        self.autopilot.toggle()
    }

    pub fn autopilot_enabled(&self) -> bool {
        self.autopilot.enabled()
    }

    pub fn set_target_cps(&self, cps: f64) {
        self.shaper.set_target_cps(cps);
    }

    pub fn target_cps(&self) -> f64 {
        self.shaper.target_cps()
    }

    pub fn replace_numbers(&self, pairs: Vec<NumberPair>) -> usize {
        let count = self.numbers.replace(pairs);
        info!("number pool replaced with {} pairs", count);
        count
    }

    pub fn numbers(&self) -> &NumberPool {
        &self.numbers
    }
}

fn decide_answered(params: &CallParams) -> bool {
    let p = (params.asr_pct / 100.0).clamp(0.0, 1.0);
    rand::rng().random_bool(p)
}

fn sample_hold(params: &CallParams) -> Duration {
    let secs = if params.acd_max_s > params.acd_min_s {
        rand::rng().random_range(params.acd_min_s..params.acd_max_s)
    } else {
        params.acd_min_s
    };
    Duration::from_secs(secs as u64)
}

async fn rollup_loop(stats: Arc<Stats>, token: CancellationToken) {
    let mut interval = tokio::time::interval(ROLLUP_INTERVAL);
    interval.tick().await;
    loop {
        select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => stats.rollup(),
        }
    }
}

async fn report_loop(stats: Arc<Stats>, token: CancellationToken) {
    let mut interval = tokio::time::interval(REPORT_INTERVAL);
    interval.tick().await;
    loop {
        select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                let s = stats.snapshot();
                info!(
                    "total={} answered={} failed={} active={} cps={:.2} asr={:.1}%",
                    s.total_attempts, s.answered, s.failed, s.active_now, s.cps, s.asr_pct
                );
            }
        }
    }
}
