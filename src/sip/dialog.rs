use super::message::{build_bye, build_invite, build_sdp, DialogIds};
use super::ports::RtpPortGuard;
use super::rtp;
use super::transport::SipTransport;
use crate::engine::numbers::NumberPair;
use crate::engine::stats::Stats;
use rand::Rng;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared handles every dialog task needs. Dialogs reach the transport only
/// through this context plus their own Call-ID; the transport reaches them
/// through the mailbox registered under that Call-ID.
pub struct DialogContext {
    pub transport: Arc<SipTransport>,
    pub stats: Arc<Stats>,
    pub peer_host: String,
    pub peer_port: u16,
    pub local_ip: IpAddr,
    pub local_port: u16,
    pub rtp_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Initiating,
    Trying,
    Ringing,
    Answered,
    Completed,
    Failed,
}

/// One call as decided by the shaper: who to call, whether the Bernoulli
/// trial answered it, and how long it holds.
pub struct CallPlan {
    pub local_id: u64,
    pub pair: NumberPair,
    pub answered: bool,
    pub hold: Duration,
}

/// Drive one UAC dialog from INVITE to BYE (or simulated rejection).
/// Counters move on birth and death; the RTP port rides the guard and is
/// returned on every exit path.
pub async fn run_call(
    ctx: Arc<DialogContext>,
    plan: CallPlan,
    port: RtpPortGuard,
    token: CancellationToken,
) {
    ctx.stats.call_started();

    if !plan.answered {
        run_rejected(&ctx, &plan, &token).await;
        return;
    }
    run_answered(ctx, plan, port, token).await;
}

/// Rejected calls never reach the wire: hold for a short uniform interval,
/// then count as failed.
async fn run_rejected(ctx: &DialogContext, plan: &CallPlan, token: &CancellationToken) {
    let hold = Duration::from_secs_f64(rand::rng().random_range(3.0..8.0));
    debug!(call = plan.local_id, "simulating rejected call ({:?})", hold);
    select! {
        _ = token.cancelled() => {}
        _ = tokio::time::sleep(hold) => {}
    }
    ctx.stats.call_failed();
}

async fn run_answered(
    ctx: Arc<DialogContext>,
    plan: CallPlan,
    port: RtpPortGuard,
    token: CancellationToken,
) {
    let ids = DialogIds::generate(&ctx.local_ip);
    let mut mailbox = ctx.transport.register(&ids.call_id);

    let sdp = build_sdp(&ctx.local_ip, port.port());
    let invite = build_invite(
        &plan.pair.ani,
        &plan.pair.dnis,
        &ctx.local_ip,
        ctx.local_port,
        &ctx.peer_host,
        ctx.peer_port,
        &ids,
        &sdp,
    );
    if let Err(e) = ctx.transport.send(&invite).await {
        warn!(call = plan.local_id, "invite send failed: {}", e);
        ctx.transport.deregister(&ids.call_id);
        ctx.stats.call_failed();
        return;
    }
    info!(
        call = plan.local_id,
        "{} -> {} invite sent (call-id {})", plan.pair.ani, plan.pair.dnis, ids.call_id
    );

    let started = Instant::now();
    let mut status = CallStatus::Initiating;
    let mut remote_tag: Option<String> = None;
    let mut last_status_code: Option<u16> = None;
    let mut rtp_task = None;
    let rtp_token = token.child_token();

    let hold = tokio::time::sleep(plan.hold);
    tokio::pin!(hold);

    loop {
        select! {
            _ = &mut hold => break,
            _ = token.cancelled() => break,
            response = mailbox.recv() => {
                let Some(response) = response else { break };
                last_status_code = Some(response.code);
                match response.code {
                    100 if status != CallStatus::Answered => {
                        debug!(call = plan.local_id, "trying");
                        status = CallStatus::Trying;
                    }
                    180 if status != CallStatus::Answered => {
                        debug!(call = plan.local_id, "ringing");
                        status = CallStatus::Ringing;
                    }
                    200..=299 => {
                        if status != CallStatus::Answered {
                            info!(call = plan.local_id, "answered");
                            status = CallStatus::Answered;
                            remote_tag = response.to_tag;
                            if ctx.rtp_enabled {
                                rtp_task = Some(start_rtp(&ctx, &port, plan.hold, rtp_token.clone()));
                            }
                        }
                    }
                    code @ 300..=699 => {
                        info!(call = plan.local_id, "rejected by peer with {}", code);
                        status = CallStatus::Failed;
                        break;
                    }
                    other => debug!(call = plan.local_id, "ignoring status {}", other),
                }
            }
        }
    }

    let answered = status == CallStatus::Answered;
    let outcome = if status == CallStatus::Failed {
        CallStatus::Failed
    } else {
        // BYE goes out after the hold even when no 2xx ever arrived; the
        // call only counts as answered if one did.
        let bye = build_bye(
            &plan.pair.ani,
            &plan.pair.dnis,
            &ctx.local_ip,
            ctx.local_port,
            &ctx.peer_host,
            ctx.peer_port,
            &ids,
            remote_tag.as_deref(),
        );
        match ctx.transport.send(&bye).await {
            Ok(()) if answered => CallStatus::Completed,
            Ok(()) => CallStatus::Failed,
            Err(e) => {
                warn!(call = plan.local_id, "bye send failed: {}", e);
                CallStatus::Failed
            }
        }
    };

    rtp_token.cancel();
    if let Some(task) = rtp_task {
        task.await.ok();
    }
    ctx.transport.deregister(&ids.call_id);

    if outcome == CallStatus::Completed {
        ctx.stats.call_answered(started.elapsed());
        debug!(call = plan.local_id, "completed after {:?}", started.elapsed());
    } else {
        ctx.stats.call_failed();
        debug!(
            call = plan.local_id,
            "failed (last status {:?})", last_status_code
        );
    }
}

/// The answer SDP is never parsed; silence goes to the peer host at the same
/// port number as the local offer.
fn start_rtp(
    ctx: &DialogContext,
    port: &RtpPortGuard,
    hold: Duration,
    token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let local_ip = ctx.local_ip;
    let local_port = port.port();
    let remote: SocketAddr = SocketAddr::new(
        ctx.peer_host
            .parse()
            .unwrap_or_else(|_| ctx.transport.peer_addr.ip()),
        local_port,
    );
    tokio::spawn(async move {
        if let Err(e) = rtp::send_silence(local_ip, local_port, remote, hold, token).await {
            debug!("rtp stream ended with error: {}", e);
        }
    })
}
