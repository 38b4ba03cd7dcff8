use anyhow::Result;
use callgen::config::{CallParams, Config};
use callgen::engine::numbers::NumberPool;
use callgen::engine::Engine;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn header_value(message: &str, name: &str) -> Option<String> {
    message
        .lines()
        .find_map(|l| l.strip_prefix(name))
        .map(|v| v.trim().to_string())
}

/// A UDP peer that answers every INVITE with 100 + 200 (To-tag `t1`) and
/// records everything it sees.
async fn spawn_peer() -> Result<(SocketAddr, Arc<Mutex<Vec<String>>>, Arc<Mutex<Vec<String>>>)> {
    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    let addr = socket.local_addr()?;
    let invites = Arc::new(Mutex::new(Vec::new()));
    let byes = Arc::new(Mutex::new(Vec::new()));

    let invites_task = invites.clone();
    let byes_task = byes.clone();
    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        while let Ok((n, from)) = socket.recv_from(&mut buf).await {
            let message = String::from_utf8_lossy(&buf[..n]).to_string();
            if message.starts_with("INVITE ") {
                let call_id = header_value(&message, "Call-ID:").unwrap_or_default();
                for status in ["100 Trying", "200 OK"] {
                    let reply = format!(
                        "SIP/2.0 {}\r\nTo: <sip:x@127.0.0.1>;tag=t1\r\nCall-ID: {}\r\nCSeq: 1 INVITE\r\nContent-Length: 0\r\n\r\n",
                        status, call_id
                    );
                    socket.send_to(reply.as_bytes(), from).await.ok();
                }
                invites_task.lock().unwrap().push(message);
            } else if message.starts_with("BYE ") {
                byes_task.lock().unwrap().push(message);
            }
        }
    });
    Ok((addr, invites, byes))
}

fn config_for(peer: SocketAddr, call_params: CallParams) -> Arc<Config> {
    let mut config = Config::default();
    config.peer.host = peer.ip().to_string();
    config.peer.port = peer.port();
    config.sip_port = 0;
    config.call_params = call_params;
    Arc::new(config)
}

#[tokio::test]
async fn answered_traffic_flows_invite_to_bye() -> Result<()> {
    let (peer, invites, byes) = spawn_peer().await?;
    let config = config_for(
        peer,
        CallParams {
            acd_min_s: 1,
            acd_max_s: 1,
            asr_pct: 100.0,
            min_concurrent: 0,
            max_concurrent: 50,
            target_cps: 5.0,
            ramp_up_s: 0,
            ramp_down_s: 0,
            rtp_enabled: false,
        },
    );

    let numbers = NumberPool::new();
    numbers.replace(NumberPool::test_pairs());
    let engine = Engine::new(config, LOCALHOST, numbers);

    engine.start().await?;
    // idempotent while running
    engine.start().await?;
    tokio::time::sleep(Duration::from_secs(3)).await;
    engine.stop().await;

    let s = engine.snapshot();
    assert!(s.answered >= 1, "no call completed: {:?}", s);
    assert_eq!(s.active_now, 0, "stop drains every dialog");
    assert_eq!(s.total_attempts, s.answered + s.failed);

    // every BYE belongs to a dialog the peer saw the INVITE for, and
    // carries the tag the peer handed out in its 200
    let invites = invites.lock().unwrap();
    let byes = byes.lock().unwrap();
    assert!(!byes.is_empty());
    for bye in byes.iter() {
        let call_id = header_value(bye, "Call-ID:").expect("bye call-id");
        assert!(
            invites
                .iter()
                .any(|i| header_value(i, "Call-ID:").as_deref() == Some(call_id.as_str())),
            "bye without a matching invite"
        );
        let to = header_value(bye, "To:").expect("bye to header");
        assert!(to.ends_with("tag=t1"));
    }
    Ok(())
}

#[tokio::test]
async fn concurrency_ceiling_is_respected() -> Result<()> {
    let (peer, _invites, _byes) = spawn_peer().await?;
    let config = config_for(
        peer,
        CallParams {
            acd_min_s: 60,
            acd_max_s: 60,
            asr_pct: 100.0,
            min_concurrent: 0,
            max_concurrent: 3,
            target_cps: 100.0,
            ramp_up_s: 0,
            ramp_down_s: 0,
            rtp_enabled: false,
        },
    );

    let numbers = NumberPool::new();
    numbers.replace(NumberPool::test_pairs());
    let engine = Engine::new(config, LOCALHOST, numbers);
    engine.start().await?;

    let mut peak = 0;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        peak = peak.max(engine.snapshot().active_now);
    }
    engine.stop().await;

    assert!(peak >= 1, "traffic was generated");
    assert!(peak <= 3, "active calls peaked at {}", peak);
    assert_eq!(engine.snapshot().active_now, 0);
    Ok(())
}

#[tokio::test]
async fn empty_number_pool_generates_no_attempts() -> Result<()> {
    let (peer, invites, _byes) = spawn_peer().await?;
    let config = config_for(
        peer,
        CallParams {
            target_cps: 10.0,
            ramp_up_s: 0,
            ..Default::default()
        },
    );

    let engine = Engine::new(config, LOCALHOST, NumberPool::new());
    engine.start().await?;
    tokio::time::sleep(Duration::from_millis(600)).await;
    engine.stop().await;

    assert_eq!(engine.snapshot().total_attempts, 0);
    assert!(invites.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn stop_before_start_is_harmless() -> Result<()> {
    let (peer, _invites, _byes) = spawn_peer().await?;
    let config = config_for(peer, CallParams::default());
    let engine = Engine::new(config, LOCALHOST, NumberPool::new());

    engine.stop().await;
    engine.start().await?;
    engine.stop().await;
    engine.stop().await;
    Ok(())
}
