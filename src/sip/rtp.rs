use anyhow::Result;
use bytes::{BufMut, BytesMut};
use rand::Rng;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const PAYLOAD_LEN: usize = 160;
const SAMPLES_PER_PACKET: u32 = 160;
const PACKET_INTERVAL: Duration = Duration::from_millis(20);

/// Sequence/timestamp/SSRC state for one outgoing stream.
pub struct RtpStream {
    seq: u16,
    timestamp: u32,
    ssrc: u32,
}

impl RtpStream {
    pub fn new() -> Self {
        let mut rng = rand::rng();
        Self {
            seq: rng.random(),
            timestamp: rng.random(),
            ssrc: rng.random(),
        }
    }

    /// Next 172-byte silence packet: 12-byte header, PCMU payload of 0xFF.
    pub fn next_packet(&mut self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(12 + PAYLOAD_LEN);
        buf.put_u8(0x80); // version 2, no padding/extension/CSRC
        buf.put_u8(0); // marker 0, payload type 0 (PCMU)
        buf.put_u16(self.seq);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        buf.put_bytes(0xFF, PAYLOAD_LEN);
        self.seq = self.seq.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(SAMPLES_PER_PACKET);
        buf
    }
}

impl Default for RtpStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Emit a silence stream from `local_ip:local_port` to `remote` every 20 ms
/// until the hold time elapses or the token is cancelled.
pub async fn send_silence(
    local_ip: IpAddr,
    local_port: u16,
    remote: SocketAddr,
    duration: Duration,
    token: CancellationToken,
) -> Result<()> {
    let socket = UdpSocket::bind(SocketAddr::new(local_ip, local_port)).await?;
    socket.connect(remote).await?;

    let mut stream = RtpStream::new();
    let mut interval = tokio::time::interval(PACKET_INTERVAL);
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);

    loop {
        select! {
            _ = token.cancelled() => break,
            _ = &mut deadline => break,
            _ = interval.tick() => {
                let packet = stream.next_packet();
                if let Err(e) = socket.send(&packet).await {
                    debug!("rtp send error: {}", e);
                }
            }
        }
    }
    Ok(())
}
