use super::message::{parse_response, SipResponse};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One connected UDP socket shared by every dialog. Sends go straight out
/// (datagrams do not interleave); incoming responses are demultiplexed by
/// Call-ID to the owning dialog's mailbox.
pub struct SipTransport {
    socket: UdpSocket,
    pub local_addr: SocketAddr,
    pub peer_addr: SocketAddr,
    index: Mutex<HashMap<String, mpsc::UnboundedSender<SipResponse>>>,
}

impl SipTransport {
    pub async fn connect(local_ip: IpAddr, local_port: u16, peer: SocketAddr) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(SocketAddr::new(local_ip, local_port))
            .await
            .map_err(|e| anyhow!("failed to bind SIP socket on {}:{}: {}", local_ip, local_port, e))?;
        socket
            .connect(peer)
            .await
            .map_err(|e| anyhow!("failed to connect to peer {}: {}", peer, e))?;
        let local_addr = socket.local_addr()?;
        info!("sip transport {} -> {}", local_addr, peer);
        Ok(Arc::new(Self {
            socket,
            local_addr,
            peer_addr: peer,
            index: Mutex::new(HashMap::new()),
        }))
    }

    /// Register a dialog and get the mailbox its responses are delivered to.
    pub fn register(&self, call_id: &str) -> mpsc::UnboundedReceiver<SipResponse> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.index.lock().unwrap().insert(call_id.to_string(), tx);
        rx
    }

    pub fn deregister(&self, call_id: &str) {
        self.index.lock().unwrap().remove(call_id);
    }

    pub fn active_dialogs(&self) -> usize {
        self.index.lock().unwrap().len()
    }

    pub async fn send(&self, message: &str) -> Result<()> {
        self.socket.send(message.as_bytes()).await?;
        Ok(())
    }

    /// Read datagrams for the life of the engine; read errors are logged and
    /// retried after a short backoff.
    pub async fn recv_loop(&self, token: CancellationToken) {
        let mut buf = [0u8; 4096];
        loop {
            select! {
                _ = token.cancelled() => break,
                result = self.socket.recv(&mut buf) => match result {
                    Ok(n) => self.dispatch(&buf[..n]),
                    Err(e) => {
                        warn!("sip read error: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }
        debug!("sip receive loop stopped");
    }

    fn dispatch(&self, datagram: &[u8]) {
        let raw = String::from_utf8_lossy(datagram);
        let Some(response) = parse_response(&raw) else {
            debug!("dropping malformed datagram ({} bytes)", datagram.len());
            return;
        };
        let sender = self
            .index
            .lock()
            .unwrap()
            .get(&response.call_id)
            .cloned();
        match sender {
            Some(tx) => {
                // Receiver gone means the dialog already finished.
                tx.send(response).ok();
            }
            None => debug!("dropping response for unknown call-id {}", response.call_id),
        }
    }
}
