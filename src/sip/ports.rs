use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// Bounded pool of even RTP ports. `acquire` waits when the pool is empty;
/// the returned guard gives the port back exactly once on drop, whichever
/// way the owning dialog exits.
pub struct RtpPortPool {
    ports: Mutex<Vec<u16>>,
    available: Semaphore,
    capacity: usize,
}

pub struct RtpPortGuard {
    port: u16,
    pool: Arc<RtpPortPool>,
}

impl RtpPortPool {
    /// Even ports in `[start, end)`.
    pub fn new(start: u16, end: u16) -> Result<Arc<Self>> {
        let ports: Vec<u16> = (start..end).filter(|p| p % 2 == 0).collect();
        if ports.is_empty() {
            return Err(anyhow!("RTP port range {}..{} is empty", start, end));
        }
        let capacity = ports.len();
        Ok(Arc::new(Self {
            available: Semaphore::new(capacity),
            ports: Mutex::new(ports),
            capacity,
        }))
    }

    pub async fn acquire(self: &Arc<Self>) -> Result<RtpPortGuard> {
        let permit = self.available.acquire().await?;
        // The permit guarantees a port is present; forget it, the guard's
        // drop re-adds it together with the port.
        permit.forget();
        let port = self
            .ports
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| anyhow!("RTP port pool out of sync"))?;
        Ok(RtpPortGuard {
            port,
            pool: self.clone(),
        })
    }

    pub fn available(&self) -> usize {
        self.available.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn release(&self, port: u16) {
        self.ports.lock().unwrap().push(port);
        self.available.add_permits(1);
    }
}

impl RtpPortGuard {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for RtpPortGuard {
    fn drop(&mut self) {
        self.pool.release(self.port);
    }
}
