use get_if_addrs::get_if_addrs;
use std::net::{IpAddr, Ipv4Addr};
use tracing::warn;

/// First non-loopback IPv4 address, falling back to 127.0.0.1.
pub fn local_ip() -> IpAddr {
    match get_if_addrs() {
        Ok(ifaces) => ifaces
            .iter()
            .filter(|i| !i.is_loopback())
            .find_map(|i| match i.addr {
                get_if_addrs::IfAddr::V4(ref addr) => Some(IpAddr::V4(addr.ip)),
                _ => None,
            })
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        Err(e) => {
            warn!("failed to enumerate interfaces: {}", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}
