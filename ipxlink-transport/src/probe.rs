#![forbid(unsafe_code)]

//! Local address helpers.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tokio::net::UdpSocket;
use tracing::debug;

/// Unroutable target used only to make the kernel pick an outbound interface.
const ROUTE_PROBE: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 255, 255, 255)), 1);

/// Best-effort LAN IPv4 of this machine.
///
/// "Connecting" a UDP socket sends nothing; it only performs the route lookup,
/// after which the socket's local address is the outbound interface address.
pub async fn local_ipv4() -> Option<Ipv4Addr> {
    let sock = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await.ok()?;
    if let Err(e) = sock.connect(ROUTE_PROBE).await {
        debug!("route lookup failed: {e}");
        return None;
    }
    match sock.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

/// True for RFC 1918 private space and the RFC 6598 carrier-grade NAT block.
///
/// A router reporting such a WAN address sits behind another NAT, so a port
/// mapping on it cannot make this machine reachable from the Internet.
#[must_use]
pub fn is_non_public(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_private() || (a == 100 && (64..=127).contains(&b))
}

/// True if peers on the Internet can be pointed at `ip`.
///
/// Besides private and CGNAT space this rejects what a gateway reports while
/// its WAN link is down (`0.0.0.0`), host-local and link-local addresses,
/// multicast, and the reserved `240.0.0.0/4` block including broadcast.
#[must_use]
pub fn is_shareable(ip: Ipv4Addr) -> bool {
    let first = ip.octets()[0];
    !(is_non_public(ip)
        || first == 0
        || first >= 240
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_multicast())
}
