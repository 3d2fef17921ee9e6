//! SSDP `M-SEARCH` for Internet Gateway Devices.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::debug;

/// Standard SSDP multicast group and port.
pub const SSDP_MULTICAST: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(239, 255, 255, 250)), 1900);

/// Device types searched for, oldest first.
pub const SEARCH_TARGETS: [&str; 2] = [
    "urn:schemas-upnp-org:device:InternetGatewayDevice:1",
    "urn:schemas-upnp-org:device:InternetGatewayDevice:2",
];

/// Seconds a device may wait before answering.
const MX: u8 = 2;

/// Largest SSDP datagram we accept.
pub(crate) const MAX_RESPONSE: usize = 4096;

pub(crate) fn search_request(target: &str) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: 239.255.255.250:1900\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {MX}\r\n\
         ST: {target}\r\n\
         \r\n"
    )
}

/// Build the search socket: address reuse plus a small multicast TTL so the
/// request never leaves the local network.
pub(crate) fn bind_search_socket(bind: SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(bind), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_multicast_ttl_v4(2)?;
    socket.bind(&bind.into())?;
    let std_sock: std::net::UdpSocket = socket.into();
    std_sock.set_nonblocking(true)?;
    UdpSocket::from_std(std_sock)
}

/// Send one `M-SEARCH` per search target. Fails only if every send fails.
pub(crate) async fn send_search(socket: &UdpSocket, to: SocketAddr) -> std::io::Result<()> {
    let mut last_err = None;
    let mut sent = 0;
    for target in SEARCH_TARGETS {
        match socket.send_to(search_request(target).as_bytes(), to).await {
            Ok(_) => sent += 1,
            Err(e) => {
                debug!(%to, st = target, "M-SEARCH send failed: {e}");
                last_err = Some(e);
            }
        }
    }
    match (sent, last_err) {
        (0, Some(e)) => Err(e),
        _ => Ok(()),
    }
}

/// Value of header `name` (case-insensitive) in an HTTP-style message head.
pub(crate) fn header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines().find_map(|line| {
        let (k, v) = line.split_once(':')?;
        k.trim().eq_ignore_ascii_case(name).then(|| v.trim())
    })
}

/// Extract the `LOCATION` header from an SSDP response.
#[must_use]
pub fn parse_location(response: &str) -> Option<String> {
    header(response, "LOCATION")
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
