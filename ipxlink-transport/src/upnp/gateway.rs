//! Gateway discovery: SSDP search followed by description fetches.

use std::{
    collections::HashSet,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use reqwest::Client;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

use super::{description, ssdp, IgdDevice};
use ipxlink_core::{IpxConfig, IpxError, IpxResult};

pub(crate) const USER_AGENT: &str = concat!("ipxlink/", env!("CARGO_PKG_VERSION"), " UPnP/1.0");

/// Where and how long to search for a gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    /// Destination of the `M-SEARCH` datagrams.
    pub target: SocketAddr,
    /// Local address of the search socket.
    pub bind: SocketAddr,
    /// Listen window for responses.
    pub timeout: Duration,
    /// Per-request HTTP timeout for descriptions and control calls.
    pub request_timeout: Duration,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            target: ssdp::SSDP_MULTICAST,
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&IpxConfig> for SearchOptions {
    fn from(cfg: &IpxConfig) -> Self {
        Self {
            timeout: cfg.discovery_timeout(),
            request_timeout: cfg.request_timeout(),
            ..Self::default()
        }
    }
}

pub(crate) fn http_client(timeout: Duration) -> IpxResult<Client> {
    Client::builder()
        .no_proxy()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| IpxError::UpnpRequest(format!("HTTP client: {e}")))
}

/// Locate the first gateway exposing a WAN connection service.
///
/// The listen window bounds the whole search, description fetches included.
/// Fails with [`IpxError::NoGatewayFound`] when nothing usable answers inside
/// it. Socket setup failures are reported the same way, since
/// a machine that cannot multicast has no reachable gateway either.
#[instrument(name = "igd_discover", skip(opts), fields(target = %opts.target))]
pub async fn discover(opts: &SearchOptions) -> IpxResult<IgdDevice> {
    let http = http_client(opts.request_timeout)?;
    let socket = ssdp::bind_search_socket(opts.bind).map_err(|e| {
        warn!("cannot open SSDP socket: {e}");
        IpxError::NoGatewayFound
    })?;
    ssdp::send_search(&socket, opts.target).await.map_err(|e| {
        warn!("cannot send M-SEARCH: {e}");
        IpxError::NoGatewayFound
    })?;

    let deadline = Instant::now() + opts.timeout;
    let mut seen = HashSet::new();
    let mut buf = [0u8; ssdp::MAX_RESPONSE];
    loop {
        // `timeout_at` polls first, so buffered datagrams would outlive the window.
        if Instant::now() >= deadline {
            break;
        }
        let (len, from) = match timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Err(_) => break,
            Ok(Err(e)) => {
                debug!("SSDP receive failed: {e}");
                continue;
            }
            Ok(Ok(received)) => received,
        };
        let response = String::from_utf8_lossy(&buf[..len]);
        let Some(location) = ssdp::parse_location(&response) else {
            continue;
        };
        if !seen.insert(location.clone()) {
            continue;
        }
        debug!(%from, %location, "SSDP response");
        let fetched = match timeout_at(deadline, description::fetch(&http, &location)).await {
            Ok(fetched) => fetched,
            Err(_) => {
                debug!(%location, "description not received before the deadline");
                break;
            }
        };
        match fetched {
            Ok(Some(device)) => {
                info!(
                    control_url = %device.control_url,
                    service = %device.service_type,
                    name = device.friendly_name.as_deref().unwrap_or("-"),
                    "gateway found"
                );
                return Ok(device);
            }
            Ok(None) => {}
            Err(e) => debug!(%location, "skipping device: {e}"),
        }
    }
    debug!(responders = seen.len(), "no usable gateway");
    Err(IpxError::NoGatewayFound)
}
