#![forbid(unsafe_code)]

//! Host and join sequencing.
//!
//! `host`: resolve mode → (map the port on the gateway) → pick the shareable
//! address → build the server config → launch. `join`: resolve the host →
//! build the client config → launch. Gateway failures never abort hosting;
//! they are recorded in [`UpnpOutcome`] and the session falls back to manual
//! forwarding.

use std::{fmt, net::Ipv4Addr};

use ipxlink_core::{Endpoint, IpxConfig, IpxError, IpxResult, LaunchSequence, RoleConfig, DEFAULT_PORT};
use ipxlink_transport::{
    discover, is_non_public, is_shareable, local_ipv4, resolve_host, DiscoveryCode, PortMapper, PortMapping, Protocol,
    SearchOptions,
};
use tracing::{info, instrument, warn};

use crate::launcher::{GameRef, Launcher};

/// Caller's choices for a hosting session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostRequest {
    pub port: u16,
    /// Make the session reachable from the Internet.
    pub internet: bool,
    /// Shareable address to use instead of the gateway's report.
    pub public_ip: Option<Ipv4Addr>,
    /// Do not touch the gateway; the user forwards the port manually.
    pub skip_upnp: bool,
}

impl HostRequest {
    #[must_use]
    pub fn lan(port: u16) -> Self {
        Self {
            port,
            internet: false,
            public_ip: None,
            skip_upnp: false,
        }
    }

    #[must_use]
    pub fn internet(port: u16) -> Self {
        Self {
            internet: true,
            ..Self::lan(port)
        }
    }
}

/// What happened on the gateway while hosting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpnpOutcome {
    /// LAN session.
    NotRequested,
    Skipped,
    Mapped {
        gateway: String,
        external_ip: Option<Ipv4Addr>,
        verified: bool,
    },
    Failed {
        reason: String,
        /// WAN address the gateway reported before failing, if any.
        external_ip: Option<Ipv4Addr>,
    },
}

impl UpnpOutcome {
    /// The gateway's WAN address, if it reported one that is reachable from
    /// the Internet.
    #[must_use]
    pub fn public_address(&self) -> Option<Ipv4Addr> {
        self.reported_address().filter(|ip| is_shareable(*ip))
    }

    /// The gateway sits behind another NAT (CGNAT or a second router).
    #[must_use]
    pub fn behind_nat(&self) -> bool {
        self.reported_address().map_or(false, is_non_public)
    }

    /// WAN address as reported by the gateway, usable or not.
    #[must_use]
    pub fn reported_address(&self) -> Option<Ipv4Addr> {
        match self {
            Self::Mapped { external_ip, .. } | Self::Failed { external_ip, .. } => *external_ip,
            Self::NotRequested | Self::Skipped => None,
        }
    }
}

/// Human-readable result of `host`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostStatus {
    pub lan_address: Option<Ipv4Addr>,
    pub port: u16,
    /// Address peers on the Internet connect to.
    pub public_address: Option<Ipv4Addr>,
    pub code: Option<DiscoveryCode>,
    pub upnp: UpnpOutcome,
}

impl HostStatus {
    /// Commands a peer runs to join this session.
    #[must_use]
    pub fn join_hints(&self) -> Vec<String> {
        let port_flag = if self.port == DEFAULT_PORT {
            String::new()
        } else {
            format!(" --port {}", self.port)
        };
        let mut hints = Vec::new();
        if let Some(lan) = self.lan_address {
            hints.push(format!("ipxlink join{port_flag} <DIR> {lan} <COMMAND>"));
        }
        if let Some(code) = &self.code {
            hints.push(format!("ipxlink join <DIR> {code} <COMMAND>"));
        }
        hints
    }
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.lan_address {
            Some(ip) => writeln!(f, "Hosting on {ip}, UDP port {}", self.port)?,
            None => writeln!(f, "Hosting on UDP port {} (LAN address unknown)", self.port)?,
        }
        if let (Some(code), Some(ip)) = (&self.code, self.public_address) {
            writeln!(f, "Discovery code: {code} (public address {ip})")?;
        }
        match &self.upnp {
            UpnpOutcome::NotRequested => {}
            UpnpOutcome::Skipped => {
                writeln!(f, "UPnP skipped: forward UDP port {} to this machine", self.port)?;
            }
            UpnpOutcome::Mapped { gateway, verified, .. } => {
                let check = if *verified { "verified" } else { "could not verify" };
                writeln!(f, "UPnP: UDP port {} mapped on {gateway} ({check})", self.port)?;
            }
            UpnpOutcome::Failed { reason, .. } => {
                writeln!(f, "UPnP failed: {reason}")?;
                writeln!(f, "Forward UDP port {} to this machine manually", self.port)?;
            }
        }
        if self.upnp.behind_nat() {
            writeln!(
                f,
                "The router's WAN address is private or carrier-grade NAT; peers on the Internet cannot reach it"
            )?;
        } else if let Some(ip) = self.upnp.reported_address().filter(|ip| !is_shareable(*ip)) {
            writeln!(f, "The router reported WAN address {ip}, which is not routable (is its Internet link down?)")?;
        }
        for hint in self.join_hints() {
            writeln!(f, "  {hint}")?;
        }
        Ok(())
    }
}

/// A running hosting session. Owns the port mapping, if one was created.
#[derive(Debug)]
pub struct HostSession {
    status: HostStatus,
    sequence: LaunchSequence,
    mapper: Option<PortMapper>,
}

impl HostSession {
    #[must_use]
    pub fn status(&self) -> &HostStatus {
        &self.status
    }

    /// What was handed to the launcher.
    #[must_use]
    pub fn sequence(&self) -> &LaunchSequence {
        &self.sequence
    }

    #[must_use]
    pub fn active_mappings(&self) -> &[PortMapping] {
        match &self.mapper {
            Some(mapper) => mapper.active_mappings(),
            None => &[],
        }
    }

    #[must_use]
    pub fn holds_mapping(&self) -> bool {
        !self.active_mappings().is_empty()
    }

    /// End the session and release the gateway mapping.
    pub async fn close(self) {
        if let Some(mut mapper) = self.mapper {
            mapper.cleanup().await;
        }
    }
}

/// Outcome of `join`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinStatus {
    pub remote: Endpoint,
    pub from_code: bool,
    pub sequence: LaunchSequence,
}

impl fmt::Display for JoinStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Connecting to {}", self.remote)?;
        if self.from_code {
            write!(f, " (from discovery code)")?;
        }
        Ok(())
    }
}

pub struct SessionOrchestrator<L> {
    launcher: L,
    search: SearchOptions,
    lease_duration: u32,
    description: String,
    local_address: Option<Ipv4Addr>,
}

impl<L: Launcher> SessionOrchestrator<L> {
    pub fn new(config: &IpxConfig, launcher: L) -> Self {
        Self {
            launcher,
            search: SearchOptions::from(config),
            lease_duration: config.lease_duration_secs,
            description: config.mapping_description.clone(),
            local_address: None,
        }
    }

    /// Override gateway discovery parameters.
    #[must_use]
    pub fn with_search_options(mut self, search: SearchOptions) -> Self {
        self.search = search;
        self
    }

    /// Use a fixed LAN address instead of probing the routing table.
    #[must_use]
    pub fn with_local_address(mut self, address: Ipv4Addr) -> Self {
        self.local_address = Some(address);
        self
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    async fn local_address(&self) -> Option<Ipv4Addr> {
        match self.local_address {
            Some(ip) => Some(ip),
            None => local_ipv4().await,
        }
    }

    /// Start a hosting session and launch the game as tunnel server.
    #[instrument(skip(self, game), fields(port = request.port, internet = request.internet))]
    pub async fn host(&self, game: &GameRef, request: HostRequest) -> IpxResult<HostSession> {
        if request.port == 0 {
            return Err(IpxError::Usage("port must be between 1 and 65535".into()));
        }
        if !request.internet && (request.public_ip.is_some() || request.skip_upnp) {
            return Err(IpxError::Usage(
                "--public-ip and --skip-upnp only apply to Internet hosting (--internet)".into(),
            ));
        }
        let program = game.program_steps()?;

        let lan_address = self.local_address().await;
        match lan_address {
            Some(ip) => info!(%ip, "LAN address"),
            None => warn!("could not determine the LAN address"),
        }

        let (upnp, mut mapper) = if !request.internet {
            (UpnpOutcome::NotRequested, None)
        } else if request.skip_upnp {
            (UpnpOutcome::Skipped, None)
        } else {
            self.map_port(lan_address, request.port).await
        };

        let public_address = if request.internet {
            match request.public_ip.or_else(|| upnp.public_address()) {
                Some(ip) => Some(ip),
                None => {
                    if let Some(m) = mapper.as_mut() {
                        m.cleanup().await;
                    }
                    return Err(IpxError::MissingPublicAddress);
                }
            }
        } else {
            None
        };
        let code = public_address
            .map(|ip| Endpoint::new(ip, request.port).map(DiscoveryCode::encode))
            .transpose()?;
        if let Some(code) = &code {
            info!(%code, "discovery code");
        }

        let sequence = RoleConfig::server(request.port).then_run(program);
        if let Err(e) = self.launcher.launch(game, &sequence) {
            if let Some(m) = mapper.as_mut() {
                m.cleanup().await;
            }
            return Err(e);
        }

        Ok(HostSession {
            status: HostStatus {
                lan_address,
                port: request.port,
                public_address,
                code,
                upnp,
            },
            sequence,
            mapper,
        })
    }

    /// Discover the gateway and forward `port` to this machine. Every failure
    /// is downgraded to [`UpnpOutcome::Failed`].
    async fn map_port(&self, lan_address: Option<Ipv4Addr>, port: u16) -> (UpnpOutcome, Option<PortMapper>) {
        let failed = |e: IpxError, external_ip| {
            warn!("automatic port forwarding unavailable: {e}");
            UpnpOutcome::Failed {
                reason: e.to_string(),
                external_ip,
            }
        };

        let Some(local) = lan_address else {
            return (failed(IpxError::UpnpRequest("LAN address unknown".into()), None), None);
        };
        let mut mapper = match discover(&self.search)
            .await
            .and_then(|device| PortMapper::new(device, self.search.request_timeout))
        {
            Ok(mapper) => mapper,
            Err(e) => return (failed(e, None), None),
        };

        let external_ip = match mapper.external_ip().await {
            Ok(ip) => {
                if !is_shareable(ip) {
                    warn!(%ip, "gateway WAN address is not public");
                }
                Some(ip)
            }
            Err(e) => {
                warn!("gateway did not report its WAN address: {e}");
                None
            }
        };

        let mapping = PortMapping::udp(port, local, self.description.clone(), self.lease_duration);
        if let Err(e) = mapper.add_port_mapping(mapping).await {
            return (failed(e, external_ip), None);
        }
        let verified = mapper.verify_port_mapping(port, Protocol::Udp).await;
        if !verified {
            warn!(port, "gateway accepted the mapping but does not list it");
        }

        let device = mapper.device();
        let gateway = device
            .friendly_name
            .clone()
            .or_else(|| device.control_url.host_str().map(str::to_string))
            .unwrap_or_else(|| "gateway".into());
        (
            UpnpOutcome::Mapped {
                gateway,
                external_ip,
                verified,
            },
            Some(mapper),
        )
    }

    /// Resolve the host and launch the game as tunnel client.
    ///
    /// A discovery code carrying its own port overrides `port`.
    #[instrument(skip(self, game))]
    pub fn join(&self, game: &GameRef, host_or_code: &str, port: u16) -> IpxResult<JoinStatus> {
        if port == 0 {
            return Err(IpxError::Usage("port must be between 1 and 65535".into()));
        }
        let resolved = resolve_host(host_or_code, port)?;
        let remote = if resolved.from_code && resolved.endpoint.port() != DEFAULT_PORT {
            resolved.endpoint
        } else {
            resolved.endpoint.with_port(port)?
        };
        let program = game.program_steps()?;
        let sequence = RoleConfig::client(remote, remote.port()).then_run(program);
        self.launcher.launch(game, &sequence)?;
        info!(%remote, from_code = resolved.from_code, "joining");
        Ok(JoinStatus {
            remote,
            from_code: resolved.from_code,
            sequence,
        })
    }
}
