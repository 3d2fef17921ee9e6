//! Port mappings on a discovered gateway.
//!
//! [`PortMapper`] owns every mapping it creates. [`PortMapper::cleanup`] is the
//! normal release path; dropping a mapper that still holds mappings releases
//! them synchronously on a helper thread. Neither runs after a hard kill, in
//! which case the router expires the rule when its lease ends.

use std::{fmt, mem, net::Ipv4Addr, thread, time::Duration};

use reqwest::Client;
use tracing::{debug, info, instrument, warn};

use super::{
    gateway::http_client,
    soap::{self, SoapError, CONFLICT_IN_MAPPING_ENTRY, ONLY_PERMANENT_LEASES_SUPPORTED},
    xml, IgdDevice,
};
use ipxlink_core::{IpxError, IpxResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Udp,
    Tcp,
}

impl Protocol {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Udp => "UDP",
            Self::Tcp => "TCP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A forwarding rule requested from the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub external_port: u16,
    pub internal_port: u16,
    pub protocol: Protocol,
    pub internal_client: Ipv4Addr,
    pub description: String,
    /// Seconds; 0 requests a permanent rule.
    pub lease_duration: u32,
}

impl PortMapping {
    /// Same external and internal UDP port, as the IPX tunnel needs.
    pub fn udp(port: u16, internal_client: Ipv4Addr, description: impl Into<String>, lease_duration: u32) -> Self {
        Self {
            external_port: port,
            internal_port: port,
            protocol: Protocol::Udp,
            internal_client,
            description: description.into(),
            lease_duration,
        }
    }

    fn add_args(&self) -> Vec<(&'static str, String)> {
        vec![
            ("NewRemoteHost", String::new()),
            ("NewExternalPort", self.external_port.to_string()),
            ("NewProtocol", self.protocol.to_string()),
            ("NewInternalPort", self.internal_port.to_string()),
            ("NewInternalClient", self.internal_client.to_string()),
            ("NewEnabled", "1".to_string()),
            ("NewPortMappingDescription", self.description.clone()),
            ("NewLeaseDuration", self.lease_duration.to_string()),
        ]
    }
}

fn entry_args(external_port: u16, protocol: Protocol) -> [(&'static str, String); 3] {
    [
        ("NewRemoteHost", String::new()),
        ("NewExternalPort", external_port.to_string()),
        ("NewProtocol", protocol.to_string()),
    ]
}

async fn delete(http: &Client, device: &IgdDevice, external_port: u16, protocol: Protocol) -> Result<(), SoapError> {
    soap::call(http, device, "DeletePortMapping", &entry_args(external_port, protocol))
        .await
        .map(drop)
}

fn add_error(e: SoapError, port: u16) -> IpxError {
    match e.fault_code() {
        Some(CONFLICT_IN_MAPPING_ENTRY) => IpxError::Conflict { port },
        _ => e.into(),
    }
}

/// Control client bound to one gateway, tracking the mappings it created.
pub struct PortMapper {
    device: IgdDevice,
    http: Client,
    request_timeout: Duration,
    active: Vec<PortMapping>,
}

impl fmt::Debug for PortMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortMapper")
            .field("control_url", &self.device.control_url.as_str())
            .field("active", &self.active)
            .finish()
    }
}

impl PortMapper {
    pub fn new(device: IgdDevice, request_timeout: Duration) -> IpxResult<Self> {
        Ok(Self {
            device,
            http: http_client(request_timeout)?,
            request_timeout,
            active: Vec::new(),
        })
    }

    #[must_use]
    pub fn device(&self) -> &IgdDevice {
        &self.device
    }

    /// Mappings created by this mapper and not yet removed.
    #[must_use]
    pub fn active_mappings(&self) -> &[PortMapping] {
        &self.active
    }

    /// The router's WAN address as it reports it. May be private or CGNAT
    /// space when the router itself sits behind another NAT.
    #[instrument(skip(self), fields(control_url = %self.device.control_url))]
    pub async fn external_ip(&self) -> IpxResult<Ipv4Addr> {
        let body = soap::call(&self.http, &self.device, "GetExternalIPAddress", &[]).await?;
        let raw = xml::text(&body, "NewExternalIPAddress")
            .ok_or_else(|| IpxError::UpnpRequest("reply lacks NewExternalIPAddress".into()))?;
        raw.parse()
            .map_err(|_| IpxError::UpnpRequest(format!("gateway reported invalid external address '{raw}'")))
    }

    /// Request a forwarding rule and register it for cleanup.
    ///
    /// A gateway that only supports permanent leases gets one retry with
    /// lease 0.
    #[instrument(skip(self, mapping), fields(port = mapping.external_port, protocol = %mapping.protocol))]
    pub async fn add_port_mapping(&mut self, mut mapping: PortMapping) -> IpxResult<()> {
        let mut result = self.request_add(&mapping).await;
        if matches!(result, Err(ref e) if e.fault_code() == Some(ONLY_PERMANENT_LEASES_SUPPORTED))
            && mapping.lease_duration != 0
        {
            info!("gateway only grants permanent leases, retrying");
            mapping.lease_duration = 0;
            result = self.request_add(&mapping).await;
        }
        result.map_err(|e| add_error(e, mapping.external_port))?;

        info!(
            client = %mapping.internal_client,
            lease = mapping.lease_duration,
            "port mapping added"
        );
        self.active
            .retain(|m| (m.external_port, m.protocol) != (mapping.external_port, mapping.protocol));
        self.active.push(mapping);
        Ok(())
    }

    async fn request_add(&self, mapping: &PortMapping) -> Result<(), SoapError> {
        soap::call(&self.http, &self.device, "AddPortMapping", &mapping.add_args())
            .await
            .map(drop)
    }

    /// Delete a rule. Never fails: errors are logged and the entry is
    /// unregistered regardless.
    #[instrument(skip(self))]
    pub async fn remove_port_mapping(&mut self, external_port: u16, protocol: Protocol) {
        match delete(&self.http, &self.device, external_port, protocol).await {
            Ok(()) => info!("port mapping removed"),
            Err(e) => warn!("could not remove port mapping: {e}"),
        }
        self.active
            .retain(|m| (m.external_port, m.protocol) != (external_port, protocol));
    }

    /// Whether the gateway currently lists a rule for this port.
    pub async fn verify_port_mapping(&self, external_port: u16, protocol: Protocol) -> bool {
        let args = entry_args(external_port, protocol);
        match soap::call(&self.http, &self.device, "GetSpecificPortMappingEntry", &args).await {
            Ok(_) => true,
            Err(e) => {
                debug!(port = external_port, "mapping lookup failed: {e}");
                false
            }
        }
    }

    /// Remove every registered mapping.
    pub async fn cleanup(&mut self) {
        let pending: Vec<_> = self.active.iter().map(|m| (m.external_port, m.protocol)).collect();
        for (port, protocol) in pending {
            self.remove_port_mapping(port, protocol).await;
        }
    }
}

impl Drop for PortMapper {
    fn drop(&mut self) {
        if self.active.is_empty() {
            return;
        }
        let pending = mem::take(&mut self.active);
        let device = self.device.clone();
        let timeout = self.request_timeout;
        warn!(count = pending.len(), "releasing port mappings on drop");

        // The caller may be inside a runtime, so the blocking work gets a
        // thread and runtime of its own.
        let worker = thread::Builder::new()
            .name("ipxlink-upnp-release".into())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(rt) => rt,
                    Err(e) => {
                        warn!("no runtime for mapping release: {e}");
                        return;
                    }
                };
                rt.block_on(async {
                    let http = match http_client(timeout) {
                        Ok(http) => http,
                        Err(e) => {
                            warn!("{e}");
                            return;
                        }
                    };
                    for m in &pending {
                        match delete(&http, &device, m.external_port, m.protocol).await {
                            Ok(()) => info!(port = m.external_port, "port mapping removed"),
                            Err(e) => warn!(port = m.external_port, "could not remove port mapping: {e}"),
                        }
                    }
                });
            });
        match worker {
            Ok(handle) => {
                if handle.join().is_err() {
                    warn!("mapping release thread panicked");
                }
            }
            Err(e) => warn!("cannot spawn mapping release thread: {e}"),
        }
    }
}
