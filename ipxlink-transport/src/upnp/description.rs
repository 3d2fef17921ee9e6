//! IGD device description parsing.

use reqwest::{Client, Url};
use tracing::debug;

use super::xml;
use ipxlink_core::{IpxError, IpxResult};

/// WAN connection services, in order of preference.
pub const SERVICE_TYPES: [&str; 3] = [
    "urn:schemas-upnp-org:service:WANIPConnection:1",
    "urn:schemas-upnp-org:service:WANPPPConnection:1",
    "urn:schemas-upnp-org:service:WANIPConnection:2",
];

/// A router's WAN connection control endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgdDevice {
    pub control_url: Url,
    pub service_type: String,
    pub friendly_name: Option<String>,
    /// Description document the device was found through.
    pub location: Url,
}

/// Select the preferred WAN service from a description document.
///
/// Relative control URLs resolve against `URLBase` when present, otherwise
/// against the description's own location.
#[must_use]
pub fn parse_description(doc: &str, location: &Url) -> Option<IgdDevice> {
    let base = xml::text(doc, "URLBase")
        .filter(|b| !b.is_empty())
        .and_then(|b| {
            let b = if b.ends_with('/') { b } else { format!("{b}/") };
            Url::parse(&b).ok()
        })
        .unwrap_or_else(|| location.clone());

    let services: Vec<(String, String)> = xml::blocks(doc, "service")
        .into_iter()
        .filter_map(|svc| Some((xml::text(svc, "serviceType")?, xml::text(svc, "controlURL")?)))
        .collect();

    SERVICE_TYPES.iter().find_map(|wanted| {
        let (service_type, control) = services.iter().find(|(ty, _)| ty == wanted)?;
        let control_url = base.join(control).ok()?;
        Some(IgdDevice {
            control_url,
            service_type: service_type.clone(),
            friendly_name: xml::text(doc, "friendlyName").filter(|n| !n.is_empty()),
            location: location.clone(),
        })
    })
}

/// Fetch a description over HTTP. `Ok(None)` means the device is reachable
/// but exposes no WAN connection service.
pub(crate) async fn fetch(http: &Client, location: &str) -> IpxResult<Option<IgdDevice>> {
    let url = Url::parse(location)
        .map_err(|e| IpxError::UpnpRequest(format!("bad LOCATION '{location}': {e}")))?;
    let resp = http
        .get(url.clone())
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| IpxError::UpnpRequest(e.to_string()))?;
    let doc = resp.text().await.map_err(|e| IpxError::UpnpRequest(e.to_string()))?;
    let device = parse_description(&doc, &url);
    if device.is_none() {
        debug!(%url, "description lists no WAN connection service");
    }
    Ok(device)
}
