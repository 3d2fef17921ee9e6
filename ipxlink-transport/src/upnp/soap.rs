//! SOAP control requests against a WAN connection service.

use reqwest::{header, Client, StatusCode};
use thiserror::Error;
use tracing::{debug, trace};

use super::{description::IgdDevice, xml};
use ipxlink_core::IpxError;

/// UPnP error code: the mapping conflicts with one held by another client.
pub const CONFLICT_IN_MAPPING_ENTRY: u16 = 718;
/// UPnP error code: the gateway only supports permanent leases.
pub const ONLY_PERMANENT_LEASES_SUPPORTED: u16 = 725;

#[derive(Debug, Error)]
pub enum SoapError {
    #[error("HTTP transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("UPnP fault {code}: {description}")]
    Fault { code: u16, description: String },
    #[error("HTTP status {0}")]
    Status(StatusCode),
}

impl SoapError {
    pub(crate) fn fault_code(&self) -> Option<u16> {
        match self {
            Self::Fault { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<SoapError> for IpxError {
    fn from(e: SoapError) -> Self {
        IpxError::UpnpRequest(e.to_string())
    }
}

pub(crate) fn envelope(service_type: &str, action: &str, args: &[(&str, String)]) -> String {
    let mut body = String::with_capacity(256);
    for (name, value) in args {
        body.push_str(&format!("<{name}>{}</{name}>", xml::escape(value)));
    }
    format!(
        "<?xml version=\"1.0\"?>\r\n\
         <s:Envelope xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\" \
         s:encodingStyle=\"http://schemas.xmlsoap.org/soap/encoding/\">\
         <s:Body><u:{action} xmlns:u=\"{service_type}\">{body}</u:{action}></s:Body>\
         </s:Envelope>\r\n"
    )
}

/// Extract a UPnP fault from an error response body.
pub(crate) fn parse_fault(body: &str) -> Option<SoapError> {
    let code = xml::text(body, "errorCode")?.parse().ok()?;
    let description = xml::text(body, "errorDescription").unwrap_or_default();
    Some(SoapError::Fault { code, description })
}

/// Invoke `action` and return the raw response body.
pub(crate) async fn call(
    http: &Client,
    device: &IgdDevice,
    action: &str,
    args: &[(&str, String)],
) -> Result<String, SoapError> {
    let payload = envelope(&device.service_type, action, args);
    trace!(action, %payload, "SOAP request");
    let resp = http
        .post(device.control_url.clone())
        .header(header::CONTENT_TYPE, "text/xml; charset=\"utf-8\"")
        .header("SOAPAction", format!("\"{}#{action}\"", device.service_type))
        .body(payload)
        .send()
        .await?;
    let status = resp.status();
    let body = resp.text().await?;
    if status.is_success() {
        return Ok(body);
    }
    debug!(action, %status, "SOAP call rejected");
    Err(parse_fault(&body).unwrap_or(SoapError::Status(status)))
}
