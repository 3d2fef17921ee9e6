#![forbid(unsafe_code)]

//! Common error type for ipxlink crates.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IpxError {
    /// I/O related failures.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parsing failures.
    #[error("Config parse error: {0}")]
    ConfigParse(toml::de::Error),

    /// Address/port pair outside the representable range.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Malformed discovery code or unknown word.
    #[error("Invalid discovery code: {0}")]
    InvalidCode(String),

    /// Input is neither a dotted-quad address nor a discovery code.
    #[error("'{0}' is neither a valid IPv4 address nor a discovery code")]
    InvalidHost(String),

    /// No UPnP gateway answered within the search window.
    #[error("No UPnP gateway found on the local network")]
    NoGatewayFound,

    /// Transport failure or SOAP fault from the gateway.
    #[error("UPnP request failed: {0}")]
    UpnpRequest(String),

    /// Gateway already holds a conflicting mapping for this port.
    #[error("Port {port} is already mapped on the gateway")]
    Conflict { port: u16 },

    /// Internet hosting without a usable public address.
    #[error("Could not determine a public address; pass --public-ip or allow UPnP")]
    MissingPublicAddress,

    /// Invalid combination of caller options.
    #[error("{0}")]
    Usage(String),

    /// Emulator could not be located or spawned.
    #[error("Launch failed: {0}")]
    Launch(String),
}

impl IpxError {
    /// Whether this error stems from the router (discovery, RPC, conflict).
    ///
    /// Router errors never abort a hosting session; they downgrade it to
    /// manual forwarding.
    #[must_use]
    pub fn is_gateway_error(&self) -> bool {
        matches!(
            self,
            Self::NoGatewayFound | Self::UpnpRequest(_) | Self::Conflict { .. }
        )
    }
}

/// Convenient alias for results throughout ipxlink crates.
pub type IpxResult<T> = Result<T, IpxError>;
