#![forbid(unsafe_code)]

//! UPnP Internet Gateway Device client.
//!
//! Discovery is SSDP over UDP multicast; the device description and the
//! `WANIPConnection`/`WANPPPConnection` control calls are plain HTTP with SOAP
//! envelopes. Only the four actions needed for port forwarding are spoken:
//! `AddPortMapping`, `DeletePortMapping`, `GetExternalIPAddress` and
//! `GetSpecificPortMappingEntry`.

pub mod description;
pub mod gateway;
pub mod mapper;
mod soap;
pub mod ssdp;
mod xml;

#[cfg(any(test, feature = "mock-igd"))]
pub mod mock;

pub use description::{IgdDevice, SERVICE_TYPES};
pub use gateway::{discover, SearchOptions};
pub use mapper::{PortMapper, PortMapping, Protocol};
pub use soap::{CONFLICT_IN_MAPPING_ENTRY, ONLY_PERMANENT_LEASES_SUPPORTED};
