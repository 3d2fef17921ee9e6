#![forbid(unsafe_code)]

//! ipxlink addressing and NAT traversal.
//!
//! * [`discovery_code`] turns a public endpoint into a short shareable code and back.
//! * [`probe`] finds the LAN address of this machine and classifies WAN addresses.
//! * [`upnp`] discovers the local Internet Gateway Device and manages port mappings on it.

pub mod discovery_code;
pub mod probe;
pub mod upnp;

pub use discovery_code::{decode, resolve_host, DiscoveryCode, ResolvedHost};
pub use probe::{is_non_public, is_shareable, local_ipv4};
pub use upnp::{discover, IgdDevice, PortMapper, PortMapping, Protocol, SearchOptions};
