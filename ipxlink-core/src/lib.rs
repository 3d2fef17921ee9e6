#![forbid(unsafe_code)]

pub mod config;
pub mod endpoint;
pub mod error;
pub mod role;

pub use config::IpxConfig;
pub use endpoint::{Endpoint, DEFAULT_PORT};
pub use error::{IpxError, IpxResult};
pub use role::{Directive, LaunchSequence, Role, RoleConfig};
