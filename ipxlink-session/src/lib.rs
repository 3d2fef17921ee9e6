#![forbid(unsafe_code)]

//! ipxlink session layer: sequences discovery, router mapping and role
//! configuration for `host` and `join`, then hands off to an emulator launcher.

pub mod launcher;
pub mod orchestrator;

pub use launcher::{DosboxLauncher, GameRef, Launcher, Platform};
pub use orchestrator::{HostRequest, HostSession, HostStatus, JoinStatus, SessionOrchestrator, UpnpOutcome};
