#![forbid(unsafe_code)]

//! ipxlink configuration handling. Parses an optional TOML file into a strongly-typed structure.
//! Every key has a default so an absent or partial file is always valid.

use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use directories::ProjectDirs;
use tracing::debug;

use crate::{IpxError, DEFAULT_PORT};

/// Name of the configuration file inside the platform config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Primary configuration structure shared across ipxlink components.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IpxConfig {
    /// Logging verbosity (`error`, `warn`, `info`, `debug`, `trace`).
    pub log_level: Option<String>,

    /// UDP port for the IPX tunnel when none is given on the command line.
    pub port: u16,

    /// SSDP listen window.
    pub discovery_timeout_ms: u64,

    /// Timeout applied to every HTTP request sent to the gateway.
    pub request_timeout_ms: u64,

    /// Lease requested for router mappings. 0 asks for a permanent lease.
    pub lease_duration_secs: u32,

    /// Description attached to router mappings.
    pub mapping_description: String,

    /// Explicit emulator binary. Searched on `PATH` when absent.
    pub dosbox_path: Option<PathBuf>,

    /// DOSBox config fragment enabling IPX. Defaults to `<config dir>/ipx.conf`.
    pub ipx_conf_path: Option<PathBuf>,
}

impl Default for IpxConfig {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            port: DEFAULT_PORT,
            discovery_timeout_ms: 3_000,
            request_timeout_ms: 5_000,
            lease_duration_secs: 3_600,
            mapping_description: "ipxlink".to_string(),
            dosbox_path: None,
            ipx_conf_path: None,
        }
    }
}

impl IpxConfig {
    /// Load a configuration file from the given path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::IpxResult<Self> {
        let data = fs::read_to_string(&path).map_err(IpxError::from)?;
        let cfg = toml::from_str::<IpxConfig>(&data).map_err(IpxError::ConfigParse)?;
        Ok(cfg)
    }

    /// Load `explicit` if given, else the per-user file when it exists, else defaults.
    ///
    /// An explicitly named file must exist; the per-user file is optional.
    pub fn load(explicit: Option<&Path>) -> crate::IpxResult<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match config_dir().map(|dir| dir.join(CONFIG_FILE_NAME)) {
            Some(path) if path.is_file() => {
                debug!(path = %path.display(), "loading user configuration");
                Self::from_file(path)
            }
            _ => Ok(Self::default()),
        }
    }

    #[must_use]
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Resolved location of the IPX config fragment.
    #[must_use]
    pub fn ipx_conf_path(&self) -> PathBuf {
        self.ipx_conf_path.clone().unwrap_or_else(|| {
            config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("ipx.conf")
        })
    }
}

/// Platform configuration directory (`~/.config/ipxlink` on Linux).
#[must_use]
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "ipxlink").map(|dirs| dirs.config_dir().to_path_buf())
}
