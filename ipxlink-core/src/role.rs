#![forbid(unsafe_code)]

//! Network-role launch configuration.
//!
//! A [`RoleConfig`] is the ordered list of IPX tunnel directives a DOSBox
//! session must run before the game starts. The only way to add the game
//! itself is [`RoleConfig::then_run`], which yields a [`LaunchSequence`] whose
//! program steps always follow the network directives.

use std::{fmt, net::Ipv4Addr};

use crate::Endpoint;

/// Which side of the IPX tunnel this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client { remote: Endpoint },
}

/// One DOSBox shell command setting up the tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// `IPXNET STARTSERVER <port>`
    StartServer { port: u16 },
    /// `IPXNET CONNECT <address> <port>`
    Connect { address: Ipv4Addr, port: u16 },
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartServer { port } => write!(f, "IPXNET STARTSERVER {port}"),
            Self::Connect { address, port } => write!(f, "IPXNET CONNECT {address} {port}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleConfig {
    role: Role,
    local_port: u16,
    directives: Vec<Directive>,
}

impl RoleConfig {
    /// Listening side: start the tunnel server on `port`.
    #[must_use]
    pub fn server(port: u16) -> Self {
        Self {
            role: Role::Server,
            local_port: port,
            directives: vec![Directive::StartServer { port }],
        }
    }

    /// Connecting side: dial `remote`'s address on `port`.
    #[must_use]
    pub fn client(remote: Endpoint, port: u16) -> Self {
        Self {
            role: Role::Client { remote },
            local_port: port,
            directives: vec![Directive::Connect {
                address: remote.address(),
                port,
            }],
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    #[must_use]
    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    /// Append the game's own commands after the network directives.
    #[must_use]
    pub fn then_run<I, S>(self, program: I) -> LaunchSequence
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        LaunchSequence {
            role: self,
            program: program.into_iter().map(Into::into).collect(),
        }
    }
}

/// Network directives followed by program steps. Consumed once by a launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSequence {
    role: RoleConfig,
    program: Vec<String>,
}

impl LaunchSequence {
    #[must_use]
    pub fn role(&self) -> &RoleConfig {
        &self.role
    }

    #[must_use]
    pub fn program(&self) -> &[String] {
        &self.program
    }

    /// All shell commands in execution order.
    pub fn commands(&self) -> impl Iterator<Item = String> + '_ {
        self.role
            .directives
            .iter()
            .map(ToString::to_string)
            .chain(self.program.iter().cloned())
    }
}
