//! Server-to-server link configuration.

use serde::Deserialize;
use std::net::IpAddr;
use subtle::ConstantTimeEq;

/// Link block configuration for server-to-server connections.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkBlock {
    /// Remote server name (e.g., "hub.example.net").
    pub name: String,
    /// Remote server IP/hostname to connect to.
    pub hostname: String,
    /// Remote server port.
    pub port: u16,
    /// Source address inbound connections for this link must come from.
    /// Defaults to `hostname` when that is an IP literal.
    #[serde(default)]
    pub address: Option<IpAddr>,
    /// Secret we present in our INTRODUCE.
    pub send_password: String,
    /// Secret the remote must present in its INTRODUCE.
    pub receive_password: String,
    /// Whether to initiate connection to this server at startup.
    #[serde(default)]
    pub autoconnect: bool,
}

impl LinkBlock {
    /// Whether this block is for `name` (server names are case-insensitive).
    pub fn is_for(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// The address inbound connections must come from, if one can be determined.
    pub fn expected_address(&self) -> Option<IpAddr> {
        self.address.or_else(|| self.hostname.parse().ok())
    }

    /// Whether a connection from `peer` may claim this link.
    ///
    /// Links whose hostname is a DNS name need an explicit `address`.
    pub fn matches_address(&self, peer: IpAddr) -> bool {
        match self.expected_address() {
            Some(expected) => normalize(expected) == normalize(peer),
            None => false,
        }
    }

    /// Constant-time check of a received secret against `receive_password`.
    pub fn accepts_secret(&self, secret: &str) -> bool {
        bool::from(self.receive_password.as_bytes().ct_eq(secret.as_bytes()))
    }
}

/// Treat IPv4-mapped IPv6 addresses as their IPv4 form.
fn normalize(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(addr),
        v4 => v4,
    }
}
