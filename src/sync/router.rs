//! Routing over the spanning tree.
//!
//! Each remote server is reached through exactly one adjacent link: walk its
//! `near_hop` chain until the parent is the local server. A message for a
//! named server is handed to that link, whose server repeats the lookup.

use crate::error::{LinkError, LinkResult};
use crate::sync::mesh::{Mesh, Relay, Target};
use meshirc_proto::LinkMessage;

impl Mesh {
    /// The attached link that leads toward `server`.
    pub fn next_hop(&self, server: &str) -> Option<&str> {
        let hop = self.directory.topology.next_hop(server)?;
        self.link(&hop.name).map(|entry| entry.name.as_str())
    }

    /// Relay `message` toward `server`.
    pub fn route(&self, server: &str, message: LinkMessage) -> LinkResult<Relay> {
        let link = self
            .next_hop(server)
            .ok_or_else(|| LinkError::NoSuchServer(server.to_string()))?;
        Ok(Relay {
            target: Target::Link(link.to_string()),
            message,
        })
    }

    /// Concrete link names for a relay target.
    pub fn resolve(&self, target: &Target) -> Vec<String> {
        match target {
            Target::All => self.link_names(),
            Target::AllExcept(except) => self
                .links
                .values()
                .filter(|l| !l.name.eq_ignore_ascii_case(except))
                .map(|l| l.name.clone())
                .collect(),
            Target::Link(name) => self
                .link(name)
                .map(|l| vec![l.name.clone()])
                .unwrap_or_default(),
        }
    }
}
