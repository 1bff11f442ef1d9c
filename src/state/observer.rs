//! Hooks for code outside the mesh core.
//!
//! The client layer learns about state changes that concern its users through
//! [`Delivery`] values; caches of remote state subscribe to merges and splits
//! through [`MeshObserver`].

use meshirc_proto::ModeChange;

/// Notified after topology changes have been committed.
pub trait MeshObserver: Send + Sync {
    /// A server (and its subtree) joined the mesh.
    fn on_merge(&self, server: &str);

    /// Servers were removed by a netsplit.
    fn on_split(&self, servers: &[String]);
}

/// Something a local client should be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Join {
        nick: String,
        channel: String,
    },
    Part {
        nick: String,
        channel: String,
        reason: String,
    },
    Quit {
        nick: String,
        reason: String,
    },
    Mode {
        source: String,
        channel: String,
        changes: Vec<ModeChange>,
    },
    Topic {
        source: String,
        channel: String,
        text: String,
    },
    Nick {
        old: String,
        new: String,
    },
    /// The local user itself was removed by the core (e.g. collision loss).
    Disconnect {
        nick: String,
        reason: String,
    },
}

/// A [`ClientEvent`] addressed to local users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub recipients: Vec<String>,
    pub event: ClientEvent,
}

impl Delivery {
    pub fn new(recipients: Vec<String>, event: ClientEvent) -> Self {
        Self { recipients, event }
    }
}
