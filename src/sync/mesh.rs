//! The mesh: directory plus link registry, mutated only by the coordinator.
//!
//! Every operation here is synchronous and runs to completion on `&mut Mesh`,
//! so no merge, split or relay can observe another half-applied. Operations
//! return an [`Outcome`] describing what must leave the mesh afterwards:
//! link messages to relay, client deliveries, links to close.

use crate::error::{LinkError, LinkResult};
use crate::state::{ClientEvent, Delivery, Directory, DirectoryView, MeshObserver, ModeRegistry};
use meshirc_proto::LinkMessage;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Source of "now", in Unix seconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Wall clock backed by `chrono`.
pub fn system_clock() -> Clock {
    Arc::new(|| chrono::Utc::now().timestamp())
}

/// Quit reason for users removed by a nickname collision.
pub const COLLISION_REASON: &str = "nickname collision";

/// Quit reason for users removed by a netsplit.
pub const SPLIT_REASON: &str = "server split";

/// Where a relayed message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every attached link.
    All,
    /// Every attached link except the named one (usually the origin).
    AllExcept(String),
    /// One adjacent link.
    Link(String),
}

/// A link message bound for one or more adjacent links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relay {
    pub target: Target,
    pub message: LinkMessage,
}

/// Side effects of one mesh operation, in the order they must happen.
#[derive(Debug, Default)]
pub struct Outcome {
    pub relays: Vec<Relay>,
    pub deliveries: Vec<Delivery>,
    /// Links to close, with the reason sent in `ERROR`.
    pub close: Vec<(String, String)>,
}

impl Outcome {
    pub fn relay(&mut self, target: Target, message: LinkMessage) {
        self.relays.push(Relay { target, message });
    }

    /// Queue a client event; dropped if nobody local is listening.
    pub fn deliver(&mut self, recipients: Vec<String>, event: ClientEvent) {
        if !recipients.is_empty() {
            self.deliveries.push(Delivery::new(recipients, event));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty() && self.deliveries.is_empty() && self.close.is_empty()
    }
}

/// An adjacent server with an attached session.
#[derive(Debug, Clone)]
pub struct LinkEntry {
    pub name: String,
    /// Whether the peer's burst has been merged.
    pub bursted: bool,
}

/// Directory, link registry and the algorithms that keep them in sync.
pub struct Mesh {
    pub(crate) local: String,
    pub(crate) description: String,
    pub(crate) registry: Arc<ModeRegistry>,
    pub(crate) directory: Directory,
    pub(crate) links: BTreeMap<String, LinkEntry>,
    observers: Vec<Arc<dyn MeshObserver>>,
    clock: Clock,
}

impl fmt::Debug for Mesh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mesh")
            .field("local", &self.local)
            .field("links", &self.links)
            .field("servers", &self.directory.topology.len())
            .field("users", &self.directory.user_count())
            .finish_non_exhaustive()
    }
}

impl Mesh {
    pub fn new(
        local: impl Into<String>,
        description: impl Into<String>,
        registry: Arc<ModeRegistry>,
    ) -> Self {
        let local = local.into();
        Self {
            directory: Directory::new(local.clone(), registry.casemapping()),
            local,
            description: description.into(),
            registry,
            links: BTreeMap::new(),
            observers: Vec::new(),
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn add_observer(&mut self, observer: Arc<dyn MeshObserver>) {
        self.observers.push(observer);
    }

    pub fn local_name(&self) -> &str {
        &self.local
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn registry(&self) -> &ModeRegistry {
        &self.registry
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn view(&self) -> DirectoryView {
        self.directory.clone()
    }

    pub(crate) fn now(&self) -> i64 {
        (self.clock)()
    }

    /// Whether `name` is this server or any server in the mesh.
    pub fn is_known(&self, name: &str) -> bool {
        self.directory.topology.knows(name)
    }

    pub fn link(&self, name: &str) -> Option<&LinkEntry> {
        self.links.get(&name.to_ascii_lowercase())
    }

    /// Names of attached links.
    pub fn link_names(&self) -> Vec<String> {
        self.links.values().map(|l| l.name.clone()).collect()
    }

    /// Register an adjacent server after a successful handshake.
    ///
    /// Returns the burst to send it. The snapshot is taken before the peer
    /// is added, and everything relayed afterwards is queued behind it.
    pub fn attach_link(&mut self, name: &str, description: &str) -> LinkResult<meshirc_proto::Burst> {
        if self.is_known(name) {
            return Err(LinkError::AlreadyConnected(name.to_string()));
        }
        let burst = self.snapshot();
        self.directory
            .topology
            .add_server(name, description, 1, self.local.clone());
        self.links.insert(
            name.to_ascii_lowercase(),
            LinkEntry {
                name: name.to_string(),
                bursted: false,
            },
        );
        crate::metrics::link_established();
        info!(link = %name, "link attached");
        Ok(burst)
    }

    /// Fail unless `link` is attached and its burst has been merged.
    pub(crate) fn require_bursted(&self, link: &str) -> LinkResult<()> {
        match self.link(link) {
            None => Err(LinkError::NoSuchLink(link.to_string())),
            Some(entry) if !entry.bursted => Err(LinkError::NotYetBursted),
            Some(_) => Ok(()),
        }
    }

    pub(crate) fn notify_merge(&self, server: &str) {
        for observer in &self.observers {
            observer.on_merge(server);
        }
    }

    pub(crate) fn notify_split(&self, servers: &[String]) {
        for observer in &self.observers {
            observer.on_split(servers);
        }
    }

    /// Remove a user, telling local co-members (and the user, if local).
    pub(crate) fn remove_user_with_notice(
        &mut self,
        nick: &str,
        reason: &str,
        out: &mut Outcome,
    ) -> bool {
        let audience = self.directory.local_audience(nick);
        let Some(user) = self.directory.remove_user(nick) else {
            return false;
        };
        if self.directory.is_local_user(&user) {
            out.deliver(
                vec![user.nick.clone()],
                ClientEvent::Disconnect {
                    nick: user.nick.clone(),
                    reason: reason.to_string(),
                },
            );
        }
        out.deliver(
            audience,
            ClientEvent::Quit {
                nick: user.nick,
                reason: reason.to_string(),
            },
        );
        true
    }
}
