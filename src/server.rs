//! Wiring a configured server: registry, coordinator, listener.

use crate::config::Config;
use crate::state::{Delivery, ModeRegistry, RegistryError};
use crate::sync::coordinator::{Coordinator, CoordinatorHandle};
use crate::sync::link::LinkContext;
use crate::sync::mesh::{Clock, Mesh, system_clock};
use crate::sync::network;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StartError {
    #[error("unknown casemapping '{0}'")]
    UnknownCasemapping(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("failed to bind link listener: {0}")]
    Bind(#[from] std::io::Error),
    #[error("no link block for {0}")]
    NoSuchLink(String),
}

/// A running server.
pub struct Server {
    config: Config,
    context: Arc<LinkContext>,
    local_addr: SocketAddr,
}

impl Server {
    /// Build the mesh, spawn the coordinator and start listening.
    ///
    /// Client events produced by the mesh are sent to `deliveries`.
    pub async fn start(
        config: Config,
        deliveries: mpsc::UnboundedSender<Delivery>,
    ) -> Result<Self, StartError> {
        Self::start_with_clock(config, deliveries, system_clock()).await
    }

    /// Like [`Server::start`], with timestamps taken from `clock`.
    pub async fn start_with_clock(
        config: Config,
        deliveries: mpsc::UnboundedSender<Delivery>,
        clock: Clock,
    ) -> Result<Self, StartError> {
        let casemapping = config
            .server
            .casemapping()
            .ok_or_else(|| StartError::UnknownCasemapping(config.server.casemapping.clone()))?;
        let registry = Arc::new(ModeRegistry::new(&config.server.extensions, casemapping)?);
        let extensions = registry.common_extensions();

        let mesh = Mesh::new(
            config.server.name.clone(),
            config.server.description.clone(),
            registry,
        )
        .with_clock(clock);
        let coordinator = Coordinator::spawn(mesh, deliveries);

        let listener = TcpListener::bind(config.listen.address).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown, _) = broadcast::channel(1);
        let context = Arc::new(LinkContext {
            local_name: config.server.name.clone(),
            description: config.server.description.clone(),
            extensions,
            links: config.links.clone(),
            limits: config.limits.clone(),
            coordinator,
            shutdown,
        });
        tokio::spawn(network::run_listener(Arc::clone(&context), listener));

        info!(
            server = %config.server.name,
            network = %config.server.network,
            address = %local_addr,
            "server started"
        );
        Ok(Self {
            config,
            context,
            local_addr,
        })
    }

    /// Address the link listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn name(&self) -> &str {
        &self.config.server.name
    }

    pub fn handle(&self) -> &CoordinatorHandle {
        &self.context.coordinator
    }

    /// Dial the configured link `name` once.
    pub async fn connect(&self, name: &str) -> Result<JoinHandle<()>, StartError> {
        let link = self
            .config
            .link(name)
            .cloned()
            .ok_or_else(|| StartError::NoSuchLink(name.to_string()))?;
        Ok(network::connect_to_peer(Arc::clone(&self.context), link).await?)
    }

    /// One connection attempt per `autoconnect` link.
    pub async fn autoconnect(&self) {
        for link in self.config.links.iter().filter(|l| l.autoconnect) {
            if let Err(e) = self.connect(&link.name).await {
                warn!(link = %link.name, error = %e, "autoconnect failed");
            }
        }
    }

    /// Tell the listener and every session to stop.
    pub fn shutdown(&self) {
        let _ = self.context.shutdown.send(());
    }
}
