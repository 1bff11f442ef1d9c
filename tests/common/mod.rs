//! Integration test common infrastructure.
//!
//! Runs servers in-process on loopback ports and polls their directories
//! until the mesh converges.

#![allow(dead_code)]

use meshircd::config::{Config, LimitsConfig, LinkBlock, ListenConfig, ServerConfig};
use meshircd::server::Server;
use meshircd::state::{Delivery, DirectoryView};
use meshircd::sync::{Clock, LocalRequest, NewUser};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

pub const SECRET: &str = "link-secret";

/// A running server plus the client events it produced.
pub struct TestServer {
    pub server: Server,
    pub deliveries: mpsc::UnboundedReceiver<Delivery>,
}

/// A link block for a peer on loopback. `port` only matters for dialing.
pub fn link_to(name: &str, port: u16) -> LinkBlock {
    LinkBlock {
        name: name.to_string(),
        hostname: "127.0.0.1".to_string(),
        port,
        address: None,
        send_password: SECRET.to_string(),
        receive_password: SECRET.to_string(),
        autoconnect: false,
    }
}

pub fn config(name: &str, links: Vec<LinkBlock>, extensions: &[&str]) -> Config {
    Config {
        server: ServerConfig {
            name: name.to_string(),
            description: format!("{name} test server"),
            network: "TestNet".to_string(),
            casemapping: "rfc1459".to_string(),
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
            metrics_port: None,
        },
        listen: ListenConfig {
            address: "127.0.0.1:0".parse().expect("loopback address"),
        },
        limits: LimitsConfig {
            handshake_timeout: 5,
            ..LimitsConfig::default()
        },
        links,
    }
}

/// Start a server whose clock is frozen at `now`.
pub async fn start_at(config: Config, now: i64) -> anyhow::Result<TestServer> {
    let clock: Clock = Arc::new(move || now);
    let (tx, deliveries) = mpsc::unbounded_channel();
    let server = Server::start_with_clock(config, tx, clock).await?;
    Ok(TestServer { server, deliveries })
}

impl TestServer {
    pub fn port(&self) -> u16 {
        self.server.local_addr().port()
    }

    pub async fn register(&self, nick: &str) -> anyhow::Result<()> {
        self.server
            .handle()
            .local(LocalRequest::Register(NewUser::new(nick)))
            .await?;
        Ok(())
    }

    pub async fn join(&self, nick: &str, channel: &str) -> anyhow::Result<()> {
        self.server
            .handle()
            .local(LocalRequest::Join {
                nick: nick.to_string(),
                channel: channel.to_string(),
            })
            .await?;
        Ok(())
    }

    pub async fn view(&self) -> anyhow::Result<DirectoryView> {
        Ok(self.server.handle().snapshot().await?)
    }

    /// Poll until `check` holds, failing after five seconds.
    pub async fn wait_for(
        &self,
        what: &str,
        check: impl Fn(&DirectoryView) -> bool,
    ) -> anyhow::Result<DirectoryView> {
        for _ in 0..100 {
            let view = self.view().await?;
            if check(&view) {
                return Ok(view);
            }
            sleep(Duration::from_millis(50)).await;
        }
        anyhow::bail!("{} never saw: {what}", self.server.name())
    }

    /// Dial `peer` and wait until both sides have attached the link.
    pub async fn link_with(&self, peer: &TestServer) -> anyhow::Result<()> {
        self.server.connect(peer.server.name()).await?;
        let (ours, theirs) = (self.server.name().to_string(), peer.server.name().to_string());
        self.wait_for(&format!("link to {theirs}"), |v| v.topology.knows(&theirs))
            .await?;
        peer.wait_for(&format!("link to {ours}"), |v| v.topology.knows(&ours))
            .await?;
        Ok(())
    }

    /// Client events received so far.
    pub fn drain(&mut self) -> Vec<Delivery> {
        let mut out = Vec::new();
        while let Ok(delivery) = self.deliveries.try_recv() {
            out.push(delivery);
        }
        out
    }
}
