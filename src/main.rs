//! meshircd - IRC server mesh daemon.

use meshircd::config::{Config, validate};
use meshircd::server::Server;
use meshircd::state::{ClientEvent, Delivery};
use meshircd::{http, metrics};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    if let Err(errors) = validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        anyhow::bail!("{} configuration error(s) in {config_path}", errors.len());
    }

    info!(
        server = %config.server.name,
        network = %config.server.network,
        links = config.links.len(),
        "Starting meshircd"
    );

    // Convention: metrics_port = 0 disables the HTTP endpoint (used by tests).
    let metrics_port = config.server.metrics_port.unwrap_or(0);
    if metrics_port == 0 {
        info!("Metrics disabled");
    } else {
        metrics::init();
        tokio::spawn(async move {
            http::run_http_server(metrics_port).await;
        });
        info!(port = metrics_port, "Prometheus HTTP server started");
    }

    // The client layer is external; log what it would be told.
    let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
    tokio::spawn(log_deliveries(delivery_rx));

    let server = Server::start(config, delivery_tx).await?;
    server.autoconnect().await;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    server.shutdown();
    // Let sessions flush their ERROR lines.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    Ok(())
}

async fn log_deliveries(mut rx: mpsc::UnboundedReceiver<Delivery>) {
    while let Some(delivery) = rx.recv().await {
        let to = delivery.recipients.join(",");
        match delivery.event {
            ClientEvent::Disconnect { nick, reason } => {
                info!(nick = %nick, reason = %reason, "disconnecting local user");
            }
            event => {
                tracing::debug!(recipients = %to, event = ?event, "client event");
            }
        }
    }
}
