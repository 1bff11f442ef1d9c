//! Accepting and dialing link connections.
//!
//! Links are plaintext TCP; run them over a private network or a tunnel.

use crate::config::LinkBlock;
use crate::sync::link::{LinkContext, run_session};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Accept link connections until shutdown.
pub async fn run_listener(ctx: Arc<LinkContext>, listener: TcpListener) {
    let mut shutdown_rx = ctx.shutdown.subscribe();
    if let Ok(addr) = listener.local_addr() {
        info!(address = %addr, "link listener started");
    }

    loop {
        tokio::select! {
            res = listener.accept() => {
                match res {
                    Ok((stream, peer)) => {
                        info!(peer = %peer, "inbound link connection");
                        let ctx = Arc::clone(&ctx);
                        tokio::spawn(run_session(ctx, stream, peer, None));
                    }
                    Err(e) => {
                        error!(error = %e, "failed to accept link connection");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("link listener stopping");
                break;
            }
        }
    }
}

/// Dial a configured peer once and run the session in the background.
///
/// Retrying is up to the caller.
pub async fn connect_to_peer(
    ctx: Arc<LinkContext>,
    link: LinkBlock,
) -> std::io::Result<JoinHandle<()>> {
    info!(name = %link.name, hostname = %link.hostname, port = link.port, "connecting to peer");
    let stream = TcpStream::connect((link.hostname.as_str(), link.port)).await?;
    let peer = stream.peer_addr()?;
    Ok(tokio::spawn(run_session(ctx, stream, peer, Some(link))))
}
