//! One link session: a task per adjacent server.
//!
//! The session drives the handshake, sends its burst, then shuttles
//! messages between the socket and the coordinator until either side hangs
//! up. It never touches the directory itself.

use crate::config::{LimitsConfig, LinkBlock};
use crate::error::{LinkError, LinkResult};
use crate::metrics;
use crate::sync::coordinator::{CoordinatorHandle, LinkCommand};
use crate::sync::handshake::{HandshakeContext, HandshakeMachine};
use crate::telemetry::spans;
use futures_util::{SinkExt, StreamExt};
use meshirc_proto::{Introduce, LinkCodec, LinkMessage};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::Framed;
use tracing::{Instrument, Span, debug, info, warn};

type LinkStream = Framed<TcpStream, LinkCodec>;

/// Everything a session needs besides its socket.
pub struct LinkContext {
    pub local_name: String,
    pub description: String,
    /// Sorted common extension identifiers, from the mode registry.
    pub extensions: Vec<String>,
    pub links: Vec<LinkBlock>,
    pub limits: LimitsConfig,
    pub coordinator: CoordinatorHandle,
    pub shutdown: broadcast::Sender<()>,
}

/// Run a session on an accepted or dialed socket.
///
/// `outbound` is the link block we dialed; inbound sessions wait for the
/// peer to introduce itself.
pub async fn run_session(
    ctx: std::sync::Arc<LinkContext>,
    stream: TcpStream,
    peer: SocketAddr,
    outbound: Option<LinkBlock>,
) {
    let span = spans::link(peer, outbound.is_some());
    session(ctx, stream, peer, outbound).instrument(span).await;
}

async fn session(
    ctx: std::sync::Arc<LinkContext>,
    stream: TcpStream,
    peer: SocketAddr,
    outbound: Option<LinkBlock>,
) {
    let mut framed = Framed::new(stream, LinkCodec::new());
    let mut machine = HandshakeMachine::new(
        ctx.local_name.clone(),
        ctx.description.clone(),
        ctx.extensions.clone(),
    );
    if let Some(link) = &outbound {
        let intro = machine.start_outbound(link);
        if let Err(e) = framed.send(LinkMessage::Introduce(intro)).await {
            warn!(error = %e, "failed to send introduction");
            return;
        }
    }

    let handshake = tokio::time::timeout(
        ctx.limits.handshake_timeout(),
        handshake(&ctx, &mut framed, &mut machine, peer),
    )
    .await;
    let peer_intro = match handshake {
        Ok(Ok(intro)) => intro,
        Ok(Err(e)) => {
            reject(&mut framed, &e).await;
            return;
        }
        Err(_) => {
            reject(&mut framed, &LinkError::Protocol("handshake timeout".into())).await;
            return;
        }
    };
    let name = peer_intro.name.clone();
    Span::current().record("name", name.as_str());

    let (queue_tx, queue_rx) = mpsc::unbounded_channel();
    let burst = match ctx
        .coordinator
        .attach(&name, &peer_intro.description, queue_tx)
        .await
    {
        Ok(burst) => burst,
        Err(e) => {
            reject(&mut framed, &e).await;
            return;
        }
    };
    info!(
        servers = burst.servers.len(),
        users = burst.users.len(),
        channels = burst.channels.len(),
        "handshake complete, sending burst"
    );

    let reason = match framed.send(LinkMessage::Burst(burst)).await {
        Ok(()) => match machine.burst_sent() {
            Ok(()) => relay_loop(&ctx, &mut framed, &mut machine, &name, queue_rx).await,
            Err(e) => e.to_string(),
        },
        Err(e) => format!("write error: {e}"),
    };

    machine.close();
    ctx.coordinator.detach(&name, &reason).await;
    info!(reason = %reason, "link closed");
}

/// Read until the peer's introduction passes validation.
async fn handshake(
    ctx: &LinkContext,
    framed: &mut LinkStream,
    machine: &mut HandshakeMachine,
    peer: SocketAddr,
) -> LinkResult<Introduce> {
    loop {
        let message = match framed.next().await {
            Some(frame) => frame?,
            None => return Err(LinkError::Protocol("closed during handshake".into())),
        };
        match message {
            LinkMessage::Introduce(intro) => {
                let peer_known = ctx.coordinator.is_known(&intro.name).await?;
                let check = HandshakeContext {
                    links: &ctx.links,
                    peer_addr: peer.ip(),
                    peer_known,
                };
                let reply = machine.receive_introduce(intro, &check)?;
                if let Some(reply) = reply {
                    framed.send(LinkMessage::Introduce(reply)).await?;
                }
                return machine
                    .peer()
                    .cloned()
                    .ok_or_else(|| LinkError::Protocol("handshake incomplete".into()));
            }
            LinkMessage::Ping(token) => framed.send(LinkMessage::Pong(token)).await?,
            LinkMessage::Error(reason) => {
                return Err(LinkError::Protocol(format!("peer refused link: {reason}")));
            }
            other => {
                return Err(LinkError::Protocol(format!(
                    "{} before introduction",
                    other.kind()
                )));
            }
        }
    }
}

/// Steady state. Returns the reason the link ended.
async fn relay_loop(
    ctx: &LinkContext,
    framed: &mut LinkStream,
    machine: &mut HandshakeMachine,
    name: &str,
    mut queue: mpsc::UnboundedReceiver<LinkCommand>,
) -> String {
    let mut shutdown = ctx.shutdown.subscribe();
    let mut ticker = tokio::time::interval(ctx.limits.ping_interval());
    ticker.tick().await;
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            command = queue.recv() => match command {
                Some(LinkCommand::Send(message)) => {
                    if let Err(e) = framed.send(message).await {
                        return format!("write error: {e}");
                    }
                }
                Some(LinkCommand::Close(reason)) => {
                    let _ = framed.send(LinkMessage::Error(reason.clone())).await;
                    return reason;
                }
                None => return "coordinator shut down".to_string(),
            },
            frame = framed.next() => match frame {
                Some(Ok(LinkMessage::Error(reason))) => {
                    return format!("peer closed link: {reason}");
                }
                Some(Ok(message)) => {
                    last_seen = Instant::now();
                    if let Err(e) = handle_frame(ctx, framed, machine, name, message).await {
                        if !e.is_fatal() {
                            metrics::record_link_error(e.error_code());
                            warn!(error = %e, code = e.error_code(), "recoverable link error");
                            let fail = LinkMessage::Fail {
                                code: e.error_code().to_string(),
                                reason: e.to_string(),
                            };
                            if let Err(e) = framed.send(fail).await {
                                return format!("write error: {e}");
                            }
                            continue;
                        }
                        reject(framed, &e).await;
                        return e.to_string();
                    }
                }
                Some(Err(e)) => {
                    let e = LinkError::from(e);
                    reject(framed, &e).await;
                    return e.to_string();
                }
                None => return "connection closed".to_string(),
            },
            _ = ticker.tick() => {
                let silence = ctx.limits.ping_interval() + ctx.limits.ping_timeout();
                if let Some(reason) = keepalive(framed, &ctx.local_name, last_seen, silence).await {
                    return reason;
                }
            },
            _ = shutdown.recv() => {
                let _ = framed.send(LinkMessage::Error("server shutting down".into())).await;
                return "server shutting down".to_string();
            },
        }
    }
}

async fn handle_frame(
    ctx: &LinkContext,
    framed: &mut LinkStream,
    machine: &mut HandshakeMachine,
    name: &str,
    message: LinkMessage,
) -> LinkResult<()> {
    match &message {
        LinkMessage::Burst(_) => machine.burst_received()?,
        LinkMessage::Ping(token) => {
            framed.send(LinkMessage::Pong(token.clone())).await?;
            return Ok(());
        }
        LinkMessage::Pong(_) => return Ok(()),
        LinkMessage::Fail { code, reason } => {
            warn!(code = %code, reason = %reason, "peer dropped a message");
            return Ok(());
        }
        _ => {}
    }
    debug!(kind = message.kind(), "inbound");
    ctx.coordinator.inbound(name, message).await
}

/// Ping the peer, or give up on it after `timeout` of silence.
/// Returns a close reason when the link should end.
async fn keepalive(
    framed: &mut LinkStream,
    local: &str,
    last_seen: Instant,
    timeout: Duration,
) -> Option<String> {
    if last_seen.elapsed() > timeout {
        let _ = framed.send(LinkMessage::Error("ping timeout".into())).await;
        return Some("ping timeout".to_string());
    }
    match framed.send(LinkMessage::Ping(local.to_string())).await {
        Ok(()) => None,
        Err(e) => Some(format!("write error: {e}")),
    }
}

/// Report a fatal error to the peer before the socket drops.
async fn reject(framed: &mut LinkStream, err: &LinkError) {
    metrics::record_link_error(err.error_code());
    warn!(error = %err, code = err.error_code(), "closing link");
    let _ = framed.send(LinkMessage::Error(err.to_string())).await;
}
