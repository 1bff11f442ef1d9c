//! The mesh coordinator task.
//!
//! # Architecture
//!
//! - **State Ownership**: the coordinator owns the [`Mesh`]; nothing else
//!   can reach the directory.
//! - **Message Passing**: link sessions and the client layer talk to it via
//!   [`CoordinatorEvent`]s carrying oneshot reply channels.
//! - **Atomicity**: events are handled one at a time and every mesh
//!   operation is synchronous, so merges, splits and relays never interleave.

use crate::error::{LinkError, LinkResult};
use crate::metrics;
use crate::state::{Delivery, DirectoryView, MeshObserver};
use crate::sync::mesh::{Mesh, Outcome};
use crate::sync::relay::LocalRequest;
use crate::telemetry::spans;
use meshirc_proto::{Burst, LinkMessage};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, debug, warn};

/// Instruction for a link session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    Send(LinkMessage),
    /// Send `ERROR` with the reason and hang up.
    Close(String),
}

/// Outbound queue of one link session.
pub type LinkQueue = mpsc::UnboundedSender<LinkCommand>;

/// Events that can be sent to the coordinator.
pub enum CoordinatorEvent {
    /// Whether a server name is this server or already in the mesh.
    IsKnown {
        name: String,
        reply_tx: oneshot::Sender<bool>,
    },
    /// A handshake finished; register the session and get the burst to send.
    Attach {
        name: String,
        description: String,
        queue: LinkQueue,
        reply_tx: oneshot::Sender<LinkResult<Burst>>,
    },
    /// A message arrived on an attached link.
    Inbound {
        link: String,
        message: LinkMessage,
        reply_tx: oneshot::Sender<LinkResult<()>>,
    },
    /// A session ended.
    Detach { link: String, reason: String },
    /// An operation from the local client layer.
    Local {
        request: LocalRequest,
        reply_tx: oneshot::Sender<LinkResult<()>>,
    },
    /// Send a message toward a named server.
    Route {
        server: String,
        message: LinkMessage,
        reply_tx: oneshot::Sender<LinkResult<()>>,
    },
    Snapshot {
        reply_tx: oneshot::Sender<DirectoryView>,
    },
    Links {
        reply_tx: oneshot::Sender<Vec<String>>,
    },
    Observe {
        observer: Arc<dyn MeshObserver>,
    },
}

/// The coordinator task.
pub struct Coordinator {
    mesh: Mesh,
    queues: HashMap<String, LinkQueue>,
    deliveries: mpsc::UnboundedSender<Delivery>,
}

impl Coordinator {
    /// Spawn the coordinator; client events go to `deliveries`.
    pub fn spawn(mesh: Mesh, deliveries: mpsc::UnboundedSender<Delivery>) -> CoordinatorHandle {
        let (tx, rx) = mpsc::channel(1024);
        let span = spans::coordinator(mesh.local_name());
        let actor = Self {
            mesh,
            queues: HashMap::new(),
            deliveries,
        };
        tokio::spawn(actor.run(rx).instrument(span));
        CoordinatorHandle { tx }
    }

    /// The main actor loop.
    async fn run(mut self, mut rx: mpsc::Receiver<CoordinatorEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle_event(event);
        }
        debug!("coordinator stopped");
    }

    fn handle_event(&mut self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::IsKnown { name, reply_tx } => {
                let _ = reply_tx.send(self.mesh.is_known(&name));
            }
            CoordinatorEvent::Attach {
                name,
                description,
                queue,
                reply_tx,
            } => {
                let result = self.mesh.attach_link(&name, &description);
                if result.is_ok() {
                    self.queues.insert(name.to_ascii_lowercase(), queue);
                }
                let _ = reply_tx.send(result);
            }
            CoordinatorEvent::Inbound {
                link,
                message,
                reply_tx,
            } => {
                let result = self.mesh.apply_remote(&link, message);
                let _ = reply_tx.send(self.finish(result));
            }
            CoordinatorEvent::Detach { link, reason } => {
                self.queues.remove(&link.to_ascii_lowercase());
                let out = self.mesh.link_closed(&link, &reason);
                self.dispatch(out);
            }
            CoordinatorEvent::Local { request, reply_tx } => {
                let result = self.mesh.apply_local(request);
                let _ = reply_tx.send(self.finish(result));
            }
            CoordinatorEvent::Route {
                server,
                message,
                reply_tx,
            } => {
                let result = self.mesh.route(&server, message).map(|relay| {
                    let mut out = Outcome::default();
                    out.relays.push(relay);
                    out
                });
                let _ = reply_tx.send(self.finish(result));
            }
            CoordinatorEvent::Snapshot { reply_tx } => {
                let _ = reply_tx.send(self.mesh.view());
            }
            CoordinatorEvent::Links { reply_tx } => {
                let _ = reply_tx.send(self.mesh.link_names());
            }
            CoordinatorEvent::Observe { observer } => {
                self.mesh.add_observer(observer);
            }
        }
    }

    fn finish(&mut self, result: LinkResult<Outcome>) -> LinkResult<()> {
        result.map(|out| self.dispatch(out))
    }

    /// Push an outcome out of the mesh: relays, client events, closes.
    fn dispatch(&mut self, out: Outcome) {
        for relay in out.relays {
            let links = self.mesh.resolve(&relay.target);
            metrics::record_relay(relay.message.kind(), links.len());
            for link in links {
                if let Some(queue) = self.queues.get(&link.to_ascii_lowercase()) {
                    let _ = queue.send(LinkCommand::Send(relay.message.clone()));
                }
            }
        }
        for delivery in out.deliveries {
            if self.deliveries.send(delivery).is_err() {
                warn!("client delivery channel closed");
            }
        }
        for (link, reason) in out.close {
            if let Some(queue) = self.queues.remove(&link.to_ascii_lowercase()) {
                let _ = queue.send(LinkCommand::Close(reason));
            }
        }
    }
}

/// Cheap, cloneable access to the coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CoordinatorEvent>,
}

impl CoordinatorHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> CoordinatorEvent,
    ) -> LinkResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| LinkError::Shutdown)?;
        reply_rx.await.map_err(|_| LinkError::Shutdown)
    }

    pub async fn is_known(&self, name: &str) -> LinkResult<bool> {
        let name = name.to_string();
        self.request(|reply_tx| CoordinatorEvent::IsKnown { name, reply_tx })
            .await
    }

    pub async fn attach(
        &self,
        name: &str,
        description: &str,
        queue: LinkQueue,
    ) -> LinkResult<Burst> {
        let (name, description) = (name.to_string(), description.to_string());
        self.request(|reply_tx| CoordinatorEvent::Attach {
            name,
            description,
            queue,
            reply_tx,
        })
        .await?
    }

    pub async fn inbound(&self, link: &str, message: LinkMessage) -> LinkResult<()> {
        let link = link.to_string();
        self.request(|reply_tx| CoordinatorEvent::Inbound {
            link,
            message,
            reply_tx,
        })
        .await?
    }

    pub async fn detach(&self, link: &str, reason: &str) {
        let event = CoordinatorEvent::Detach {
            link: link.to_string(),
            reason: reason.to_string(),
        };
        if self.tx.send(event).await.is_err() {
            debug!(link = %link, "coordinator gone before detach");
        }
    }

    /// Submit an operation from the local client layer.
    pub async fn local(&self, request: LocalRequest) -> LinkResult<()> {
        self.request(|reply_tx| CoordinatorEvent::Local { request, reply_tx })
            .await?
    }

    pub async fn route(&self, server: &str, message: LinkMessage) -> LinkResult<()> {
        let server = server.to_string();
        self.request(|reply_tx| CoordinatorEvent::Route {
            server,
            message,
            reply_tx,
        })
        .await?
    }

    /// A consistent copy of the directory.
    pub async fn snapshot(&self) -> LinkResult<DirectoryView> {
        self.request(|reply_tx| CoordinatorEvent::Snapshot { reply_tx })
            .await
    }

    pub async fn links(&self) -> LinkResult<Vec<String>> {
        self.request(|reply_tx| CoordinatorEvent::Links { reply_tx })
            .await
    }

    pub async fn observe(&self, observer: Arc<dyn MeshObserver>) -> LinkResult<()> {
        self.tx
            .send(CoordinatorEvent::Observe { observer })
            .await
            .map_err(|_| LinkError::Shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ClientEvent;
    use crate::state::ModeRegistry;
    use crate::sync::relay::NewUser;

    fn spawn(name: &str) -> (CoordinatorHandle, mpsc::UnboundedReceiver<Delivery>) {
        let mesh = Mesh::new(name, "test", Arc::new(ModeRegistry::core()));
        let (tx, rx) = mpsc::unbounded_channel();
        (Coordinator::spawn(mesh, tx), rx)
    }

    #[tokio::test]
    async fn local_requests_reach_attached_links() {
        let (handle, mut deliveries) = spawn("a.test");
        let (queue, mut sent) = mpsc::unbounded_channel();
        let burst = handle.attach("b.test", "B", queue).await.unwrap();
        assert!(burst.servers.is_empty());

        handle
            .local(LocalRequest::Register(NewUser::new("alice")))
            .await
            .unwrap();
        handle
            .local(LocalRequest::Join {
                nick: "alice".into(),
                channel: "#x".into(),
            })
            .await
            .unwrap();

        assert!(matches!(
            sent.recv().await,
            Some(LinkCommand::Send(LinkMessage::NewUser(_)))
        ));
        assert!(matches!(
            sent.recv().await,
            Some(LinkCommand::Send(LinkMessage::Join { .. }))
        ));
        let delivery = deliveries.recv().await.unwrap();
        assert!(matches!(delivery.event, ClientEvent::Join { .. }));
        assert_eq!(handle.snapshot().await.unwrap().user_count(), 1);
    }

    #[tokio::test]
    async fn attach_twice_is_rejected() {
        let (handle, _deliveries) = spawn("a.test");
        let (queue, _sent) = mpsc::unbounded_channel();
        handle.attach("b.test", "B", queue.clone()).await.unwrap();
        assert!(handle.is_known("B.TEST").await.unwrap());
        assert!(matches!(
            handle.attach("b.test", "B", queue).await,
            Err(LinkError::AlreadyConnected(_))
        ));
        assert_eq!(handle.links().await.unwrap(), vec!["b.test"]);
    }

    #[tokio::test]
    async fn squit_closes_the_session_queue() {
        let (handle, _deliveries) = spawn("a.test");
        let (queue, mut sent) = mpsc::unbounded_channel();
        handle.attach("b.test", "B", queue).await.unwrap();
        handle
            .inbound("b.test", LinkMessage::Burst(Burst::default()))
            .await
            .unwrap();

        handle
            .local(LocalRequest::Squit {
                server: "b.test".into(),
                reason: "bye".into(),
            })
            .await
            .unwrap();
        assert_eq!(sent.recv().await, Some(LinkCommand::Close("bye".into())));
        assert!(handle.links().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn errors_are_returned_to_the_caller() {
        let (handle, _deliveries) = spawn("a.test");
        let err = handle
            .inbound("nowhere.test", LinkMessage::Burst(Burst::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::NoSuchLink(_)));
        let err = handle
            .route("nowhere.test", LinkMessage::Ping("x".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::NoSuchServer(_)));
    }
}
