//! Server-to-server synchronization.
//!
//! [`Mesh`] holds the synchronous algorithms (burst merge, announcement,
//! netsplit, routing, relay); [`Coordinator`] runs it as an actor; link
//! sessions handle sockets and the handshake.

mod announce;
mod burst;
pub mod coordinator;
pub mod handshake;
pub mod link;
mod merge;
pub mod mesh;
pub mod network;
pub mod relay;
mod router;
mod split;

pub use coordinator::{Coordinator, CoordinatorHandle, LinkCommand};
pub use handshake::{HandshakeMachine, HandshakeState};
pub use link::LinkContext;
pub use mesh::{Clock, Mesh, Outcome, Relay, Target, system_clock};
pub use relay::{LocalRequest, NewUser};
