//! meshircd - IRC server mesh synchronization.
//!
//! Links independently running servers into one network: handshake, full
//! state bursts, conflict resolution when partitions rejoin, propagation of
//! new servers through the spanning tree, and netsplit cleanup.
//!
//! The client-facing side of an IRC server is external; it talks to the
//! mesh through [`sync::CoordinatorHandle`] and receives
//! [`state::Delivery`] values for its local users.

pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod server;
pub mod state;
pub mod sync;
pub mod telemetry;

pub use error::{LinkError, LinkResult, Severity};
pub use server::{Server, StartError};
