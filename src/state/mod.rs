//! State management module.
//!
//! Contains the directory (users, channels and the server tree), the entity
//! records it stores, and the mode-type registry used to interpret modes.

pub mod channel;
pub mod directory;
pub mod modes;
pub mod observer;
pub mod topology;
pub mod user;

pub use channel::{Channel, ModeSet, Topic};
pub use directory::{Directory, DirectoryView};
pub use modes::{ModeDef, ModeRegistry, RegistryError};
pub use observer::{ClientEvent, Delivery, MeshObserver};
pub use topology::{RemoteServer, TopologyGraph};
pub use user::User;
