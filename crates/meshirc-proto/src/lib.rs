//! # meshirc-proto
//!
//! Wire protocol spoken between linked meshircd servers.
//!
//! ## Layers
//!
//! - [`message`]: the IRC-style line grammar (`[:source] COMMAND params [:trailing]`)
//! - [`mode`]: kind-tagged mode strings (`Bt`, `Pkhunter2`, `Rofoo`, `Lb*!*@host`)
//! - [`records`]: `SERVER` / `UID` / `SJOIN` record lines carried in bursts
//! - [`command`]: the typed [`LinkMessage`] set exchanged on a link
//! - [`codec`]: a stateful tokio codec that yields whole bursts and announcements
//!
//! ## Quick Start
//!
//! ```rust
//! use meshirc_proto::{Introduce, LinkMessage};
//!
//! let intro = LinkMessage::Introduce(Introduce {
//!     name: "hub.example.net".to_string(),
//!     secret: "s3cret".to_string(),
//!     description: "Example hub".to_string(),
//!     protocol_version: meshirc_proto::PROTOCOL_VERSION,
//!     common_extensions: vec!["core".to_string()],
//! });
//!
//! let lines = intro.to_lines();
//! assert_eq!(lines.len(), 1);
//! assert!(lines[0].to_string().starts_with("INTRODUCE hub.example.net"));
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod casemap;
#[cfg(feature = "tokio")]
pub mod codec;
pub mod command;
pub mod error;
pub mod message;
pub mod mode;
pub mod records;

pub use self::casemap::{fold, fold_char, Casemapping};
#[cfg(feature = "tokio")]
pub use self::codec::LinkCodec;
pub use self::command::{AnnounceServer, Burst, Introduce, LinkMessage};
pub use self::error::{ParseError, ProtocolError};
pub use self::message::Message;
pub use self::mode::{ModeChange, ModeKind, ModeToken};
pub use self::records::{ChannelRecord, Membership, ServerRecord, UserRecord};

/// Protocol version advertised in `INTRODUCE`.
pub const PROTOCOL_VERSION: u32 = 3;

/// Protocol versions this implementation can link with.
pub const COMPATIBLE_VERSIONS: &[u32] = &[2, 3];

/// Maximum length of a single link line, in bytes, including the line ending.
///
/// Link lines are much longer than client lines: a `UID` line carries every
/// channel membership of the user.
pub const MAX_LINK_LINE_LEN: usize = 16 * 1024;
