//! User entity.

use meshirc_proto::UserRecord;
use std::collections::BTreeSet;

/// A user connected to some server in the mesh.
///
/// Local and remote users share this shape; `server` says which is which.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub nick: String,
    pub username: String,
    pub hostname: String,
    pub realname: String,
    pub ip: String,
    /// Owning server name.
    pub server: String,
    pub secure: bool,
    pub modes: Vec<String>,
    pub signon: i64,
    /// Time of the last nickname change; the collision tie-breaker.
    pub nick_time: i64,
    /// Folded names of joined channels. Mirrors the channels' member maps.
    pub channels: BTreeSet<String>,
}

impl User {
    /// Build from a wire record. Memberships are applied separately.
    pub fn from_record(record: &UserRecord) -> Self {
        Self {
            nick: record.nick.clone(),
            username: record.username.clone(),
            hostname: record.hostname.clone(),
            realname: record.realname.clone(),
            ip: record.ip.clone(),
            server: record.server.clone(),
            secure: record.secure,
            modes: record.modes.clone(),
            signon: record.signon,
            nick_time: record.nick_time,
            channels: BTreeSet::new(),
        }
    }

    pub fn is_on(&self, server: &str) -> bool {
        self.server.eq_ignore_ascii_case(server)
    }
}
