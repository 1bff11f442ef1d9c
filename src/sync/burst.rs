//! Burst generation.
//!
//! When a new server link is established, both sides exchange a burst
//! containing every server, user and channel they know about:
//! - `SERVER` for each remote server, nearest first
//! - `UID` for each user, local and remote, with channel memberships
//! - `SJOIN` for each channel (modes, topic, members)

use crate::sync::mesh::Mesh;
use meshirc_proto::Burst;

impl Mesh {
    /// Complete snapshot of what this server knows.
    pub fn snapshot(&self) -> Burst {
        let directory = &self.directory;
        let users = directory
            .users()
            .filter_map(|u| directory.user_record(&u.nick))
            .collect();
        let channels = directory
            .channels()
            .filter_map(|c| directory.channel_record(&c.name))
            .collect();
        Burst {
            servers: directory.topology.records(),
            users,
            channels,
        }
    }
}
