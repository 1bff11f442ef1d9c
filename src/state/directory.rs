//! The directory: authoritative maps of users, channels and servers.
//!
//! Owned by the mesh coordinator; nothing else mutates it. Users and
//! channels are keyed by their case-folded names, so every lookup is
//! case-insensitive under the configured [`Casemapping`].

use crate::state::channel::Channel;
use crate::state::topology::TopologyGraph;
use crate::state::user::User;
use meshirc_proto::{Casemapping, ChannelRecord, Membership, UserRecord};
use std::collections::{BTreeMap, BTreeSet};

/// Read-only snapshot handed out by the coordinator.
pub type DirectoryView = Directory;

#[derive(Debug, Clone)]
pub struct Directory {
    casemapping: Casemapping,
    users: BTreeMap<String, User>,
    channels: BTreeMap<String, Channel>,
    pub topology: TopologyGraph,
}

impl Directory {
    pub fn new(local: impl Into<String>, casemapping: Casemapping) -> Self {
        Self {
            casemapping,
            users: BTreeMap::new(),
            channels: BTreeMap::new(),
            topology: TopologyGraph::new(local),
        }
    }

    pub fn local_name(&self) -> &str {
        self.topology.local()
    }

    pub fn fold(&self, name: &str) -> String {
        self.casemapping.fold(name)
    }

    // ========================================================================
    // Users
    // ========================================================================

    pub fn user(&self, nick: &str) -> Option<&User> {
        self.users.get(&self.fold(nick))
    }

    pub fn has_user(&self, nick: &str) -> bool {
        self.users.contains_key(&self.fold(nick))
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn is_local_user(&self, user: &User) -> bool {
        user.is_on(self.local_name())
    }

    /// Insert a user with no memberships. Returns false if the nickname is taken.
    pub fn add_user(&mut self, mut user: User) -> bool {
        let key = self.fold(&user.nick);
        if self.users.contains_key(&key) {
            return false;
        }
        user.channels.clear();
        self.users.insert(key, user);
        true
    }

    /// Remove a user from the directory and from every channel.
    ///
    /// Channels left empty are deleted.
    pub fn remove_user(&mut self, nick: &str) -> Option<User> {
        let key = self.fold(nick);
        let user = self.users.remove(&key)?;
        for chan_key in &user.channels {
            if let Some(channel) = self.channels.get_mut(chan_key) {
                channel.members.remove(&key);
                if channel.members.is_empty() {
                    self.channels.remove(chan_key);
                }
            }
        }
        Some(user)
    }

    /// Change a user's nickname. Fails if `new` belongs to someone else.
    pub fn rename_user(&mut self, old: &str, new: &str, nick_time: i64) -> bool {
        let old_key = self.fold(old);
        let new_key = self.fold(new);
        if old_key != new_key && self.users.contains_key(&new_key) {
            return false;
        }
        let Some(mut user) = self.users.remove(&old_key) else {
            return false;
        };
        user.nick = new.to_string();
        user.nick_time = nick_time;
        for chan_key in &user.channels {
            if let Some(channel) = self.channels.get_mut(chan_key)
                && let Some(status) = channel.members.remove(&old_key)
            {
                channel.members.insert(new_key.clone(), status);
            }
        }
        self.users.insert(new_key, user);
        true
    }

    /// Nicknames of users owned by any of `servers`.
    pub fn users_on(&self, servers: &[String]) -> Vec<String> {
        self.users
            .values()
            .filter(|u| servers.iter().any(|s| u.is_on(s)))
            .map(|u| u.nick.clone())
            .collect()
    }

    // ========================================================================
    // Channels
    // ========================================================================

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(&self.fold(name))
    }

    pub fn channel_mut(&mut self, name: &str) -> Option<&mut Channel> {
        let key = self.fold(name);
        self.channels.get_mut(&key)
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    /// Create an empty channel, returning it.
    ///
    /// The caller must add a member before returning control.
    pub fn create_channel(&mut self, name: &str, created: i64) -> &mut Channel {
        let key = self.fold(name);
        self.channels
            .entry(key)
            .or_insert_with(|| Channel::new(name, created))
    }

    /// Add `nick` to an existing channel. Returns false if already a member
    /// or either side is unknown.
    pub fn add_member(&mut self, channel: &str, nick: &str, status: &str) -> bool {
        let chan_key = self.fold(channel);
        let nick_key = self.fold(nick);
        let Some(user) = self.users.get_mut(&nick_key) else {
            return false;
        };
        let Some(chan) = self.channels.get_mut(&chan_key) else {
            return false;
        };
        if chan.members.contains_key(&nick_key) {
            return false;
        }
        chan.members.insert(nick_key, status.to_string());
        user.channels.insert(chan_key);
        true
    }

    /// Remove `nick` from `channel`, deleting the channel if it empties.
    pub fn remove_member(&mut self, channel: &str, nick: &str) -> bool {
        let chan_key = self.fold(channel);
        let nick_key = self.fold(nick);
        let Some(chan) = self.channels.get_mut(&chan_key) else {
            return false;
        };
        if chan.members.remove(&nick_key).is_none() {
            return false;
        }
        if chan.members.is_empty() {
            self.channels.remove(&chan_key);
        }
        if let Some(user) = self.users.get_mut(&nick_key) {
            user.channels.remove(&chan_key);
        }
        true
    }

    // ========================================================================
    // Audiences
    // ========================================================================

    /// Local members of `channel`, by display nickname.
    pub fn local_members(&self, channel: &str) -> Vec<String> {
        let Some(chan) = self.channel(channel) else {
            return Vec::new();
        };
        chan.members
            .keys()
            .filter_map(|k| self.users.get(k))
            .filter(|u| self.is_local_user(u))
            .map(|u| u.nick.clone())
            .collect()
    }

    /// Local users sharing at least one channel with `nick`, excluding `nick`.
    pub fn local_audience(&self, nick: &str) -> Vec<String> {
        let key = self.fold(nick);
        let Some(user) = self.users.get(&key) else {
            return Vec::new();
        };
        let mut seen = BTreeSet::new();
        for chan_key in &user.channels {
            if let Some(chan) = self.channels.get(chan_key) {
                seen.extend(chan.members.keys().filter(|k| **k != key).cloned());
            }
        }
        seen.iter()
            .filter_map(|k| self.users.get(k))
            .filter(|u| self.is_local_user(u))
            .map(|u| u.nick.clone())
            .collect()
    }

    // ========================================================================
    // Wire records
    // ========================================================================

    pub fn user_record(&self, nick: &str) -> Option<UserRecord> {
        let key = self.fold(nick);
        let user = self.users.get(&key)?;
        let channels = user
            .channels
            .iter()
            .filter_map(|c| self.channels.get(c))
            .map(|c| Membership::new(c.name.clone(), c.status(&key).unwrap_or_default()))
            .collect();
        Some(UserRecord {
            nick: user.nick.clone(),
            username: user.username.clone(),
            hostname: user.hostname.clone(),
            realname: user.realname.clone(),
            ip: user.ip.clone(),
            server: user.server.clone(),
            secure: user.secure,
            modes: user.modes.clone(),
            channels,
            signon: user.signon,
            nick_time: user.nick_time,
        })
    }

    /// Channel record, optionally restricted to members for which `include`
    /// returns true.
    pub fn channel_record_filtered<F>(&self, name: &str, include: F) -> Option<ChannelRecord>
    where
        F: Fn(&User) -> bool,
    {
        let chan = self.channel(name)?;
        let members = chan
            .members
            .keys()
            .filter_map(|k| self.users.get(k))
            .filter(|u| include(u))
            .map(|u| u.nick.clone())
            .collect();
        let (topic, topic_setter, topic_time) = match &chan.topic {
            Some(t) => (t.text.clone(), t.setter.clone(), t.time),
            None => (String::new(), String::new(), 0),
        };
        Some(ChannelRecord {
            name: chan.name.clone(),
            topic,
            topic_setter,
            topic_time,
            modes: chan.modes.tokens(),
            members,
            created: chan.created,
        })
    }

    pub fn channel_record(&self, name: &str) -> Option<ChannelRecord> {
        self.channel_record_filtered(name, |_| true)
    }
}
