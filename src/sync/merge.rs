//! Burst merge: reconciling a peer's snapshot with the directory.
//!
//! Users collide on folded nickname and the older `nick_time` wins; an exact
//! tie removes both. Channels reconcile on creation time:
//!
//! - equal: members, flags and lists union; parameters disputed on both
//!   sides resolve to the smaller value; topics resolve by [`Topic::resolve`]
//! - incoming older: incoming modes and topic replace ours, local statuses
//!   are dropped, creation time moves back
//! - incoming newer: ours stay, incoming statuses are dropped
//!
//! Membership always unions. Every rule is symmetric, so both servers of a
//! new link reach the same state from their independent merges.

use crate::error::{LinkError, LinkResult};
use crate::metrics;
use crate::state::{Channel, ClientEvent, ModeSet, Topic, User};
use crate::sync::mesh::{COLLISION_REASON, Mesh, Outcome, Target};
use crate::telemetry::MergeTimer;
use meshirc_proto::{
    AnnounceServer, Burst, ChannelRecord, LinkMessage, ModeChange, ModeKind, ModeToken,
    ServerRecord, UserRecord,
};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, info};

/// Folded channel name → folded nickname → status letters.
pub(crate) type Statuses = BTreeMap<String, BTreeMap<String, String>>;

impl Mesh {
    /// Merge the burst received on `link`.
    ///
    /// Nothing is applied unless the whole burst validates.
    pub fn merge_burst(&mut self, link: &str, burst: Burst) -> LinkResult<Outcome> {
        let entry = self
            .link(link)
            .ok_or_else(|| LinkError::NoSuchLink(link.to_string()))?;
        if entry.bursted {
            return Err(LinkError::AlreadyBursted);
        }
        let peer = entry.name.clone();
        self.validate_records(&peer, &burst.servers, &burst.users, &burst.channels, false)?;

        let _timer = MergeTimer::start();
        let mut out = Outcome::default();

        if let Some(entry) = self.links.get_mut(&peer.to_ascii_lowercase()) {
            entry.bursted = true;
        }

        for server in &burst.servers {
            self.directory.topology.add_server(
                &server.name,
                &server.description,
                server.hop_count.saturating_add(1),
                &server.near_hop,
            );
        }

        let mut killed = Vec::new();
        let mut admitted = HashSet::new();
        for record in &burst.users {
            if self.admit_burst_user(record, &mut killed, &mut out) {
                admitted.insert(self.directory.fold(&record.nick));
            }
        }

        let statuses = self.statuses_of(&burst.users, &admitted);
        for record in &burst.channels {
            self.merge_channel(record, &admitted, &statuses, &peer, &mut out);
        }

        for nick in killed {
            out.relay(
                Target::AllExcept(peer.clone()),
                LinkMessage::Quit {
                    nick,
                    reason: COLLISION_REASON.to_string(),
                },
            );
        }
        if let Some(announce) = self.announcement(&peer) {
            out.relay(
                Target::AllExcept(peer.clone()),
                LinkMessage::AnnounceServer(announce),
            );
        }

        self.notify_merge(&peer);
        info!(
            link = %peer,
            servers = burst.servers.len(),
            users = admitted.len(),
            channels = burst.channels.len(),
            "burst merged"
        );
        Ok(out)
    }

    /// Check a burst or announcement before touching the directory.
    ///
    /// `root` is the server the records hang from. Announcements must not
    /// carry users that collide with known ones (`strict`); bursts resolve
    /// collisions instead.
    pub(crate) fn validate_records(
        &self,
        root: &str,
        servers: &[ServerRecord],
        users: &[UserRecord],
        channels: &[ChannelRecord],
        strict: bool,
    ) -> LinkResult<()> {
        let topology = &self.directory.topology;

        let mut names = HashSet::from([root.to_ascii_lowercase()]);
        for server in servers {
            if topology.knows(&server.name) || !names.insert(server.name.to_ascii_lowercase()) {
                return Err(LinkError::AlreadyConnected(server.name.clone()));
            }
        }
        for server in servers {
            check_hop_count(&server.name, server.hop_count)?;
            if server.near_hop.eq_ignore_ascii_case(&server.name)
                || !names.contains(&server.near_hop.to_ascii_lowercase())
            {
                return Err(LinkError::DataInconsistent(format!(
                    "{} claims unknown near hop {}",
                    server.name, server.near_hop
                )));
            }
        }

        let mut nicks = HashSet::new();
        for user in users {
            if !names.contains(&user.server.to_ascii_lowercase()) {
                return Err(LinkError::DataInconsistent(format!(
                    "{} is on {}, which is not behind {}",
                    user.nick, user.server, root
                )));
            }
            let key = self.directory.fold(&user.nick);
            if strict && self.directory.has_user(&user.nick) {
                return Err(LinkError::DataInconsistent(format!(
                    "nickname collision on {}",
                    user.nick
                )));
            }
            if !nicks.insert(key) {
                return Err(LinkError::DataInconsistent(format!(
                    "{} sent twice",
                    user.nick
                )));
            }
        }

        let mut seen = HashSet::new();
        for channel in channels {
            if !seen.insert(self.directory.fold(&channel.name)) {
                return Err(LinkError::DataInconsistent(format!(
                    "{} sent twice",
                    channel.name
                )));
            }
            if let Some(stray) = channel
                .members
                .iter()
                .find(|m| !nicks.contains(&self.directory.fold(m)))
            {
                return Err(LinkError::DataInconsistent(format!(
                    "{} lists unknown member {}",
                    channel.name, stray
                )));
            }
        }
        Ok(())
    }

    /// Resolve one incoming user against the directory.
    ///
    /// Returns whether the incoming user was added. Users removed on this
    /// side are pushed to `killed` so their QUIT can be relayed.
    fn admit_burst_user(
        &mut self,
        record: &UserRecord,
        killed: &mut Vec<String>,
        out: &mut Outcome,
    ) -> bool {
        let Some(existing) = self.directory.user(&record.nick) else {
            return self.directory.add_user(User::from_record(record));
        };
        let existing_nick = existing.nick.clone();

        match existing.nick_time.cmp(&record.nick_time) {
            Ordering::Less => {
                debug!(nick = %record.nick, "collision: existing user is older, dropping incoming");
                metrics::record_collision("local_won");
                false
            }
            Ordering::Greater => {
                info!(nick = %record.nick, "collision: incoming user is older");
                self.remove_user_with_notice(&existing_nick, COLLISION_REASON, out);
                killed.push(existing_nick);
                metrics::record_collision("incoming_won");
                self.directory.add_user(User::from_record(record))
            }
            Ordering::Equal => {
                info!(nick = %record.nick, "collision: nick times tie, dropping both");
                self.remove_user_with_notice(&existing_nick, COLLISION_REASON, out);
                killed.push(existing_nick);
                metrics::record_collision("tie");
                false
            }
        }
    }

    /// Status letters of admitted users, from their membership lists.
    pub(crate) fn statuses_of(&self, users: &[UserRecord], admitted: &HashSet<String>) -> Statuses {
        let mut statuses = Statuses::new();
        for user in users {
            let nick = self.directory.fold(&user.nick);
            if !admitted.contains(&nick) {
                continue;
            }
            for membership in &user.channels {
                statuses
                    .entry(self.directory.fold(&membership.channel))
                    .or_default()
                    .insert(nick.clone(), self.registry.normalize_status(&membership.status));
            }
        }
        statuses
    }

    /// Reconcile one incoming channel. Only `admitted` users become members.
    ///
    /// Local members are told about joins and any mode or topic change the
    /// merge caused, attributed to `source`.
    pub(crate) fn merge_channel(
        &mut self,
        record: &ChannelRecord,
        admitted: &HashSet<String>,
        statuses: &Statuses,
        source: &str,
        out: &mut Outcome,
    ) {
        let chan_key = self.directory.fold(&record.name);
        let members: Vec<(String, String)> = record
            .members
            .iter()
            .filter_map(|nick| {
                let key = self.directory.fold(nick);
                admitted.contains(&key).then(|| {
                    let status = statuses
                        .get(&chan_key)
                        .and_then(|m| m.get(&key))
                        .cloned()
                        .unwrap_or_default();
                    (nick.clone(), status)
                })
            })
            .collect();
        if members.is_empty() {
            return;
        }

        let incoming_modes = ModeSet::from_tokens(&record.modes, &self.registry);
        let incoming_topic = (!record.topic.is_empty()).then(|| Topic {
            text: record.topic.clone(),
            setter: record.topic_setter.clone(),
            time: record.topic_time,
        });

        let Some(before) = self.directory.channel(&record.name).cloned() else {
            let chan = self.directory.create_channel(&record.name, record.created);
            chan.modes = incoming_modes;
            chan.topic = incoming_topic;
            for (nick, status) in &members {
                self.directory.add_member(&record.name, nick, status);
            }
            return;
        };

        let (created, modes, topic, clear_local, strip_incoming) =
            match record.created.cmp(&before.created) {
                Ordering::Equal => {
                    let mut modes = before.modes.clone();
                    modes.union(&incoming_modes);
                    let topic = Topic::resolve(before.topic.as_ref(), incoming_topic.as_ref());
                    (before.created, modes, topic, false, false)
                }
                Ordering::Less => {
                    debug!(channel = %record.name, ours = before.created, theirs = record.created,
                        "incoming channel is older, adopting its state");
                    (record.created, incoming_modes, incoming_topic, true, false)
                }
                Ordering::Greater => (
                    before.created,
                    before.modes.clone(),
                    before.topic.clone(),
                    false,
                    true,
                ),
            };

        if let Some(chan) = self.directory.channel_mut(&record.name) {
            chan.created = created;
            chan.modes = modes;
            chan.topic = topic;
            if clear_local {
                chan.members.values_mut().for_each(String::clear);
            }
        }

        let mut joined = Vec::new();
        for (nick, status) in &members {
            let status = if strip_incoming { "" } else { status.as_str() };
            if self.directory.add_member(&record.name, nick, status) {
                joined.push(nick.clone());
            }
        }

        self.notify_channel_merge(&before, &joined, source, out);
    }

    pub(crate) fn notify_channel_merge(
        &self,
        before: &Channel,
        joined: &[String],
        source: &str,
        out: &mut Outcome,
    ) {
        let audience = self.directory.local_members(&before.name);
        if audience.is_empty() {
            return;
        }
        let Some(after) = self.directory.channel(&before.name) else {
            return;
        };

        for nick in joined {
            out.deliver(
                audience.clone(),
                ClientEvent::Join {
                    nick: nick.clone(),
                    channel: after.name.clone(),
                },
            );
        }

        let mut changes = before.modes.diff(&after.modes);
        changes.extend(self.status_changes(before, after));
        if !changes.is_empty() {
            out.deliver(
                audience.clone(),
                ClientEvent::Mode {
                    source: source.to_string(),
                    channel: after.name.clone(),
                    changes,
                },
            );
        }

        let text = |c: &Channel| c.topic.as_ref().map(|t| t.text.clone()).unwrap_or_default();
        if text(before) != text(after) {
            let setter = after
                .topic
                .as_ref()
                .map_or_else(|| source.to_string(), |t| t.setter.clone());
            out.deliver(
                audience,
                ClientEvent::Topic {
                    source: setter,
                    channel: after.name.clone(),
                    text: text(after),
                },
            );
        }
    }

    /// Ranked-mode changes between two versions of a channel's member map.
    fn status_changes(&self, before: &Channel, after: &Channel) -> Vec<ModeChange> {
        let mut changes = Vec::new();
        for (key, status) in &after.members {
            let old = before.members.get(key).map(String::as_str).unwrap_or_default();
            if old == status {
                continue;
            }
            let Some(user) = self.directory.user(key) else {
                continue;
            };
            let token = |c: char| ModeToken::with_param(ModeKind::RankedList, c, user.nick.clone());
            changes.extend(
                old.chars()
                    .filter(|c| !status.contains(*c))
                    .map(|c| ModeChange::remove(token(c))),
            );
            changes.extend(
                status
                    .chars()
                    .filter(|c| !old.contains(*c))
                    .map(|c| ModeChange::add(token(c))),
            );
        }
        changes
    }

    /// `NEWSERVER` describing `server`'s whole subtree as we now see it.
    pub(crate) fn announcement(&self, server: &str) -> Option<AnnounceServer> {
        let directory = &self.directory;
        let topology = &directory.topology;
        let root = topology.get(server)?;
        let subtree = topology.get_downstream(server);

        let nicks = directory.users_on(&subtree);
        let channel_keys: BTreeSet<String> = nicks
            .iter()
            .filter_map(|n| directory.user(n))
            .flat_map(|u| u.channels.iter().cloned())
            .collect();
        let in_subtree = |u: &User| subtree.iter().any(|s| u.is_on(s));

        Some(AnnounceServer {
            origin: self.local.clone(),
            name: root.name.clone(),
            description: root.description.clone(),
            hop_count: root.hop_count,
            near_hop: root.near_hop.clone(),
            linked_servers: topology.subtree_records(server),
            users: nicks.iter().filter_map(|n| directory.user_record(n)).collect(),
            channels: channel_keys
                .iter()
                .filter_map(|c| directory.channel_record_filtered(c, in_subtree))
                .filter(|r| !r.members.is_empty())
                .collect(),
        })
    }
}

/// Hop counts from the wire are incremented on adoption; one that cannot
/// be is not a real topology.
pub(crate) fn check_hop_count(server: &str, hop_count: u32) -> LinkResult<()> {
    if hop_count.checked_add(1).is_none() {
        return Err(LinkError::DataInconsistent(format!(
            "{server} has impossible hop count {hop_count}"
        )));
    }
    Ok(())
}
