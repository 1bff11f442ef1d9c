//! Steady-state traffic.
//!
//! Operations submitted by the local client layer and the same operations
//! arriving from synced links take one path: apply to the directory, deliver
//! to affected local users, relay to every other link.

use crate::error::{LinkError, LinkResult};
use crate::state::{ClientEvent, ModeSet, User};
use crate::sync::mesh::{Mesh, Outcome, Target};
use meshirc_proto::{LinkMessage, ModeChange, ModeKind, ModeToken, UserRecord};
use std::cmp::Ordering;
use tracing::{debug, info, warn};

/// Registration data for a user connecting to this server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub nick: String,
    pub username: String,
    pub hostname: String,
    pub realname: String,
    pub ip: String,
    pub secure: bool,
    pub modes: Vec<String>,
}

impl NewUser {
    /// A plain loopback user; fields can be overwritten afterwards.
    pub fn new(nick: impl Into<String>) -> Self {
        let nick = nick.into();
        Self {
            username: nick.to_ascii_lowercase(),
            realname: nick.clone(),
            nick,
            hostname: "localhost".to_string(),
            ip: "127.0.0.1".to_string(),
            secure: false,
            modes: Vec::new(),
        }
    }
}

/// An operation requested by the local client layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalRequest {
    Register(NewUser),
    Quit {
        nick: String,
        reason: String,
    },
    Nick {
        nick: String,
        new_nick: String,
    },
    Join {
        nick: String,
        channel: String,
    },
    Part {
        nick: String,
        channel: String,
        reason: String,
    },
    Mode {
        nick: String,
        channel: String,
        changes: Vec<ModeChange>,
    },
    Topic {
        nick: String,
        channel: String,
        text: String,
    },
    /// Deliberately drop the link to an adjacent server.
    Squit {
        server: String,
        reason: String,
    },
}

const MAX_NICK_LEN: usize = 30;
const MAX_CHANNEL_LEN: usize = 50;

/// Letters, digits and `-[]\`^{}|_`, not starting with a digit or `-`.
pub fn is_valid_nick(nick: &str) -> bool {
    let mut chars = nick.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    let special = |c: char| "[]\\`^{}|_".contains(c);
    nick.len() <= MAX_NICK_LEN
        && (first.is_ascii_alphabetic() || special(first))
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || special(c))
}

pub fn is_valid_channel(name: &str) -> bool {
    (name.starts_with('#') || name.starts_with('&'))
        && name.len() > 1
        && name.len() <= MAX_CHANNEL_LEN
        && !name.contains([' ', ',', ':', '\x07'])
}

impl Mesh {
    // ========================================================================
    // Local operations
    // ========================================================================

    /// Apply an operation from the local client layer.
    pub fn apply_local(&mut self, request: LocalRequest) -> LinkResult<Outcome> {
        let mut out = Outcome::default();
        match request {
            LocalRequest::Register(user) => {
                if !is_valid_nick(&user.nick) {
                    return Err(LinkError::ErroneousNickname(user.nick));
                }
                if self.directory.has_user(&user.nick) {
                    return Err(LinkError::NicknameInUse(user.nick));
                }
                let now = self.now();
                let nick = user.nick.clone();
                self.directory.add_user(User::from_record(&UserRecord {
                    nick: user.nick,
                    username: user.username,
                    hostname: user.hostname,
                    realname: user.realname,
                    ip: user.ip,
                    server: self.local.clone(),
                    secure: user.secure,
                    modes: user.modes,
                    channels: Vec::new(),
                    signon: now,
                    nick_time: now,
                }));
                if let Some(record) = self.directory.user_record(&nick) {
                    out.relay(Target::All, LinkMessage::NewUser(record));
                }
            }

            LocalRequest::Quit { nick, reason } => {
                let nick = self.local_user(&nick)?;
                let audience = self.directory.local_audience(&nick);
                self.directory.remove_user(&nick);
                out.deliver(
                    audience,
                    ClientEvent::Quit {
                        nick: nick.clone(),
                        reason: reason.clone(),
                    },
                );
                out.relay(Target::All, LinkMessage::Quit { nick, reason });
            }

            LocalRequest::Nick { nick, new_nick } => {
                let nick = self.local_user(&nick)?;
                if !is_valid_nick(&new_nick) {
                    return Err(LinkError::ErroneousNickname(new_nick));
                }
                if self.directory.fold(&nick) != self.directory.fold(&new_nick)
                    && self.directory.has_user(&new_nick)
                {
                    return Err(LinkError::NicknameInUse(new_nick));
                }
                let now = self.now();
                let mut recipients = self.directory.local_audience(&nick);
                recipients.push(new_nick.clone());
                self.directory.rename_user(&nick, &new_nick, now);
                out.deliver(
                    recipients,
                    ClientEvent::Nick {
                        old: nick.clone(),
                        new: new_nick.clone(),
                    },
                );
                out.relay(
                    Target::All,
                    LinkMessage::Nick {
                        nick,
                        new_nick,
                        nick_time: now,
                    },
                );
            }

            LocalRequest::Join { nick, channel } => {
                let nick = self.local_user(&nick)?;
                if !is_valid_channel(&channel) {
                    return Err(LinkError::NoSuchChannel(channel));
                }
                let status = match self.directory.channel(&channel) {
                    Some(chan) if chan.is_member(&self.directory.fold(&nick)) => return Ok(out),
                    Some(_) => String::new(),
                    None => {
                        let now = self.now();
                        self.directory.create_channel(&channel, now);
                        "o".to_string()
                    }
                };
                self.directory.add_member(&channel, &nick, &status);
                let Some(chan) = self.directory.channel(&channel) else {
                    return Ok(out);
                };
                let (name, created) = (chan.name.clone(), chan.created);
                out.deliver(
                    self.directory.local_members(&channel),
                    ClientEvent::Join {
                        nick: nick.clone(),
                        channel: name.clone(),
                    },
                );
                out.relay(
                    Target::All,
                    LinkMessage::Join {
                        nick,
                        channel: name,
                        created,
                        status,
                    },
                );
            }

            LocalRequest::Part {
                nick,
                channel,
                reason,
            } => {
                let nick = self.local_user(&nick)?;
                let name = self.member_of(&nick, &channel)?;
                let recipients = self.directory.local_members(&channel);
                self.directory.remove_member(&channel, &nick);
                out.deliver(
                    recipients,
                    ClientEvent::Part {
                        nick: nick.clone(),
                        channel: name.clone(),
                        reason: reason.clone(),
                    },
                );
                out.relay(
                    Target::All,
                    LinkMessage::Part {
                        nick,
                        channel: name,
                        reason,
                    },
                );
            }

            LocalRequest::Mode {
                nick,
                channel,
                changes,
            } => {
                let nick = self.local_user(&nick)?;
                let name = self.member_of(&nick, &channel)?;
                for change in &changes {
                    let token = &change.token;
                    if !self.registry.accepts(token.kind, token.letter) {
                        return Err(LinkError::UnknownMode(token.letter));
                    }
                    if token.kind == ModeKind::RankedList {
                        let target = token.param.clone().unwrap_or_default();
                        self.member_of(&target, &channel)?;
                    }
                }
                self.relay_mode(&nick, &name, &changes, None, &mut out);
            }

            LocalRequest::Topic {
                nick,
                channel,
                text,
            } => {
                let nick = self.local_user(&nick)?;
                let name = self.member_of(&nick, &channel)?;
                // Never stamp a change older than the topic it replaces.
                let set = self
                    .directory
                    .channel(&name)
                    .and_then(|c| c.topic.as_ref())
                    .map_or(0, |t| t.time.saturating_add(1));
                let now = self.now().max(set);
                self.relay_topic(&nick, &name, now, text, None, &mut out);
            }

            LocalRequest::Squit { server, reason } => {
                if !self.is_known(&server) || self.directory.topology.is_local(&server) {
                    return Err(LinkError::NoSuchServer(server));
                }
                let Some(link) = self.link(&server).map(|l| l.name.clone()) else {
                    return Err(LinkError::NoSuchLink(server));
                };
                info!(link = %link, reason = %reason, "squit requested");
                out = self.link_closed(&link, &reason);
                out.close.push((link, reason));
            }
        }
        Ok(out)
    }

    /// Display nickname of a local user.
    fn local_user(&self, nick: &str) -> LinkResult<String> {
        match self.directory.user(nick) {
            Some(user) if self.directory.is_local_user(user) => Ok(user.nick.clone()),
            _ => Err(LinkError::NoSuchNick(nick.to_string())),
        }
    }

    /// Display name of `channel` if `nick` is on it.
    fn member_of(&self, nick: &str, channel: &str) -> LinkResult<String> {
        let chan = self
            .directory
            .channel(channel)
            .ok_or_else(|| LinkError::NoSuchChannel(channel.to_string()))?;
        if !chan.is_member(&self.directory.fold(nick)) {
            return Err(LinkError::NotOnChannel {
                nick: nick.to_string(),
                channel: chan.name.clone(),
            });
        }
        Ok(chan.name.clone())
    }

    // ========================================================================
    // Remote operations
    // ========================================================================

    /// Apply a message received on `link` after the handshake.
    pub fn apply_remote(&mut self, link: &str, message: LinkMessage) -> LinkResult<Outcome> {
        match message {
            LinkMessage::Burst(burst) => self.merge_burst(link, burst),
            LinkMessage::AnnounceServer(announce) => self.apply_announce(link, announce),
            LinkMessage::DisconnectServer { name, reason, .. } => {
                self.apply_disconnect(link, &name, &reason)
            }
            LinkMessage::Introduce(_) => Err(LinkError::HandshakeAlreadyComplete),
            LinkMessage::Error(_)
            | LinkMessage::Fail { .. }
            | LinkMessage::Ping(_)
            | LinkMessage::Pong(_) => {
                Ok(Outcome::default())
            }
            other => {
                self.require_bursted(link)?;
                self.apply_relayed(link, other)
            }
        }
    }

    fn apply_relayed(&mut self, link: &str, message: LinkMessage) -> LinkResult<Outcome> {
        let mut out = Outcome::default();
        let kind = message.kind();
        let except = Some(link);

        match message {
            LinkMessage::NewUser(record) => {
                if !self.directory.topology.is_behind(&record.server, link) {
                    return Err(LinkError::DataInconsistent(format!(
                        "{} introduced on {} which is not behind {link}",
                        record.nick, record.server
                    )));
                }
                if self.directory.has_user(&record.nick) {
                    return Err(LinkError::DataInconsistent(format!(
                        "nickname collision on {}",
                        record.nick
                    )));
                }
                self.directory.add_user(User::from_record(&record));
                out.relay(
                    Target::AllExcept(link.to_string()),
                    LinkMessage::NewUser(record),
                );
            }

            LinkMessage::Quit { nick, reason } => {
                let Some(user) = self.directory.user(&nick) else {
                    debug!(nick = %nick, "quit for unknown user");
                    return Ok(out);
                };
                let nick = user.nick.clone();
                self.remove_user_with_notice(&nick, &reason, &mut out);
                out.relay(
                    Target::AllExcept(link.to_string()),
                    LinkMessage::Quit { nick, reason },
                );
            }

            LinkMessage::Nick {
                nick,
                new_nick,
                nick_time,
            } => {
                if !self.arrived_from(&nick, link, kind) {
                    return Ok(out);
                }
                if self.directory.fold(&nick) != self.directory.fold(&new_nick)
                    && self.directory.has_user(&new_nick)
                {
                    return Err(LinkError::DataInconsistent(format!(
                        "nickname collision on {new_nick}"
                    )));
                }
                let audience = self.directory.local_audience(&nick);
                self.directory.rename_user(&nick, &new_nick, nick_time);
                out.deliver(
                    audience,
                    ClientEvent::Nick {
                        old: nick.clone(),
                        new: new_nick.clone(),
                    },
                );
                out.relay(
                    Target::AllExcept(link.to_string()),
                    LinkMessage::Nick {
                        nick,
                        new_nick,
                        nick_time,
                    },
                );
            }

            LinkMessage::Join {
                nick,
                channel,
                created,
                status,
            } => {
                if !self.arrived_from(&nick, link, kind) {
                    return Ok(out);
                }
                if let Some((created, status)) =
                    self.remote_join(&nick, &channel, created, &status, &mut out)
                {
                    out.relay(
                        Target::AllExcept(link.to_string()),
                        LinkMessage::Join {
                            nick,
                            channel,
                            created,
                            status,
                        },
                    );
                }
            }

            LinkMessage::Part {
                nick,
                channel,
                reason,
            } => {
                if !self.arrived_from(&nick, link, kind) {
                    return Ok(out);
                }
                let Ok(name) = self.member_of(&nick, &channel) else {
                    debug!(nick = %nick, channel = %channel, "part from non-member");
                    return Ok(out);
                };
                let recipients = self.directory.local_members(&channel);
                self.directory.remove_member(&channel, &nick);
                out.deliver(
                    recipients,
                    ClientEvent::Part {
                        nick: nick.clone(),
                        channel: name.clone(),
                        reason: reason.clone(),
                    },
                );
                out.relay(
                    Target::AllExcept(link.to_string()),
                    LinkMessage::Part {
                        nick,
                        channel: name,
                        reason,
                    },
                );
            }

            LinkMessage::Mode {
                source,
                channel,
                created,
                changes,
            } => {
                if !self.arrived_from(&source, link, kind) {
                    return Ok(out);
                }
                let Some(chan) = self.directory.channel(&channel) else {
                    debug!(channel = %channel, "mode for unknown channel");
                    return Ok(out);
                };
                if created > chan.created {
                    debug!(channel = %channel, ours = chan.created, theirs = created,
                        "ignoring mode change for a newer channel");
                    return Ok(out);
                }
                let name = chan.name.clone();
                let changes: Vec<ModeChange> = changes
                    .into_iter()
                    .filter(|c| {
                        let known = self.registry.accepts(c.token.kind, c.token.letter);
                        if !known {
                            warn!(mode = %c, channel = %name, "dropping unknown mode from link");
                        }
                        known
                    })
                    .collect();
                self.relay_mode(&source, &name, &changes, except, &mut out);
            }

            LinkMessage::Topic {
                source,
                channel,
                topic_time,
                text,
            } => {
                if !self.arrived_from(&source, link, kind) {
                    return Ok(out);
                }
                let Some(name) = self.directory.channel(&channel).map(|c| c.name.clone()) else {
                    debug!(channel = %channel, "topic for unknown channel");
                    return Ok(out);
                };
                self.relay_topic(&source, &name, topic_time, text, except, &mut out);
            }

            other => {
                return Err(LinkError::Protocol(format!(
                    "unexpected {} after handshake",
                    other.kind()
                )));
            }
        }
        Ok(out)
    }

    /// Whether `source` (a nickname or server) sits behind `link`.
    ///
    /// Traffic from anything else is ignored: after a collision race the
    /// name may already belong to someone on another side of the mesh.
    fn arrived_from(&self, source: &str, link: &str, kind: &str) -> bool {
        let topology = &self.directory.topology;
        let server = match self.directory.user(source) {
            Some(user) => user.server.as_str(),
            None => source,
        };
        let ok = topology.is_behind(server, link);
        if !ok {
            warn!(source = %source, link = %link, kind, "ignoring message from wrong direction");
        }
        ok
    }

    /// Join a remote user, merging by timestamp if the channel exists.
    ///
    /// Returns the creation time and status actually applied, or `None` if
    /// the user was already on the channel.
    fn remote_join(
        &mut self,
        nick: &str,
        channel: &str,
        created: i64,
        status: &str,
        out: &mut Outcome,
    ) -> Option<(i64, String)> {
        let status = self.registry.normalize_status(status);
        let Some(before) = self.directory.channel(channel).cloned() else {
            self.directory.create_channel(channel, created);
            self.directory.add_member(channel, nick, &status);
            return Some((created, status));
        };

        let status = match created.cmp(&before.created) {
            Ordering::Equal => status,
            Ordering::Greater => String::new(),
            Ordering::Less => {
                if let Some(chan) = self.directory.channel_mut(channel) {
                    chan.created = created;
                    chan.modes = ModeSet::default();
                    chan.topic = None;
                    chan.members.values_mut().for_each(String::clear);
                }
                status
            }
        };
        let created = created.min(before.created);

        if !self.directory.add_member(channel, nick, &status) {
            return None;
        }
        let source = self
            .directory
            .user(nick)
            .map(|u| u.server.clone())
            .unwrap_or_default();
        let joined = self.directory.user(nick).map(|u| u.nick.clone());
        self.notify_channel_merge(&before, joined.as_slice(), &source, out);
        Some((created, status))
    }

    /// Apply mode changes and deliver/relay whatever actually changed.
    fn relay_mode(
        &mut self,
        source: &str,
        channel: &str,
        changes: &[ModeChange],
        except: Option<&str>,
        out: &mut Outcome,
    ) {
        let registry = self.registry.clone();
        let mut applied = Vec::new();
        for change in changes {
            let token = &change.token;
            if token.kind == ModeKind::RankedList {
                let Some(target) = token.param.as_deref() else {
                    continue;
                };
                let key = self.directory.fold(target);
                let Some(nick) = self.directory.user(target).map(|u| u.nick.clone()) else {
                    continue;
                };
                let Some(chan) = self.directory.channel_mut(channel) else {
                    return;
                };
                if chan.set_rank(&registry, &key, token.letter, change.adding) {
                    let token = ModeToken::with_param(ModeKind::RankedList, token.letter, nick);
                    applied.push(ModeChange {
                        adding: change.adding,
                        token,
                    });
                }
            } else if let Some(chan) = self.directory.channel_mut(channel)
                && chan.modes.apply(change)
            {
                applied.push(change.clone());
            }
        }

        let Some(created) = self.directory.channel(channel).map(|c| c.created) else {
            return;
        };
        if applied.is_empty() {
            return;
        }
        out.deliver(
            self.directory.local_members(channel),
            ClientEvent::Mode {
                source: source.to_string(),
                channel: channel.to_string(),
                changes: applied.clone(),
            },
        );
        out.relay(
            relay_target(except),
            LinkMessage::Mode {
                source: source.to_string(),
                channel: channel.to_string(),
                created,
                changes: applied,
            },
        );
    }

    fn relay_topic(
        &mut self,
        source: &str,
        channel: &str,
        topic_time: i64,
        text: String,
        except: Option<&str>,
        out: &mut Outcome,
    ) {
        let Some(chan) = self.directory.channel_mut(channel) else {
            return;
        };
        // Remote changes older than the current topic are dropped, ordered
        // as in a burst merge.
        if except.is_some()
            && let Some(current) = &chan.topic
            && (current.time, current.text.as_str(), current.setter.as_str())
                > (topic_time, text.as_str(), source)
        {
            debug!(channel = %channel, ours = current.time, theirs = topic_time, "ignoring stale topic");
            return;
        }
        chan.topic = (!text.is_empty()).then(|| crate::state::Topic {
            text: text.clone(),
            setter: source.to_string(),
            time: topic_time,
        });
        out.deliver(
            self.directory.local_members(channel),
            ClientEvent::Topic {
                source: source.to_string(),
                channel: channel.to_string(),
                text: text.clone(),
            },
        );
        out.relay(
            relay_target(except),
            LinkMessage::Topic {
                source: source.to_string(),
                channel: channel.to_string(),
                topic_time,
                text,
            },
        );
    }
}

fn relay_target(except: Option<&str>) -> Target {
    match except {
        Some(link) => Target::AllExcept(link.to_string()),
        None => Target::All,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::mesh::testing::*;

    fn mode(token: &str) -> ModeChange {
        token.parse().unwrap()
    }

    fn local_mode(mesh: &mut Mesh, nick: &str, channel: &str, changes: &[&str]) -> LinkResult<Outcome> {
        mesh.apply_local(LocalRequest::Mode {
            nick: nick.into(),
            channel: channel.into(),
            changes: changes.iter().map(|c| mode(c)).collect(),
        })
    }

    // ========================================================================
    // Validation helpers
    // ========================================================================

    #[test]
    fn nick_validation() {
        assert!(is_valid_nick("alice"));
        assert!(is_valid_nick("[bot]-2"));
        assert!(!is_valid_nick(""));
        assert!(!is_valid_nick("2fast"));
        assert!(!is_valid_nick("-dash"));
        assert!(!is_valid_nick("has space"));
        assert!(!is_valid_nick(&"x".repeat(31)));
    }

    #[test]
    fn channel_validation() {
        assert!(is_valid_channel("#rust"));
        assert!(is_valid_channel("&local"));
        assert!(!is_valid_channel("#"));
        assert!(!is_valid_channel("rust"));
        assert!(!is_valid_channel("#a,b"));
        assert!(!is_valid_channel("#a:b"));
    }

    // ========================================================================
    // Local operations
    // ========================================================================

    #[test]
    fn register_rejects_bad_and_taken_nicks() {
        let clock = ManualClock::new(100);
        let mut a = mesh("a.test", &clock);
        register(&mut a, "alice");

        let taken = a.apply_local(LocalRequest::Register(NewUser::new("ALICE")));
        assert!(matches!(taken, Err(LinkError::NicknameInUse(_))));
        let bad = a.apply_local(LocalRequest::Register(NewUser::new("9lives")));
        assert!(matches!(bad, Err(LinkError::ErroneousNickname(_))));
        assert!(!bad.unwrap_err().is_fatal());
    }

    #[test]
    fn register_relays_new_user_with_clock_times() {
        let clock = ManualClock::new(42);
        let mut a = mesh("a.test", &clock);
        let out = a
            .apply_local(LocalRequest::Register(NewUser::new("alice")))
            .unwrap();
        let LinkMessage::NewUser(record) = &out.relays[0].message else {
            panic!("expected UID, got {:?}", out.relays[0].message);
        };
        assert_eq!(record.server, "a.test");
        assert_eq!(record.nick_time, 42);
        assert_eq!(out.relays[0].target, Target::All);
    }

    #[test]
    fn join_creates_channel_with_founder_status() {
        let clock = ManualClock::new(100);
        let mut a = mesh("a.test", &clock);
        register(&mut a, "alice");
        register(&mut a, "bob");
        join(&mut a, "alice", "#new");
        clock.set(200);
        let out = a
            .apply_local(LocalRequest::Join {
                nick: "bob".into(),
                channel: "#NEW".into(),
            })
            .unwrap();

        let chan = a.directory().channel("#new").unwrap();
        assert_eq!(chan.created, 100);
        assert_eq!(chan.status("alice"), Some("o"));
        assert_eq!(chan.status("bob"), Some(""));
        assert_eq!(out.deliveries[0].recipients, vec!["alice", "bob"]);
        assert!(matches!(
            &out.relays[0].message,
            LinkMessage::Join { channel, created: 100, status, .. } if channel == "#new" && status.is_empty()
        ));
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let clock = ManualClock::new(100);
        let mut a = mesh("a.test", &clock);
        register(&mut a, "alice");
        join(&mut a, "alice", "#x");
        let err = local_mode(&mut a, "alice", "#x", &["+Bz"]).unwrap_err();
        assert!(matches!(err, LinkError::UnknownMode('z')));
        let err = local_mode(&mut a, "alice", "#x", &["+Roghost"]).unwrap_err();
        assert!(matches!(err, LinkError::NotOnChannel { .. }));
    }

    #[test]
    fn mode_changes_apply_and_skip_no_ops() {
        let clock = ManualClock::new(100);
        let mut a = mesh("a.test", &clock);
        register(&mut a, "alice");
        register(&mut a, "bob");
        join(&mut a, "alice", "#x");
        join(&mut a, "bob", "#x");

        let out = local_mode(&mut a, "alice", "#x", &["+Bt", "+Rvbob", "+Pl10"]).unwrap();
        let chan = a.directory().channel("#x").unwrap();
        assert_eq!(chan.modes.mode_string(), "+tl 10");
        assert_eq!(chan.status("bob"), Some("v"));
        assert!(matches!(
            &out.relays[0].message,
            LinkMessage::Mode { created: 100, changes, .. } if changes.len() == 3
        ));

        let again = local_mode(&mut a, "alice", "#x", &["+Bt"]).unwrap();
        assert!(again.is_empty());

        local_mode(&mut a, "alice", "#x", &["-Pl"]).unwrap();
        assert!(a.directory().channel("#x").unwrap().modes.params.is_empty());
    }

    #[test]
    fn part_and_quit_notify_channel() {
        let clock = ManualClock::new(100);
        let mut a = mesh("a.test", &clock);
        register(&mut a, "alice");
        register(&mut a, "bob");
        join(&mut a, "alice", "#x");
        join(&mut a, "bob", "#x");

        let out = a
            .apply_local(LocalRequest::Quit {
                nick: "bob".into(),
                reason: "bye".into(),
            })
            .unwrap();
        assert_eq!(out.deliveries[0].recipients, vec!["alice"]);

        a.apply_local(LocalRequest::Part {
            nick: "alice".into(),
            channel: "#x".into(),
            reason: String::new(),
        })
        .unwrap();
        assert!(a.directory().channel("#x").is_none());

        let err = a
            .apply_local(LocalRequest::Part {
                nick: "alice".into(),
                channel: "#x".into(),
                reason: String::new(),
            })
            .unwrap_err();
        assert!(matches!(err, LinkError::NoSuchChannel(_)));
    }

    #[test]
    fn nick_change_updates_time_and_relays() {
        let clock = ManualClock::new(100);
        let mut a = mesh("a.test", &clock);
        register(&mut a, "alice");
        register(&mut a, "bob");
        clock.set(150);

        let err = a
            .apply_local(LocalRequest::Nick {
                nick: "alice".into(),
                new_nick: "BOB".into(),
            })
            .unwrap_err();
        assert!(matches!(err, LinkError::NicknameInUse(_)));

        let out = a
            .apply_local(LocalRequest::Nick {
                nick: "alice".into(),
                new_nick: "Alicia".into(),
            })
            .unwrap();
        assert_eq!(a.directory().user("alicia").unwrap().nick_time, 150);
        assert!(matches!(
            &out.relays[0].message,
            LinkMessage::Nick { nick_time: 150, .. }
        ));
    }

    #[test]
    fn squit_only_drops_adjacent_links() {
        let clock = ManualClock::new(100);
        let mut a = mesh("a.test", &clock);
        let mut b = mesh("b.test", &clock);
        let mut c = mesh("c.test", &clock);
        link(&mut b, &mut c);
        link(&mut a, &mut b);

        let err = a
            .apply_local(LocalRequest::Squit {
                server: "c.test".into(),
                reason: "no".into(),
            })
            .unwrap_err();
        assert!(matches!(err, LinkError::NoSuchLink(_)));
        let err = a
            .apply_local(LocalRequest::Squit {
                server: "x.test".into(),
                reason: "no".into(),
            })
            .unwrap_err();
        assert!(matches!(err, LinkError::NoSuchServer(_)));

        let out = a
            .apply_local(LocalRequest::Squit {
                server: "b.test".into(),
                reason: "maintenance".into(),
            })
            .unwrap();
        assert_eq!(out.close, vec![("b.test".to_string(), "maintenance".to_string())]);
        assert!(!a.is_known("c.test"));
    }

    // ========================================================================
    // Remote operations
    // ========================================================================

    /// a and b linked, alice on a and bob on b, both on #x.
    fn pair() -> (ManualClock, Mesh, Mesh) {
        let clock = ManualClock::new(100);
        let mut a = mesh("a.test", &clock);
        let mut b = mesh("b.test", &clock);
        register(&mut a, "alice");
        register(&mut b, "bob");
        join(&mut a, "alice", "#x");
        join(&mut b, "bob", "#x");
        link(&mut a, &mut b);
        (clock, a, b)
    }

    #[test]
    fn steady_state_round_trip() {
        let (_clock, mut a, mut b) = pair();
        let out = local_mode(&mut a, "alice", "#x", &["+Bm", "+Rvbob"]).unwrap();
        let outs = forward(&out, &a, &mut b);

        let chan = b.directory().channel("#x").unwrap();
        assert!(chan.modes.flags.contains(&'m'));
        assert_eq!(chan.status("bob"), Some("ov"));
        assert_eq!(outs[0].deliveries[0].recipients, vec!["bob"]);
        assert!(sent_to(&outs[0], "a.test").is_empty());
    }

    #[test]
    fn remote_mode_for_newer_channel_is_ignored() {
        let (_clock, _a, mut b) = pair();
        let msg = LinkMessage::Mode {
            source: "alice".into(),
            channel: "#x".into(),
            created: 500,
            changes: vec![mode("+Bs")],
        };
        let out = b.apply_remote("a.test", msg).unwrap();
        assert!(out.is_empty());
        assert!(b.directory().channel("#x").unwrap().modes.flags.is_empty());
    }

    fn topic(nick: &str, text: &str) -> LocalRequest {
        LocalRequest::Topic {
            nick: nick.into(),
            channel: "#x".into(),
            text: text.into(),
        }
    }

    #[test]
    fn stale_remote_topic_is_ignored() {
        let (clock, mut a, mut b) = pair();
        clock.set(300);
        let out = a.apply_local(topic("alice", "fresh")).unwrap();
        forward(&out, &a, &mut b);

        let stale = LinkMessage::Topic {
            source: "alice".into(),
            channel: "#x".into(),
            topic_time: 200,
            text: "old news".into(),
        };
        let out = b.apply_remote("a.test", stale).unwrap();
        assert!(out.is_empty());
        let current = b.directory().channel("#x").unwrap().topic.clone().unwrap();
        assert_eq!(current.text, "fresh");
        assert_eq!(current.time, 300);
    }

    #[test]
    fn local_topic_is_stamped_after_the_current_one() {
        let (clock, mut a, mut b) = pair();
        clock.set(900);
        let out = b.apply_local(topic("bob", "from b")).unwrap();
        forward(&out, &b, &mut a);

        // a's clock lags behind b's.
        clock.set(500);
        let out = a.apply_local(topic("alice", "from a")).unwrap();
        forward(&out, &a, &mut b);

        for m in [&a, &b] {
            let current = m.directory().channel("#x").unwrap().topic.clone().unwrap();
            assert_eq!(current.text, "from a");
            assert_eq!(current.time, 901);
        }
    }

    #[test]
    fn remote_messages_from_wrong_direction_are_ignored() {
        let (_clock, mut a, _b) = pair();
        let msg = LinkMessage::Part {
            nick: "alice".into(),
            channel: "#x".into(),
            reason: String::new(),
        };
        let out = a.apply_remote("b.test", msg).unwrap();
        assert!(out.is_empty());
        assert!(a.directory().channel("#x").unwrap().is_member("alice"));
    }

    #[test]
    fn remote_quit_of_local_user_disconnects_it() {
        let (_clock, mut a, _b) = pair();
        let out = a
            .apply_remote(
                "b.test",
                LinkMessage::Quit {
                    nick: "ALICE".into(),
                    reason: "nickname collision".into(),
                },
            )
            .unwrap();
        assert!(!a.directory().has_user("alice"));
        assert!(out.deliveries.iter().any(|d| matches!(
            &d.event,
            ClientEvent::Disconnect { nick, .. } if nick == "alice"
        )));
    }

    #[test]
    fn remote_new_user_collision_is_fatal() {
        let (_clock, mut a, mut b) = pair();
        let mut clash = a.directory().user_record("alice").unwrap();
        clash.server = "b.test".into();
        let err = a
            .apply_remote("b.test", LinkMessage::NewUser(clash))
            .unwrap_err();
        assert!(matches!(err, LinkError::DataInconsistent(_)));
        assert!(err.is_fatal());

        let out = b
            .apply_local(LocalRequest::Register(NewUser::new("dave")))
            .unwrap();
        forward(&out, &b, &mut a);
        assert!(a.directory().user("dave").unwrap().is_on("b.test"));
    }

    #[test]
    fn remote_join_with_older_timestamp_takes_over() {
        let (_clock, mut a, _b) = pair();
        local_mode(&mut a, "alice", "#x", &["+Bt"]).unwrap();

        let out = a
            .apply_remote(
                "b.test",
                LinkMessage::Join {
                    nick: "bob".into(),
                    channel: "#y".into(),
                    created: 50,
                    status: "o".into(),
                },
            )
            .unwrap();
        assert_eq!(a.directory().channel("#y").unwrap().created, 50);
        assert!(out.deliveries.is_empty());

        let out = a
            .apply_remote(
                "b.test",
                LinkMessage::Part {
                    nick: "bob".into(),
                    channel: "#x".into(),
                    reason: String::new(),
                },
            )
            .unwrap();
        assert_eq!(out.deliveries.len(), 1);

        let out = a
            .apply_remote(
                "b.test",
                LinkMessage::Join {
                    nick: "bob".into(),
                    channel: "#x".into(),
                    created: 50,
                    status: "o".into(),
                },
            )
            .unwrap();
        let chan = a.directory().channel("#x").unwrap();
        assert_eq!(chan.created, 50);
        assert!(chan.modes.is_empty());
        assert_eq!(chan.status("alice"), Some(""));
        assert_eq!(chan.status("bob"), Some("o"));
        assert!(out.deliveries.iter().any(|d| matches!(
            &d.event,
            ClientEvent::Mode { source, .. } if source == "b.test"
        )));
        assert!(matches!(
            &sent_to(&out, "c.test")[0],
            LinkMessage::Join { created: 50, .. }
        ));
    }

    #[test]
    fn steady_state_before_burst_is_recoverable() {
        let clock = ManualClock::new(100);
        let mut a = mesh("a.test", &clock);
        a.attach_link("b.test", "").unwrap();
        let err = a
            .apply_remote("b.test", LinkMessage::Quit { nick: "x".into(), reason: String::new() })
            .unwrap_err();
        assert!(matches!(err, LinkError::NotYetBursted));
    }

    #[test]
    fn introduce_after_handshake_is_fatal() {
        let (_clock, mut a, _b) = pair();
        let err = a
            .apply_remote(
                "b.test",
                LinkMessage::Introduce(meshirc_proto::Introduce {
                    name: "b.test".into(),
                    secret: "x".into(),
                    description: String::new(),
                    protocol_version: 3,
                    common_extensions: vec![],
                }),
            )
            .unwrap_err();
        assert!(matches!(err, LinkError::HandshakeAlreadyComplete));
    }
}
