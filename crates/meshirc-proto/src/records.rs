//! Burst records: `SERVER`, `UID` and `SJOIN` lines.
//!
//! Records describe one entity completely. They appear inside `BURST`/`EOB`
//! and `NEWSERVER`/`ENDSERVER` brackets; a bare `UID` line is also the
//! steady-state introduction of a new remote user.
//!
//! A record whose lists do not fit in one link line is sent as several
//! lines repeating the same header, each carrying a slice of the lists.
//! Consecutive lines for the same entity are folded back together with
//! `absorb`.

use crate::error::ParseError;
use crate::message::{
    chunk_list, empty_as_star, join_list, parse_num, split_list, star_as_empty, Message,
};
use crate::mode::ModeToken;
use crate::MAX_LINK_LINE_LEN;

/// Bytes left for list fields once `header` (with every list written as
/// `*`) and the line terminator are accounted for, split over `lists`.
fn list_budget(header: &Message, lists: usize) -> usize {
    let used = header.to_string().len() + 2 + lists;
    (MAX_LINK_LINE_LEN.saturating_sub(used) / lists).max(1)
}

/// A server known to the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRecord {
    /// Server name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Hops from the sender.
    pub hop_count: u32,
    /// The server through which `name` is reached from the sender.
    pub near_hop: String,
    /// Servers reachable only through `name`.
    pub reachable: Vec<String>,
}

impl ServerRecord {
    /// Command name.
    pub const COMMAND: &'static str = "SERVER";

    /// Encode as a `SERVER` line.
    pub fn to_message(&self) -> Message {
        Message::new(
            Self::COMMAND,
            [
                self.name.clone(),
                self.hop_count.to_string(),
                self.near_hop.clone(),
                join_list(&self.reachable),
            ],
        )
        .with_trailing(self.description.clone())
    }

    /// Decode a `SERVER` line.
    pub fn from_message(msg: &Message) -> Result<Self, ParseError> {
        msg.expect_params(Self::COMMAND, 5)?;
        Ok(Self {
            name: msg.params[0].clone(),
            hop_count: parse_num("hopcount", &msg.params[1])?,
            near_hop: msg.params[2].clone(),
            reachable: split_list(&msg.params[3]),
            description: msg.params[4].clone(),
        })
    }
}

/// A channel membership carried on a user record: channel name plus status letters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    /// Channel name.
    pub channel: String,
    /// Ranked-list letters held by the user (`"ov"`), possibly empty.
    pub status: String,
}

impl Membership {
    /// Build a membership.
    pub fn new(channel: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            status: status.into(),
        }
    }

    fn encode(&self) -> String {
        format!("{}:{}", self.channel, self.status)
    }

    fn decode(token: &str) -> Result<Self, ParseError> {
        let (channel, status) = token
            .rsplit_once(':')
            .ok_or_else(|| ParseError::InvalidMembership(token.to_string()))?;
        if channel.is_empty() || !status.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ParseError::InvalidMembership(token.to_string()));
        }
        Ok(Self::new(channel, status))
    }
}

/// A user, local or remote to the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    /// Nickname.
    pub nick: String,
    /// Username (ident).
    pub username: String,
    /// Hostname.
    pub hostname: String,
    /// Real name.
    pub realname: String,
    /// IP address as text.
    pub ip: String,
    /// Name of the server the user is connected to.
    pub server: String,
    /// Connected over TLS.
    pub secure: bool,
    /// User mode letters.
    pub modes: Vec<String>,
    /// Channel memberships.
    pub channels: Vec<Membership>,
    /// Connection time (Unix seconds).
    pub signon: i64,
    /// Time of the last nickname change (Unix seconds).
    pub nick_time: i64,
}

impl UserRecord {
    /// Command name.
    pub const COMMAND: &'static str = "UID";

    /// Encode as a `UID` line.
    pub fn to_message(&self) -> Message {
        Message::new(
            Self::COMMAND,
            [
                self.nick.clone(),
                self.username.clone(),
                self.hostname.clone(),
                self.ip.clone(),
                self.server.clone(),
                if self.secure { "1" } else { "0" }.to_string(),
                self.signon.to_string(),
                self.nick_time.to_string(),
                join_list(&self.modes),
                join_list(self.channels.iter().map(Membership::encode)),
            ],
        )
        .with_trailing(self.realname.clone())
    }

    /// Encode as one or more `UID` lines, splitting memberships so every
    /// line fits the link limit.
    pub fn to_messages(&self) -> Vec<Message> {
        let mut header = self.to_message();
        header.params[9] = "*".to_string();
        let budget = list_budget(&header, 1);
        chunk_list(self.channels.iter().map(Membership::encode), budget)
            .into_iter()
            .map(|chunk| {
                let mut line = header.clone();
                line.params[9] = chunk;
                line
            })
            .collect()
    }

    /// Fold a continuation line for the same user into `self`.
    ///
    /// Returns `next` unchanged when it describes a different user.
    pub fn absorb(&mut self, next: Self) -> Option<Self> {
        if next.nick != self.nick || next.server != self.server || next.nick_time != self.nick_time
        {
            return Some(next);
        }
        self.channels.extend(next.channels);
        None
    }

    /// Decode a `UID` line.
    pub fn from_message(msg: &Message) -> Result<Self, ParseError> {
        msg.expect_params(Self::COMMAND, 11)?;
        let p = &msg.params;
        let secure = match p[5].as_str() {
            "0" => false,
            "1" => true,
            other => {
                return Err(ParseError::InvalidNumber {
                    field: "secure",
                    value: other.to_string(),
                })
            }
        };
        let channels = split_list(&p[9])
            .iter()
            .map(|token| Membership::decode(token))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            nick: p[0].clone(),
            username: p[1].clone(),
            hostname: p[2].clone(),
            ip: p[3].clone(),
            server: p[4].clone(),
            secure,
            signon: parse_num("signon", &p[6])?,
            nick_time: parse_num("nicktime", &p[7])?,
            modes: split_list(&p[8]),
            channels,
            realname: p[10].clone(),
        })
    }
}

/// A channel as seen by the sender.
///
/// Ranked-list state (`+o`, `+v`, ...) is not repeated here; it travels on
/// the members' [`UserRecord::channels`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    /// Channel name.
    pub name: String,
    /// Topic text, empty when unset.
    pub topic: String,
    /// Who set the topic, empty when unset.
    pub topic_setter: String,
    /// When the topic was set (Unix seconds), 0 when unset.
    pub topic_time: i64,
    /// Boolean, parameter and unranked-list modes.
    pub modes: Vec<ModeToken>,
    /// Member nicknames.
    pub members: Vec<String>,
    /// Creation timestamp.
    pub created: i64,
}

impl ChannelRecord {
    /// Command name.
    pub const COMMAND: &'static str = "SJOIN";

    /// Encode as an `SJOIN` line.
    pub fn to_message(&self) -> Message {
        Message::new(
            Self::COMMAND,
            [
                self.name.clone(),
                self.created.to_string(),
                self.topic_time.to_string(),
                empty_as_star(&self.topic_setter).to_string(),
                join_list(self.modes.iter().map(ToString::to_string)),
                join_list(&self.members),
            ],
        )
        .with_trailing(self.topic.clone())
    }

    /// Encode as one or more `SJOIN` lines, splitting modes and members so
    /// every line fits the link limit.
    pub fn to_messages(&self) -> Vec<Message> {
        let mut header = self.to_message();
        header.params[4] = "*".to_string();
        header.params[5] = "*".to_string();
        let budget = list_budget(&header, 2);
        let modes = chunk_list(self.modes.iter().map(ToString::to_string), budget);
        let members = chunk_list(&self.members, budget);
        (0..modes.len().max(members.len()))
            .map(|i| {
                let mut line = header.clone();
                if let Some(chunk) = modes.get(i) {
                    line.params[4] = chunk.clone();
                }
                if let Some(chunk) = members.get(i) {
                    line.params[5] = chunk.clone();
                }
                line
            })
            .collect()
    }

    /// Fold a continuation line for the same channel into `self`.
    ///
    /// Returns `next` unchanged when it describes a different channel.
    pub fn absorb(&mut self, next: Self) -> Option<Self> {
        if next.name != self.name || next.created != self.created {
            return Some(next);
        }
        self.modes.extend(next.modes);
        self.members.extend(next.members);
        None
    }

    /// Decode an `SJOIN` line.
    pub fn from_message(msg: &Message) -> Result<Self, ParseError> {
        msg.expect_params(Self::COMMAND, 7)?;
        let p = &msg.params;
        let modes = split_list(&p[4])
            .iter()
            .map(|token| token.parse::<ModeToken>())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: p[0].clone(),
            created: parse_num("created", &p[1])?,
            topic_time: parse_num("topictime", &p[2])?,
            topic_setter: star_as_empty(&p[3]),
            modes,
            members: split_list(&p[5]),
            topic: p[6].clone(),
        })
    }
}
