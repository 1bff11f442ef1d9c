//! Typed link messages.
//!
//! Single-line messages convert to and from [`Message`] directly. Bursts and
//! server announcements span several lines and are assembled by
//! [`crate::codec::LinkCodec`]; [`LinkMessage::to_lines`] gives the full line
//! sequence for any message.

use crate::error::ParseError;
use crate::message::{join_list, parse_num, split_list, star_as_empty, Message};
use crate::mode::ModeChange;
use crate::records::{ChannelRecord, ServerRecord, UserRecord};

/// Opening handshake sent by both ends of a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Introduce {
    /// Sender's server name.
    pub name: String,
    /// Shared secret for the receiver.
    pub secret: String,
    /// Sender's description.
    pub description: String,
    /// Sender's protocol version.
    pub protocol_version: u32,
    /// Sorted network-affecting extension identifiers.
    pub common_extensions: Vec<String>,
}

/// A full state snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Burst {
    /// Every server known to the sender except itself.
    pub servers: Vec<ServerRecord>,
    /// Every user known to the sender.
    pub users: Vec<UserRecord>,
    /// Every channel known to the sender.
    pub channels: Vec<ChannelRecord>,
}

/// Propagation of a newly linked server subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceServer {
    /// Server that relayed this announcement.
    pub origin: String,
    /// Root of the new subtree.
    pub name: String,
    /// Its description.
    pub description: String,
    /// Hops from the sender.
    pub hop_count: u32,
    /// The server the subtree hangs off.
    pub near_hop: String,
    /// Servers behind `name`.
    pub linked_servers: Vec<ServerRecord>,
    /// Users on the subtree.
    pub users: Vec<UserRecord>,
    /// Channels those users are in.
    pub channels: Vec<ChannelRecord>,
}

/// Every message that can cross a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkMessage {
    /// `INTRODUCE`
    Introduce(Introduce),
    /// `BURST` ... `EOB`
    Burst(Burst),
    /// `NEWSERVER` ... `ENDSERVER`
    AnnounceServer(AnnounceServer),
    /// `SQUIT`: a server left the mesh.
    DisconnectServer {
        /// Server that relayed the split.
        origin: String,
        /// Server being removed.
        name: String,
        /// Reason shown to users.
        reason: String,
    },
    /// `ERROR`: the sender is about to close the link.
    Error(String),
    /// `FAIL`: the sender dropped one of our messages but keeps the link.
    Fail {
        /// Machine-readable error code.
        code: String,
        /// Human-readable description.
        reason: String,
    },
    /// `PING`
    Ping(String),
    /// `PONG`
    Pong(String),
    /// Bare `UID`: a user connected somewhere behind the sender.
    NewUser(UserRecord),
    /// `QUIT`
    Quit {
        /// Nickname leaving.
        nick: String,
        /// Quit message.
        reason: String,
    },
    /// `NICK`
    Nick {
        /// Old nickname.
        nick: String,
        /// New nickname.
        new_nick: String,
        /// Time of the change.
        nick_time: i64,
    },
    /// `JOIN`
    Join {
        /// Joining nickname.
        nick: String,
        /// Channel name.
        channel: String,
        /// Channel creation time as known to the sender.
        created: i64,
        /// Initial status letters.
        status: String,
    },
    /// `PART`
    Part {
        /// Leaving nickname.
        nick: String,
        /// Channel name.
        channel: String,
        /// Part message.
        reason: String,
    },
    /// `MODE`
    Mode {
        /// Nickname or server that set the modes.
        source: String,
        /// Channel name.
        channel: String,
        /// Channel creation time as known to the sender.
        created: i64,
        /// Changes, applied in order.
        changes: Vec<ModeChange>,
    },
    /// `TOPIC`
    Topic {
        /// Nickname or server that set the topic.
        source: String,
        /// Channel name.
        channel: String,
        /// When it was set.
        topic_time: i64,
        /// New topic, empty to clear.
        text: String,
    },
}

/// Commands that open a multi-line bracket.
pub const BURST: &str = "BURST";
/// Closes a burst.
pub const END_OF_BURST: &str = "EOB";
/// Opens a server announcement.
pub const NEW_SERVER: &str = "NEWSERVER";
/// Closes a server announcement.
pub const END_SERVER: &str = "ENDSERVER";

impl LinkMessage {
    /// Short name for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Introduce(_) => "introduce",
            Self::Burst(_) => "burst",
            Self::AnnounceServer(_) => "announce",
            Self::DisconnectServer { .. } => "squit",
            Self::Error(_) => "error",
            Self::Fail { .. } => "fail",
            Self::Ping(_) => "ping",
            Self::Pong(_) => "pong",
            Self::NewUser(_) => "uid",
            Self::Quit { .. } => "quit",
            Self::Nick { .. } => "nick",
            Self::Join { .. } => "join",
            Self::Part { .. } => "part",
            Self::Mode { .. } => "mode",
            Self::Topic { .. } => "topic",
        }
    }

    /// Serialize into wire lines.
    pub fn to_lines(&self) -> Vec<Message> {
        match self {
            Self::Introduce(intro) => vec![Message::new(
                "INTRODUCE",
                [
                    intro.name.clone(),
                    intro.secret.clone(),
                    intro.protocol_version.to_string(),
                    join_list(&intro.common_extensions),
                ],
            )
            .with_trailing(intro.description.clone())],
            Self::Burst(burst) => {
                let mut lines = Vec::with_capacity(
                    burst.servers.len() + burst.users.len() + burst.channels.len() + 2,
                );
                lines.push(Message::new(BURST, Vec::<String>::new()));
                lines.extend(burst.servers.iter().map(ServerRecord::to_message));
                lines.extend(burst.users.iter().flat_map(UserRecord::to_messages));
                lines.extend(burst.channels.iter().flat_map(ChannelRecord::to_messages));
                lines.push(Message::new(END_OF_BURST, Vec::<String>::new()));
                lines
            }
            Self::AnnounceServer(ann) => {
                let mut lines = Vec::with_capacity(
                    ann.linked_servers.len() + ann.users.len() + ann.channels.len() + 2,
                );
                lines.push(
                    Message::new(
                        NEW_SERVER,
                        [ann.name.clone(), ann.hop_count.to_string(), ann.near_hop.clone()],
                    )
                    .with_source(ann.origin.clone())
                    .with_trailing(ann.description.clone()),
                );
                lines.extend(ann.linked_servers.iter().map(ServerRecord::to_message));
                lines.extend(ann.users.iter().flat_map(UserRecord::to_messages));
                lines.extend(ann.channels.iter().flat_map(ChannelRecord::to_messages));
                lines.push(Message::new(END_SERVER, [ann.name.clone()]));
                lines
            }
            Self::DisconnectServer {
                origin,
                name,
                reason,
            } => vec![Message::new("SQUIT", [name.clone()])
                .with_source(origin.clone())
                .with_trailing(reason.clone())],
            Self::Error(reason) => {
                vec![Message::new("ERROR", Vec::<String>::new()).with_trailing(reason.clone())]
            }
            Self::Fail { code, reason } => {
                vec![Message::new("FAIL", [code.clone()]).with_trailing(reason.clone())]
            }
            Self::Ping(token) => vec![Message::new("PING", [token.clone()])],
            Self::Pong(token) => vec![Message::new("PONG", [token.clone()])],
            Self::NewUser(user) => vec![user.to_message()],
            Self::Quit { nick, reason } => vec![Message::new("QUIT", Vec::<String>::new())
                .with_source(nick.clone())
                .with_trailing(reason.clone())],
            Self::Nick {
                nick,
                new_nick,
                nick_time,
            } => vec![Message::new("NICK", [new_nick.clone(), nick_time.to_string()])
                .with_source(nick.clone())],
            Self::Join {
                nick,
                channel,
                created,
                status,
            } => vec![Message::new(
                "JOIN",
                [
                    channel.clone(),
                    created.to_string(),
                    crate::message::empty_as_star(status).to_string(),
                ],
            )
            .with_source(nick.clone())],
            Self::Part {
                nick,
                channel,
                reason,
            } => vec![Message::new("PART", [channel.clone()])
                .with_source(nick.clone())
                .with_trailing(reason.clone())],
            Self::Mode {
                source,
                channel,
                created,
                changes,
            } => vec![Message::new(
                "MODE",
                [
                    channel.clone(),
                    created.to_string(),
                    join_list(changes.iter().map(ToString::to_string)),
                ],
            )
            .with_source(source.clone())],
            Self::Topic {
                source,
                channel,
                topic_time,
                text,
            } => vec![Message::new("TOPIC", [channel.clone(), topic_time.to_string()])
                .with_source(source.clone())
                .with_trailing(text.clone())],
        }
    }

    /// Parse a single-line message.
    ///
    /// Bracketed commands (`BURST`, `NEWSERVER` and their records) are
    /// rejected here; they only make sense through the codec.
    pub fn from_message(msg: &Message) -> Result<Self, ParseError> {
        let source = |command: &'static str| {
            msg.source.clone().ok_or(ParseError::NotEnoughParams {
                command,
                expected: 1,
                got: 0,
            })
        };

        match msg.command.as_str() {
            "INTRODUCE" => {
                msg.expect_params("INTRODUCE", 5)?;
                Ok(Self::Introduce(Introduce {
                    name: msg.params[0].clone(),
                    secret: msg.params[1].clone(),
                    protocol_version: parse_num("version", &msg.params[2])?,
                    common_extensions: split_list(&msg.params[3]),
                    description: msg.params[4].clone(),
                }))
            }
            "SQUIT" => Ok(Self::DisconnectServer {
                origin: source("SQUIT")?,
                name: msg.arg("SQUIT", 0)?.to_string(),
                reason: msg.params.get(1).cloned().unwrap_or_default(),
            }),
            "ERROR" => Ok(Self::Error(msg.params.first().cloned().unwrap_or_default())),
            "FAIL" => Ok(Self::Fail {
                code: msg.arg("FAIL", 0)?.to_string(),
                reason: msg.params.get(1).cloned().unwrap_or_default(),
            }),
            "PING" => Ok(Self::Ping(msg.arg("PING", 0)?.to_string())),
            "PONG" => Ok(Self::Pong(msg.arg("PONG", 0)?.to_string())),
            "UID" => Ok(Self::NewUser(UserRecord::from_message(msg)?)),
            "QUIT" => Ok(Self::Quit {
                nick: source("QUIT")?,
                reason: msg.params.first().cloned().unwrap_or_default(),
            }),
            "NICK" => Ok(Self::Nick {
                nick: source("NICK")?,
                new_nick: msg.arg("NICK", 0)?.to_string(),
                nick_time: parse_num("nicktime", msg.arg("NICK", 1)?)?,
            }),
            "JOIN" => Ok(Self::Join {
                nick: source("JOIN")?,
                channel: msg.arg("JOIN", 0)?.to_string(),
                created: parse_num("created", msg.arg("JOIN", 1)?)?,
                status: star_as_empty(msg.arg("JOIN", 2)?),
            }),
            "PART" => Ok(Self::Part {
                nick: source("PART")?,
                channel: msg.arg("PART", 0)?.to_string(),
                reason: msg.params.get(1).cloned().unwrap_or_default(),
            }),
            "MODE" => {
                let changes = split_list(msg.arg("MODE", 2)?)
                    .iter()
                    .map(|c| c.parse::<ModeChange>())
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Mode {
                    source: source("MODE")?,
                    channel: msg.arg("MODE", 0)?.to_string(),
                    created: parse_num("created", msg.arg("MODE", 1)?)?,
                    changes,
                })
            }
            "TOPIC" => Ok(Self::Topic {
                source: source("TOPIC")?,
                channel: msg.arg("TOPIC", 0)?.to_string(),
                topic_time: parse_num("topictime", msg.arg("TOPIC", 1)?)?,
                text: msg.params.get(2).cloned().unwrap_or_default(),
            }),
            other => Err(ParseError::UnknownCommand(other.to_string())),
        }
    }

    /// Parse the header line of an announcement.
    pub(crate) fn announce_header(msg: &Message) -> Result<AnnounceServer, ParseError> {
        msg.expect_params(NEW_SERVER, 4)?;
        Ok(AnnounceServer {
            origin: msg.source.clone().ok_or(ParseError::NotEnoughParams {
                command: NEW_SERVER,
                expected: 1,
                got: 0,
            })?,
            name: msg.params[0].clone(),
            hop_count: parse_num("hopcount", &msg.params[1])?,
            near_hop: msg.params[2].clone(),
            description: msg.params[3].clone(),
            linked_servers: Vec::new(),
            users: Vec::new(),
            channels: Vec::new(),
        })
    }
}
