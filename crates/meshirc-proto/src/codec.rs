//! Tokio codec for link traffic.
//!
//! [`LinkCodec`] splits the byte stream into lines, parses them and
//! assembles bracketed bursts and announcements. A bracket is only yielded
//! once its terminator arrives, so a stream that ends mid-burst yields nothing
//! for it.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::command::{AnnounceServer, Burst, LinkMessage, END_OF_BURST, END_SERVER, NEW_SERVER};
use crate::error::{self, ProtocolError};
use crate::message::Message;
use crate::records::{ChannelRecord, ServerRecord, UserRecord};
use crate::MAX_LINK_LINE_LEN;

enum Pending {
    Burst(Burst),
    Announce(AnnounceServer),
}

impl Pending {
    fn push_server(&mut self, server: ServerRecord) {
        match self {
            Self::Burst(b) => b.servers.push(server),
            Self::Announce(a) => a.linked_servers.push(server),
        }
    }

    /// Add a user, folding a continuation line into the previous record.
    fn push_user(&mut self, user: UserRecord) {
        let users = match self {
            Self::Burst(b) => &mut b.users,
            Self::Announce(a) => &mut a.users,
        };
        let user = match users.last_mut() {
            Some(last) => last.absorb(user),
            None => Some(user),
        };
        users.extend(user);
    }

    /// Add a channel, folding a continuation line into the previous record.
    fn push_channel(&mut self, channel: ChannelRecord) {
        let channels = match self {
            Self::Burst(b) => &mut b.channels,
            Self::Announce(a) => &mut a.channels,
        };
        let channel = match channels.last_mut() {
            Some(last) => last.absorb(channel),
            None => Some(channel),
        };
        channels.extend(channel);
    }
}

/// Line codec producing whole [`LinkMessage`]s.
pub struct LinkCodec {
    /// Index of next byte to check for newline
    next_index: usize,
    max_len: usize,
    pending: Option<Pending>,
}

impl Default for LinkCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkCodec {
    /// Codec with the default line limit ([`MAX_LINK_LINE_LEN`]).
    pub fn new() -> Self {
        Self::with_max_len(MAX_LINK_LINE_LEN)
    }

    /// Codec with a custom line limit.
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            next_index: 0,
            max_len,
            pending: None,
        }
    }

    /// Whether a burst or announcement is partially received.
    pub fn in_bracket(&self) -> bool {
        self.pending.is_some()
    }

    fn next_line(&mut self, src: &mut BytesMut) -> error::Result<Option<String>> {
        let Some(offset) = src[self.next_index..].iter().position(|b| *b == b'\n') else {
            self.next_index = src.len();
            if src.len() > self.max_len {
                return Err(ProtocolError::LineTooLong(src.len()));
            }
            return Ok(None);
        };

        let line = src.split_to(self.next_index + offset + 1);
        self.next_index = 0;
        if line.len() > self.max_len {
            return Err(ProtocolError::LineTooLong(line.len()));
        }
        String::from_utf8(line.to_vec())
            .map(Some)
            .map_err(|_| ProtocolError::InvalidUtf8)
    }

    fn unexpected(msg: &Message, context: &'static str) -> ProtocolError {
        ProtocolError::UnexpectedFrame {
            command: msg.command.clone(),
            context,
        }
    }

    fn handle(&mut self, msg: Message) -> error::Result<Option<LinkMessage>> {
        match msg.command.as_str() {
            "BURST" => {
                if self.pending.is_some() {
                    return Err(Self::unexpected(&msg, "inside a bracket"));
                }
                self.pending = Some(Pending::Burst(Burst::default()));
                Ok(None)
            }
            NEW_SERVER => {
                if self.pending.is_some() {
                    return Err(Self::unexpected(&msg, "inside a bracket"));
                }
                let header = LinkMessage::announce_header(&msg)?;
                self.pending = Some(Pending::Announce(header));
                Ok(None)
            }
            END_OF_BURST => match self.pending.take() {
                Some(Pending::Burst(burst)) => Ok(Some(LinkMessage::Burst(burst))),
                _ => Err(Self::unexpected(&msg, "outside a burst")),
            },
            END_SERVER => match self.pending.take() {
                Some(Pending::Announce(ann)) if msg.params.first() == Some(&ann.name) => {
                    Ok(Some(LinkMessage::AnnounceServer(ann)))
                }
                _ => Err(Self::unexpected(&msg, "outside its announcement")),
            },
            ServerRecord::COMMAND => match self.pending.as_mut() {
                Some(pending) => {
                    pending.push_server(ServerRecord::from_message(&msg)?);
                    Ok(None)
                }
                None => Err(Self::unexpected(&msg, "outside a bracket")),
            },
            ChannelRecord::COMMAND => match self.pending.as_mut() {
                Some(pending) => {
                    pending.push_channel(ChannelRecord::from_message(&msg)?);
                    Ok(None)
                }
                None => Err(Self::unexpected(&msg, "outside a bracket")),
            },
            UserRecord::COMMAND => {
                let user = UserRecord::from_message(&msg)?;
                match self.pending.as_mut() {
                    Some(pending) => {
                        pending.push_user(user);
                        Ok(None)
                    }
                    None => Ok(Some(LinkMessage::NewUser(user))),
                }
            }
            _ if self.pending.is_some() => Err(Self::unexpected(&msg, "inside a bracket")),
            _ => Ok(Some(LinkMessage::from_message(&msg)?)),
        }
    }
}

impl Decoder for LinkCodec {
    type Item = LinkMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> error::Result<Option<LinkMessage>> {
        while let Some(line) = self.next_line(src)? {
            if line.trim().is_empty() {
                continue;
            }
            let msg: Message = line.parse()?;
            if let Some(item) = self.handle(msg)? {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }
}

impl Encoder<LinkMessage> for LinkCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: LinkMessage, dst: &mut BytesMut) -> error::Result<()> {
        for line in item.to_lines() {
            line.validate()?;
            let text = line.to_string();
            if text.len() + 2 > self.max_len {
                return Err(ProtocolError::LineTooLong(text.len() + 2));
            }
            dst.reserve(text.len() + 2);
            dst.extend_from_slice(text.as_bytes());
            dst.extend_from_slice(b"\r\n");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut LinkCodec, input: &str) -> Vec<LinkMessage> {
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        while let Some(msg) = codec.decode(&mut buf).unwrap() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn burst_is_yielded_only_at_eob() {
        let mut codec = LinkCodec::new();
        let first = decode_all(
            &mut codec,
            "BURST\r\nSERVER c.example.net 2 b.example.net * :C\r\n",
        );
        assert!(first.is_empty());
        assert!(codec.in_bracket());

        let rest = decode_all(&mut codec, "SJOIN #a 100 0 * * alice :\r\nEOB\r\n");
        assert_eq!(rest.len(), 1);
        let LinkMessage::Burst(burst) = &rest[0] else {
            panic!("expected burst, got {:?}", rest[0]);
        };
        assert_eq!(burst.servers.len(), 1);
        assert_eq!(burst.channels.len(), 1);
        assert!(!codec.in_bracket());
    }

    #[test]
    fn bare_uid_is_a_new_user() {
        let mut codec = LinkCodec::new();
        let out = decode_all(
            &mut codec,
            "UID bob b host 192.0.2.2 b.example.net 0 10 10 * * :Bob\n",
        );
        assert!(matches!(&out[..], [LinkMessage::NewUser(u)] if u.nick == "bob"));
    }

    #[test]
    fn records_outside_brackets_are_rejected() {
        let mut codec = LinkCodec::new();
        let mut buf = BytesMut::from("SJOIN #a 100 0 * * alice :\r\n");
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::UnexpectedFrame { .. })
        ));
    }

    #[test]
    fn nested_brackets_are_rejected() {
        let mut codec = LinkCodec::new();
        let mut buf = BytesMut::from("BURST\r\n:a NEWSERVER c 1 a :C\r\n");
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::UnexpectedFrame { .. })
        ));
    }

    #[test]
    fn endserver_must_match_header() {
        let mut codec = LinkCodec::new();
        let mut buf = BytesMut::from(":a NEWSERVER c 1 a :C\r\nENDSERVER d\r\n");
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn overlong_line_is_rejected() {
        let mut codec = LinkCodec::with_max_len(16);
        let mut buf = BytesMut::from("PING aaaaaaaaaaaaaaaaaaaaaaaa\r\n");
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::LineTooLong(_))
        ));
    }

    #[test]
    fn oversized_burst_round_trips() {
        let channel = ChannelRecord {
            name: "#big".into(),
            topic: "busy".into(),
            topic_setter: "alice".into(),
            topic_time: 120,
            modes: vec![crate::mode::ModeToken::flag('n')],
            members: (0..2000).map(|i| format!("member{i:05}")).collect(),
            created: 100,
        };
        let user = UserRecord {
            nick: "member00000".into(),
            username: "m".into(),
            hostname: "host".into(),
            realname: "Member".into(),
            ip: "192.0.2.9".into(),
            server: "a.example.net".into(),
            secure: false,
            modes: vec![],
            channels: (0..1500)
                .map(|i| crate::records::Membership::new(format!("#channel{i:04}"), ""))
                .collect(),
            signon: 10,
            nick_time: 10,
        };
        let burst = Burst {
            servers: vec![],
            users: vec![user],
            channels: vec![channel],
        };

        let mut codec = LinkCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(LinkMessage::Burst(burst.clone()), &mut buf)
            .unwrap();
        let mut decoder = LinkCodec::new();
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(LinkMessage::Burst(burst))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn adjacent_records_for_different_entities_stay_apart() {
        let mut codec = LinkCodec::new();
        let out = decode_all(
            &mut codec,
            "BURST\r\nSJOIN #a 100 0 * * alice :\r\nSJOIN #a 100 0 * * bob :\r\n\
             SJOIN #b 100 0 * * carol :\r\nEOB\r\n",
        );
        let [LinkMessage::Burst(burst)] = &out[..] else {
            panic!("expected one burst, got {out:?}");
        };
        assert_eq!(burst.channels.len(), 2);
        assert_eq!(burst.channels[0].members, vec!["alice", "bob"]);
        assert_eq!(burst.channels[1].members, vec!["carol"]);
    }

    #[test]
    fn encode_writes_crlf_lines() {
        let mut codec = LinkCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(LinkMessage::Burst(Burst::default()), &mut buf)
            .unwrap();
        codec.encode(LinkMessage::Ping("x".into()), &mut buf).unwrap();
        assert_eq!(&buf[..], b"BURST\r\nEOB\r\nPING x\r\n");
    }
}
