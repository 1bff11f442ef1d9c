//! Link handshake state machine.
//!
//! Manages the transition from a fresh socket to a synced server link.
//! The machine only validates and records progress; the session task owns
//! the socket and the coordinator owns the directory, so a rejected
//! handshake never touches shared state.

use crate::config::LinkBlock;
use crate::error::{LinkError, LinkResult};
use meshirc_proto::{COMPATIBLE_VERSIONS, Introduce, PROTOCOL_VERSION};
use std::collections::BTreeSet;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Socket open, nothing exchanged.
    Connecting,
    /// We sent our introduction first and wait for the peer's.
    HandshakeSent,
    /// The peer introduced itself first and we answered.
    HandshakeReceived,
    /// Handshake accepted; bursts in flight.
    Bursting,
    /// Both bursts exchanged.
    Synced,
    Closed,
}

/// What the session needs to know to judge an introduction.
pub struct HandshakeContext<'a> {
    pub links: &'a [LinkBlock],
    pub peer_addr: IpAddr,
    /// Whether the introduced name is already part of the mesh.
    pub peer_known: bool,
}

pub struct HandshakeMachine {
    pub state: HandshakeState,
    local_name: String,
    local_desc: String,
    extensions: Vec<String>,
    /// Link we dialed, for outbound sessions.
    expected: Option<String>,
    peer: Option<Introduce>,
    sent_introduce: bool,
    received_introduce: bool,
    sent_burst: bool,
    received_burst: bool,
}

impl HandshakeMachine {
    pub fn new(local_name: String, local_desc: String, extensions: Vec<String>) -> Self {
        Self {
            state: HandshakeState::Connecting,
            local_name,
            local_desc,
            extensions,
            expected: None,
            peer: None,
            sent_introduce: false,
            received_introduce: false,
            sent_burst: false,
            received_burst: false,
        }
    }

    /// Outbound sessions speak first.
    pub fn start_outbound(&mut self, link: &LinkBlock) -> Introduce {
        self.expected = Some(link.name.clone());
        self.sent_introduce = true;
        self.state = HandshakeState::HandshakeSent;
        self.introduction(link)
    }

    fn introduction(&self, link: &LinkBlock) -> Introduce {
        Introduce {
            name: self.local_name.clone(),
            secret: link.send_password.clone(),
            description: self.local_desc.clone(),
            protocol_version: PROTOCOL_VERSION,
            common_extensions: self.extensions.clone(),
        }
    }

    /// Validate the peer's introduction.
    ///
    /// Returns our own introduction if it still has to be sent. Checks run
    /// in a fixed order so the first failure is always the one reported.
    pub fn receive_introduce(
        &mut self,
        intro: Introduce,
        ctx: &HandshakeContext<'_>,
    ) -> LinkResult<Option<Introduce>> {
        if self.received_introduce {
            return Err(LinkError::HandshakeAlreadyComplete);
        }
        if !COMPATIBLE_VERSIONS.contains(&intro.protocol_version) {
            return Err(LinkError::IncompatibleVersion(intro.protocol_version));
        }

        let ours: BTreeSet<&str> = self.extensions.iter().map(String::as_str).collect();
        let theirs: BTreeSet<&str> = intro.common_extensions.iter().map(String::as_str).collect();
        let mismatch: Vec<String> = ours
            .symmetric_difference(&theirs)
            .map(|s| s.to_string())
            .collect();
        if !mismatch.is_empty() {
            return Err(LinkError::ModuleMismatch(mismatch));
        }

        let link = ctx
            .links
            .iter()
            .find(|l| l.is_for(&intro.name))
            .filter(|l| self.expected.as_ref().is_none_or(|e| l.is_for(e)))
            .ok_or_else(|| LinkError::NoSuchLink(intro.name.clone()))?;
        if ctx.peer_known || intro.name.eq_ignore_ascii_case(&self.local_name) {
            return Err(LinkError::AlreadyConnected(intro.name));
        }
        if !link.matches_address(ctx.peer_addr) {
            return Err(LinkError::AddressMismatch(intro.name));
        }
        if !link.accepts_secret(&intro.secret) {
            return Err(LinkError::BadCredentials);
        }

        self.received_introduce = true;
        self.peer = Some(intro);
        if self.sent_introduce {
            self.state = HandshakeState::Bursting;
            return Ok(None);
        }
        self.sent_introduce = true;
        self.state = HandshakeState::HandshakeReceived;
        Ok(Some(self.introduction(link)))
    }

    /// The accepted peer, once the handshake has passed.
    pub fn peer(&self) -> Option<&Introduce> {
        self.peer.as_ref()
    }

    pub fn is_accepted(&self) -> bool {
        self.received_introduce
    }

    pub fn burst_sent(&mut self) -> LinkResult<()> {
        if !self.received_introduce {
            return Err(LinkError::Protocol("burst before handshake".into()));
        }
        self.sent_burst = true;
        self.advance();
        Ok(())
    }

    pub fn burst_received(&mut self) -> LinkResult<()> {
        if !self.received_introduce {
            return Err(LinkError::Protocol("burst before handshake".into()));
        }
        if self.received_burst {
            return Err(LinkError::AlreadyBursted);
        }
        self.received_burst = true;
        self.advance();
        Ok(())
    }

    fn advance(&mut self) {
        self.state = if self.sent_burst && self.received_burst {
            HandshakeState::Synced
        } else {
            HandshakeState::Bursting
        };
    }

    pub fn close(&mut self) {
        self.state = HandshakeState::Closed;
    }
}
