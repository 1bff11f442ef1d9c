//! Unified error handling for meshircd.
//!
//! Every failure on a server link is a [`LinkError`]. Its [`Severity`]
//! decides what the link session does with it: recoverable errors are
//! reported and the link stays up, fatal errors close the link and trigger
//! netsplit handling for whatever was merged through it.

use meshirc_proto::ProtocolError;
use thiserror::Error;

/// What a link does after an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Report to the sender; the link stays open.
    Recoverable,
    /// Send `ERROR` and close the link.
    Fatal,
}

// ============================================================================
// Link Errors (handshake, burst, propagation, steady state)
// ============================================================================

/// Errors raised while handling link traffic or local mesh operations.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("handshake already complete")]
    HandshakeAlreadyComplete,

    #[error("incompatible version {0}")]
    IncompatibleVersion(u32),

    #[error("module mismatch: {}", .0.join(","))]
    ModuleMismatch(Vec<String>),

    #[error("no such link: {0}")]
    NoSuchLink(String),

    #[error("already connected: {0}")]
    AlreadyConnected(String),

    #[error("mismatched address for {0}")]
    AddressMismatch(String),

    #[error("bad credentials")]
    BadCredentials,

    #[error("already bursted")]
    AlreadyBursted,

    #[error("data inconsistent: {0}")]
    DataInconsistent(String),

    #[error("not yet bursted")]
    NotYetBursted,

    #[error("no such server: {0}")]
    NoSuchServer(String),

    #[error("nickname in use: {0}")]
    NicknameInUse(String),

    #[error("erroneous nickname: {0}")]
    ErroneousNickname(String),

    #[error("no such nick: {0}")]
    NoSuchNick(String),

    #[error("no such channel: {0}")]
    NoSuchChannel(String),

    #[error("{nick} is not on {channel}")]
    NotOnChannel { nick: String, channel: String },

    #[error("unknown mode: {0}")]
    UnknownMode(char),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("coordinator has shut down")]
    Shutdown,
}

impl LinkError {
    /// Whether the link survives this error.
    pub fn severity(&self) -> Severity {
        match self {
            Self::NotYetBursted
            | Self::NicknameInUse(_)
            | Self::ErroneousNickname(_)
            | Self::NoSuchNick(_)
            | Self::NoSuchChannel(_)
            | Self::NotOnChannel { .. }
            | Self::UnknownMode(_) => Severity::Recoverable,
            _ => Severity::Fatal,
        }
    }

    /// Shorthand for `severity() == Severity::Fatal`.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::HandshakeAlreadyComplete => "handshake_already_complete",
            Self::IncompatibleVersion(_) => "incompatible_version",
            Self::ModuleMismatch(_) => "module_mismatch",
            Self::NoSuchLink(_) => "no_such_link",
            Self::AlreadyConnected(_) => "already_connected",
            Self::AddressMismatch(_) => "address_mismatch",
            Self::BadCredentials => "bad_credentials",
            Self::AlreadyBursted => "already_bursted",
            Self::DataInconsistent(_) => "data_inconsistent",
            Self::NotYetBursted => "not_yet_bursted",
            Self::NoSuchServer(_) => "no_such_server",
            Self::NicknameInUse(_) => "nickname_in_use",
            Self::ErroneousNickname(_) => "erroneous_nickname",
            Self::NoSuchNick(_) => "no_such_nick",
            Self::NoSuchChannel(_) => "no_such_channel",
            Self::NotOnChannel { .. } => "not_on_channel",
            Self::UnknownMode(_) => "unknown_mode",
            Self::Protocol(_) => "protocol_error",
            Self::Shutdown => "shutdown",
        }
    }
}

impl From<ProtocolError> for LinkError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Result type for mesh operations.
pub type LinkResult<T = ()> = Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_failures_are_fatal() {
        let errors = [
            LinkError::HandshakeAlreadyComplete,
            LinkError::IncompatibleVersion(1),
            LinkError::ModuleMismatch(vec!["halfop".into()]),
            LinkError::NoSuchLink("x".into()),
            LinkError::AlreadyConnected("x".into()),
            LinkError::AddressMismatch("x".into()),
            LinkError::BadCredentials,
            LinkError::AlreadyBursted,
            LinkError::DataInconsistent("x".into()),
            LinkError::NoSuchServer("x".into()),
        ];
        for err in errors {
            assert!(err.is_fatal(), "{err} should be fatal");
        }
    }

    #[test]
    fn not_yet_bursted_is_recoverable() {
        assert_eq!(LinkError::NotYetBursted.severity(), Severity::Recoverable);
        assert_eq!(
            LinkError::NicknameInUse("alice".into()).severity(),
            Severity::Recoverable
        );
    }

    #[test]
    fn module_mismatch_lists_difference() {
        let err = LinkError::ModuleMismatch(vec!["halfop".into(), "quiet".into()]);
        assert_eq!(err.to_string(), "module mismatch: halfop,quiet");
        assert_eq!(err.error_code(), "module_mismatch");
    }
}
