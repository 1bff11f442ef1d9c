//! Error types for the link protocol.
//!
//! [`ParseError`] describes a single malformed line or token.
//! [`ProtocolError`] is the codec-level error: I/O, framing and parse failures.

use thiserror::Error;

/// Convenience type alias for Results using [`ProtocolError`].
pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

/// A line, token or record could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The line contained no command.
    #[error("empty message")]
    EmptyMessage,

    /// A source prefix (`:source`) was not followed by a command.
    #[error("source without command")]
    MissingCommand,

    /// The command name contained characters other than ASCII letters and digits.
    #[error("invalid command name: {0}")]
    InvalidCommand(String),

    /// Not enough parameters for the command.
    #[error("{command}: expected {expected} parameters, got {got}")]
    NotEnoughParams {
        /// Command being parsed.
        command: &'static str,
        /// Minimum parameter count.
        expected: usize,
        /// Parameters present on the line.
        got: usize,
    },

    /// A numeric field did not parse.
    #[error("{field}: invalid number {value:?}")]
    InvalidNumber {
        /// Field name.
        field: &'static str,
        /// Raw value.
        value: String,
    },

    /// A mode token was malformed.
    #[error("invalid mode token: {0:?}")]
    InvalidMode(String),

    /// A channel membership token was malformed.
    #[error("invalid membership token: {0:?}")]
    InvalidMembership(String),

    /// A parameter would not survive serialization (contains a space, is empty,
    /// or starts with `:` outside the trailing position).
    #[error("invalid parameter: {0:?}")]
    InvalidParam(String),

    /// The command is not part of the link protocol.
    #[error("unknown link command: {0}")]
    UnknownCommand(String),
}

/// Top-level codec errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// I/O error during reading or writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The line was not valid UTF-8.
    #[error("line is not valid utf-8")]
    InvalidUtf8,

    /// The line exceeded [`crate::MAX_LINK_LINE_LEN`].
    #[error("line too long: {0} bytes")]
    LineTooLong(usize),

    /// The line could not be parsed.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// A record or terminator appeared outside a `BURST`/`NEWSERVER` bracket,
    /// or a bracket was opened inside another.
    #[error("unexpected {command} {context}")]
    UnexpectedFrame {
        /// Offending command.
        command: String,
        /// Where it appeared.
        context: &'static str,
    },
}
