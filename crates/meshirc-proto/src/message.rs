//! Raw link lines.
//!
//! A [`Message`] is the untyped form of one link line:
//! `[:<source> ]<COMMAND>[ <param>]*[ :<trailing>]`.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::error::ParseError;

/// One parsed link line.
///
/// # Example
///
/// ```
/// use meshirc_proto::Message;
///
/// let msg: Message = ":hub.example.net SQUIT leaf.example.net :link dropped".parse().unwrap();
/// assert_eq!(msg.source.as_deref(), Some("hub.example.net"));
/// assert_eq!(msg.command, "SQUIT");
/// assert_eq!(msg.params, vec!["leaf.example.net", "link dropped"]);
/// ```
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Message {
    /// Origin of the line (server name or nickname).
    pub source: Option<String>,
    /// Upper-cased command name.
    pub command: String,
    /// Parameters, trailing parameter included as the last element.
    pub params: Vec<String>,
    /// Whether the last parameter is written in trailing (`:`) form.
    pub trailing: bool,
}

impl Message {
    /// Build a message with no trailing parameter.
    pub fn new<C, I, P>(command: C, params: I) -> Self
    where
        C: Into<String>,
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            source: None,
            command: command.into().to_ascii_uppercase(),
            params: params.into_iter().map(Into::into).collect(),
            trailing: false,
        }
    }

    /// Set the source prefix.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Append a trailing parameter.
    #[must_use]
    pub fn with_trailing(mut self, text: impl Into<String>) -> Self {
        self.params.push(text.into());
        self.trailing = true;
        self
    }

    /// Parameter `idx`, or a [`ParseError::NotEnoughParams`] naming `command`.
    pub fn arg(&self, command: &'static str, idx: usize) -> Result<&str, ParseError> {
        self.params
            .get(idx)
            .map(String::as_str)
            .ok_or(ParseError::NotEnoughParams {
                command,
                expected: idx + 1,
                got: self.params.len(),
            })
    }

    /// Require at least `n` parameters.
    pub fn expect_params(&self, command: &'static str, n: usize) -> Result<(), ParseError> {
        if self.params.len() < n {
            return Err(ParseError::NotEnoughParams {
                command,
                expected: n,
                got: self.params.len(),
            });
        }
        Ok(())
    }

    /// Check that the message serializes back to an equivalent line.
    pub fn validate(&self) -> Result<(), ParseError> {
        if let Some(source) = &self.source {
            if !is_middle_param(source) {
                return Err(ParseError::InvalidParam(source.clone()));
            }
        }
        if self.command.is_empty() || !self.command.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ParseError::InvalidCommand(self.command.clone()));
        }
        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            if param.contains(['\r', '\n', '\0']) {
                return Err(ParseError::InvalidParam(param.clone()));
            }
            if i != last && !is_middle_param(param) {
                return Err(ParseError::InvalidParam(param.clone()));
            }
        }
        Ok(())
    }
}

fn is_middle_param(s: &str) -> bool {
    !s.is_empty() && !s.starts_with(':') && !s.contains(' ')
}

impl FromStr for Message {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut rest = line.trim_end_matches(['\r', '\n']).trim_start_matches(' ');
        if rest.is_empty() {
            return Err(ParseError::EmptyMessage);
        }

        let source = if let Some(stripped) = rest.strip_prefix(':') {
            let (src, tail) = stripped.split_once(' ').unwrap_or((stripped, ""));
            rest = tail.trim_start_matches(' ');
            if src.is_empty() {
                return Err(ParseError::EmptyMessage);
            }
            Some(src.to_string())
        } else {
            None
        };

        let (command, mut rest) = rest.split_once(' ').unwrap_or((rest, ""));
        if command.is_empty() {
            return Err(ParseError::MissingCommand);
        }
        if !command.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ParseError::InvalidCommand(command.to_string()));
        }

        let mut params = Vec::new();
        let mut trailing = false;
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(text) = rest.strip_prefix(':') {
                params.push(text.to_string());
                trailing = true;
                break;
            }
            let (param, tail) = rest.split_once(' ').unwrap_or((rest, ""));
            params.push(param.to_string());
            rest = tail;
        }

        Ok(Self {
            source,
            command: command.to_ascii_uppercase(),
            params,
            trailing,
        })
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(source) = &self.source {
            write!(f, ":{} ", source)?;
        }
        f.write_str(&self.command)?;

        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            if i == last && (self.trailing || !is_middle_param(param)) {
                write!(f, " :{}", param)?;
            } else {
                write!(f, " {}", param)?;
            }
        }
        Ok(())
    }
}

/// Join list items with `,`, writing `*` for an empty list.
pub fn join_list<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for item in items {
        if !out.is_empty() {
            out.push(',');
        }
        out.push_str(item.as_ref());
    }
    if out.is_empty() {
        out.push('*');
    }
    out
}

/// Like [`join_list`], cut into pieces of at most `budget` bytes.
///
/// Always yields at least one piece. An item longer than `budget` gets a
/// piece of its own.
pub fn chunk_list<I, S>(items: I, budget: usize) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut chunks = Vec::new();
    let mut current = String::new();
    for item in items {
        let item = item.as_ref();
        if !current.is_empty() && current.len() + 1 + item.len() > budget {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(',');
        }
        current.push_str(item);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    if chunks.is_empty() {
        chunks.push("*".to_string());
    }
    chunks
}

/// Split a `,`-separated list, treating `*` as empty.
pub fn split_list(s: &str) -> Vec<String> {
    if s == "*" || s.is_empty() {
        return Vec::new();
    }
    s.split(',')
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// `*` stands for an empty single value.
pub fn empty_as_star(s: &str) -> &str {
    if s.is_empty() {
        "*"
    } else {
        s
    }
}

/// Inverse of [`empty_as_star`].
pub fn star_as_empty(s: &str) -> String {
    if s == "*" {
        String::new()
    } else {
        s.to_string()
    }
}

/// Parse a numeric field, naming it in the error.
pub fn parse_num<T: FromStr>(field: &'static str, value: &str) -> Result<T, ParseError> {
    value.parse().map_err(|_| ParseError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // Parsing
    // ========================================================================

    #[test]
    fn parses_source_command_and_trailing() {
        let msg: Message = ":alice QUIT :gone fishing\r\n".parse().unwrap();
        assert_eq!(msg.source.as_deref(), Some("alice"));
        assert_eq!(msg.command, "QUIT");
        assert_eq!(msg.params, vec!["gone fishing"]);
        assert!(msg.trailing);
    }

    #[test]
    fn command_is_upper_cased() {
        let msg: Message = "ping abc".parse().unwrap();
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.params, vec!["abc"]);
        assert!(!msg.trailing);
    }

    #[test]
    fn empty_trailing_is_kept() {
        let msg: Message = "SJOIN #a 100 0 * * alice :".parse().unwrap();
        assert_eq!(msg.params.last().map(String::as_str), Some(""));
    }

    #[test]
    fn rejects_empty_and_sourceless_lines() {
        assert_eq!("".parse::<Message>(), Err(ParseError::EmptyMessage));
        assert_eq!("\r\n".parse::<Message>(), Err(ParseError::EmptyMessage));
        assert_eq!(":hub".parse::<Message>(), Err(ParseError::MissingCommand));
        assert!(matches!(
            "PI-NG x".parse::<Message>(),
            Err(ParseError::InvalidCommand(_))
        ));
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    #[test]
    fn display_uses_trailing_when_needed() {
        let msg = Message::new("PART", ["#rust"]).with_source("bob").with_trailing("see you");
        assert_eq!(msg.to_string(), ":bob PART #rust :see you");

        let msg = Message::new("PONG", ["token"]);
        assert_eq!(msg.to_string(), "PONG token");
    }

    #[test]
    fn validate_rejects_spaces_in_middle_params() {
        let msg = Message::new("SQUIT", ["two words", "reason"]);
        assert!(matches!(msg.validate(), Err(ParseError::InvalidParam(_))));

        let msg = Message::new("ERROR", Vec::<String>::new()).with_trailing("bad\nline");
        assert!(msg.validate().is_err());
    }

    #[test]
    fn list_helpers_use_star_for_empty() {
        assert_eq!(join_list(Vec::<String>::new()), "*");
        assert_eq!(join_list(["a", "b"]), "a,b");
        assert!(split_list("*").is_empty());
        assert_eq!(split_list("a,b"), vec!["a", "b"]);
    }
}
