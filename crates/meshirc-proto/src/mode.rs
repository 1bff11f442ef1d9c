//! Kind-tagged channel mode strings.
//!
//! Every serialized mode carries its kind so that a receiver can store it
//! without consulting per-letter tables:
//!
//! | Kind           | Tag | Example          |
//! |----------------|-----|------------------|
//! | Boolean        | `B` | `Bt`             |
//! | Parameter      | `P` | `Pkhunter2`      |
//! | Ranked list    | `R` | `Roalice`        |
//! | Unranked list  | `L` | `Lb*!*@bad.host` |
//!
//! Both ends must still agree on the kind of each letter; that is enforced
//! by the extension check during the link handshake.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::error::ParseError;

/// How a channel mode stores its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModeKind {
    /// On or off (`+t`).
    Boolean,
    /// A single value (`+k key`).
    Parameter,
    /// Per-member status with a rank (`+o nick`).
    RankedList,
    /// A set of masks (`+b mask`).
    UnrankedList,
}

impl ModeKind {
    /// Wire tag for this kind.
    pub fn tag(self) -> char {
        match self {
            Self::Boolean => 'B',
            Self::Parameter => 'P',
            Self::RankedList => 'R',
            Self::UnrankedList => 'L',
        }
    }

    /// Kind for a wire tag.
    pub fn from_tag(tag: char) -> Option<Self> {
        match tag {
            'B' => Some(Self::Boolean),
            'P' => Some(Self::Parameter),
            'R' => Some(Self::RankedList),
            'L' => Some(Self::UnrankedList),
            _ => None,
        }
    }

    /// Whether a token of this kind must carry a parameter when set.
    pub fn takes_param(self) -> bool {
        !matches!(self, Self::Boolean)
    }
}

/// One serialized mode: kind tag, letter, optional parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModeToken {
    /// Mode kind.
    pub kind: ModeKind,
    /// Mode letter.
    pub letter: char,
    /// Parameter for non-boolean kinds.
    pub param: Option<String>,
}

impl ModeToken {
    /// A boolean token.
    pub fn flag(letter: char) -> Self {
        Self {
            kind: ModeKind::Boolean,
            letter,
            param: None,
        }
    }

    /// A token with a parameter.
    pub fn with_param(kind: ModeKind, letter: char, param: impl Into<String>) -> Self {
        Self {
            kind,
            letter,
            param: Some(param.into()),
        }
    }

    fn parse_body(s: &str, param_required: bool) -> Result<Self, ParseError> {
        let invalid = || ParseError::InvalidMode(s.to_string());
        let mut chars = s.chars();
        let kind = chars.next().and_then(ModeKind::from_tag).ok_or_else(invalid)?;
        let letter = chars.next().filter(char::is_ascii_alphabetic).ok_or_else(invalid)?;
        let rest = chars.as_str();
        if rest.contains([',', ' ']) {
            return Err(invalid());
        }

        let param = match (kind, rest.is_empty()) {
            (ModeKind::Boolean, true) => None,
            (ModeKind::Boolean, false) => return Err(invalid()),
            (_, false) => Some(rest.to_string()),
            (ModeKind::Parameter, true) if !param_required => None,
            (_, true) => return Err(invalid()),
        };
        Ok(Self {
            kind,
            letter,
            param,
        })
    }
}

impl FromStr for ModeToken {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_body(s, true)
    }
}

impl Display for ModeToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.tag(), self.letter)?;
        if let Some(param) = &self.param {
            f.write_str(param)?;
        }
        Ok(())
    }
}

/// A signed mode token used in steady-state `MODE` relays: `+Bt`, `-Pk`.
///
/// Unsetting a parameter mode does not need the old value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModeChange {
    /// `true` for `+`, `false` for `-`.
    pub adding: bool,
    /// The mode being changed.
    pub token: ModeToken,
}

impl ModeChange {
    /// `+token`.
    pub fn add(token: ModeToken) -> Self {
        Self {
            adding: true,
            token,
        }
    }

    /// `-token`.
    pub fn remove(token: ModeToken) -> Self {
        Self {
            adding: false,
            token,
        }
    }
}

impl FromStr for ModeChange {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (adding, body) = if let Some(body) = s.strip_prefix('+') {
            (true, body)
        } else if let Some(body) = s.strip_prefix('-') {
            (false, body)
        } else {
            return Err(ParseError::InvalidMode(s.to_string()));
        };
        let token = ModeToken::parse_body(body, adding)
            .map_err(|_| ParseError::InvalidMode(s.to_string()))?;
        Ok(Self { adding, token })
    }
}

impl Display for ModeChange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", if self.adding { '+' } else { '-' }, self.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_kind() {
        assert_eq!("Bt".parse::<ModeToken>().unwrap(), ModeToken::flag('t'));
        assert_eq!(
            "Pkhunter2".parse::<ModeToken>().unwrap(),
            ModeToken::with_param(ModeKind::Parameter, 'k', "hunter2")
        );
        assert_eq!(
            "Roalice".parse::<ModeToken>().unwrap(),
            ModeToken::with_param(ModeKind::RankedList, 'o', "alice")
        );
        assert_eq!(
            "Lb*!*@bad.host".parse::<ModeToken>().unwrap(),
            ModeToken::with_param(ModeKind::UnrankedList, 'b', "*!*@bad.host")
        );
    }

    #[test]
    fn rejects_malformed_tokens() {
        for bad in ["", "X", "Xt", "B", "Btx", "Pk", "Lb", "B1", "Pka,b"] {
            assert!(bad.parse::<ModeToken>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn display_matches_wire_form() {
        let token = ModeToken::with_param(ModeKind::Parameter, 'l', "50");
        assert_eq!(token.to_string(), "Pl50");
        assert_eq!(ModeToken::flag('n').to_string(), "Bn");
    }

    #[test]
    fn unsetting_a_parameter_needs_no_value() {
        let change: ModeChange = "-Pk".parse().unwrap();
        assert!(!change.adding);
        assert_eq!(change.token.param, None);
        assert!("+Pk".parse::<ModeChange>().is_err());
        assert!("-Lb".parse::<ModeChange>().is_err());
        assert!("Bt".parse::<ModeChange>().is_err());
    }
}
