//! Case folding for nicknames and channel names.
//!
//! Linked servers must agree on the mapping or the same nickname would be
//! two different keys on two servers, so the mapping is advertised in the
//! link handshake as a common extension.

use std::fmt;

/// The case mapping in effect for a network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Casemapping {
    /// ASCII letters only.
    Ascii,
    /// ASCII plus `[]\~` folding to `{}|^`.
    #[default]
    Rfc1459,
}

impl Casemapping {
    /// The token used in `casemapping=<name>` extension identifiers.
    pub fn name(self) -> &'static str {
        match self {
            Self::Ascii => "ascii",
            Self::Rfc1459 => "rfc1459",
        }
    }

    /// Parse a mapping name as written in configuration.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "ascii" => Some(Self::Ascii),
            "rfc1459" => Some(Self::Rfc1459),
            _ => None,
        }
    }

    /// Fold a single character.
    #[inline]
    pub fn fold_char(self, c: char) -> char {
        match self {
            Self::Ascii => c.to_ascii_lowercase(),
            Self::Rfc1459 => fold_char(c),
        }
    }

    /// Fold a whole name.
    pub fn fold(self, s: &str) -> String {
        s.chars().map(|c| self.fold_char(c)).collect()
    }

    /// Compare two names under this mapping without allocating.
    pub fn eq(self, a: &str, b: &str) -> bool {
        a.len() == b.len()
            && a.chars()
                .zip(b.chars())
                .all(|(x, y)| self.fold_char(x) == self.fold_char(y))
    }
}

impl fmt::Display for Casemapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fold one character with the RFC 1459 mapping.
#[inline]
pub const fn fold_char(c: char) -> char {
    match c {
        'A'..='Z' => (c as u8 + 32) as char,
        '[' => '{',
        ']' => '}',
        '\\' => '|',
        '~' => '^',
        _ => c,
    }
}

/// Fold a string with the RFC 1459 mapping.
pub fn fold(s: &str) -> String {
    Casemapping::Rfc1459.fold(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc1459_folds_brackets() {
        assert_eq!(fold("Nick[Away]"), "nick{away}");
        assert_eq!(fold("a\\b~c"), "a|b^c");
    }

    #[test]
    fn ascii_leaves_brackets_alone() {
        assert_eq!(Casemapping::Ascii.fold("Nick[Away]"), "nick[away]");
    }

    #[test]
    fn eq_matches_fold() {
        assert!(Casemapping::Rfc1459.eq("FOO[1]", "foo{1}"));
        assert!(!Casemapping::Ascii.eq("FOO[1]", "foo{1}"));
        assert!(!Casemapping::Rfc1459.eq("foo", "fooo"));
    }

    #[test]
    fn names_roundtrip() {
        for m in [Casemapping::Ascii, Casemapping::Rfc1459] {
            assert_eq!(Casemapping::from_name(m.name()), Some(m));
        }
        assert_eq!(Casemapping::from_name("strict-rfc1459"), None);
    }
}
