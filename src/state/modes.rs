//! Mode-type registry.
//!
//! Maps each channel mode letter to its [`ModeKind`] and, for ranked modes,
//! a rank and prefix. Built once at startup from the configured extensions.
//! Linked servers must build identical registries; the handshake enforces
//! that by comparing [`ModeRegistry::common_extensions`].

use meshirc_proto::{Casemapping, ModeKind};
use std::collections::BTreeMap;
use thiserror::Error;

/// Definition of a single mode letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeDef {
    pub kind: ModeKind,
    /// Rank for ranked-list modes, 0 otherwise.
    pub rank: u32,
    /// Status prefix for ranked-list modes (`@`, `+`).
    pub prefix: Option<char>,
    /// Extension that introduced the letter.
    pub extension: &'static str,
}

/// Extension identifiers accepted in `server.extensions`.
pub const KNOWN_EXTENSIONS: &[&str] = &[
    "chanowner",
    "halfop",
    "jointhrottle",
    "noctcp",
    "nocolor",
    "quiet",
    "regonly",
];

const CORE: &str = "core";

type Entry = (char, ModeKind, u32, Option<char>);

fn extension_modes(name: &str) -> Option<&'static [Entry]> {
    use ModeKind::*;
    let modes: &'static [Entry] = match name {
        CORE => &[
            ('i', Boolean, 0, None),
            ('m', Boolean, 0, None),
            ('n', Boolean, 0, None),
            ('p', Boolean, 0, None),
            ('s', Boolean, 0, None),
            ('t', Boolean, 0, None),
            ('k', Parameter, 0, None),
            ('l', Parameter, 0, None),
            ('o', RankedList, 100, Some('@')),
            ('v', RankedList, 10, Some('+')),
            ('b', UnrankedList, 0, None),
            ('e', UnrankedList, 0, None),
            ('I', UnrankedList, 0, None),
        ],
        "halfop" => &[('h', RankedList, 50, Some('%'))],
        "chanowner" => &[
            ('q', RankedList, 300, Some('~')),
            ('a', RankedList, 200, Some('&')),
        ],
        "quiet" => &[('Q', UnrankedList, 0, None)],
        "noctcp" => &[('C', Boolean, 0, None)],
        "nocolor" => &[('c', Boolean, 0, None)],
        "regonly" => &[('R', Boolean, 0, None)],
        "jointhrottle" => &[('j', Parameter, 0, None)],
        _ => return None,
    };
    Some(modes)
}

/// Errors building a registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("unknown extension '{0}'")]
    UnknownExtension(String),
    #[error("mode letter '{letter}' defined by both '{first}' and '{second}'")]
    LetterConflict {
        letter: char,
        first: &'static str,
        second: &'static str,
    },
}

/// Letter → kind/rank lookup table.
#[derive(Debug, Clone)]
pub struct ModeRegistry {
    modes: BTreeMap<char, ModeDef>,
    extensions: Vec<&'static str>,
    casemapping: Casemapping,
}

impl ModeRegistry {
    /// Build the registry for `core` plus `extensions`.
    pub fn new<S: AsRef<str>>(
        extensions: &[S],
        casemapping: Casemapping,
    ) -> Result<Self, RegistryError> {
        let mut enabled = vec![CORE];
        for ext in extensions {
            let ext = ext.as_ref();
            let known = KNOWN_EXTENSIONS
                .iter()
                .find(|k| **k == ext)
                .ok_or_else(|| RegistryError::UnknownExtension(ext.to_string()))?;
            if !enabled.contains(known) {
                enabled.push(*known);
            }
        }

        let mut modes = BTreeMap::new();
        for ext in enabled.iter().copied() {
            for &(letter, kind, rank, prefix) in extension_modes(ext).unwrap_or_default() {
                let def = ModeDef {
                    kind,
                    rank,
                    prefix,
                    extension: ext,
                };
                if let Some(existing) = modes.insert(letter, def) {
                    return Err(RegistryError::LetterConflict {
                        letter,
                        first: existing.extension,
                        second: ext,
                    });
                }
            }
        }

        enabled.sort_unstable();
        Ok(Self {
            modes,
            extensions: enabled,
            casemapping,
        })
    }

    /// Core modes only, RFC 1459 case mapping.
    #[cfg(test)]
    pub(crate) fn core() -> Self {
        Self::new::<&str>(&[], Casemapping::Rfc1459).expect("core modes never conflict")
    }

    pub fn get(&self, letter: char) -> Option<&ModeDef> {
        self.modes.get(&letter)
    }

    pub fn kind(&self, letter: char) -> Option<ModeKind> {
        self.modes.get(&letter).map(|d| d.kind)
    }

    pub fn rank(&self, letter: char) -> u32 {
        self.modes.get(&letter).map_or(0, |d| d.rank)
    }

    /// Whether `letter` is registered with exactly `kind`.
    pub fn accepts(&self, kind: ModeKind, letter: char) -> bool {
        self.kind(letter) == Some(kind)
    }

    pub fn casemapping(&self) -> Casemapping {
        self.casemapping
    }

    /// Sorted identifiers exchanged in `INTRODUCE`.
    ///
    /// Includes the enabled mode sets and the case mapping, since both change
    /// how the two servers interpret the same data.
    pub fn common_extensions(&self) -> Vec<String> {
        let mut out: Vec<String> = self.extensions.iter().map(|e| e.to_string()).collect();
        out.push(format!("casemapping={}", self.casemapping.name()));
        out.sort();
        out
    }

    /// Keep only ranked letters, deduplicated, highest rank first.
    pub fn normalize_status(&self, status: &str) -> String {
        let mut letters: Vec<char> = status
            .chars()
            .filter(|c| self.accepts(ModeKind::RankedList, *c))
            .collect();
        letters.sort_by(|a, b| self.rank(*b).cmp(&self.rank(*a)).then(a.cmp(b)));
        letters.dedup();
        letters.into_iter().collect()
    }

    /// Union of two status strings.
    pub fn merge_status(&self, a: &str, b: &str) -> String {
        self.normalize_status(&format!("{a}{b}"))
    }

    /// Prefix of the highest-ranked letter in `status`.
    pub fn highest_prefix(&self, status: &str) -> Option<char> {
        status
            .chars()
            .filter_map(|c| self.get(c))
            .max_by_key(|d| d.rank)
            .and_then(|d| d.prefix)
    }
}
