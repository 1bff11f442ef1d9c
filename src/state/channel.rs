//! Channel entity and channel mode sets.

use crate::state::modes::ModeRegistry;
use meshirc_proto::{ModeChange, ModeKind, ModeToken};
use std::collections::{BTreeMap, BTreeSet};

/// Channel topic with provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub text: String,
    pub setter: String,
    pub time: i64,
}

impl Topic {
    /// Resolve two topics seen for the same channel creation time.
    ///
    /// Identical text and setter keep the earlier timestamp. Otherwise the
    /// later-set topic wins, ties broken by the greater `(text, setter)` so
    /// both sides of a merge pick the same one.
    pub fn resolve(local: Option<&Topic>, incoming: Option<&Topic>) -> Option<Topic> {
        match (local, incoming) {
            (None, other) | (other, None) => other.cloned(),
            (Some(a), Some(b)) if a.text == b.text && a.setter == b.setter => Some(Topic {
                time: a.time.min(b.time),
                ..a.clone()
            }),
            (Some(a), Some(b)) => {
                let key = |t: &Topic| (t.time, t.text.clone(), t.setter.clone());
                if key(a) >= key(b) {
                    Some(a.clone())
                } else {
                    Some(b.clone())
                }
            }
        }
    }
}

/// Non-ranked channel modes, partitioned by kind.
///
/// Ranked-list modes are not stored here: they live on the member map as
/// status strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModeSet {
    pub flags: BTreeSet<char>,
    pub params: BTreeMap<char, String>,
    pub lists: BTreeMap<char, BTreeSet<String>>,
}

impl ModeSet {
    /// Build from wire tokens, keeping only those whose kind matches the registry.
    pub fn from_tokens<'a, I>(tokens: I, registry: &ModeRegistry) -> Self
    where
        I: IntoIterator<Item = &'a ModeToken>,
    {
        let mut set = Self::default();
        for token in tokens {
            if token.kind != ModeKind::RankedList && registry.accepts(token.kind, token.letter) {
                set.apply(&ModeChange::add(token.clone()));
            } else {
                tracing::warn!(token = %token, "dropping unrecognised channel mode");
            }
        }
        set
    }

    /// Wire tokens in a stable order: flags, then parameters, then list entries.
    pub fn tokens(&self) -> Vec<ModeToken> {
        let mut out: Vec<ModeToken> = self.flags.iter().map(|c| ModeToken::flag(*c)).collect();
        out.extend(
            self.params
                .iter()
                .map(|(c, v)| ModeToken::with_param(ModeKind::Parameter, *c, v.clone())),
        );
        for (c, entries) in &self.lists {
            out.extend(
                entries
                    .iter()
                    .map(|e| ModeToken::with_param(ModeKind::UnrankedList, *c, e.clone())),
            );
        }
        out
    }

    /// Apply one change. Returns whether anything changed.
    pub fn apply(&mut self, change: &ModeChange) -> bool {
        let token = &change.token;
        match (token.kind, change.adding) {
            (ModeKind::Boolean, true) => self.flags.insert(token.letter),
            (ModeKind::Boolean, false) => self.flags.remove(&token.letter),
            (ModeKind::Parameter, true) => match &token.param {
                Some(value) => self.params.insert(token.letter, value.clone()).as_ref() != Some(value),
                None => false,
            },
            (ModeKind::Parameter, false) => self.params.remove(&token.letter).is_some(),
            (ModeKind::UnrankedList, true) => match &token.param {
                Some(entry) => self.lists.entry(token.letter).or_default().insert(entry.clone()),
                None => false,
            },
            (ModeKind::UnrankedList, false) => {
                let Some(entry) = &token.param else {
                    return false;
                };
                let Some(list) = self.lists.get_mut(&token.letter) else {
                    return false;
                };
                let removed = list.remove(entry);
                if list.is_empty() {
                    self.lists.remove(&token.letter);
                }
                removed
            }
            (ModeKind::RankedList, _) => false,
        }
    }

    /// Union with `other` for an equal-timestamp merge.
    ///
    /// A parameter set on both sides with different values resolves to the
    /// lexicographically smaller value, which both sides compute identically.
    pub fn union(&mut self, other: &ModeSet) {
        self.flags.extend(other.flags.iter().copied());
        for (letter, value) in &other.params {
            self.params
                .entry(*letter)
                .and_modify(|v| {
                    if value < v {
                        *v = value.clone();
                    }
                })
                .or_insert_with(|| value.clone());
        }
        for (letter, entries) in &other.lists {
            self.lists
                .entry(*letter)
                .or_default()
                .extend(entries.iter().cloned());
        }
    }

    /// Changes that turn `self` into `target`, removals first.
    pub fn diff(&self, target: &ModeSet) -> Vec<ModeChange> {
        let mut removed = Vec::new();
        let mut added = Vec::new();

        for c in self.flags.difference(&target.flags) {
            removed.push(ModeChange::remove(ModeToken::flag(*c)));
        }
        for c in target.flags.difference(&self.flags) {
            added.push(ModeChange::add(ModeToken::flag(*c)));
        }

        for (c, v) in &self.params {
            if !target.params.contains_key(c) {
                removed.push(ModeChange::remove(ModeToken::with_param(
                    ModeKind::Parameter,
                    *c,
                    v.clone(),
                )));
            }
        }
        for (c, v) in &target.params {
            if self.params.get(c) != Some(v) {
                added.push(ModeChange::add(ModeToken::with_param(
                    ModeKind::Parameter,
                    *c,
                    v.clone(),
                )));
            }
        }

        let empty = BTreeSet::new();
        let letters: BTreeSet<char> = self.lists.keys().chain(target.lists.keys()).copied().collect();
        for c in letters {
            let before = self.lists.get(&c).unwrap_or(&empty);
            let after = target.lists.get(&c).unwrap_or(&empty);
            for e in before.difference(after) {
                removed.push(ModeChange::remove(ModeToken::with_param(
                    ModeKind::UnrankedList,
                    c,
                    e.clone(),
                )));
            }
            for e in after.difference(before) {
                added.push(ModeChange::add(ModeToken::with_param(
                    ModeKind::UnrankedList,
                    c,
                    e.clone(),
                )));
            }
        }

        removed.extend(added);
        removed
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty() && self.params.is_empty() && self.lists.is_empty()
    }

    /// Client-style mode string, e.g. `+ntk key`.
    pub fn mode_string(&self) -> String {
        let mut letters = String::from("+");
        letters.extend(self.flags.iter());
        letters.extend(self.params.keys());
        let mut out = letters;
        for v in self.params.values() {
            out.push(' ');
            out.push_str(v);
        }
        out
    }
}

/// A channel.
#[derive(Debug, Clone)]
pub struct Channel {
    /// Name as first seen.
    pub name: String,
    /// Creation time, the merge tie-breaker.
    pub created: i64,
    pub topic: Option<Topic>,
    pub modes: ModeSet,
    /// Folded nickname → status letters, highest rank first.
    pub members: BTreeMap<String, String>,
}

impl Channel {
    pub fn new(name: impl Into<String>, created: i64) -> Self {
        Self {
            name: name.into(),
            created,
            topic: None,
            modes: ModeSet::default(),
            members: BTreeMap::new(),
        }
    }

    pub fn is_member(&self, folded_nick: &str) -> bool {
        self.members.contains_key(folded_nick)
    }

    pub fn status(&self, folded_nick: &str) -> Option<&str> {
        self.members.get(folded_nick).map(String::as_str)
    }

    /// Grant or revoke one ranked letter. Returns whether the status changed.
    pub fn set_rank(
        &mut self,
        registry: &ModeRegistry,
        folded_nick: &str,
        letter: char,
        adding: bool,
    ) -> bool {
        let Some(status) = self.members.get_mut(folded_nick) else {
            return false;
        };
        let updated = if adding {
            registry.merge_status(status, &letter.to_string())
        } else {
            status.chars().filter(|c| *c != letter).collect()
        };
        if *status == updated {
            return false;
        }
        *status = updated;
        true
    }
}
