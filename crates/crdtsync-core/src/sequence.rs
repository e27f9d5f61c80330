//! Replicated ordered sequence for collaborative text.
//!
//! Every character is identified by a [`CharId`] (site, per-site counter)
//! rather than by its position. Positions are only meaningful to the local
//! replica at the moment of an insert; two concurrent inserts at the same
//! index would not commute, ids do.
//!
//! Merges re-sort the sequence into canonical order (counter, then site),
//! so every replica holding the same characters shows the same text.
//! Decoding keeps the stored order, so a local view survives a restart.
//! Deleted characters stay as tombstones and are skipped by [`Sequence::text`].

use crate::error::CrdtError;
use crate::id::{CharId, ReplicaId, SiteCounters};
use crate::lattice::Lattice;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A single character of the sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Character {
    /// Unique, totally ordered id
    pub id: CharId,
    /// The text fragment carried by this character
    pub value: String,
    /// Tombstone flag
    pub deleted: bool,
}

impl Character {
    /// Join two copies of the same character. A tombstone always wins;
    /// differing values resolve to the greater one.
    fn absorb(&mut self, other: &Character) -> bool {
        let mut changed = false;
        if other.deleted && !self.deleted {
            self.deleted = true;
            changed = true;
        }
        if other.value > self.value {
            self.value.clone_from(&other.value);
            changed = true;
        }
        changed
    }
}

/// Serialized form of a [`Sequence`]: the characters in stored order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceState {
    /// All characters, tombstones included
    pub chars: Vec<Character>,
}

/// A sequence CRDT of tombstoned characters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "SequenceState", into = "SequenceState")]
pub struct Sequence {
    chars: Vec<Character>,
    /// Id -> position in `chars`
    index: HashMap<CharId, usize>,
    counters: SiteCounters,
}

impl Sequence {
    /// Create an empty sequence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a sequence from a list of characters, keeping their order.
    ///
    /// Per-site counters are recovered from the highest counter seen for
    /// every site, so new local ids never collide with restored ones.
    #[must_use]
    pub fn from_characters(chars: Vec<Character>) -> Self {
        let mut sequence = Self::new();
        for character in chars {
            sequence.integrate(character);
        }
        sequence
    }

    /// Insert `value` at `position` in the local view on behalf of `site`.
    ///
    /// The position is clamped into `[0, len]`, where `len` counts
    /// tombstones. Returns the new character, ready to be broadcast.
    ///
    /// # Errors
    ///
    /// Returns [`CrdtError::InvalidArgument`] if `value` is empty.
    pub fn insert(
        &mut self,
        position: usize,
        value: impl Into<String>,
        site: &ReplicaId,
    ) -> Result<Character, CrdtError> {
        let value = value.into();
        if value.is_empty() {
            return Err(CrdtError::InvalidArgument(
                "cannot insert an empty value".to_string(),
            ));
        }

        let character = Character {
            id: self.counters.next(site),
            value,
            deleted: false,
        };
        let position = position.min(self.chars.len());
        self.chars.insert(position, character.clone());
        self.reindex_from(position);

        tracing::trace!(id = %character.id, position, "Inserted character");
        Ok(character)
    }

    /// Mark the character with `id` as deleted.
    ///
    /// Returns the tombstoned character, or `None` if the id is unknown.
    pub fn delete(&mut self, id: &CharId) -> Option<Character> {
        let position = *self.index.get(id)?;
        let character = &mut self.chars[position];
        character.deleted = true;
        Some(character.clone())
    }

    /// Integrate a single remote character.
    ///
    /// A known id is joined with the local copy (so redelivery is a no-op and a
    /// tombstone beats a stale live copy); an unknown id is added. The
    /// sequence is then re-sorted into canonical order.
    ///
    /// Returns `true` if the visible state changed.
    pub fn merge_character(&mut self, remote: &Character) -> bool {
        let changed = self.integrate(remote.clone());
        let reordered = self.sort();
        changed || reordered
    }

    /// Merge every character of another sequence.
    ///
    /// Returns `true` if the state changed.
    pub fn merge(&mut self, other: &Self) -> bool {
        let mut changed = false;
        for character in &other.chars {
            changed |= self.integrate_ref(character);
        }
        self.sort() || changed
    }

    /// Visible text: values of non-deleted characters in sequence order.
    #[must_use]
    pub fn text(&self) -> String {
        self.chars
            .iter()
            .filter(|c| !c.deleted)
            .map(|c| c.value.as_str())
            .collect()
    }

    /// All characters, tombstones included, in stored order.
    #[must_use]
    pub fn characters(&self) -> &[Character] {
        &self.chars
    }

    /// Look up a character by id.
    #[must_use]
    pub fn get(&self, id: &CharId) -> Option<&Character> {
        self.index.get(id).map(|&position| &self.chars[position])
    }

    /// Id of the `index`-th visible character.
    #[must_use]
    pub fn visible_id(&self, index: usize) -> Option<&CharId> {
        self.chars
            .iter()
            .filter(|c| !c.deleted)
            .nth(index)
            .map(|c| &c.id)
    }

    /// Number of characters, tombstones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    /// Check if the sequence holds no characters at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Last counter minted or observed for `site`.
    #[must_use]
    pub fn last_counter(&self, site: &ReplicaId) -> u64 {
        self.counters.last(site)
    }

    /// Add or join one character without re-sorting. Returns `true` on change.
    fn integrate(&mut self, remote: Character) -> bool {
        self.counters.observe(&remote.id);

        if let Some(&position) = self.index.get(&remote.id) {
            return self.chars[position].absorb(&remote);
        }

        self.index.insert(remote.id.clone(), self.chars.len());
        self.chars.push(remote);
        true
    }

    /// Like [`Sequence::integrate`], cloning only characters that are new.
    fn integrate_ref(&mut self, remote: &Character) -> bool {
        match self.index.get(&remote.id) {
            Some(&position) => {
                self.counters.observe(&remote.id);
                self.chars[position].absorb(remote)
            }
            None => self.integrate(remote.clone()),
        }
    }

    /// Sort into canonical order. Returns `true` if anything moved.
    fn sort(&mut self) -> bool {
        if self.chars.windows(2).all(|w| w[0].id < w[1].id) {
            return false;
        }
        self.chars.sort_by(|a, b| a.id.cmp(&b.id));
        self.reindex_from(0);
        true
    }

    fn reindex_from(&mut self, start: usize) {
        for (position, character) in self.chars.iter().enumerate().skip(start) {
            self.index.insert(character.id.clone(), position);
        }
    }
}

impl PartialEq for Sequence {
    fn eq(&self, other: &Self) -> bool {
        self.chars == other.chars
    }
}

impl Eq for Sequence {}

impl TryFrom<SequenceState> for Sequence {
    type Error = CrdtError;

    /// Decode foreign state, rejecting empty sites, zero counters and
    /// duplicate ids.
    fn try_from(state: SequenceState) -> Result<Self, Self::Error> {
        let mut seen = HashSet::with_capacity(state.chars.len());
        for character in &state.chars {
            if character.id.site.is_empty() {
                return Err(CrdtError::InvalidSnapshot(
                    "sequence character has an empty site".to_string(),
                ));
            }
            if character.id.counter == 0 {
                return Err(CrdtError::InvalidSnapshot(format!(
                    "sequence character {} has counter 0",
                    character.id
                )));
            }
            if !seen.insert(&character.id) {
                return Err(CrdtError::InvalidSnapshot(format!(
                    "duplicate sequence character {}",
                    character.id
                )));
            }
        }
        Ok(Self::from_characters(state.chars))
    }
}

impl From<Sequence> for SequenceState {
    fn from(sequence: Sequence) -> Self {
        Self {
            chars: sequence.chars,
        }
    }
}

impl Lattice for Sequence {
    fn join(&mut self, other: &Self) {
        self.merge(other);
    }
}
