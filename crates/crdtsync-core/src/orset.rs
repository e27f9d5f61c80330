//! Observed-Remove Set (OR-Set / add-wins set).
//!
//! Every add mints a fresh [`Tag`]. A remove tombstones only the tags the
//! removing replica has observed, so an add that happened concurrently on
//! another replica survives the merge.
//!
//! An element is visible iff `added[e] \ removed[e]` is non-empty.
//! Tombstones are never pruned.

use crate::id::Tag;
use crate::lattice::Lattice;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// An Observed-Remove Set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrSet<T>
where
    T: Eq + Hash + Clone,
{
    /// Element -> tags of every add observed
    added: HashMap<T, HashSet<Tag>>,
    /// Element -> tags that have been removed
    removed: HashMap<T, HashSet<Tag>>,
}

impl<T> Default for OrSet<T>
where
    T: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OrSet<T>
where
    T: Eq + Hash + Clone,
{
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            added: HashMap::new(),
            removed: HashMap::new(),
        }
    }

    /// Add an element under a freshly minted tag.
    ///
    /// Returns the tag, which identifies this particular add.
    pub fn add(&mut self, element: T) -> Tag {
        let tag = Tag::random();
        self.add_tagged(element, tag);
        tag
    }

    /// Add an element under a caller-chosen tag.
    ///
    /// The caller is responsible for the tag being globally unique.
    pub fn add_tagged(&mut self, element: T, tag: Tag) {
        self.added.entry(element).or_default().insert(tag);
    }

    /// Remove an element by tombstoning every tag observed for it.
    ///
    /// Returns `true` only if a tag was newly tombstoned, so removing an
    /// absent or already removed element reports no change.
    pub fn remove(&mut self, element: &T) -> bool {
        let Some(tags) = self.added.get(element) else {
            return false;
        };
        if tags.is_empty() {
            return false;
        }

        let removed = self.removed.entry(element.clone()).or_default();
        let before = removed.len();
        removed.extend(tags.iter().copied());
        removed.len() != before
    }

    /// Check whether the element is currently visible.
    #[must_use]
    pub fn contains(&self, element: &T) -> bool {
        self.added
            .get(element)
            .is_some_and(|tags| self.has_live_tag(element, tags))
    }

    /// Unordered snapshot of the visible elements.
    #[must_use]
    pub fn elements(&self) -> Vec<T> {
        self.added
            .iter()
            .filter(|(element, tags)| self.has_live_tag(element, tags))
            .map(|(element, _)| element.clone())
            .collect()
    }

    /// Tags of `element` that are not tombstoned.
    #[must_use]
    pub fn live_tags(&self, element: &T) -> HashSet<Tag> {
        let Some(tags) = self.added.get(element) else {
            return HashSet::new();
        };
        match self.removed.get(element) {
            Some(removed) => tags.difference(removed).copied().collect(),
            None => tags.clone(),
        }
    }

    /// Merge with another OR-Set: key-wise union of `added` and `removed`.
    ///
    /// A tombstone for an element whose add has not arrived yet is kept, so
    /// replay order cannot lose it. Returns `true` if a tag was new.
    pub fn merge(&mut self, other: &Self) -> bool {
        let added = union_into(&mut self.added, &other.added);
        let removed = union_into(&mut self.removed, &other.removed);
        added || removed
    }

    /// Number of visible elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.added
            .iter()
            .filter(|(element, tags)| self.has_live_tag(element, tags))
            .count()
    }

    /// Check if no element is visible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tombstoned tags held.
    #[must_use]
    pub fn tombstone_count(&self) -> usize {
        self.removed.values().map(HashSet::len).sum()
    }

    /// Every element with a stored entry, added or tombstoned.
    pub fn known_elements(&self) -> impl Iterator<Item = &T> {
        self.added.keys().chain(self.removed.keys())
    }

    /// Elements stored with an empty tag set in either map.
    pub fn empty_tag_entries(&self) -> impl Iterator<Item = &T> {
        self.added
            .iter()
            .chain(self.removed.iter())
            .filter(|(_, tags)| tags.is_empty())
            .map(|(element, _)| element)
    }

    fn has_live_tag(&self, element: &T, tags: &HashSet<Tag>) -> bool {
        match self.removed.get(element) {
            Some(removed) => tags.iter().any(|tag| !removed.contains(tag)),
            None => !tags.is_empty(),
        }
    }
}

/// Key-wise union. Empty tag sets are skipped so they never become
/// stored entries. Returns `true` if a tag was new.
fn union_into<T>(
    target: &mut HashMap<T, HashSet<Tag>>,
    source: &HashMap<T, HashSet<Tag>>,
) -> bool
where
    T: Eq + Hash + Clone,
{
    let mut changed = false;
    for (element, tags) in source {
        if tags.is_empty() {
            continue;
        }
        let entry = target.entry(element.clone()).or_default();
        let before = entry.len();
        entry.extend(tags.iter().copied());
        changed |= entry.len() != before;
    }
    changed
}

impl<T> Lattice for OrSet<T>
where
    T: Eq + Hash + Clone,
{
    fn join(&mut self, other: &Self) {
        self.merge(other);
    }
}
