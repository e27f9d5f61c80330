//! Grow-only set.

use crate::lattice::Lattice;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::hash::Hash;

/// A set that only ever grows. Merge is set union.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GSet<T>
where
    T: Eq + Hash + Clone,
{
    items: HashSet<T>,
}

impl<T> Default for GSet<T>
where
    T: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> GSet<T>
where
    T: Eq + Hash + Clone,
{
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: HashSet::new(),
        }
    }

    /// Add an element. Returns `true` if it was not present yet.
    pub fn add(&mut self, element: T) -> bool {
        self.items.insert(element)
    }

    /// Check membership.
    #[must_use]
    pub fn contains(&self, element: &T) -> bool {
        self.items.contains(element)
    }

    /// Unordered snapshot of the elements.
    #[must_use]
    pub fn elements(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    /// Merge with another set (union). Returns `true` if an element was new.
    pub fn merge(&mut self, other: &Self) -> bool {
        let mut changed = false;
        for item in &other.items {
            if !self.items.contains(item) {
                self.items.insert(item.clone());
                changed = true;
            }
        }
        changed
    }

    /// Get the number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate over the elements.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T> Lattice for GSet<T>
where
    T: Eq + Hash + Clone,
{
    fn join(&mut self, other: &Self) {
        self.merge(other);
    }
}
