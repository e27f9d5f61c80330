//! Grow-only counter.

use crate::error::CrdtError;
use crate::id::ReplicaId;
use crate::lattice::Lattice;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A grow-only counter: one non-negative entry per replica.
///
/// Each replica only ever writes its own entry; merge takes the per-entry
/// maximum, so the value never decreases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GCounter {
    counts: HashMap<ReplicaId, u64>,
}

impl GCounter {
    /// Create an empty counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `amount` to `replica`'s entry.
    ///
    /// # Errors
    ///
    /// Returns [`CrdtError::InvalidArgument`] if `amount` is negative.
    pub fn increment(&mut self, replica: &ReplicaId, amount: i64) -> Result<(), CrdtError> {
        let amount = u64::try_from(amount).map_err(|_| {
            CrdtError::InvalidArgument(format!("increment amount must be >= 0, got {amount}"))
        })?;

        let entry = self.counts.entry(replica.clone()).or_insert(0);
        *entry = entry.saturating_add(amount);
        Ok(())
    }

    /// Sum of all entries.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.counts
            .values()
            .fold(0u64, |total, count| total.saturating_add(*count))
    }

    /// The entry written by `replica` (0 if it never incremented).
    #[must_use]
    pub fn get(&self, replica: &ReplicaId) -> u64 {
        self.counts.get(replica).copied().unwrap_or(0)
    }

    /// Merge with another counter, keeping the maximum of every entry.
    ///
    /// Returns `true` if any entry grew.
    pub fn merge(&mut self, other: &Self) -> bool {
        let mut changed = false;
        for (replica, &count) in &other.counts {
            match self.counts.get_mut(replica) {
                Some(current) if count > *current => {
                    *current = count;
                    changed = true;
                }
                Some(_) => {}
                None => {
                    self.counts.insert(replica.clone(), count);
                    changed = true;
                }
            }
        }
        changed
    }

    /// Iterate over `(replica, entry)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&ReplicaId, u64)> {
        self.counts.iter().map(|(r, c)| (r, *c))
    }
}

impl Lattice for GCounter {
    fn join(&mut self, other: &Self) {
        self.merge(other);
    }
}
