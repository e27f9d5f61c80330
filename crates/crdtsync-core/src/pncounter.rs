//! Positive-negative counter built from two grow-only counters.

use crate::error::CrdtError;
use crate::gcounter::GCounter;
use crate::id::ReplicaId;
use crate::lattice::Lattice;
use serde::{Deserialize, Serialize};

/// A counter supporting both increments and decrements.
///
/// Increments and decrements are tracked by separate [`GCounter`]s; the
/// value is their difference and may be negative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PnCounter {
    /// Increments
    pub inc: GCounter,
    /// Decrements
    pub dec: GCounter,
}

impl PnCounter {
    /// Create a counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increase the counter by `amount` on behalf of `replica`.
    ///
    /// # Errors
    ///
    /// Returns [`CrdtError::InvalidArgument`] if `amount` is negative.
    pub fn increment(&mut self, replica: &ReplicaId, amount: i64) -> Result<(), CrdtError> {
        self.inc.increment(replica, amount)
    }

    /// Decrease the counter by `amount` on behalf of `replica`.
    ///
    /// # Errors
    ///
    /// Returns [`CrdtError::InvalidArgument`] if `amount` is negative.
    pub fn decrement(&mut self, replica: &ReplicaId, amount: i64) -> Result<(), CrdtError> {
        self.dec.increment(replica, amount)
    }

    /// Current value: increments minus decrements.
    #[must_use]
    pub fn value(&self) -> i64 {
        let inc = i128::from(self.inc.value());
        let dec = i128::from(self.dec.value());
        let diff = inc - dec;
        i64::try_from(diff).unwrap_or(if diff < 0 { i64::MIN } else { i64::MAX })
    }

    /// Merge both halves component-wise. Returns `true` on change.
    pub fn merge(&mut self, other: &Self) -> bool {
        let inc = self.inc.merge(&other.inc);
        let dec = self.dec.merge(&other.dec);
        inc || dec
    }
}

impl Lattice for PnCounter {
    fn join(&mut self, other: &Self) {
        self.merge(other);
    }
}
