//! Join-semilattice abstraction shared by every CRDT in this crate.
//!
//! A join `⊔` must satisfy, for all states:
//! - Commutativity: a ⊔ b = b ⊔ a
//! - Associativity: (a ⊔ b) ⊔ c = a ⊔ (b ⊔ c)
//! - Idempotence: a ⊔ a = a
//!
//! These laws are what make state-based replication converge under
//! duplicated, reordered, and stale delivery.

/// A state-based CRDT whose merge is a semilattice join.
pub trait Lattice: Clone + PartialEq {
    /// Join `other` into `self` in place.
    fn join(&mut self, other: &Self);

    /// Return `self ⊔ other` without modifying either side.
    #[must_use]
    fn joined(&self, other: &Self) -> Self {
        let mut out = self.clone();
        out.join(other);
        out
    }

    /// Lattice order: `self ≤ other` iff `self ⊔ other == other`.
    fn leq(&self, other: &Self) -> bool {
        &other.joined(self) == other
    }
}
