//! Replica identity and unique tag generation.
//!
//! Two uniqueness schemes are used without any coordinator:
//! - [`Tag`]: random 128-bit identifiers for OR-Set adds
//! - [`CharId`]: replica id paired with a per-replica monotonic counter,
//!   used by the sequence CRDT

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use uuid::Uuid;

/// Identifier of a replica (a "site").
///
/// Replica ids are compared lexicographically; this order is the
/// deterministic tiebreaker everywhere two replicas could otherwise tie.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaId(String);

impl ReplicaId {
    /// Create a replica id from any string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Create a random replica id (UUID v4, hyphenated).
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is empty (never valid on the wire).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReplicaId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ReplicaId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A globally unique tag attached to a single OR-Set add.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(Uuid);

impl Tag {
    /// Mint a fresh random tag.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Build a tag from a fixed value. Mostly useful in tests.
    #[must_use]
    pub fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a sequence character: the inserting site plus that
/// site's counter at insertion time.
///
/// Ordered by counter first, then site. This is the canonical document
/// order of the sequence CRDT.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharId {
    /// Inserting replica
    pub site: ReplicaId,
    /// Per-site counter, starting at 1
    pub counter: u64,
}

impl CharId {
    /// Create a character id.
    #[must_use]
    pub fn new(site: impl Into<ReplicaId>, counter: u64) -> Self {
        Self {
            site: site.into(),
            counter,
        }
    }
}

impl Ord for CharId {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.counter.cmp(&other.counter) {
            Ordering::Equal => self.site.cmp(&other.site),
            ord => ord,
        }
    }
}

impl PartialOrd for CharId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for CharId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.site, self.counter)
    }
}

/// Per-site monotonic counters used to mint [`CharId`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteCounters {
    last: HashMap<ReplicaId, u64>,
}

impl SiteCounters {
    /// Create an empty counter table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint the next id for `site`.
    pub fn next(&mut self, site: &ReplicaId) -> CharId {
        let counter = self.last.entry(site.clone()).or_insert(0);
        *counter = counter.saturating_add(1);
        CharId {
            site: site.clone(),
            counter: *counter,
        }
    }

    /// Record that `id` exists, so later ids for its site never collide with it.
    pub fn observe(&mut self, id: &CharId) {
        let counter = self.last.entry(id.site.clone()).or_insert(0);
        if id.counter > *counter {
            *counter = id.counter;
        }
    }

    /// Last counter minted or observed for `site` (0 if none).
    #[must_use]
    pub fn last(&self, site: &ReplicaId) -> u64 {
        self.last.get(site).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_id_orders_by_counter_then_site() {
        let a1 = CharId::new("A", 1);
        let b1 = CharId::new("B", 1);
        let a2 = CharId::new("A", 2);

        assert!(a1 < b1);
        assert!(b1 < a2);
    }

    #[test]
    fn site_counters_are_monotonic_per_site() {
        let mut counters = SiteCounters::new();
        let a = ReplicaId::from("A");
        let b = ReplicaId::from("B");

        assert_eq!(counters.next(&a), CharId::new("A", 1));
        assert_eq!(counters.next(&a), CharId::new("A", 2));
        assert_eq!(counters.next(&b), CharId::new("B", 1));
    }

    #[test]
    fn observed_ids_are_never_reissued() {
        let mut counters = SiteCounters::new();
        let a = ReplicaId::from("A");

        counters.observe(&CharId::new("A", 7));
        assert_eq!(counters.next(&a).counter, 8);

        // Observing an older id does not move the counter back.
        counters.observe(&CharId::new("A", 3));
        assert_eq!(counters.last(&a), 8);
    }

    #[test]
    fn random_tags_differ() {
        assert_ne!(Tag::random(), Tag::random());
    }
}
