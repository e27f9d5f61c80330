//! Serializable state snapshots.
//!
//! A [`Snapshot`] is the full internal state of one CRDT instance, tagged
//! with its kind. It is what replicas exchange and what persistence stores.
//!
//! JSON shape: `{"type": "or_set", "state": {"added": {...}, "removed": {...}}}`.
//!
//! Foreign snapshots must pass [`Snapshot::validate`] before they are merged.

use crate::error::CrdtError;
use crate::gcounter::GCounter;
use crate::gset::GSet;
use crate::lww::LwwRegister;
use crate::orset::OrSet;
use crate::pncounter::PnCounter;
use crate::sequence::Sequence;
use serde::{Deserialize, Serialize};

/// The kind of a CRDT instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrdtKind {
    /// Grow-only counter
    GCounter,
    /// Positive-negative counter
    PnCounter,
    /// Grow-only set
    GSet,
    /// Observed-remove set
    OrSet,
    /// Last-writer-wins register
    LwwRegister,
    /// Sequence CRDT for text
    Sequence,
}

impl CrdtKind {
    /// All kinds, in declaration order.
    pub const ALL: [CrdtKind; 6] = [
        CrdtKind::GCounter,
        CrdtKind::PnCounter,
        CrdtKind::GSet,
        CrdtKind::OrSet,
        CrdtKind::LwwRegister,
        CrdtKind::Sequence,
    ];

    /// Stable string name of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CrdtKind::GCounter => "g_counter",
            CrdtKind::PnCounter => "pn_counter",
            CrdtKind::GSet => "g_set",
            CrdtKind::OrSet => "or_set",
            CrdtKind::LwwRegister => "lww_register",
            CrdtKind::Sequence => "sequence",
        }
    }
}

impl std::fmt::Display for CrdtKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CrdtKind {
    type Err = CrdtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CrdtKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CrdtError::InvalidArgument(format!("unknown CRDT kind '{s}'")))
    }
}

/// Full state of one CRDT instance, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "state", rename_all = "snake_case")]
pub enum Snapshot {
    /// Grow-only counter state
    GCounter(GCounter),
    /// Positive-negative counter state
    PnCounter(PnCounter),
    /// Grow-only set state
    GSet(GSet<String>),
    /// Observed-remove set state
    OrSet(OrSet<String>),
    /// Last-writer-wins register state
    LwwRegister(LwwRegister<String>),
    /// Sequence state
    Sequence(Sequence),
}

impl Snapshot {
    /// An empty state of the given kind.
    #[must_use]
    pub fn empty(kind: CrdtKind) -> Self {
        match kind {
            CrdtKind::GCounter => Snapshot::GCounter(GCounter::new()),
            CrdtKind::PnCounter => Snapshot::PnCounter(PnCounter::new()),
            CrdtKind::GSet => Snapshot::GSet(GSet::new()),
            CrdtKind::OrSet => Snapshot::OrSet(OrSet::new()),
            CrdtKind::LwwRegister => Snapshot::LwwRegister(LwwRegister::new()),
            CrdtKind::Sequence => Snapshot::Sequence(Sequence::new()),
        }
    }

    /// Kind of the snapshot.
    #[must_use]
    pub fn kind(&self) -> CrdtKind {
        match self {
            Snapshot::GCounter(_) => CrdtKind::GCounter,
            Snapshot::PnCounter(_) => CrdtKind::PnCounter,
            Snapshot::GSet(_) => CrdtKind::GSet,
            Snapshot::OrSet(_) => CrdtKind::OrSet,
            Snapshot::LwwRegister(_) => CrdtKind::LwwRegister,
            Snapshot::Sequence(_) => CrdtKind::Sequence,
        }
    }

    /// Check structural invariants a decoder cannot enforce on its own.
    ///
    /// # Errors
    ///
    /// Returns [`CrdtError::InvalidSnapshot`] naming the first violation.
    pub fn validate(&self) -> Result<(), CrdtError> {
        match self {
            Snapshot::GCounter(counter) => validate_counter(counter),
            Snapshot::PnCounter(counter) => {
                validate_counter(&counter.inc)?;
                validate_counter(&counter.dec)
            }
            Snapshot::GSet(set) => {
                if set.contains(&String::new()) {
                    return Err(CrdtError::InvalidSnapshot(
                        "g-set holds an empty element".to_string(),
                    ));
                }
                Ok(())
            }
            Snapshot::OrSet(set) => validate_or_set(set),
            Snapshot::LwwRegister(register) => match register.timestamp() {
                Some(ts) if ts.replica.is_empty() => Err(CrdtError::InvalidSnapshot(
                    "register timestamp has an empty replica id".to_string(),
                )),
                _ => Ok(()),
            },
            // Ids are checked while decoding, see `Sequence`'s `TryFrom`.
            Snapshot::Sequence(_) => Ok(()),
        }
    }

    /// Join another snapshot of the same kind into this one.
    ///
    /// Kind and validity are checked before anything is modified, so a
    /// rejected merge leaves `self` untouched. Returns `true` if the state
    /// changed.
    ///
    /// # Errors
    ///
    /// Returns [`CrdtError::KindMismatch`] or [`CrdtError::InvalidSnapshot`].
    pub fn merge(&mut self, other: &Snapshot) -> Result<bool, CrdtError> {
        other.validate()?;

        let changed = match (self, other) {
            (Snapshot::GCounter(a), Snapshot::GCounter(b)) => a.merge(b),
            (Snapshot::PnCounter(a), Snapshot::PnCounter(b)) => a.merge(b),
            (Snapshot::GSet(a), Snapshot::GSet(b)) => a.merge(b),
            (Snapshot::OrSet(a), Snapshot::OrSet(b)) => a.merge(b),
            (Snapshot::LwwRegister(a), Snapshot::LwwRegister(b)) => a.merge(b),
            (Snapshot::Sequence(a), Snapshot::Sequence(b)) => a.merge(b),
            (local, remote) => {
                return Err(CrdtError::KindMismatch {
                    expected: local.kind(),
                    found: remote.kind(),
                })
            }
        };
        Ok(changed)
    }
}

fn validate_counter(counter: &GCounter) -> Result<(), CrdtError> {
    if counter.iter().any(|(replica, _)| replica.is_empty()) {
        return Err(CrdtError::InvalidSnapshot(
            "counter entry has an empty replica id".to_string(),
        ));
    }
    Ok(())
}

fn validate_or_set(set: &OrSet<String>) -> Result<(), CrdtError> {
    if set.known_elements().any(String::is_empty) {
        return Err(CrdtError::InvalidSnapshot(
            "or-set holds an empty element".to_string(),
        ));
    }

    // Local operations never produce empty tag sets; a peer that sends one
    // would break structural equality of merged states.
    match set.empty_tag_entries().next() {
        Some(element) => Err(CrdtError::InvalidSnapshot(format!(
            "or-set element '{element}' has an empty tag set"
        ))),
        None => Ok(()),
    }
}
