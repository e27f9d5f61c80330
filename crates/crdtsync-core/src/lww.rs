//! Last-Writer-Wins register.

use crate::hlc::Timestamp;
use crate::lattice::Lattice;
use serde::{Deserialize, Serialize};

/// A value together with the timestamp of the write that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterEntry<T> {
    /// The stored value
    pub value: T,
    /// Timestamp of the write
    pub timestamp: Timestamp,
}

/// A Last-Writer-Wins register holding a value with a timestamp.
///
/// Writes and merges keep the value with the strictly higher timestamp.
/// Timestamps carry the writing replica's id, so concurrent writes at the
/// same logical time still resolve identically on every replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LwwRegister<T> {
    entry: Option<RegisterEntry<T>>,
}

impl<T> Default for LwwRegister<T> {
    fn default() -> Self {
        Self { entry: None }
    }
}

impl<T: Clone> LwwRegister<T> {
    /// Create an empty register.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a register with an initial value.
    #[must_use]
    pub fn with_value(value: T, timestamp: Timestamp) -> Self {
        Self {
            entry: Some(RegisterEntry { value, timestamp }),
        }
    }

    /// Update the register value if the new timestamp is strictly higher.
    ///
    /// Equal timestamps are ignored so that a retried write is a no-op.
    /// Returns `true` if the value was updated.
    pub fn set(&mut self, value: T, timestamp: Timestamp) -> bool {
        if self.is_older_than(&timestamp) {
            self.entry = Some(RegisterEntry { value, timestamp });
            true
        } else {
            false
        }
    }

    /// Current value, if any write has been observed.
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        self.entry.as_ref().map(|e| &e.value)
    }

    /// Timestamp of the current value.
    #[must_use]
    pub fn timestamp(&self) -> Option<&Timestamp> {
        self.entry.as_ref().map(|e| &e.timestamp)
    }

    /// The current value and its timestamp.
    #[must_use]
    pub fn entry(&self) -> Option<&RegisterEntry<T>> {
        self.entry.as_ref()
    }

    /// Merge with another register, keeping the value with the higher timestamp.
    ///
    /// Returns `true` if the other register's value won.
    pub fn merge(&mut self, other: &Self) -> bool {
        match &other.entry {
            Some(theirs) if self.is_older_than(&theirs.timestamp) => {
                self.entry = Some(theirs.clone());
                true
            }
            _ => false,
        }
    }

    fn is_older_than(&self, timestamp: &Timestamp) -> bool {
        self.entry
            .as_ref()
            .map_or(true, |current| *timestamp > current.timestamp)
    }
}

impl<T: Clone + PartialEq> Lattice for LwwRegister<T> {
    fn join(&mut self, other: &Self) {
        self.merge(other);
    }
}
