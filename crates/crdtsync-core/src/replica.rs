//! Per-instance replica contract.
//!
//! A [`Replica`] owns the state of one named CRDT instance on one replica
//! and exposes the four operations the surrounding service layer needs:
//! - [`Replica::apply_local`]: a type-specific local mutation
//! - [`Replica::export_state`]: a full, serializable copy of the state
//! - [`Replica::merge`]: integrate a peer's snapshot
//! - [`Replica::value`]: read-only projection
//!
//! `Replica` is not synchronized; callers wrap it in a lock.

use crate::error::CrdtError;
use crate::hlc::{Hlc, Timestamp};
use crate::id::{CharId, ReplicaId};
use crate::sequence::Character;
use crate::snapshot::{CrdtKind, Snapshot};
use serde::{Deserialize, Serialize};

/// A local mutation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Counter increment (G-Counter, PN-Counter)
    Increment {
        /// Non-negative amount
        amount: i64,
    },
    /// Counter decrement (PN-Counter)
    Decrement {
        /// Non-negative amount
        amount: i64,
    },
    /// Set insertion (G-Set, OR-Set)
    Add {
        /// Element to add
        element: String,
    },
    /// Set removal (OR-Set)
    Remove {
        /// Element to remove
        element: String,
    },
    /// Register write (LWW-Register)
    Set {
        /// New value
        value: String,
        /// Logical time of the write; the replica clock is used when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
    /// Text insertion (sequence)
    Insert {
        /// Position in the local view, clamped to the sequence length
        position: usize,
        /// Inserted text fragment
        value: String,
    },
    /// Text deletion by character id (sequence)
    Delete {
        /// Id of the character to tombstone
        id: CharId,
    },
}

impl Operation {
    /// Short name of the operation, used in errors and logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Increment { .. } => "increment",
            Operation::Decrement { .. } => "decrement",
            Operation::Add { .. } => "add",
            Operation::Remove { .. } => "remove",
            Operation::Set { .. } => "set",
            Operation::Insert { .. } => "insert",
            Operation::Delete { .. } => "delete",
        }
    }
}

/// Read-only projection of a CRDT's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Counter total
    Counter(i64),
    /// Visible set elements, sorted
    Elements(Vec<String>),
    /// Register content, if ever written
    Register(Option<String>),
    /// Visible text
    Text(String),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Counter(n) => write!(f, "{n}"),
            Value::Elements(items) => write!(f, "{{{}}}", items.join(", ")),
            Value::Register(Some(value)) => write!(f, "{value:?}"),
            Value::Register(None) => write!(f, "<unset>"),
            Value::Text(text) => write!(f, "{text:?}"),
        }
    }
}

/// Result of a local mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// Value after the mutation
    pub value: Value,
    /// Whether the state changed
    pub changed: bool,
    /// For sequence edits, the character to broadcast to live peers
    pub edit: Option<Character>,
}

/// State of one named CRDT instance on this replica.
#[derive(Debug, Clone)]
pub struct Replica {
    name: String,
    state: Snapshot,
    clock: Hlc,
}

impl Replica {
    /// Create an empty instance of `kind`.
    #[must_use]
    pub fn new(name: impl Into<String>, replica: ReplicaId, kind: CrdtKind) -> Self {
        Self {
            name: name.into(),
            state: Snapshot::empty(kind),
            clock: Hlc::new(replica),
        }
    }

    /// Restore an instance from a previously exported snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`CrdtError::InvalidSnapshot`] if the snapshot fails validation.
    pub fn restore(
        name: impl Into<String>,
        replica: ReplicaId,
        snapshot: Snapshot,
    ) -> Result<Self, CrdtError> {
        snapshot.validate()?;
        let mut restored = Self {
            name: name.into(),
            state: snapshot,
            clock: Hlc::new(replica),
        };
        restored.observe_clock();
        Ok(restored)
    }

    /// Instance name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of the local replica.
    #[must_use]
    pub fn replica_id(&self) -> &ReplicaId {
        self.clock.replica()
    }

    /// Kind of the instance.
    #[must_use]
    pub fn kind(&self) -> CrdtKind {
        self.state.kind()
    }

    /// Apply a local mutation.
    ///
    /// # Errors
    ///
    /// Returns [`CrdtError::InvalidArgument`] for malformed arguments or an
    /// operation the instance's kind does not support. State is unchanged.
    pub fn apply_local(&mut self, op: Operation) -> Result<Applied, CrdtError> {
        let replica = self.clock.replica().clone();
        let kind = self.kind();
        let mut edit = None;

        let changed = match (&mut self.state, op) {
            (Snapshot::GCounter(counter), Operation::Increment { amount }) => {
                counter.increment(&replica, amount)?;
                amount != 0
            }
            (Snapshot::PnCounter(counter), Operation::Increment { amount }) => {
                counter.increment(&replica, amount)?;
                amount != 0
            }
            (Snapshot::PnCounter(counter), Operation::Decrement { amount }) => {
                counter.decrement(&replica, amount)?;
                amount != 0
            }
            (Snapshot::GSet(set), Operation::Add { element }) => {
                set.add(non_empty("element", element)?)
            }
            (Snapshot::OrSet(set), Operation::Add { element }) => {
                set.add(non_empty("element", element)?);
                true
            }
            (Snapshot::OrSet(set), Operation::Remove { element }) => {
                set.remove(&non_empty("element", element)?)
            }
            (Snapshot::LwwRegister(register), Operation::Set { value, timestamp }) => {
                let timestamp = match timestamp {
                    Some(time) => {
                        let explicit = Timestamp::new(time, replica);
                        self.clock.update(&explicit);
                        explicit
                    }
                    None => self.clock.tick(),
                };
                register.set(value, timestamp)
            }
            (Snapshot::Sequence(sequence), Operation::Insert { position, value }) => {
                edit = Some(sequence.insert(position, value, &replica)?);
                true
            }
            (Snapshot::Sequence(sequence), Operation::Delete { id }) => {
                edit = sequence.delete(&id);
                edit.is_some()
            }
            (_, op) => {
                return Err(CrdtError::InvalidArgument(format!(
                    "operation '{}' is not supported by {kind}",
                    op.name()
                )))
            }
        };

        tracing::debug!(instance = %self.name, %kind, changed, "Applied local operation");

        Ok(Applied {
            value: self.value(),
            changed,
            edit,
        })
    }

    /// A full copy of the current state.
    #[must_use]
    pub fn export_state(&self) -> Snapshot {
        self.state.clone()
    }

    /// Borrow the current state.
    #[must_use]
    pub fn state(&self) -> &Snapshot {
        &self.state
    }

    /// Merge a peer's snapshot into this instance.
    ///
    /// All-or-nothing: kind and validity are checked before any mutation.
    /// Returns `true` if the state changed.
    ///
    /// # Errors
    ///
    /// Returns [`CrdtError::KindMismatch`] or [`CrdtError::InvalidSnapshot`].
    pub fn merge(&mut self, remote: &Snapshot) -> Result<bool, CrdtError> {
        if remote.kind() != self.kind() {
            return Err(CrdtError::KindMismatch {
                expected: self.kind(),
                found: remote.kind(),
            });
        }

        let changed = self.state.merge(remote)?;
        self.observe_clock();

        tracing::debug!(instance = %self.name, kind = %self.kind(), changed, "Merged remote snapshot");
        Ok(changed)
    }

    /// Integrate one character received over a live editing channel.
    ///
    /// # Errors
    ///
    /// Returns [`CrdtError::KindMismatch`] if this instance is not a sequence,
    /// or [`CrdtError::InvalidSnapshot`] if the character is malformed.
    pub fn merge_character(&mut self, character: &Character) -> Result<bool, CrdtError> {
        if character.id.site.is_empty() || character.id.counter == 0 {
            return Err(CrdtError::InvalidSnapshot(format!(
                "malformed character id {}",
                character.id
            )));
        }
        let kind = self.kind();
        let Snapshot::Sequence(sequence) = &mut self.state else {
            return Err(CrdtError::KindMismatch {
                expected: kind,
                found: CrdtKind::Sequence,
            });
        };
        Ok(sequence.merge_character(character))
    }

    /// Read-only projection of the state.
    #[must_use]
    pub fn value(&self) -> Value {
        match &self.state {
            Snapshot::GCounter(counter) => {
                Value::Counter(i64::try_from(counter.value()).unwrap_or(i64::MAX))
            }
            Snapshot::PnCounter(counter) => Value::Counter(counter.value()),
            Snapshot::GSet(set) => Value::Elements(sorted(set.elements())),
            Snapshot::OrSet(set) => Value::Elements(sorted(set.elements())),
            Snapshot::LwwRegister(register) => Value::Register(register.get().cloned()),
            Snapshot::Sequence(sequence) => Value::Text(sequence.text()),
        }
    }

    /// Keep the register clock ahead of the stored timestamp, whoever wrote it.
    fn observe_clock(&mut self) {
        if let Snapshot::LwwRegister(register) = &self.state {
            if let Some(timestamp) = register.timestamp() {
                self.clock.update(timestamp);
            }
        }
    }
}

fn non_empty(what: &str, value: String) -> Result<String, CrdtError> {
    if value.is_empty() {
        return Err(CrdtError::InvalidArgument(format!("{what} must not be empty")));
    }
    Ok(value)
}

fn sorted(mut items: Vec<String>) -> Vec<String> {
    items.sort();
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replica(name: &str, id: &str, kind: CrdtKind) -> Replica {
        Replica::new(name, ReplicaId::from(id), kind)
    }

    #[test]
    fn pn_counter_operations() {
        let mut counter = replica("visits", "A", CrdtKind::PnCounter);
        counter.apply_local(Operation::Increment { amount: 10 }).unwrap();
        let applied = counter.apply_local(Operation::Decrement { amount: 3 }).unwrap();

        assert_eq!(applied.value, Value::Counter(7));
        assert!(applied.changed);
    }

    #[test]
    fn unsupported_operation_is_rejected() {
        let mut counter = replica("hits", "A", CrdtKind::GCounter);
        let err = counter
            .apply_local(Operation::Decrement { amount: 1 })
            .unwrap_err();

        assert!(matches!(err, CrdtError::InvalidArgument(_)));
        assert_eq!(counter.value(), Value::Counter(0));
    }

    #[test]
    fn empty_element_is_rejected() {
        let mut set = replica("tags", "A", CrdtKind::OrSet);
        let err = set
            .apply_local(Operation::Add {
                element: String::new(),
            })
            .unwrap_err();
        assert!(matches!(err, CrdtError::InvalidArgument(_)));
    }

    #[test]
    fn remove_absent_element_reports_no_change() {
        let mut set = replica("tags", "A", CrdtKind::OrSet);
        let applied = set
            .apply_local(Operation::Remove {
                element: "ghost".to_string(),
            })
            .unwrap();
        assert!(!applied.changed);
    }

    #[test]
    fn sequence_edits_are_returned_for_broadcast() {
        let mut doc = replica("doc", "A", CrdtKind::Sequence);
        let applied = doc
            .apply_local(Operation::Insert {
                position: 0,
                value: "h".to_string(),
            })
            .unwrap();
        let character = applied.edit.unwrap();
        assert_eq!(character.id, CharId::new("A", 1));

        let deleted = doc
            .apply_local(Operation::Delete { id: character.id })
            .unwrap();
        assert!(deleted.edit.unwrap().deleted);
        assert_eq!(deleted.value, Value::Text(String::new()));

        let missing = doc
            .apply_local(Operation::Delete {
                id: CharId::new("Z", 9),
            })
            .unwrap();
        assert!(!missing.changed);
        assert!(missing.edit.is_none());
    }

    #[test]
    fn merge_rejects_other_kind_without_mutation() {
        let mut counter = replica("hits", "A", CrdtKind::GCounter);
        counter.apply_local(Operation::Increment { amount: 2 }).unwrap();
        let before = counter.export_state();

        let err = counter
            .merge(&Snapshot::empty(CrdtKind::OrSet))
            .unwrap_err();
        assert!(matches!(err, CrdtError::KindMismatch { .. }));
        assert_eq!(counter.export_state(), before);
    }

    #[test]
    fn register_uses_clock_when_no_timestamp_given() {
        let mut register = replica("title", "A", CrdtKind::LwwRegister);
        register
            .apply_local(Operation::Set {
                value: "first".to_string(),
                timestamp: None,
            })
            .unwrap();
        let applied = register
            .apply_local(Operation::Set {
                value: "second".to_string(),
                timestamp: None,
            })
            .unwrap();

        assert_eq!(applied.value, Value::Register(Some("second".to_string())));
    }

    #[test]
    fn clock_moves_past_restored_own_write() {
        let mut writer = replica("title", "A", CrdtKind::LwwRegister);
        writer
            .apply_local(Operation::Set {
                value: "old".to_string(),
                timestamp: Some(u64::MAX / 2),
            })
            .unwrap();

        let mut restored =
            Replica::restore("title", ReplicaId::from("A"), writer.export_state()).unwrap();
        let applied = restored
            .apply_local(Operation::Set {
                value: "new".to_string(),
                timestamp: None,
            })
            .unwrap();

        assert!(applied.changed);
        assert_eq!(applied.value, Value::Register(Some("new".to_string())));
    }

    #[test]
    fn clock_moves_past_explicit_timestamp() {
        let mut register = replica("title", "A", CrdtKind::LwwRegister);
        register
            .apply_local(Operation::Set {
                value: "scheduled".to_string(),
                timestamp: Some(u64::MAX / 2),
            })
            .unwrap();

        let applied = register
            .apply_local(Operation::Set {
                value: "later".to_string(),
                timestamp: None,
            })
            .unwrap();
        assert!(applied.changed);
        assert_eq!(applied.value, Value::Register(Some("later".to_string())));
    }

    #[test]
    fn merge_reports_change() {
        let mut origin = replica("hits", "A", CrdtKind::GCounter);
        origin.apply_local(Operation::Increment { amount: 3 }).unwrap();

        let mut other = replica("hits", "B", CrdtKind::GCounter);
        assert!(other.merge(&origin.export_state()).unwrap());
        assert!(!other.merge(&origin.export_state()).unwrap());
        assert_eq!(other.value(), Value::Counter(3));
    }

    #[test]
    fn merge_with_own_export_is_noop() {
        let mut set = replica("tags", "A", CrdtKind::OrSet);
        set.apply_local(Operation::Add {
            element: "x".to_string(),
        })
        .unwrap();

        let exported = set.export_state();
        assert!(!set.merge(&exported).unwrap());
    }

    #[test]
    fn restore_keeps_state() {
        let mut original = replica("hits", "A", CrdtKind::GCounter);
        original.apply_local(Operation::Increment { amount: 4 }).unwrap();

        let restored =
            Replica::restore("hits", ReplicaId::from("A"), original.export_state()).unwrap();
        assert_eq!(restored.value(), Value::Counter(4));
    }
}
