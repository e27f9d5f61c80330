//! Registry of the named CRDT instances hosted by this replica.

use crdtsync_core::{
    Applied, Character, CrdtError, CrdtKind, Operation, Replica, ReplicaId, Snapshot, Value,
};
use crdtsync_proto::{is_routable, StateEnvelope};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One instance behind a read/write lock.
///
/// Mutations and merges take the write lock, projections and exports the
/// read lock. Every guard lives for a single call, so a lock is never held
/// across an await point outside this type.
#[derive(Debug, Clone)]
pub struct SharedReplica {
    name: Arc<str>,
    kind: CrdtKind,
    inner: Arc<RwLock<Replica>>,
}

impl SharedReplica {
    /// Wrap a replica.
    #[must_use]
    pub fn new(replica: Replica) -> Self {
        Self {
            name: Arc::from(replica.name()),
            kind: replica.kind(),
            inner: Arc::new(RwLock::new(replica)),
        }
    }

    /// Instance name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instance kind.
    #[must_use]
    pub fn kind(&self) -> CrdtKind {
        self.kind
    }

    /// Apply a local mutation.
    ///
    /// # Errors
    ///
    /// Returns [`CrdtError::InvalidArgument`] for malformed arguments.
    pub async fn apply_local(&self, op: Operation) -> Result<Applied, CrdtError> {
        self.inner.write().await.apply_local(op)
    }

    /// Full copy of the current state.
    pub async fn export_state(&self) -> Snapshot {
        self.inner.read().await.export_state()
    }

    /// Merge a peer's snapshot. Returns `true` if the state changed.
    ///
    /// # Errors
    ///
    /// Returns [`CrdtError::KindMismatch`] or [`CrdtError::InvalidSnapshot`];
    /// the state is untouched in both cases.
    pub async fn merge(&self, remote: &Snapshot) -> Result<bool, CrdtError> {
        self.inner.write().await.merge(remote)
    }

    /// Integrate a single live sequence character.
    ///
    /// # Errors
    ///
    /// Returns [`CrdtError::KindMismatch`] if this is not a sequence.
    pub async fn merge_character(&self, character: &Character) -> Result<bool, CrdtError> {
        self.inner.write().await.merge_character(character)
    }

    /// Read-only projection of the state.
    pub async fn value(&self) -> Value {
        self.inner.read().await.value()
    }
}

/// Named instances of one replica.
#[derive(Debug, Clone)]
pub struct Registry {
    replica_id: ReplicaId,
    instances: BTreeMap<String, SharedReplica>,
}

impl Registry {
    /// Create an empty registry for `replica_id`.
    #[must_use]
    pub fn new(replica_id: ReplicaId) -> Self {
        Self {
            replica_id,
            instances: BTreeMap::new(),
        }
    }

    /// Id of the local replica.
    #[must_use]
    pub fn replica_id(&self) -> &ReplicaId {
        &self.replica_id
    }

    /// Register an empty instance, or return the existing one.
    ///
    /// # Errors
    ///
    /// Returns [`CrdtError::InvalidArgument`] for an empty or dot-segment
    /// name and [`CrdtError::KindMismatch`] if the name is taken by another
    /// kind.
    pub fn register(&mut self, name: &str, kind: CrdtKind) -> Result<SharedReplica, CrdtError> {
        check_name(name)?;
        if let Some(existing) = self.instances.get(name) {
            if existing.kind() != kind {
                return Err(CrdtError::KindMismatch {
                    expected: existing.kind(),
                    found: kind,
                });
            }
            return Ok(existing.clone());
        }

        let shared = SharedReplica::new(Replica::new(name, self.replica_id.clone(), kind));
        self.instances.insert(name.to_string(), shared.clone());
        Ok(shared)
    }

    /// Register an instance restored from a stored snapshot, replacing any
    /// empty instance of the same name.
    ///
    /// # Errors
    ///
    /// Returns [`CrdtError::InvalidArgument`] for an unroutable name and
    /// [`CrdtError::InvalidSnapshot`] if the snapshot fails validation.
    pub fn restore(&mut self, name: &str, snapshot: Snapshot) -> Result<SharedReplica, CrdtError> {
        check_name(name)?;
        let replica = Replica::restore(name, self.replica_id.clone(), snapshot)?;
        let shared = SharedReplica::new(replica);
        self.instances.insert(name.to_string(), shared.clone());
        Ok(shared)
    }

    /// Look up an instance.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SharedReplica> {
        self.instances.get(name)
    }

    /// Instance names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.instances.keys().map(String::as_str)
    }

    /// Iterate over all instances in name order.
    pub fn iter(&self) -> impl Iterator<Item = &SharedReplica> {
        self.instances.values()
    }

    /// Number of instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Check if no instance is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Export one instance as a wire envelope.
    pub async fn envelope(&self, name: &str) -> Option<StateEnvelope> {
        let shared = self.instances.get(name)?;
        let snapshot = shared.export_state().await;
        Some(StateEnvelope::new(name, self.replica_id.clone(), snapshot))
    }
}

fn check_name(name: &str) -> Result<(), CrdtError> {
    if !is_routable(name) {
        return Err(CrdtError::InvalidArgument(format!(
            "instance name '{name}' is not routable"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_returns_existing_instance() {
        let mut registry = Registry::new(ReplicaId::from("A"));
        let first = registry.register("hits", CrdtKind::GCounter).unwrap();
        let again = registry.register("hits", CrdtKind::GCounter).unwrap();

        tokio_test::block_on(async {
            first
                .apply_local(Operation::Increment { amount: 3 })
                .await
                .unwrap();
            assert_eq!(again.value().await, Value::Counter(3));
        });
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn register_rejects_kind_clash_and_empty_name() {
        let mut registry = Registry::new(ReplicaId::from("A"));
        registry.register("hits", CrdtKind::GCounter).unwrap();

        assert!(matches!(
            registry.register("hits", CrdtKind::OrSet),
            Err(CrdtError::KindMismatch { .. })
        ));
        assert!(matches!(
            registry.register("", CrdtKind::OrSet),
            Err(CrdtError::InvalidArgument(_))
        ));
        for name in [".", ".."] {
            assert!(matches!(
                registry.register(name, CrdtKind::OrSet),
                Err(CrdtError::InvalidArgument(_))
            ));
            assert!(registry
                .restore(name, Snapshot::empty(CrdtKind::OrSet))
                .is_err());
        }
        assert!(registry.register("a/b", CrdtKind::OrSet).is_ok());
    }

    #[test]
    fn envelope_carries_local_origin() {
        let mut registry = Registry::new(ReplicaId::from("A"));
        let tags = registry.register("tags", CrdtKind::OrSet).unwrap();

        let envelope = tokio_test::block_on(async {
            tags.apply_local(Operation::Add {
                element: "x".to_string(),
            })
            .await
            .unwrap();
            registry.envelope("tags").await.unwrap()
        });

        assert_eq!(envelope.instance, "tags");
        assert_eq!(envelope.origin, ReplicaId::from("A"));
        assert_eq!(envelope.kind(), CrdtKind::OrSet);
        assert!(tokio_test::block_on(registry.envelope("missing")).is_none());
    }

    #[test]
    fn failed_merge_leaves_state_untouched() {
        let mut registry = Registry::new(ReplicaId::from("A"));
        let hits = registry.register("hits", CrdtKind::GCounter).unwrap();

        tokio_test::block_on(async {
            hits.apply_local(Operation::Increment { amount: 2 })
                .await
                .unwrap();
            let err = hits
                .merge(&Snapshot::empty(CrdtKind::Sequence))
                .await
                .unwrap_err();
            assert!(matches!(err, CrdtError::KindMismatch { .. }));
            assert_eq!(hits.value().await, Value::Counter(2));
        });
    }
}
