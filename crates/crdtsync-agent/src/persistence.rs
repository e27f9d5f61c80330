//! `SQLite` persistence layer.
//!
//! Snapshots are stored as CBOR, one row per instance. Reconciliation
//! progress is tracked per peer and instance.

use crdtsync_core::{CrdtKind, ReplicaId, Snapshot};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Store shared between the runtime and the reconcilers.
///
/// The lock is only ever held for synchronous calls.
pub type SharedStore = Arc<Mutex<SqliteStore>>;

/// A snapshot read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSnapshot {
    /// Replica that wrote the snapshot
    pub origin: ReplicaId,
    /// The instance state
    pub snapshot: Snapshot,
    /// Unix seconds of the last write
    pub updated_at: u64,
}

/// Reconciliation progress with one peer for one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerProgress {
    /// Unix seconds of the last successful merge, if any
    pub last_success_at: Option<u64>,
    /// Consecutive failures since then
    pub failures: u64,
}

/// `SQLite`-backed persistence store.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open or create a `SQLite` database.
    ///
    /// # Errors
    ///
    /// Returns error if database cannot be opened or initialized.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns error if database cannot be created.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Wrap the store for sharing.
    #[must_use]
    pub fn shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r"
            -- Latest state of each instance
            CREATE TABLE IF NOT EXISTS instance_snapshots (
                instance TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                origin TEXT NOT NULL,
                snapshot_bytes BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            );

            -- Peer progress tracking
            CREATE TABLE IF NOT EXISTS peer_progress (
                peer TEXT NOT NULL,
                instance TEXT NOT NULL,
                last_success_at INTEGER,
                failures INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (peer, instance)
            );
            ",
        )?;

        Ok(())
    }

    /// Save the snapshot of an instance, replacing the previous one.
    ///
    /// # Errors
    ///
    /// Returns error if encoding or the insert fails.
    pub fn save_snapshot(
        &self,
        instance: &str,
        origin: &ReplicaId,
        snapshot: &Snapshot,
    ) -> Result<(), StoreError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(snapshot, &mut bytes)
            .map_err(|e| StoreError::Encode(e.to_string()))?;

        self.conn.execute(
            r"
            INSERT OR REPLACE INTO instance_snapshots (instance, kind, origin, snapshot_bytes, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            (
                instance,
                snapshot.kind().as_str(),
                origin.as_str(),
                bytes,
                to_i64(now_secs())?,
            ),
        )?;

        tracing::debug!(instance, kind = %snapshot.kind(), "Saved snapshot");
        Ok(())
    }

    /// Load the snapshot of an instance.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails or the stored bytes do not decode
    /// to a valid snapshot of the recorded kind.
    pub fn load_snapshot(&self, instance: &str) -> Result<Option<StoredSnapshot>, StoreError> {
        let row = self
            .conn
            .query_row(
                r"
                SELECT kind, origin, snapshot_bytes, updated_at FROM instance_snapshots
                WHERE instance = ?1
                ",
                [instance],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((kind, origin, bytes, updated_at)) = row else {
            return Ok(None);
        };

        let kind: CrdtKind = kind
            .parse()
            .map_err(|e: crdtsync_core::CrdtError| StoreError::Decode(e.to_string()))?;
        let snapshot: Snapshot = ciborium::from_reader(bytes.as_slice())
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        if snapshot.kind() != kind {
            return Err(StoreError::Decode(format!(
                "instance '{instance}' recorded as {kind} but holds {}",
                snapshot.kind()
            )));
        }
        snapshot
            .validate()
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        Ok(Some(StoredSnapshot {
            origin: ReplicaId::new(origin),
            snapshot,
            updated_at: u64::try_from(updated_at).unwrap_or_default(),
        }))
    }

    /// Names of every stored instance.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub fn instances(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT instance FROM instance_snapshots ORDER BY instance")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    /// Record a successful merge from `peer`, resetting its failure count.
    ///
    /// # Errors
    ///
    /// Returns error if the upsert fails.
    pub fn record_success(&self, peer: &str, instance: &str) -> Result<(), StoreError> {
        self.conn.execute(
            r"
            INSERT INTO peer_progress (peer, instance, last_success_at, failures)
            VALUES (?1, ?2, ?3, 0)
            ON CONFLICT (peer, instance)
            DO UPDATE SET last_success_at = excluded.last_success_at, failures = 0
            ",
            (peer, instance, to_i64(now_secs())?),
        )?;
        Ok(())
    }

    /// Record a failed reconciliation attempt with `peer`.
    ///
    /// # Errors
    ///
    /// Returns error if the upsert fails.
    pub fn record_failure(&self, peer: &str, instance: &str) -> Result<(), StoreError> {
        self.conn.execute(
            r"
            INSERT INTO peer_progress (peer, instance, last_success_at, failures)
            VALUES (?1, ?2, NULL, 1)
            ON CONFLICT (peer, instance)
            DO UPDATE SET failures = failures + 1
            ",
            (peer, instance),
        )?;
        Ok(())
    }

    /// Progress with `peer` for `instance`.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub fn peer_progress(&self, peer: &str, instance: &str) -> Result<Option<PeerProgress>, StoreError> {
        let progress = self
            .conn
            .query_row(
                r"
                SELECT last_success_at, failures FROM peer_progress
                WHERE peer = ?1 AND instance = ?2
                ",
                (peer, instance),
                |row| Ok((row.get::<_, Option<i64>>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        Ok(progress.map(|(last_success_at, failures)| PeerProgress {
            last_success_at: last_success_at.and_then(|ts| u64::try_from(ts).ok()),
            failures: u64::try_from(failures).unwrap_or_default(),
        }))
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn to_i64(value: u64) -> rusqlite::Result<i64> {
    i64::try_from(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

/// Errors for persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Snapshot could not be encoded
    #[error("snapshot encoding failed: {0}")]
    Encode(String),
    /// Stored snapshot could not be decoded
    #[error("stored snapshot is corrupt: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crdtsync_core::{GCounter, OrSet};

    #[test]
    fn snapshot_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        let origin = ReplicaId::from("A");

        let mut counter = GCounter::new();
        counter.increment(&origin, 5).unwrap();
        store
            .save_snapshot("hits", &origin, &Snapshot::GCounter(counter.clone()))
            .unwrap();

        let stored = store.load_snapshot("hits").unwrap().unwrap();
        assert_eq!(stored.origin, origin);
        assert_eq!(stored.snapshot, Snapshot::GCounter(counter));
        assert!(store.load_snapshot("missing").unwrap().is_none());
    }

    #[test]
    fn later_snapshot_replaces_earlier() {
        let store = SqliteStore::in_memory().unwrap();
        let origin = ReplicaId::from("A");

        let mut set = OrSet::new();
        store
            .save_snapshot("tags", &origin, &Snapshot::OrSet(set.clone()))
            .unwrap();
        set.add("x".to_string());
        store
            .save_snapshot("tags", &origin, &Snapshot::OrSet(set.clone()))
            .unwrap();

        assert_eq!(store.instances().unwrap(), vec!["tags".to_string()]);
        assert_eq!(
            store.load_snapshot("tags").unwrap().unwrap().snapshot,
            Snapshot::OrSet(set)
        );
    }

    #[test]
    fn corrupt_snapshot_is_reported() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .conn
            .execute(
                "INSERT INTO instance_snapshots VALUES ('hits', 'g_counter', 'A', x'ff00', 0)",
                [],
            )
            .unwrap();

        assert!(matches!(
            store.load_snapshot("hits"),
            Err(StoreError::Decode(_))
        ));
    }

    #[test]
    fn peer_progress_counts_failures_until_success() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.peer_progress("B", "hits").unwrap().is_none());

        store.record_failure("B", "hits").unwrap();
        store.record_failure("B", "hits").unwrap();
        let progress = store.peer_progress("B", "hits").unwrap().unwrap();
        assert_eq!(progress.failures, 2);
        assert!(progress.last_success_at.is_none());

        store.record_success("B", "hits").unwrap();
        let progress = store.peer_progress("B", "hits").unwrap().unwrap();
        assert_eq!(progress.failures, 0);
        assert!(progress.last_success_at.is_some());
    }
}
