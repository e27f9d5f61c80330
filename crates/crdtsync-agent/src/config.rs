//! Agent configuration.

use anyhow::{bail, Context, Result};
use crdtsync_core::{CrdtKind, ReplicaId};
use crdtsync_proto::is_routable;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Id of this replica
    pub replica_id: ReplicaId,

    /// Reconciliation configuration
    pub sync: SyncConfig,

    /// Persistence configuration
    pub persistence: PersistenceConfig,

    /// Instances hosted by this replica
    pub instances: Vec<InstanceConfig>,
}

/// Reconciliation configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URLs of the peers to pull from
    pub peers: Vec<Url>,

    /// Time between reconciliation passes with one peer
    pub interval: Duration,

    /// Prefix of the HTTP route scheme
    pub route_prefix: String,

    /// Timeout of a single peer request
    pub request_timeout: Duration,
}

/// Persistence configuration.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Where snapshots go
    pub store_type: StoreType,

    /// Database path (for `SQLite`)
    pub db_path: PathBuf,

    /// Time between snapshots
    pub snapshot_interval: Duration,
}

/// Snapshot store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreType {
    /// `SQLite` file at `db_path`
    Sqlite,
    /// In-memory `SQLite`, lost on exit
    Memory,
}

impl std::str::FromStr for StoreType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sqlite" => Ok(StoreType::Sqlite),
            "memory" => Ok(StoreType::Memory),
            other => bail!("unknown store type '{other}', expected 'sqlite' or 'memory'"),
        }
    }
}

/// One hosted instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstanceConfig {
    /// Instance name, unique per replica
    pub name: String,

    /// CRDT kind
    pub kind: CrdtKind,
}

impl InstanceConfig {
    /// Create an instance entry.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: CrdtKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            replica_id: ReplicaId::random(),
            sync: SyncConfig {
                peers: Vec::new(),
                interval: Duration::from_millis(3000),
                route_prefix: "crdtsync".to_string(),
                request_timeout: Duration::from_secs(10),
            },
            persistence: PersistenceConfig {
                store_type: StoreType::Sqlite,
                db_path: PathBuf::from("./crdtsync.db"),
                snapshot_interval: Duration::from_millis(60_000),
            },
            instances: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `CRDTSYNC_REPLICA_ID`: Replica id (default: random UUID)
    /// - `CRDTSYNC_PEERS`: Comma-separated peer base URLs
    /// - `CRDTSYNC_SYNC_INTERVAL_MS`: Reconciliation interval
    /// - `CRDTSYNC_ROUTE_PREFIX`: Route prefix
    /// - `CRDTSYNC_INSTANCES`: JSON list of `{"name": ..., "kind": ...}`
    /// - `CRDTSYNC_STORE`: "sqlite" or "memory"
    /// - `CRDTSYNC_DB_PATH`: `SQLite` database path
    /// - `CRDTSYNC_SNAPSHOT_INTERVAL_MS`: Snapshot interval
    ///
    /// # Errors
    ///
    /// Returns error if a variable is malformed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns error if a value is malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(id) = lookup("CRDTSYNC_REPLICA_ID") {
            if id.trim().is_empty() {
                bail!("CRDTSYNC_REPLICA_ID must not be empty");
            }
            config.replica_id = ReplicaId::new(id.trim());
        }

        if let Some(peers) = lookup("CRDTSYNC_PEERS") {
            config.sync.peers = parse_peers(&peers)?;
        }

        if let Some(ms) = lookup("CRDTSYNC_SYNC_INTERVAL_MS") {
            config.sync.interval = parse_millis(&ms).context("Invalid CRDTSYNC_SYNC_INTERVAL_MS")?;
        }

        if let Some(prefix) = lookup("CRDTSYNC_ROUTE_PREFIX") {
            config.sync.route_prefix = prefix;
        }

        if let Some(instances_json) = lookup("CRDTSYNC_INSTANCES") {
            config.instances = serde_json::from_str(&instances_json)
                .context("Invalid CRDTSYNC_INSTANCES JSON")?;
        }

        if let Some(store) = lookup("CRDTSYNC_STORE") {
            config.persistence.store_type = store.parse().context("Invalid CRDTSYNC_STORE")?;
        }

        if let Some(db_path) = lookup("CRDTSYNC_DB_PATH") {
            config.persistence.db_path = PathBuf::from(db_path);
        }

        if let Some(ms) = lookup("CRDTSYNC_SNAPSHOT_INTERVAL_MS") {
            config.persistence.snapshot_interval =
                parse_millis(&ms).context("Invalid CRDTSYNC_SNAPSHOT_INTERVAL_MS")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns error on an empty, dot-segment or duplicated instance name.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for instance in &self.instances {
            if !is_routable(&instance.name) {
                bail!("instance name '{}' is not routable", instance.name);
            }
            if !seen.insert(instance.name.as_str()) {
                bail!("instance '{}' is configured twice", instance.name);
            }
        }
        Ok(())
    }
}

fn parse_peers(input: &str) -> Result<Vec<Url>> {
    input
        .split(',')
        .map(str::trim)
        .filter(|peer| !peer.is_empty())
        .map(|peer| -> Result<Url> {
            let url = Url::parse(peer).with_context(|| format!("Invalid peer URL '{peer}'"))?;
            match url.scheme() {
                "http" | "https" => Ok(url),
                scheme => bail!("peer URL '{peer}' has unsupported scheme '{scheme}'"),
            }
        })
        .collect()
}

fn parse_millis(input: &str) -> Result<Duration> {
    let ms: u64 = input.trim().parse()?;
    if ms == 0 {
        bail!("interval must be positive");
    }
    Ok(Duration::from_millis(ms))
}
