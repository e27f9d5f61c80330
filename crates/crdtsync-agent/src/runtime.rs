//! Agent runtime orchestration.

use crate::config::{AgentConfig, StoreType};
use crate::peer::{HttpPeer, PeerSource};
use crate::persistence::{SharedStore, SqliteStore};
use crate::reconcile::{reconcile, Reconciler, SyncFailure};
use crate::registry::{Registry, SharedReplica};
use anyhow::{anyhow, Context, Result};
use crdtsync_proto::{CharacterEdit, Encoding, RouteScheme, StateEnvelope};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// The main agent runtime.
pub struct Agent {
    config: AgentConfig,
    registry: Arc<Registry>,
    store: SharedStore,
}

impl Agent {
    /// Create a new agent, restoring stored snapshots.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be opened or a stored snapshot
    /// does not match the configured instance.
    pub fn new(config: AgentConfig) -> Result<Self> {
        let store = match config.persistence.store_type {
            StoreType::Sqlite => SqliteStore::open(&config.persistence.db_path)
                .context("Failed to open SQLite database")?,
            StoreType::Memory => {
                SqliteStore::in_memory().context("Failed to create in-memory store")?
            }
        };
        Self::with_store(config, store)
    }

    /// Create a new agent on top of an already opened store.
    ///
    /// # Errors
    ///
    /// Returns error if a stored snapshot cannot be restored.
    pub fn with_store(config: AgentConfig, store: SqliteStore) -> Result<Self> {
        config.validate()?;

        let mut registry = Registry::new(config.replica_id.clone());
        for instance in &config.instances {
            match store
                .load_snapshot(&instance.name)
                .with_context(|| format!("Failed to load snapshot of '{}'", instance.name))?
            {
                Some(stored) => {
                    if stored.snapshot.kind() != instance.kind {
                        return Err(anyhow!(
                            "stored snapshot of '{}' is a {}, configured as {}",
                            instance.name,
                            stored.snapshot.kind(),
                            instance.kind
                        ));
                    }
                    registry.restore(&instance.name, stored.snapshot)?;
                    tracing::info!(
                        instance = %instance.name,
                        kind = %instance.kind,
                        "Restored snapshot"
                    );
                }
                None => {
                    registry.register(&instance.name, instance.kind)?;
                }
            }
        }

        tracing::info!(
            replica = %config.replica_id,
            instances = registry.len(),
            peers = config.sync.peers.len(),
            "Agent initialized"
        );

        Ok(Self {
            config,
            registry: Arc::new(registry),
            store: store.shared(),
        })
    }

    /// The hosted instances.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Look up one instance.
    #[must_use]
    pub fn instance(&self, name: &str) -> Option<&SharedReplica> {
        self.registry.get(name)
    }

    /// The persistence store.
    #[must_use]
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Merge an envelope pushed by a peer.
    ///
    /// The payload is decoded and validated before any lock is taken.
    ///
    /// # Errors
    ///
    /// Returns a [`SyncFailure`] if the payload is malformed, names an
    /// unknown instance, or cannot be merged. State is unchanged.
    pub async fn accept_push(&self, bytes: &[u8]) -> Result<bool, SyncFailure> {
        let envelope = StateEnvelope::decode(bytes, Encoding::sniff(bytes)).map_err(|e| {
            SyncFailure::Decode {
                peer: "push".to_string(),
                reason: e.to_string(),
            }
        })?;

        let local = self
            .registry
            .get(&envelope.instance)
            .ok_or_else(|| SyncFailure::UnknownInstance(envelope.instance.clone()))?;
        reconcile(local, &envelope).await
    }

    /// Integrate a live sequence edit.
    ///
    /// # Errors
    ///
    /// Returns a [`SyncFailure`] if the payload is malformed, names an
    /// unknown instance, or targets an instance that is not a sequence.
    pub async fn accept_edit(&self, bytes: &[u8]) -> Result<bool, SyncFailure> {
        let edit = CharacterEdit::decode(bytes, Encoding::sniff(bytes)).map_err(|e| {
            SyncFailure::Decode {
                peer: "edits".to_string(),
                reason: e.to_string(),
            }
        })?;

        let local = self
            .registry
            .get(&edit.instance)
            .ok_or_else(|| SyncFailure::UnknownInstance(edit.instance.clone()))?;

        let changed = local
            .merge_character(&edit.character)
            .await
            .map_err(|e| SyncFailure::Rejected {
                instance: edit.instance.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!(
            instance = %edit.instance,
            origin = %edit.origin,
            id = %edit.character.id,
            changed,
            "Merged live edit"
        );
        Ok(changed)
    }

    /// Write a snapshot of every instance to the store.
    ///
    /// Returns the number of instances written. Exports take read locks
    /// only; the store lock is taken after all exports finished.
    ///
    /// # Errors
    ///
    /// Returns error if the store lock is poisoned or a write fails.
    pub async fn persist(&self) -> Result<usize> {
        let mut snapshots = Vec::with_capacity(self.registry.len());
        for instance in self.registry.iter() {
            snapshots.push((instance.name().to_string(), instance.export_state().await));
        }

        let store = self
            .store
            .lock()
            .map_err(|_| anyhow!("store lock poisoned"))?;
        for (name, snapshot) in &snapshots {
            store
                .save_snapshot(name, self.registry.replica_id(), snapshot)
                .with_context(|| format!("Failed to persist '{name}'"))?;
        }

        Ok(snapshots.len())
    }

    /// Build one reconciler per configured peer.
    ///
    /// # Errors
    ///
    /// Returns error if an HTTP client cannot be created.
    pub fn reconcilers(&self) -> Result<Vec<Reconciler>> {
        let routes = RouteScheme::new(self.config.sync.route_prefix.clone());

        self.config
            .sync
            .peers
            .iter()
            .map(|url| -> Result<Reconciler> {
                let peer: Arc<dyn PeerSource> = Arc::new(
                    HttpPeer::new(url.clone(), routes.clone(), self.config.sync.request_timeout)
                        .with_context(|| format!("Failed to create client for peer {url}"))?,
                );
                Ok(
                    Reconciler::new(peer, Arc::clone(&self.registry), self.config.sync.interval)
                        .with_store(Some(Arc::clone(&self.store))),
                )
            })
            .collect()
    }

    /// Run the agent until Ctrl+C.
    ///
    /// # Errors
    ///
    /// Returns error if a reconciler cannot be created or the final
    /// snapshot fails.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Starting agent runtime");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles: Vec<_> = self
            .reconcilers()?
            .into_iter()
            .map(|reconciler| reconciler.spawn(shutdown_rx.clone()))
            .collect();

        let mut snapshot_ticker = tokio::time::interval(self.config.persistence.snapshot_interval);
        snapshot_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; nothing to persist yet.
        snapshot_ticker.tick().await;

        tracing::info!("Agent running, press Ctrl+C to stop");

        loop {
            tokio::select! {
                _ = snapshot_ticker.tick() => {
                    match self.persist().await {
                        Ok(count) => tracing::debug!(count, "Persisted snapshots"),
                        Err(err) => tracing::warn!(error = %err, "Failed to persist snapshots"),
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
            }
        }

        // Receivers also stop if the sender is gone.
        let _ = shutdown_tx.send(true);
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "Reconciler task failed");
            }
        }

        let count = self.persist().await.context("Failed to persist final snapshot")?;
        tracing::info!(count, "Agent stopped");
        Ok(())
    }
}
