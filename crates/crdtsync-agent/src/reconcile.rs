//! State-based reconciliation with peers.
//!
//! Reconciliation is a plain merge of the peer's full state, so stale,
//! duplicated, or reordered envelopes are harmless. Any failure is
//! transient: it is logged, counted, and retried on the next tick.

use crate::peer::PeerSource;
use crate::persistence::SharedStore;
use crate::registry::{Registry, SharedReplica};
use crdtsync_proto::StateEnvelope;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Merge a peer's envelope into the matching local instance.
///
/// Returns `true` if the local state changed.
///
/// # Errors
///
/// Returns [`SyncFailure::Rejected`] if the envelope names another instance
/// or its snapshot cannot be merged. The local state is unchanged.
pub async fn reconcile(
    local: &SharedReplica,
    envelope: &StateEnvelope,
) -> Result<bool, SyncFailure> {
    if envelope.instance != local.name() {
        return Err(SyncFailure::Rejected {
            instance: local.name().to_string(),
            reason: format!("envelope is for instance '{}'", envelope.instance),
        });
    }

    let changed = local
        .merge(&envelope.snapshot)
        .await
        .map_err(|e| SyncFailure::Rejected {
            instance: local.name().to_string(),
            reason: e.to_string(),
        })?;

    tracing::debug!(
        instance = %local.name(),
        origin = %envelope.origin,
        changed,
        "Reconciled peer state"
    );
    Ok(changed)
}

/// Outcome of one reconciliation pass against a peer.
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    /// Instances merged successfully
    pub merged: usize,
    /// Instances whose state changed
    pub changed: usize,
    /// Failures, one per instance at most
    pub failures: Vec<SyncFailure>,
}

impl ReconcileReport {
    /// Check if every instance reconciled.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Periodically pulls every instance's state from one peer.
pub struct Reconciler {
    peer: Arc<dyn PeerSource>,
    registry: Arc<Registry>,
    interval: Duration,
    store: Option<SharedStore>,
}

impl Reconciler {
    /// Create a reconciler for `peer`.
    #[must_use]
    pub fn new(peer: Arc<dyn PeerSource>, registry: Arc<Registry>, interval: Duration) -> Self {
        Self {
            peer,
            registry,
            interval,
            store: None,
        }
    }

    /// Record per-peer progress in `store`.
    #[must_use]
    pub fn with_store(mut self, store: Option<SharedStore>) -> Self {
        self.store = store;
        self
    }

    /// Name of the peer.
    #[must_use]
    pub fn peer(&self) -> &str {
        self.peer.name()
    }

    /// Run one pass over every local instance.
    ///
    /// Each fetch completes before the instance lock is taken.
    pub async fn run_once(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for local in self.registry.iter() {
            let outcome = match self.peer.fetch(local.name()).await {
                Ok(envelope) => reconcile(local, &envelope).await,
                Err(failure) => Err(failure),
            };

            match outcome {
                Ok(changed) => {
                    report.merged += 1;
                    if changed {
                        report.changed += 1;
                    }
                    self.record(local.name(), true);
                }
                Err(failure) => {
                    tracing::warn!(
                        peer = %self.peer.name(),
                        instance = %local.name(),
                        error = %failure,
                        "Reconciliation failed"
                    );
                    self.record(local.name(), false);
                    report.failures.push(failure);
                }
            }
        }

        report
    }

    fn record(&self, instance: &str, success: bool) {
        let Some(store) = &self.store else {
            return;
        };
        let Ok(store) = store.lock() else {
            tracing::warn!("Store lock poisoned, skipping peer progress");
            return;
        };

        let result = if success {
            store.record_success(self.peer.name(), instance)
        } else {
            store.record_failure(self.peer.name(), instance)
        };
        if let Err(err) = result {
            tracing::warn!(
                error = %err,
                peer = %self.peer.name(),
                instance,
                "Failed to record peer progress"
            );
        }
    }

    /// Spawn the periodic loop. It stops when `shutdown` flips to `true` or
    /// its sender is dropped.
    #[must_use]
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(peer = %self.peer.name(), interval = ?self.interval, "Starting reconciler");

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = self.run_once().await;
                        tracing::debug!(
                            peer = %self.peer.name(),
                            merged = report.merged,
                            changed = report.changed,
                            failures = report.failures.len(),
                            "Reconciliation pass finished"
                        );
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!(peer = %self.peer.name(), "Reconciler stopped");
        })
    }
}

/// Transient reconciliation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncFailure {
    /// The peer could not be reached
    #[error("peer {peer} unreachable: {reason}")]
    Unreachable {
        /// Peer name
        peer: String,
        /// Transport error
        reason: String,
    },
    /// The peer answered with a non-success status
    #[error("peer {peer} answered with status {status}")]
    Status {
        /// Peer name
        peer: String,
        /// HTTP status code
        status: u16,
    },
    /// The payload could not be decoded or failed validation
    #[error("undecodable payload from {peer}: {reason}")]
    Decode {
        /// Peer name, or the entry point for pushed payloads
        peer: String,
        /// Decoder error
        reason: String,
    },
    /// The decoded state could not be merged
    #[error("state for instance {instance} rejected: {reason}")]
    Rejected {
        /// Instance name
        instance: String,
        /// Merge error
        reason: String,
    },
    /// No local instance of that name
    #[error("unknown instance: {0}")]
    UnknownInstance(String),
}
