//! # crdtsync agent
//!
//! Replication agent for named CRDT instances.
//!
//! ## Architecture
//!
//! The agent runs three kinds of concurrent loops:
//! 1. **Mutation**: local operations on a [`SharedReplica`], each under a
//!    scoped write lock
//! 2. **Reconciliation**: one [`Reconciler`] task per peer, periodically
//!    fetching the peer's state for every instance and merging it
//! 3. **Persistence**: periodic CBOR snapshots of every instance into
//!    `SQLite`, plus a final snapshot on shutdown
//!
//! Pushed envelopes and live sequence edits enter through
//! [`Agent::accept_push`] and [`Agent::accept_edit`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod peer;
pub mod persistence;
pub mod reconcile;
pub mod registry;
pub mod runtime;

pub use config::{AgentConfig, InstanceConfig, StoreType};
pub use peer::{HttpPeer, InMemoryPeer, PeerSource};
pub use persistence::{PeerProgress, SharedStore, SqliteStore, StoreError, StoredSnapshot};
pub use reconcile::{reconcile, ReconcileReport, Reconciler, SyncFailure};
pub use registry::{Registry, SharedReplica};
pub use runtime::Agent;
