//! # crdtsync core
//!
//! State-based CRDTs and their merge semantics.
//!
//! This crate provides:
//! - Replica identity, OR-Set tags, and sequence character ids
//! - Hybrid Logical Clock (HLC) timestamps for registers
//! - G-Counter, PN-Counter, G-Set, OR-Set, LWW-Register, and a sequence CRDT
//! - Tagged, validated state snapshots
//! - The per-instance [`Replica`] contract used by the replication agent
//!
//! Every merge is a semilattice join: commutative, associative, and
//! idempotent, so replicas converge under any delivery order.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod gcounter;
pub mod gset;
pub mod hlc;
pub mod id;
pub mod lattice;
pub mod lww;
pub mod orset;
pub mod pncounter;
pub mod replica;
pub mod sequence;
pub mod snapshot;

pub use error::CrdtError;
pub use gcounter::GCounter;
pub use gset::GSet;
pub use hlc::{Hlc, Timestamp};
pub use id::{CharId, ReplicaId, Tag};
pub use lattice::Lattice;
pub use lww::LwwRegister;
pub use orset::OrSet;
pub use pncounter::PnCounter;
pub use replica::{Applied, Operation, Replica, Value};
pub use sequence::{Character, Sequence};
pub use snapshot::{CrdtKind, Snapshot};
