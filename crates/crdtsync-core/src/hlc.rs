//! Hybrid Logical Clock (HLC) for register timestamps.
//!
//! A timestamp combines:
//! - Physical wall-clock time (milliseconds)
//! - Logical counter for events at the same physical time
//! - Replica ID for deterministic tiebreaking
//!
//! The replica id makes the order total: two distinct writes never compare
//! equal, so every replica picks the same register winner.
//!
//! # References
//!
//! Kulkarni, Demirbas, et al. "Logical Physical Clocks and Consistent Snapshots
//! in Globally Distributed Databases" (2014)

use crate::id::ReplicaId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

/// A totally ordered timestamp: physical time, logical counter, replica ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Physical time in milliseconds (or a caller-chosen logical time)
    pub physical_ms: u64,
    /// Logical counter for events at the same physical time
    pub logical: u32,
    /// Writing replica, used for deterministic tiebreaking
    pub replica: ReplicaId,
}

impl Timestamp {
    /// Create a timestamp from a caller-supplied logical time.
    #[must_use]
    pub fn new(time: u64, replica: impl Into<ReplicaId>) -> Self {
        Self {
            physical_ms: time,
            logical: 0,
            replica: replica.into(),
        }
    }

    /// Create a new timestamp with the current wall clock time.
    #[must_use]
    pub fn now(replica: ReplicaId) -> Self {
        Self {
            physical_ms: current_time_ms(),
            logical: 0,
            replica,
        }
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        // First compare physical time
        match self.physical_ms.cmp(&other.physical_ms) {
            Ordering::Equal => {}
            ord => return ord,
        }
        // Then logical counter
        match self.logical.cmp(&other.logical) {
            Ordering::Equal => {}
            ord => return ord,
        }
        // Finally replica ID for deterministic tiebreaking
        self.replica.cmp(&other.replica)
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Hybrid Logical Clock state machine.
#[derive(Debug, Clone)]
pub struct Hlc {
    /// Current timestamp state
    last: Timestamp,
}

impl Hlc {
    /// Create a new HLC owned by the given replica.
    #[must_use]
    pub fn new(replica: ReplicaId) -> Self {
        Self {
            last: Timestamp::now(replica),
        }
    }

    /// The replica that owns this clock.
    #[must_use]
    pub fn replica(&self) -> &ReplicaId {
        &self.last.replica
    }

    /// Generate a new timestamp for a local event.
    ///
    /// Guarantees the returned timestamp is greater than any previously
    /// generated or received timestamp.
    pub fn tick(&mut self) -> Timestamp {
        let now_ms = current_time_ms();

        if now_ms > self.last.physical_ms {
            // Wall clock advanced, reset logical counter
            self.last.physical_ms = now_ms;
            self.last.logical = 0;
        } else {
            // Wall clock hasn't advanced, increment logical counter
            self.last.logical = self.last.logical.saturating_add(1);
        }

        self.last.clone()
    }

    /// Update the clock upon receiving a remote timestamp.
    ///
    /// Ensures the local clock advances past the received timestamp.
    pub fn update(&mut self, received: &Timestamp) {
        let now_ms = current_time_ms();

        if now_ms > self.last.physical_ms && now_ms > received.physical_ms {
            // Wall clock is ahead of both, use it
            self.last.physical_ms = now_ms;
            self.last.logical = 0;
        } else if self.last.physical_ms == received.physical_ms {
            // Same physical time, take max logical and increment
            self.last.logical = self.last.logical.max(received.logical).saturating_add(1);
        } else if received.physical_ms > self.last.physical_ms {
            // Received is ahead, sync to it
            self.last.physical_ms = received.physical_ms;
            self.last.logical = received.logical.saturating_add(1);
        } else {
            // Local is ahead, just increment
            self.last.logical = self.last.logical.saturating_add(1);
        }
    }

    /// Get the current timestamp without advancing the clock.
    #[must_use]
    pub fn current(&self) -> &Timestamp {
        &self.last
    }
}

/// Get current wall clock time in milliseconds since UNIX epoch.
fn current_time_ms() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    u64::try_from(millis).unwrap_or(u64::MAX)
}
