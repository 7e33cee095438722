//! Producer ID (PID) value type
//!
//! A PID is the `(id, epoch)` pair the cluster hands out to an idempotent
//! producer. The broker deduplicates and orders produce requests per PID, and
//! a newer epoch for the same id fences every older instance.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cluster-assigned producer identity
///
/// The value is `Copy` and always replaced wholesale, so readers never see a
/// half-updated pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProducerId {
    /// Producer id, negative when unassigned
    pub id: i64,
    /// Producer epoch
    pub epoch: i16,
}

impl ProducerId {
    /// Sentinel for "no PID"
    pub const INVALID: ProducerId = ProducerId { id: -1, epoch: -1 };

    pub const fn new(id: i64, epoch: i16) -> Self {
        Self { id, epoch }
    }

    /// A PID is usable iff the broker assigned a non-negative id
    pub const fn is_valid(&self) -> bool {
        self.id >= 0
    }
}

impl Default for ProducerId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID{{Id:{},Epoch:{}}}", self.id, self.epoch)
    }
}
