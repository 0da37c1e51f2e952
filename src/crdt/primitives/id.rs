// model = "claude-opus-4-5"
// created = 2026-02-01
// modified = 2026-10-18
// driver = "Isaac Clayton"

//! Identifier types for stored operations.
//!
//! # Design Decisions
//!
//! IDs are designed to be:
//! - Globally unique: (user, seq) pairs are unique across all replicas
//! - Totally ordered: by user first, so one user's operations are contiguous
//! - Hashable: usable directly as map keys, no string round-trips

use std::cmp::Ordering;

use serde::Deserialize;
use serde::Serialize;

use crate::key::KeyPub;

/// An operation identifier.
///
/// Uniquely identifies an operation from a specific user. Sequence numbers
/// are assigned densely from 0 and never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpId {
    /// The user who created this operation.
    pub user: KeyPub,
    /// The sequence number (monotonically increasing per user).
    pub seq: u64,
}

impl OpId {
    /// Create a new operation ID.
    pub fn new(user: KeyPub, seq: u64) -> OpId {
        return OpId { user, seq };
    }

    /// The id that directly follows this one from the same user.
    pub fn succ(&self) -> OpId {
        return OpId::new(self.user, self.seq + 1);
    }
}

impl PartialOrd for OpId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        return Some(self.cmp(other));
    }
}

impl Ord for OpId {
    fn cmp(&self, other: &Self) -> Ordering {
        // Compare by user first, then by seq
        match self.user.cmp(&other.user) {
            Ordering::Equal => self.seq.cmp(&other.seq),
            other => other,
        }
    }
}

impl std::fmt::Display for OpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        return write!(f, "{}:{}", self.user, self.seq);
    }
}
