// model = "claude-opus-4-5"
// created = 2026-02-01
// modified = 2026-10-18
// driver = "Isaac Clayton"

//! Shared primitives for the operation store.
//!
//! # Primitives
//!
//! ## IDs
//! - `OpId`: operation identifier (user, seq)
//!
//! ## Clocks
//! - `State`: how many operations of one user are known
//! - `StateVector`: the same, for every user
//!
//! ## Deletions
//! - `DeleteSet`: per-user ranges of deleted / garbage collected ids

pub mod clock;
pub mod delete_set;
pub mod id;

// Re-exports for convenience
pub use clock::State;
pub use clock::StateVector;
pub use delete_set::DeleteRange;
pub use delete_set::DeleteSet;
pub use delete_set::DeleteSetSnapshot;
pub use id::OpId;
