// model = "claude-opus-4-5"
// created = "2026-10-18"
// modified = "2026-10-18"
// driver = "Isaac Clayton"

//! The storage contract the store runs its transactions against.
//!
//! A backend owns three things: the operation log (an arena of
//! [`Operation`]s keyed by id), the state vector, and the delete set. Every
//! method may suspend; the store guarantees that only one transaction calls
//! into the backend at a time, so implementations need no locking of their
//! own beyond what their storage medium requires.
//!
//! Reads hand out owned copies. Mutating a copy changes nothing until it is
//! written back with [`Backend::set_operation`].

pub mod memory;

use async_trait::async_trait;

use crate::crdt::op::Operation;
use crate::crdt::op::Struct;
use crate::crdt::primitives::DeleteRange;
use crate::crdt::primitives::DeleteSetSnapshot;
use crate::crdt::primitives::OpId;
use crate::crdt::primitives::State;
use crate::crdt::primitives::StateVector;
use crate::error::BackendError;
use crate::key::KeyPub;

pub use memory::MemoryBackend;

/// Ids stored after a freshly added operation from the same user, in id
/// order.
pub type Successors = Box<dyn Iterator<Item = OpId> + Send>;

/// Storage for operations, states and deletions.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Read an operation.
    async fn get_operation(&self, id: &OpId) -> Result<Option<Operation>, BackendError>;

    /// Overwrite an operation that is already in the log.
    async fn set_operation(&mut self, op: Operation) -> Result<(), BackendError>;

    /// Add a new operation. Called at most once per id.
    ///
    /// Returns every stored id of the same user that follows it, in id order
    /// and across gaps, so the caller can walk the clock forward past
    /// operations that arrived early.
    async fn add_operation(&mut self, op: Operation) -> Result<Successors, BackendError>;

    /// Physically remove an operation.
    async fn remove_operation(&mut self, id: &OpId) -> Result<(), BackendError>;

    /// Every stored operation, in id order.
    async fn operations(&self) -> Result<Vec<Operation>, BackendError>;

    async fn get_state(&self, user: &KeyPub) -> Result<State, BackendError>;

    async fn set_state(&mut self, state: State) -> Result<(), BackendError>;

    /// The state vector as a list, sorted by user.
    async fn get_state_vector(&self) -> Result<Vec<State>, BackendError>;

    /// The state vector as a map.
    async fn get_state_set(&self) -> Result<StateVector, BackendError>;

    /// A readable copy of the delete set.
    async fn get_delete_set(&self) -> Result<DeleteSetSnapshot, BackendError>;

    async fn mark_deleted(&mut self, id: &OpId) -> Result<(), BackendError>;

    async fn mark_garbage_collected(&mut self, id: &OpId) -> Result<(), BackendError>;

    async fn is_deleted(&self, id: &OpId) -> Result<bool, BackendError>;

    async fn is_garbage_collected(&self, id: &OpId) -> Result<bool, BackendError>;

    /// The deletes we still have to apply to reach the delete set `ds`.
    async fn get_ops_from_delete_set(&self, ds: &[DeleteRange]) -> Result<Vec<Struct>, BackendError>;

    /// Move `state` past ids that were garbage collected and will never be
    /// delivered. Does not persist the state.
    async fn check_delete_store_for_state(&self, state: &mut State) -> Result<(), BackendError>;

    /// Human readable dump of the log, for debugging.
    async fn log_table(&self) -> Result<String, BackendError> {
        return Ok(String::new());
    }

    /// Release the backend. Later writes may fail.
    async fn destroy(&mut self) -> Result<(), BackendError> {
        return Ok(());
    }
}
