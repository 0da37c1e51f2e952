// model = "claude-opus-4-5"
// created = "2026-10-18"
// modified = "2026-10-18"
// driver = "Isaac Clayton"

//! In-memory backend.
//!
//! Operations live in a `BTreeMap` keyed by [`OpId`]. Because ids order by
//! user first, one user's operations are contiguous in the map, which makes
//! the successor walk after `add_operation` a plain range scan.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::ops::Bound;

use async_trait::async_trait;

use super::Backend;
use super::Successors;
use crate::crdt::op::Operation;
use crate::crdt::op::Struct;
use crate::crdt::primitives::DeleteRange;
use crate::crdt::primitives::DeleteSet;
use crate::crdt::primitives::DeleteSetSnapshot;
use crate::crdt::primitives::OpId;
use crate::crdt::primitives::State;
use crate::crdt::primitives::StateVector;
use crate::error::BackendError;
use crate::key::KeyPub;

/// A backend that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    ops: BTreeMap<OpId, Operation>,
    state: StateVector,
    ds: DeleteSet,
    destroyed: bool,
}

impl MemoryBackend {
    pub fn new() -> MemoryBackend {
        return MemoryBackend::default();
    }

    /// Number of operations in the log.
    pub fn len(&self) -> usize {
        return self.ops.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.ops.is_empty();
    }

    fn check_live(&self) -> Result<(), BackendError> {
        if self.destroyed {
            return Err(BackendError::Destroyed);
        }
        return Ok(());
    }
}

fn show(id: &Option<OpId>) -> String {
    return match id {
        Some(id) => id.to_string(),
        None => "-".to_string(),
    };
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get_operation(&self, id: &OpId) -> Result<Option<Operation>, BackendError> {
        return Ok(self.ops.get(id).cloned());
    }

    async fn set_operation(&mut self, op: Operation) -> Result<(), BackendError> {
        self.check_live()?;
        self.ops.insert(op.id, op);
        return Ok(());
    }

    async fn add_operation(&mut self, op: Operation) -> Result<Successors, BackendError> {
        self.check_live()?;
        let id = op.id;
        self.ops.insert(id, op);

        // Later ids from the same user. There may be gaps where ids were
        // collected; the caller decides how far the clock can move.
        let run: Vec<OpId> = self
            .ops
            .range((Bound::Excluded(id), Bound::Unbounded))
            .map(|(next, _)| *next)
            .take_while(|next| next.user == id.user)
            .collect();
        return Ok(Box::new(run.into_iter()));
    }

    async fn remove_operation(&mut self, id: &OpId) -> Result<(), BackendError> {
        self.check_live()?;
        self.ops.remove(id);
        return Ok(());
    }

    async fn operations(&self) -> Result<Vec<Operation>, BackendError> {
        return Ok(self.ops.values().cloned().collect());
    }

    async fn get_state(&self, user: &KeyPub) -> Result<State, BackendError> {
        return Ok(self.state.state(user));
    }

    async fn set_state(&mut self, state: State) -> Result<(), BackendError> {
        self.check_live()?;
        self.state.set(state);
        return Ok(());
    }

    async fn get_state_vector(&self) -> Result<Vec<State>, BackendError> {
        return Ok(self.state.states());
    }

    async fn get_state_set(&self) -> Result<StateVector, BackendError> {
        return Ok(self.state.clone());
    }

    async fn get_delete_set(&self) -> Result<DeleteSetSnapshot, BackendError> {
        return Ok(self.ds.snapshot());
    }

    async fn mark_deleted(&mut self, id: &OpId) -> Result<(), BackendError> {
        self.check_live()?;
        self.ds.mark_deleted(id);
        return Ok(());
    }

    async fn mark_garbage_collected(&mut self, id: &OpId) -> Result<(), BackendError> {
        self.check_live()?;
        self.ds.mark_garbage_collected(id);
        return Ok(());
    }

    async fn is_deleted(&self, id: &OpId) -> Result<bool, BackendError> {
        return Ok(self.ds.is_deleted(id));
    }

    async fn is_garbage_collected(&self, id: &OpId) -> Result<bool, BackendError> {
        return Ok(self.ds.is_garbage_collected(id));
    }

    async fn get_ops_from_delete_set(&self, ds: &[DeleteRange]) -> Result<Vec<Struct>, BackendError> {
        let deletes = self
            .ds
            .missing_from(ds)
            .into_iter()
            .map(|target| Struct::Delete { target })
            .collect();
        return Ok(deletes);
    }

    async fn check_delete_store_for_state(&self, state: &mut State) -> Result<(), BackendError> {
        self.ds.advance_state(state);
        return Ok(());
    }

    async fn log_table(&self) -> Result<String, BackendError> {
        let mut out = String::new();
        let _ = writeln!(out, "{:<14} {:<14} {:<14} {:<14} {:<14} {:<7} {}", "id", "left", "right", "origin", "parent", "deleted", "gc");
        for op in self.ops.values() {
            let _ = writeln!(
                out,
                "{:<14} {:<14} {:<14} {:<14} {:<14} {:<7} {}",
                op.id.to_string(),
                show(&op.left),
                show(&op.right),
                show(&op.origin),
                show(&op.parent),
                op.deleted,
                op.gc,
            );
        }
        for state in self.state.states() {
            let _ = writeln!(out, "state {} = {}", state.user, state.clock);
        }
        for range in self.ds.snapshot() {
            let _ = writeln!(out, "deleted {}:{}+{} gc={}", range.user, range.clock, range.len, range.gc);
        }
        return Ok(out);
    }

    async fn destroy(&mut self) -> Result<(), BackendError> {
        self.ops.clear();
        self.destroyed = true;
        return Ok(());
    }
}
