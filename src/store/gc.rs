// model = "claude-opus-4-5"
// created = "2026-10-18"
// modified = "2026-10-18"
// driver = "Isaac Clayton"

//! Two-stage garbage collector queues.
//!
//! Tombstones are staged in `stage1`. Every sweep collects `stage2` and then
//! promotes `stage1` to `stage2`, so an id always survives at least one full
//! interval between being staged and being removed. That interval is the
//! grace period for peers that are mid-sync and may still reference it.
//!
//! # Anchor rule
//!
//! A tombstone is only staged if its left sibling is a tombstone too. The
//! leftmost tombstone of a deleted run therefore stays in the log, and the
//! origin repair in `garbage_collect_operation` always has something deleted
//! to fall back to.

use crate::crdt::op::Operation;
use crate::crdt::primitives::OpId;

/// The two stages of pending collection.
#[derive(Debug, Default)]
pub struct GarbageCollector {
    stage1: Vec<OpId>,
    stage2: Vec<OpId>,
}

impl GarbageCollector {
    pub fn new() -> GarbageCollector {
        return GarbageCollector::default();
    }

    /// Stage `op` if the anchor rule allows it, setting its `gc` flag.
    ///
    /// Returns true iff `op` was staged; the caller must persist it then.
    pub fn try_stage(&mut self, op: &mut Operation, left: Option<&Operation>, synced: bool) -> bool {
        let anchored = left.is_some_and(|left| left.deleted);
        if op.gc || !op.deleted || !synced || !anchored {
            return false;
        }
        op.gc = true;
        self.stage1.push(op.id);
        return true;
    }

    /// Stage an id unconditionally (bulk deletes of whole child lists).
    pub fn stage(&mut self, id: OpId) {
        self.stage1.push(id);
    }

    /// Take the ids due for collection this sweep and promote `stage1`.
    pub fn rotate(&mut self) -> Vec<OpId> {
        let due = std::mem::take(&mut self.stage2);
        self.stage2 = std::mem::take(&mut self.stage1);
        return due;
    }

    /// Empty both stages, returning everything that was pending.
    pub fn take_all(&mut self) -> Vec<OpId> {
        let mut all = std::mem::take(&mut self.stage1);
        all.append(&mut self.stage2);
        return all;
    }

    /// Drop `id` from both stages. Returns true if it was staged.
    pub fn remove(&mut self, id: &OpId) -> bool {
        let before = self.stage1.len() + self.stage2.len();
        self.stage1.retain(|staged| staged != id);
        self.stage2.retain(|staged| staged != id);
        return self.stage1.len() + self.stage2.len() != before;
    }

    pub fn stage1(&self) -> &[OpId] {
        return &self.stage1;
    }

    pub fn stage2(&self) -> &[OpId] {
        return &self.stage2;
    }

    pub fn is_empty(&self) -> bool {
        return self.stage1.is_empty() && self.stage2.is_empty();
    }
}
