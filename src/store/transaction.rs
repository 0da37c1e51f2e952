// model = "claude-opus-4-5"
// created = "2026-10-18"
// modified = "2026-10-18"
// driver = "Isaac Clayton"

//! Transactions: the only place where the log, the state vector and the
//! delete set change.
//!
//! A [`Transaction`] owns the store's state guard for as long as it lives.
//! Every backend call is an `.await`, but no other transaction can start in
//! the meantime, so everything a transaction does is serialized with respect
//! to every other transaction.
//!
//! Finish a transaction with [`Transaction::commit`]. That drains structs the
//! transaction made ready, releases the store, and only then broadcasts the
//! updates it produced.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::MutexGuard;

use super::GcStages;
use super::StoreState;
use super::buffer::Waiting;
use super::types::SharedType;
use super::types::TypeEvent;
use crate::backend::Backend;
use crate::backend::Successors;
use crate::connector::Connector;
use crate::crdt::op::Kind;
use crate::crdt::op::Message;
use crate::crdt::op::Operation;
use crate::crdt::op::Struct;
use crate::crdt::primitives::DeleteRange;
use crate::crdt::primitives::OpId;
use crate::error::Result;

/// Exclusive access to the store for one unit of work.
pub struct Transaction<'s, B: Backend> {
    state: MutexGuard<'s, StoreState<B>>,
    connector: &'s dyn Connector,
    outbox: Vec<Message>,
}

impl<'s, B: Backend> Transaction<'s, B> {
    pub(crate) fn new(state: MutexGuard<'s, StoreState<B>>, connector: &'s dyn Connector) -> Self {
        return Transaction {
            state,
            connector,
            outbox: Vec::new(),
        };
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get_operation(&self, id: &OpId) -> Result<Option<Operation>> {
        return Ok(self.state.backend.get_operation(id).await?);
    }

    pub(crate) fn backend(&self) -> &B {
        return &self.state.backend;
    }

    pub(crate) fn backend_mut(&mut self) -> &mut B {
        return &mut self.state.backend;
    }

    /// Structs still waiting on a missing prerequisite.
    pub fn pending_count(&self) -> usize {
        return self.state.buffer.pending_count();
    }

    pub fn gc_stages(&self) -> GcStages {
        return GcStages {
            stage1: self.state.gc.stage1().to_vec(),
            stage2: self.state.gc.stage2().to_vec(),
        };
    }

    async fn set_operation(&mut self, op: Operation) -> Result<()> {
        return Ok(self.state.backend.set_operation(op).await?);
    }

    /// The type instance of the container defined by `id`.
    ///
    /// Built with the kind's `init` hook on first access. `None` if there is
    /// no such operation or it is not a container.
    pub async fn get_type(&mut self, id: &OpId) -> Result<Option<Arc<SharedType>>> {
        if let Some(shared) = self.state.types.get(id) {
            return Ok(Some(shared));
        }
        let Some(op) = self.get_operation(id).await? else {
            return Ok(None);
        };
        let Some(shared) = SharedType::init(&op) else {
            return Ok(None);
        };
        tracing::trace!(id = %id, kind = ?shared.kind(), "type built");
        let shared = Arc::new(shared);
        self.state.types.insert(&shared);
        return Ok(Some(shared));
    }

    fn notify(&mut self, parent: Option<OpId>, event: TypeEvent) {
        let Some(parent) = parent else {
            return;
        };
        if let Some(shared) = self.state.types.get(&parent) {
            shared.changed(event);
        }
    }

    // =========================================================================
    // Local operations
    // =========================================================================

    /// Execute operations this site just created and queue them for
    /// broadcast.
    ///
    /// Local operations can always execute, so their prerequisites are not
    /// checked. The batch goes out as one update on commit, unless the
    /// connector is disconnected by then.
    pub async fn apply_created_operations(&mut self, ops: Vec<Struct>) -> Result<()> {
        let mut send = Vec::with_capacity(ops.len());
        for op in ops {
            send.push(op.encode());
            self.try_execute(op).await?;
        }
        self.outbox.push(Message::Update { ops: send });
        return Ok(());
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    /// Mark `target_id` deleted.
    ///
    /// Always records the deletion in the delete set, even if the operation
    /// has not arrived yet. The structural effects (type event, child lists,
    /// embedded content) happen only the first time the operation flips to
    /// deleted. Afterwards the operation, and separately its right sibling,
    /// are offered to the garbage collector.
    pub fn delete_operation(&mut self, target_id: OpId, prevent_type_notification: bool) -> BoxFuture<'_, Result<()>> {
        return Box::pin(self.mark_and_stage(target_id, prevent_type_notification));
    }

    async fn mark_and_stage(&mut self, target_id: OpId, prevent_type_notification: bool) -> Result<()> {
        let target = self.get_operation(&target_id).await?;
        if target.as_ref().is_none_or(|target| !target.deleted) {
            self.state.backend.mark_deleted(&target_id).await?;
        }

        let Some(mut target) = target else {
            tracing::trace!(id = %target_id, "delete recorded before operation arrived");
            return Ok(());
        };
        if target.gc {
            return Ok(());
        }

        if !target.deleted {
            target.deleted = true;
            if !prevent_type_notification {
                self.notify(target.parent, TypeEvent::Delete { target: target_id });
            }
            if target.start.is_some() {
                self.delete_list(target.start).await?;
            }
            if let Some(map) = target.map.clone() {
                for child in map.into_values() {
                    self.delete_list(Some(child)).await?;
                }
            }
            if let Some(content) = target.op_content.take() {
                self.delete_operation(content, false).await?;
            }
        }

        let left = match target.left {
            Some(left) => self.get_operation(&left).await?,
            None => None,
        };
        let synced = self.connector.is_synced();
        self.state.gc.try_stage(&mut target, left.as_ref(), synced);
        self.set_operation(target.clone()).await?;

        // This delete may have just anchored the right sibling. It cannot
        // have anchored the left one.
        if let Some(right_id) = target.right {
            if let Some(mut right) = self.get_operation(&right_id).await? {
                if self.state.gc.try_stage(&mut right, Some(&target), synced) {
                    self.set_operation(right).await?;
                }
            }
        }
        return Ok(());
    }

    /// Delete and stage a whole sibling chain, starting at `start`.
    ///
    /// Used for the children of a deleted container. Stops as soon as the
    /// connector is no longer synced; whatever is left stays in the log.
    pub async fn delete_list(&mut self, start: Option<OpId>) -> Result<()> {
        let mut cursor = start;
        while let Some(id) = cursor {
            if !self.connector.is_synced() {
                tracing::debug!(at = %id, "not synced, leaving rest of child list");
                break;
            }
            let Some(mut op) = self.get_operation(&id).await? else {
                break;
            };
            cursor = op.right;
            if op.gc {
                continue;
            }
            if !op.deleted {
                op.deleted = true;
                self.state.backend.mark_deleted(&op.id).await?;
            }
            op.gc = true;
            let content = op.op_content.take();
            self.state.gc.stage(op.id);
            self.set_operation(op).await?;

            if let Some(content) = content {
                self.delete_operation(content, true).await?;
            }
        }
        return Ok(());
    }

    // =========================================================================
    // Garbage collection
    // =========================================================================

    /// Physically remove an operation, repairing every reference to it.
    pub async fn garbage_collect_operation(&mut self, id: OpId) -> Result<()> {
        // If this is the next id we expect from its user, it will never
        // arrive now: count it, and whatever collected run follows it.
        let mut state = self.state.backend.get_state(&id.user).await?;
        if state.clock == id.seq {
            state.clock += 1;
            self.state.backend.check_delete_store_for_state(&mut state).await?;
            self.state.backend.set_state(state).await?;
        }
        self.state.backend.mark_garbage_collected(&id).await?;

        let Some(o) = self.get_operation(&id).await? else {
            return Ok(());
        };
        tracing::trace!(id = %id, "collecting");

        if let Some(left_id) = o.left {
            if let Some(mut left) = self.get_operation(&left_id).await? {
                left.right = o.right;
                self.set_operation(left).await?;
            }
        }

        if let Some(right_id) = o.right {
            if let Some(mut right) = self.get_operation(&right_id).await? {
                right.left = o.left;
                if right.origin == Some(o.id) {
                    let origin = self.nearest_deleted(o.left).await?;
                    right.origin = origin;

                    // Everything that originated in `o` moves to the new
                    // origin. Stop at the first op whose origin lies left of
                    // `o`: nothing after it can originate in `o`.
                    let mut cursor = right.right;
                    while let Some(next_id) = cursor {
                        let Some(mut next) = self.get_operation(&next_id).await? else {
                            break;
                        };
                        let points_at_o = next.origin == Some(o.id);
                        if !points_at_o && (next.origin.is_none() || next.origin != o.right) {
                            break;
                        }
                        cursor = next.right;
                        if points_at_o {
                            next.origin = origin;
                            self.set_operation(next).await?;
                        }
                    }
                }
                self.set_operation(right).await?;
            }
        }

        if let Some(parent_id) = o.parent {
            if let Some(mut parent) = self.get_operation(&parent_id).await? {
                let mut changed = false;
                if parent.start == Some(o.id) {
                    parent.start = o.right;
                    changed = true;
                }
                if parent.end == Some(o.id) {
                    parent.end = o.left;
                    changed = true;
                }
                if let Some(map) = parent.map.as_mut() {
                    let before = map.len();
                    map.retain(|_, child| *child != o.id);
                    changed |= map.len() != before;
                }
                if changed {
                    self.set_operation(parent).await?;
                }
            }
        }

        self.state.backend.remove_operation(&id).await?;
        self.state.types.evict(&id);
        return Ok(());
    }

    /// Walk left from `from` to the first operation that is deleted.
    async fn nearest_deleted(&self, from: Option<OpId>) -> Result<Option<OpId>> {
        let mut cursor = from;
        while let Some(id) = cursor {
            match self.get_operation(&id).await? {
                Some(op) if op.deleted => return Ok(Some(id)),
                Some(op) => cursor = op.left,
                None => return Ok(None),
            }
        }
        return Ok(None);
    }

    /// One collector sweep: collect stage 2, promote stage 1.
    pub(crate) async fn sweep(&mut self) -> Result<usize> {
        if !self.connector.is_synced() {
            tracing::trace!("not synced, skipping gc sweep");
            return Ok(0);
        }
        let due = self.state.gc.rotate();
        for id in &due {
            self.garbage_collect_operation(*id).await?;
        }
        tracing::debug!(collected = due.len(), staged = self.state.gc.stage2().len(), "gc sweep");
        return Ok(due.len());
    }

    /// Empty both collector stages and clear the gc flag of their operations.
    pub(crate) async fn unstage_all(&mut self) -> Result<usize> {
        let staged = self.state.gc.take_all();
        for id in &staged {
            if let Some(mut op) = self.get_operation(id).await? {
                op.gc = false;
                self.set_operation(op).await?;
            }
        }
        return Ok(staged.len());
    }

    /// Take one id out of collection.
    pub(crate) async fn unstage(&mut self, id: &OpId) -> Result<bool> {
        let removed = self.state.gc.remove(id);
        if let Some(mut op) = self.get_operation(id).await? {
            if op.gc {
                op.gc = false;
                self.set_operation(op).await?;
            }
        }
        return Ok(removed);
    }

    /// Offer every tombstone in the log to the collector again.
    pub(crate) async fn stage_tombstones(&mut self) -> Result<usize> {
        let synced = self.connector.is_synced();
        let mut staged = 0;
        for mut op in self.state.backend.operations().await? {
            if !op.deleted || op.gc {
                continue;
            }
            let Some(left_id) = op.left else {
                continue;
            };
            let left = self.get_operation(&left_id).await?;
            if self.state.gc.try_stage(&mut op, left.as_ref(), synced) {
                self.set_operation(op).await?;
                staged += 1;
            }
        }
        return Ok(staged);
    }

    // =========================================================================
    // Remote operations
    // =========================================================================

    /// Park `op` until every id in `ids` is in the log.
    pub fn when_operations_exist(&mut self, ids: &[OpId], op: Struct) {
        if !ids.is_empty() {
            tracing::debug!(id = %op.id(), missing = ids.len(), "buffering");
        }
        self.state.buffer.register(ids, op);
    }

    /// Execute everything that is ready, then re-check every dependency the
    /// buffer is waiting on.
    ///
    /// On a backend error, whatever this pass had not finished goes back into
    /// the buffer, the failed struct included, and is retried by the next
    /// drain.
    pub(crate) async fn drain_buffer(&mut self) -> Result<()> {
        loop {
            let (ready, waiting) = self.state.buffer.begin_drain();
            let mut ready = ready.into_iter();
            let mut waiting = waiting.into_iter();
            if let Err(e) = self.drain_pass(&mut ready, &mut waiting).await {
                tracing::debug!(error = %e, "drain failed, rebuffering");
                self.state.buffer.restore(ready, waiting);
                return Err(e);
            }
            if !self.state.buffer.has_ready() {
                break;
            }
        }
        return Ok(());
    }

    async fn drain_pass(
        &mut self,
        ready: &mut std::vec::IntoIter<Struct>,
        waiting: &mut std::collections::hash_map::IntoIter<OpId, Waiting>,
    ) -> Result<()> {
        for op in ready.by_ref() {
            self.execute_buffered(op).await?;
        }
        while let Some((id, listeners)) = waiting.next() {
            let present = match self.get_operation(&id).await {
                Ok(op) => op.is_some(),
                Err(e) => {
                    self.state.buffer.requeue(id, listeners);
                    return Err(e);
                }
            };
            if !present {
                self.state.buffer.requeue(id, listeners);
                continue;
            }
            let mut listeners = listeners.into_iter();
            while let Some(listener) = listeners.next() {
                let Some(op) = self.state.buffer.satisfy(listener) else {
                    continue;
                };
                if let Err(e) = self.execute_buffered(op).await {
                    self.state.buffer.requeue(id, listeners.collect());
                    return Err(e);
                }
            }
        }
        return Ok(());
    }

    /// [`try_execute`](Self::try_execute) for a struct taken out of the
    /// buffer. Puts it back as ready if it fails.
    async fn execute_buffered(&mut self, op: Struct) -> Result<()> {
        let retry = op.clone();
        let result = self.try_execute(op).await;
        if result.is_err() {
            self.state.buffer.push_ready(retry);
        }
        return result;
    }

    /// Execute a struct whose prerequisites are present.
    ///
    /// Deletes always run. Anything else runs once: if it is already in the
    /// log, or was collected, this is a no-op.
    pub(crate) async fn try_execute(&mut self, op: Struct) -> Result<()> {
        let op = match op {
            Struct::Delete { target } => return self.delete_operation(target, false).await,
            Struct::Op(op) => op,
        };
        if self.get_operation(&op.id).await?.is_some() || self.state.backend.is_garbage_collected(&op.id).await? {
            tracing::trace!(id = %op.id, "already executed");
            return Ok(());
        }

        let op = self.execute(op).await?;
        let next = self.state.backend.add_operation(op.clone()).await?;
        self.operation_added(&op, next).await?;

        // The delete overtook the operation.
        if self.state.backend.is_deleted(&op.id).await? {
            self.delete_operation(op.id, false).await?;
        }
        return Ok(());
    }

    /// Link an operation into its container. Returns it ready to be stored.
    async fn execute(&mut self, mut op: Operation) -> Result<Operation> {
        match op.kind {
            Kind::List => {}
            Kind::Map => {
                op.map.get_or_insert_with(BTreeMap::new);
            }
            Kind::Insert => {
                let Some(parent_id) = op.parent else {
                    return Ok(op);
                };
                let Some(mut parent) = self.get_operation(&parent_id).await? else {
                    return Ok(op);
                };

                if let Some(key) = op.parent_sub.clone() {
                    // Map value: the highest id under a key wins.
                    let map = parent.map.get_or_insert_with(BTreeMap::new);
                    if map.get(&key).is_none_or(|current| *current < op.id) {
                        map.insert(key, op.id);
                        self.set_operation(parent).await?;
                    }
                    return Ok(op);
                }

                let right = match op.left {
                    Some(left_id) => match self.get_operation(&left_id).await? {
                        Some(mut left) => {
                            let right = left.right;
                            left.right = Some(op.id);
                            self.set_operation(left).await?;
                            right
                        }
                        None => op.right,
                    },
                    None => parent.start,
                };
                op.right = right;

                let mut parent_changed = false;
                if op.left.is_none() {
                    parent.start = Some(op.id);
                    parent_changed = true;
                }
                match right {
                    Some(right_id) => {
                        if let Some(mut right) = self.get_operation(&right_id).await? {
                            right.left = Some(op.id);
                            self.set_operation(right).await?;
                        }
                    }
                    None => {
                        parent.end = Some(op.id);
                        parent_changed = true;
                    }
                }
                if parent_changed {
                    self.set_operation(parent).await?;
                }
            }
        }
        return Ok(op);
    }

    /// Bookkeeping after `op` was added to the log.
    ///
    /// Advances the user's clock across the run `op` may have completed,
    /// stepping over collected ids, then wakes structs waiting on `op` and
    /// tells the parent's type.
    pub(crate) async fn operation_added(&mut self, op: &Operation, mut next: Successors) -> Result<()> {
        let user = op.id.user;
        let mut state = self.state.backend.get_state(&user).await?;
        let mut cursor = Some(op.id);
        while let Some(id) = cursor {
            if id.user != user || id.seq != state.clock {
                break;
            }
            state.clock += 1;
            self.state.backend.check_delete_store_for_state(&mut state).await?;
            cursor = next.next();
        }
        self.state.backend.set_state(state).await?;

        for listener in self.state.buffer.take_waiting(&op.id) {
            if let Some(ready) = self.state.buffer.satisfy(listener) {
                self.state.buffer.push_ready(ready);
            }
        }

        if !op.deleted {
            self.notify(op.parent, TypeEvent::Insert(op.clone()));
        }
        return Ok(());
    }

    /// Apply the deletes needed to reach a peer's delete set.
    pub async fn apply_delete_set(&mut self, ds: &[DeleteRange]) -> Result<usize> {
        let deletes = self.state.backend.get_ops_from_delete_set(ds).await?;
        let count = deletes.len();
        for delete in deletes {
            self.try_execute(delete).await?;
        }
        return Ok(count);
    }

    // =========================================================================
    // Finishing
    // =========================================================================

    /// Finish the transaction.
    ///
    /// Runs structs that became ready during the transaction, releases the
    /// store, then broadcasts queued updates if the connector is connected.
    pub async fn commit(mut self) -> Result<()> {
        if self.state.buffer.drain_requested() {
            self.drain_buffer().await?;
        }
        let outbox = std::mem::take(&mut self.outbox);
        let connector = self.connector;
        drop(self);

        for message in outbox {
            if connector.is_disconnected() {
                tracing::debug!("disconnected, update not broadcast");
                continue;
            }
            connector.broadcast(message);
        }
        return Ok(());
    }
}

impl<B: Backend> Drop for Transaction<'_, B> {
    fn drop(&mut self) {
        if !self.outbox.is_empty() {
            tracing::warn!(updates = self.outbox.len(), "transaction dropped before commit, updates discarded");
        }
    }
}
