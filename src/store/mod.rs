// model = "claude-opus-4-5"
// created = "2026-10-18"
// modified = "2026-10-18"
// driver = "Isaac Clayton"

//! The operation store: buffering, execution and collection of operations.
//!
//! An [`OperationStore`] wraps a [`Backend`] and a [`Connector`]. All mutable
//! state sits behind one async mutex, and every change runs inside a
//! [`Transaction`] that holds it:
//!
//! ```text
//!   apply(structs) --> DependencyBuffer --ready--> Transaction::try_execute
//!                                                   |-> Backend (log, state, ds)
//!                                                   |-> TypeCache (events)
//!   sweeper task ----> Transaction::sweep ------------> GarbageCollector
//! ```
//!
//! Inbound structs wait in the buffer until everything they reference is in
//! the log, so the same set of structs converges to the same log whatever
//! order it arrives in.

pub mod buffer;
pub mod gc;
pub mod transaction;
pub mod types;

use std::sync::Arc;
use std::sync::Weak;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::backend::Backend;
use crate::config::StoreConfig;
use crate::connector::Connector;
use crate::crdt::op::Operation;
use crate::crdt::op::Struct;
use crate::crdt::primitives::DeleteRange;
use crate::crdt::primitives::DeleteSetSnapshot;
use crate::crdt::primitives::OpId;
use crate::crdt::primitives::State;
use crate::crdt::primitives::StateVector;
use crate::error::Result;
use crate::error::StoreError;
use crate::key::KeyPub;

pub use buffer::DependencyBuffer;
pub use gc::GarbageCollector;
pub use transaction::Transaction;
pub use types::SharedType;
pub use types::TypeCache;
pub use types::TypeEvent;

/// Everything a transaction may touch.
pub(crate) struct StoreState<B> {
    pub(crate) backend: B,
    pub(crate) buffer: DependencyBuffer,
    pub(crate) gc: GarbageCollector,
    pub(crate) types: TypeCache,
}

type UserCallback = Box<dyn FnOnce(KeyPub) + Send>;

/// The local site identity and its id counter.
#[derive(Default)]
struct LocalUser {
    user: Option<KeyPub>,
    clock: u64,
    waiting: Vec<UserCallback>,
}

/// Snapshot of the collector queues.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GcStages {
    pub stage1: Vec<OpId>,
    pub stage2: Vec<OpId>,
}

/// A causal operation store over backend `B`.
pub struct OperationStore<B: Backend> {
    state: Mutex<StoreState<B>>,
    connector: Arc<dyn Connector>,
    config: StoreConfig,
    local: parking_lot::Mutex<LocalUser>,
    sweeper: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl<B: Backend> OperationStore<B> {
    /// A store over `backend`. The collector does not run until
    /// [`start_garbage_collector`](Self::start_garbage_collector) is called.
    pub fn new(backend: B, connector: Arc<dyn Connector>, config: StoreConfig) -> OperationStore<B> {
        return OperationStore {
            state: Mutex::new(StoreState {
                backend,
                buffer: DependencyBuffer::new(),
                gc: GarbageCollector::new(),
                types: TypeCache::new(),
            }),
            connector,
            config,
            local: parking_lot::Mutex::new(LocalUser::default()),
            sweeper: parking_lot::Mutex::new(None),
        };
    }

    pub fn config(&self) -> &StoreConfig {
        return &self.config;
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        return &self.connector;
    }

    /// Wait for exclusive access and start a transaction.
    ///
    /// Waiters are served in the order they asked.
    pub async fn transaction(&self) -> Transaction<'_, B> {
        let state = self.state.lock().await;
        return Transaction::new(state, self.connector.as_ref());
    }

    // =========================================================================
    // Local identity
    // =========================================================================

    /// Set the local site identity and restart the local id counter.
    ///
    /// Runs every callback registered with
    /// [`when_user_id_set`](Self::when_user_id_set) so far.
    pub fn set_user_id(&self, user: KeyPub) {
        let waiting = {
            let mut local = self.local.lock();
            local.user = Some(user);
            local.clock = 0;
            std::mem::take(&mut local.waiting)
        };
        tracing::debug!(user = %user, callbacks = waiting.len(), "local user set");
        for callback in waiting {
            callback(user);
        }
    }

    /// Run `callback` with the local user id, now if it is known, otherwise
    /// once it is set.
    pub fn when_user_id_set(&self, callback: impl FnOnce(KeyPub) + Send + 'static) {
        let mut local = self.local.lock();
        let user = local.user;
        match user {
            Some(user) => {
                drop(local);
                callback(user);
            }
            None => local.waiting.push(Box::new(callback)),
        }
    }

    pub fn user_id(&self) -> Option<KeyPub> {
        return self.local.lock().user;
    }

    /// Allocate the next local operation id.
    pub fn get_next_op_id(&self) -> Result<OpId> {
        let mut local = self.local.lock();
        let Some(user) = local.user else {
            return Err(StoreError::Uninitialized);
        };
        let id = OpId::new(user, local.clock);
        local.clock += 1;
        return Ok(id);
    }

    // =========================================================================
    // Applying operations
    // =========================================================================

    /// Apply structs received from a peer.
    ///
    /// Each struct executes as soon as everything it references is in the
    /// log. Structs with missing prerequisites wait in the buffer until a
    /// later call delivers them.
    pub async fn apply(&self, ops: Vec<Struct>) -> Result<()> {
        let mut t = self.transaction().await;
        for op in ops {
            let mut missing = Vec::new();
            for id in op.required_ops() {
                if t.get_operation(&id).await?.is_none() {
                    missing.push(id);
                }
            }
            t.when_operations_exist(&missing, op);
        }
        return t.commit().await;
    }

    /// Execute structs created on this site and broadcast them.
    pub async fn apply_created_operations(&self, ops: Vec<Struct>) -> Result<()> {
        let mut t = self.transaction().await;
        t.apply_created_operations(ops).await?;
        return t.commit().await;
    }

    /// Run `op` once every id in `ids` is in the log.
    pub async fn when_operations_exist(&self, ids: &[OpId], op: Struct) -> Result<()> {
        let mut t = self.transaction().await;
        t.when_operations_exist(ids, op);
        return t.commit().await;
    }

    /// Delete an operation in its own transaction.
    pub async fn delete_operation(&self, id: OpId) -> Result<()> {
        let mut t = self.transaction().await;
        t.delete_operation(id, false).await?;
        return t.commit().await;
    }

    /// Apply the deletes needed to catch up with a peer's delete set.
    /// Returns how many deletes were derived.
    pub async fn apply_delete_set(&self, ds: &[DeleteRange]) -> Result<usize> {
        let mut t = self.transaction().await;
        let count = t.apply_delete_set(ds).await?;
        t.commit().await?;
        return Ok(count);
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get_operation(&self, id: &OpId) -> Result<Option<Operation>> {
        let t = self.transaction().await;
        return t.get_operation(id).await;
    }

    /// The live type instance for container `id`, built on first access.
    pub async fn get_type(&self, id: &OpId) -> Result<Option<Arc<SharedType>>> {
        let mut t = self.transaction().await;
        return t.get_type(id).await;
    }

    pub async fn get_state(&self, user: &KeyPub) -> Result<State> {
        let t = self.transaction().await;
        return Ok(t.backend().get_state(user).await?);
    }

    /// The state vector as a list, sorted by user.
    pub async fn get_state_vector(&self) -> Result<Vec<State>> {
        let t = self.transaction().await;
        return Ok(t.backend().get_state_vector().await?);
    }

    pub async fn get_state_set(&self) -> Result<StateVector> {
        let t = self.transaction().await;
        return Ok(t.backend().get_state_set().await?);
    }

    pub async fn get_delete_set(&self) -> Result<DeleteSetSnapshot> {
        let t = self.transaction().await;
        return Ok(t.backend().get_delete_set().await?);
    }

    /// Encoded operations a peer at state set `known` does not have yet, in
    /// id order.
    pub async fn get_operations(&self, known: &StateVector) -> Result<Vec<Struct>> {
        let t = self.transaction().await;
        let ops = t
            .backend()
            .operations()
            .await?
            .into_iter()
            .filter(|op| op.id.seq >= known.get(&op.id.user))
            .map(|op| Struct::Op(op.encode()))
            .collect();
        return Ok(ops);
    }

    /// Structs still waiting on a missing prerequisite.
    pub async fn pending_count(&self) -> usize {
        let t = self.transaction().await;
        return t.pending_count();
    }

    pub async fn gc_stages(&self) -> GcStages {
        let t = self.transaction().await;
        return t.gc_stages();
    }

    /// A text dump of the log, for debugging.
    pub async fn log_table(&self) -> Result<String> {
        let t = self.transaction().await;
        return Ok(t.backend().log_table().await?);
    }

    // =========================================================================
    // Garbage collection
    // =========================================================================

    /// Run one collector sweep now. Returns how many operations were removed.
    ///
    /// Does nothing while the connector is not synced.
    pub async fn garbage_collect(&self) -> Result<usize> {
        let mut t = self.transaction().await;
        let collected = t.sweep().await?;
        t.commit().await?;
        return Ok(collected);
    }

    /// Stage every tombstone that the anchor rule allows. Meant to be called
    /// once a sync completes. Returns how many were staged.
    pub async fn garbage_collect_after_sync(&self) -> Result<usize> {
        let mut t = self.transaction().await;
        let staged = t.stage_tombstones().await?;
        t.commit().await?;
        tracing::debug!(staged, "staged tombstones after sync");
        return Ok(staged);
    }

    /// Unstage everything pending collection and clear the gc markers.
    pub async fn stop_garbage_collector(&self) -> Result<usize> {
        let mut t = self.transaction().await;
        let unstaged = t.unstage_all().await?;
        t.commit().await?;
        tracing::debug!(unstaged, "collector queues cleared");
        return Ok(unstaged);
    }

    /// Take one id out of collection.
    pub async fn remove_from_garbage_collector(&self, id: &OpId) -> Result<bool> {
        let mut t = self.transaction().await;
        let removed = t.unstage(id).await?;
        t.commit().await?;
        return Ok(removed);
    }

    /// Stop the sweeper and release the backend.
    pub async fn destroy(&self) -> Result<()> {
        self.abort_sweeper();
        let mut t = self.transaction().await;
        t.backend_mut().destroy().await?;
        return t.commit().await;
    }

    fn abort_sweeper(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }
}

impl<B: Backend + 'static> OperationStore<B> {
    /// Start sweeping every `gc_timeout` milliseconds.
    ///
    /// No-op when sweeping is disabled or already running. The task holds a
    /// weak handle and ends once the store is dropped.
    pub fn start_garbage_collector(self: &Arc<Self>) {
        let Some(interval) = self.config.gc_interval() else {
            tracing::debug!(gc_timeout = self.config.gc_timeout, "periodic gc disabled");
            return;
        };
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return;
        }

        let store: Weak<OperationStore<B>> = Arc::downgrade(self);
        *sweeper = Some(tokio::spawn(async move {
            loop {
                let Some(store) = store.upgrade() else {
                    break;
                };
                if let Err(e) = store.garbage_collect().await {
                    tracing::warn!(error = %e, "gc sweep failed");
                }
                drop(store);
                tokio::time::sleep(interval).await;
            }
        }));
    }
}

impl<B: Backend> Drop for OperationStore<B> {
    fn drop(&mut self) {
        self.abort_sweeper();
    }
}
