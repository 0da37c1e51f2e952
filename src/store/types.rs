// model = "claude-opus-4-5"
// created = "2026-10-18"
// modified = "2026-10-18"
// driver = "Isaac Clayton"

//! Type instances and the cache that memoizes them.
//!
//! A type instance is the materialized view of a container operation. What a
//! view does with a change is up to the type layer above the store; here it
//! only collects the change events so that layer can consume them.
//!
//! The cache holds `Weak` handles: it never keeps a type alive on its own, and
//! a type that nobody holds simply gets rebuilt on next access.

use std::sync::Arc;
use std::sync::Weak;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::crdt::op::Kind;
use crate::crdt::op::Operation;
use crate::crdt::primitives::OpId;

/// A change to the children of a container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeEvent {
    /// A child was added to the log.
    Insert(Operation),
    /// A child was marked deleted.
    Delete { target: OpId },
}

/// A materialized view over a container operation.
#[derive(Debug)]
pub struct SharedType {
    id: OpId,
    kind: Kind,
    events: Mutex<Vec<TypeEvent>>,
}

impl SharedType {
    /// Build the type instance for a container, or `None` for other kinds.
    pub fn init(op: &Operation) -> Option<SharedType> {
        if !op.kind.is_container() {
            return None;
        }
        return Some(SharedType {
            id: op.id,
            kind: op.kind,
            events: Mutex::new(Vec::new()),
        });
    }

    /// The id of the defining operation.
    pub fn id(&self) -> OpId {
        return self.id;
    }

    pub fn kind(&self) -> Kind {
        return self.kind;
    }

    pub(crate) fn changed(&self, event: TypeEvent) {
        self.events.lock().push(event);
    }

    /// Take every event received since the last call.
    pub fn take_events(&self) -> Vec<TypeEvent> {
        return std::mem::take(&mut *self.events.lock());
    }
}

/// Id of the defining operation -> live type instance.
#[derive(Debug, Default)]
pub struct TypeCache {
    types: FxHashMap<OpId, Weak<SharedType>>,
}

impl TypeCache {
    pub fn new() -> TypeCache {
        return TypeCache::default();
    }

    /// The live instance for `id`, if any. Dead entries are pruned.
    pub fn get(&mut self, id: &OpId) -> Option<Arc<SharedType>> {
        let weak = self.types.get(id)?;
        match weak.upgrade() {
            Some(shared) => return Some(shared),
            None => {
                self.types.remove(id);
                return None;
            }
        }
    }

    pub fn insert(&mut self, shared: &Arc<SharedType>) {
        self.types.insert(shared.id(), Arc::downgrade(shared));
    }

    /// Forget the instance for `id`.
    pub fn evict(&mut self, id: &OpId) -> bool {
        return self.types.remove(id).is_some();
    }

    pub fn len(&self) -> usize {
        return self.types.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.types.is_empty();
    }
}
