// model = "claude-opus-4-5"
// created = "2026-10-18"
// modified = "2026-10-18"
// driver = "Isaac Clayton"

//! Dependency buffer: structs waiting for their causal prerequisites.
//!
//! Each waiting struct gets one listener with a countdown of missing ids.
//! The listener is indexed under every id it waits for, so whichever
//! dependency shows up decrements the same counter. The struct becomes ready
//! exactly once, when the counter hits zero.
//!
//! ```text
//! by_id:  a -> [L1]        listeners: L1 { op: x, missing: 2 }
//!         b -> [L1, L2]               L2 { op: y, missing: 1 }
//! ```
//!
//! When `b` arrives, L2 fires and L1 drops to 1.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::crdt::op::Struct;
use crate::crdt::primitives::OpId;

pub type ListenerId = u64;

/// Listener ids waiting on one dependency.
pub type Waiting = SmallVec<[ListenerId; 2]>;

#[derive(Debug)]
struct Listener {
    op: Struct,
    missing: usize,
}

/// Structs waiting on missing operations, plus the ready queue.
#[derive(Debug, Default)]
pub struct DependencyBuffer {
    listeners: FxHashMap<ListenerId, Listener>,
    by_id: FxHashMap<OpId, Waiting>,
    ready: Vec<Struct>,
    next_listener: ListenerId,
    drain_requested: bool,
}

impl DependencyBuffer {
    pub fn new() -> DependencyBuffer {
        return DependencyBuffer::default();
    }

    /// Park `op` until every id in `ids` exists. Empty `ids` means ready now.
    ///
    /// Returns true if this call requested a drain, false if one was
    /// already pending.
    pub fn register(&mut self, ids: &[OpId], op: Struct) -> bool {
        if ids.is_empty() {
            self.ready.push(op);
        } else {
            let listener = self.next_listener;
            self.next_listener += 1;
            self.listeners.insert(listener, Listener { op, missing: ids.len() });
            for id in ids {
                self.by_id.entry(*id).or_default().push(listener);
            }
        }
        return self.request_drain();
    }

    fn request_drain(&mut self) -> bool {
        if self.drain_requested {
            return false;
        }
        self.drain_requested = true;
        return true;
    }

    /// True if a drain has been requested and not yet started.
    pub fn drain_requested(&self) -> bool {
        return self.drain_requested;
    }

    /// Start a drain: hand out the ready queue and the whole dependency index.
    ///
    /// Entries of the index that are still unresolved must be handed back
    /// with [`requeue`](Self::requeue).
    pub fn begin_drain(&mut self) -> (Vec<Struct>, FxHashMap<OpId, Waiting>) {
        self.drain_requested = false;
        return (std::mem::take(&mut self.ready), std::mem::take(&mut self.by_id));
    }

    /// Put listeners back under a dependency that is still missing.
    pub fn requeue(&mut self, id: OpId, waiting: Waiting) {
        if waiting.is_empty() {
            return;
        }
        self.by_id.entry(id).or_default().extend(waiting);
    }

    /// Hand back the unfinished part of an interrupted drain and ask for
    /// another one.
    pub fn restore(
        &mut self,
        ready: impl IntoIterator<Item = Struct>,
        waiting: impl IntoIterator<Item = (OpId, Waiting)>,
    ) {
        self.ready.extend(ready);
        for (id, listeners) in waiting {
            self.requeue(id, listeners);
        }
        self.request_drain();
    }

    /// Remove and return every listener waiting on `id`.
    pub fn take_waiting(&mut self, id: &OpId) -> Waiting {
        return self.by_id.remove(id).unwrap_or_default();
    }

    /// One dependency of `listener` is satisfied. Returns its struct if that
    /// was the last one.
    pub fn satisfy(&mut self, listener: ListenerId) -> Option<Struct> {
        let entry = self.listeners.get_mut(&listener)?;
        entry.missing -= 1;
        if entry.missing > 0 {
            return None;
        }
        return self.listeners.remove(&listener).map(|l| l.op);
    }

    /// Queue a struct whose dependencies are all present.
    pub fn push_ready(&mut self, op: Struct) {
        self.ready.push(op);
        self.request_drain();
    }

    pub fn has_ready(&self) -> bool {
        return !self.ready.is_empty();
    }

    /// Number of structs still waiting on at least one dependency.
    pub fn pending_count(&self) -> usize {
        return self.listeners.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyPair;

    fn delete(target: OpId) -> Struct {
        return Struct::Delete { target };
    }

    #[test]
    fn empty_dependencies_are_ready() {
        let user = KeyPair::generate().key_pub;
        let mut buffer = DependencyBuffer::new();

        assert!(buffer.register(&[], delete(OpId::new(user, 0))));
        // A drain is already pending.
        assert!(!buffer.register(&[], delete(OpId::new(user, 1))));

        let (ready, index) = buffer.begin_drain();
        assert_eq!(ready.len(), 2);
        assert!(index.is_empty());
        assert!(!buffer.drain_requested());
    }

    #[test]
    fn shared_countdown_fires_once() {
        let user = KeyPair::generate().key_pub;
        let a = OpId::new(user, 0);
        let b = OpId::new(user, 1);
        let target = OpId::new(user, 2);
        let mut buffer = DependencyBuffer::new();

        buffer.register(&[a, b], delete(target));
        assert_eq!(buffer.pending_count(), 1);

        let waiting_a = buffer.take_waiting(&a);
        assert_eq!(waiting_a.len(), 1);
        assert!(buffer.satisfy(waiting_a[0]).is_none());

        let waiting_b = buffer.take_waiting(&b);
        assert_eq!(buffer.satisfy(waiting_b[0]), Some(delete(target)));
        assert_eq!(buffer.pending_count(), 0);

        // Already fired: nothing left to satisfy.
        assert!(buffer.satisfy(waiting_b[0]).is_none());
    }

    #[test]
    fn requeue_restores_index() {
        let user = KeyPair::generate().key_pub;
        let a = OpId::new(user, 0);
        let mut buffer = DependencyBuffer::new();
        buffer.register(&[a], delete(OpId::new(user, 5)));

        let (_, mut index) = buffer.begin_drain();
        let waiting = index.remove(&a).unwrap();
        buffer.requeue(a, waiting);
        assert_eq!(buffer.take_waiting(&a).len(), 1);
    }

    #[test]
    fn restore_hands_back_an_interrupted_drain() {
        let user = KeyPair::generate().key_pub;
        let a = OpId::new(user, 0);
        let mut buffer = DependencyBuffer::new();
        buffer.register(&[], delete(OpId::new(user, 1)));
        buffer.register(&[], delete(OpId::new(user, 2)));
        buffer.register(&[a], delete(OpId::new(user, 3)));

        let (ready, index) = buffer.begin_drain();
        let mut ready = ready.into_iter();
        assert_eq!(ready.next(), Some(delete(OpId::new(user, 1))));
        buffer.restore(ready, index);

        assert!(buffer.drain_requested());
        let (ready, index) = buffer.begin_drain();
        assert_eq!(ready, vec![delete(OpId::new(user, 2))]);
        assert_eq!(index.get(&a).map(|w| w.len()), Some(1));
        assert_eq!(buffer.pending_count(), 1);
    }
}
