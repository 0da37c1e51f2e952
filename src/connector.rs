// model = "claude-opus-4-5"
// created = "2026-10-18"
// modified = "2026-10-18"
// driver = "Isaac Clayton"

//! The network side, as far as the store is concerned.
//!
//! The store never talks to peers itself. It asks the connector two
//! questions (are we synced, are we connected at all) and hands it update
//! batches to broadcast. Delivery and retries are the connector's business.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;

use crate::crdt::op::Message;

/// What the store needs from the transport.
pub trait Connector: Send + Sync {
    /// True once this site has caught up with its peers. Garbage collection
    /// and bulk deletes only run while this holds.
    fn is_synced(&self) -> bool;

    /// True if there is nobody to broadcast to.
    fn is_disconnected(&self) -> bool;

    /// Send a message to every peer. Fire and forget.
    fn broadcast(&self, message: Message);
}

/// A connector with switchable flags that records what it was asked to send.
#[derive(Debug)]
pub struct MemoryConnector {
    synced: AtomicBool,
    disconnected: AtomicBool,
    sent: Mutex<Vec<Message>>,
}

impl MemoryConnector {
    /// Connected and synced.
    pub fn synced() -> MemoryConnector {
        return MemoryConnector {
            synced: AtomicBool::new(true),
            disconnected: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        };
    }

    /// Connected but still catching up.
    pub fn syncing() -> MemoryConnector {
        let connector = MemoryConnector::synced();
        connector.set_synced(false);
        return connector;
    }

    /// No peers at all.
    pub fn offline() -> MemoryConnector {
        let connector = MemoryConnector::syncing();
        connector.set_disconnected(true);
        return connector;
    }

    pub fn set_synced(&self, synced: bool) {
        self.synced.store(synced, Ordering::SeqCst);
    }

    pub fn set_disconnected(&self, disconnected: bool) {
        self.disconnected.store(disconnected, Ordering::SeqCst);
    }

    /// Take every message broadcast so far.
    pub fn take_sent(&self) -> Vec<Message> {
        return std::mem::take(&mut *self.sent.lock());
    }
}

impl Connector for MemoryConnector {
    fn is_synced(&self) -> bool {
        return self.synced.load(Ordering::SeqCst);
    }

    fn is_disconnected(&self) -> bool {
        return self.disconnected.load(Ordering::SeqCst);
    }

    fn broadcast(&self, message: Message) {
        tracing::trace!(?message, "broadcast");
        self.sent.lock().push(message);
    }
}
