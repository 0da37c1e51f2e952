// model = "claude-opus-4-5"
// created = "2026-01-30"
// modified = "2026-10-18"
// driver = "Isaac Clayton"

//! Causeway - a causal operation store for collaborative data structures.
//!
//! Sites create operations, delete them, and eventually garbage collect
//! the tombstones, while every replica converges to the same log no matter
//! in which order updates arrive.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use causeway::backend::MemoryBackend;
//! use causeway::config::StoreConfig;
//! use causeway::connector::MemoryConnector;
//! use causeway::crdt::op::Operation;
//! use causeway::key::KeyPair;
//! use causeway::store::OperationStore;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let store = OperationStore::new(
//!     MemoryBackend::new(),
//!     Arc::new(MemoryConnector::synced()),
//!     StoreConfig::manual_gc(),
//! );
//! store.set_user_id(KeyPair::generate().key_pub);
//!
//! // A list with one element in it.
//! let list = store.get_next_op_id().unwrap();
//! let item = store.get_next_op_id().unwrap();
//! store
//!     .apply_created_operations(vec![
//!         Operation::list(list).into(),
//!         Operation::insert(item, list, None, None, b"hello".to_vec()).into(),
//!     ])
//!     .await
//!     .unwrap();
//!
//! let list_op = store.get_operation(&list).await.unwrap().unwrap();
//! assert_eq!(list_op.start, Some(item));
//! # });
//! ```

pub mod backend;
pub mod config;
pub mod connector;
pub mod crdt;
pub mod error;
pub mod key;
pub mod store;

pub use error::BackendError;
pub use error::Result;
pub use error::StoreError;
pub use store::OperationStore;
pub use store::Transaction;
