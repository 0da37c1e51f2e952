// model = "claude-opus-4-5"
// created = "2026-10-18"
// modified = "2026-10-18"
// driver = "Isaac Clayton"

//! Exchanging updates between stores: broadcast, catching up from state
//! sets and delete sets, duplicates, and backend failures.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use causeway::backend::Backend;
use causeway::backend::MemoryBackend;
use causeway::backend::Successors;
use causeway::config::StoreConfig;
use causeway::connector::MemoryConnector;
use causeway::crdt::op::Message;
use causeway::crdt::op::Operation;
use causeway::crdt::op::Struct;
use causeway::crdt::primitives::DeleteRange;
use causeway::crdt::primitives::DeleteSetSnapshot;
use causeway::crdt::primitives::OpId;
use causeway::crdt::primitives::State;
use causeway::crdt::primitives::StateVector;
use causeway::error::BackendError;
use causeway::key::KeyPair;
use causeway::key::KeyPub;
use causeway::store::OperationStore;
use causeway::store::TypeEvent;
use causeway::StoreError;

// =============================================================================
// Test helpers
// =============================================================================

fn user(seed: u8) -> KeyPub {
    return KeyPair::from_seed([seed; 32]).key_pub;
}

fn store_on(connector: Arc<MemoryConnector>) -> OperationStore<MemoryBackend> {
    return OperationStore::new(MemoryBackend::new(), connector, StoreConfig::manual_gc());
}

fn updates(messages: Vec<Message>) -> Vec<Struct> {
    return messages
        .into_iter()
        .flat_map(|message| match message {
            Message::Update { ops } => ops,
        })
        .collect();
}

/// Forwards to a memory backend, failing every write once `fail` is set.
struct FlakyBackend {
    inner: MemoryBackend,
    fail: Arc<AtomicBool>,
}

impl FlakyBackend {
    fn check(&self) -> Result<(), BackendError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BackendError::storage("disk full"));
        }
        return Ok(());
    }
}

#[async_trait]
impl Backend for FlakyBackend {
    async fn get_operation(&self, id: &OpId) -> Result<Option<Operation>, BackendError> {
        return self.inner.get_operation(id).await;
    }

    async fn set_operation(&mut self, op: Operation) -> Result<(), BackendError> {
        self.check()?;
        return self.inner.set_operation(op).await;
    }

    async fn add_operation(&mut self, op: Operation) -> Result<Successors, BackendError> {
        self.check()?;
        return self.inner.add_operation(op).await;
    }

    async fn remove_operation(&mut self, id: &OpId) -> Result<(), BackendError> {
        self.check()?;
        return self.inner.remove_operation(id).await;
    }

    async fn operations(&self) -> Result<Vec<Operation>, BackendError> {
        return self.inner.operations().await;
    }

    async fn get_state(&self, user: &KeyPub) -> Result<State, BackendError> {
        return self.inner.get_state(user).await;
    }

    async fn set_state(&mut self, state: State) -> Result<(), BackendError> {
        self.check()?;
        return self.inner.set_state(state).await;
    }

    async fn get_state_vector(&self) -> Result<Vec<State>, BackendError> {
        return self.inner.get_state_vector().await;
    }

    async fn get_state_set(&self) -> Result<StateVector, BackendError> {
        return self.inner.get_state_set().await;
    }

    async fn get_delete_set(&self) -> Result<DeleteSetSnapshot, BackendError> {
        return self.inner.get_delete_set().await;
    }

    async fn mark_deleted(&mut self, id: &OpId) -> Result<(), BackendError> {
        self.check()?;
        return self.inner.mark_deleted(id).await;
    }

    async fn mark_garbage_collected(&mut self, id: &OpId) -> Result<(), BackendError> {
        self.check()?;
        return self.inner.mark_garbage_collected(id).await;
    }

    async fn is_deleted(&self, id: &OpId) -> Result<bool, BackendError> {
        return self.inner.is_deleted(id).await;
    }

    async fn is_garbage_collected(&self, id: &OpId) -> Result<bool, BackendError> {
        return self.inner.is_garbage_collected(id).await;
    }

    async fn get_ops_from_delete_set(&self, ds: &[DeleteRange]) -> Result<Vec<Struct>, BackendError> {
        return self.inner.get_ops_from_delete_set(ds).await;
    }

    async fn check_delete_store_for_state(&self, state: &mut State) -> Result<(), BackendError> {
        return self.inner.check_delete_store_for_state(state).await;
    }
}

// =============================================================================
// Broadcast
// =============================================================================

#[tokio::test]
async fn created_operations_go_out_as_one_update() {
    let connector = Arc::new(MemoryConnector::synced());
    let store = store_on(connector.clone());
    store.set_user_id(user(1));

    let list = store.get_next_op_id().unwrap();
    let item = store.get_next_op_id().unwrap();
    store
        .apply_created_operations(vec![
            Operation::list(list).into(),
            Operation::insert(item, list, None, None, b"x".to_vec()).into(),
        ])
        .await
        .unwrap();

    let sent = connector.take_sent();
    assert_eq!(sent.len(), 1);
    let Message::Update { ops } = &sent[0];
    assert_eq!(ops.len(), 2);
    assert_eq!(ops[1].id(), item);

    let json = serde_json::to_value(&sent[0]).unwrap();
    assert_eq!(json["type"], "update");
    assert_eq!(json["ops"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn nothing_is_broadcast_while_disconnected() {
    let connector = Arc::new(MemoryConnector::offline());
    let store = store_on(connector.clone());
    store.set_user_id(user(1));

    let list = store.get_next_op_id().unwrap();
    store.apply_created_operations(vec![Operation::list(list).into()]).await.unwrap();

    assert!(connector.take_sent().is_empty());
    assert!(store.get_operation(&list).await.unwrap().is_some());
}

#[tokio::test]
async fn broadcast_update_replays_on_a_peer() {
    let connector = Arc::new(MemoryConnector::synced());
    let alice = store_on(connector.clone());
    alice.set_user_id(user(1));
    let bob = store_on(Arc::new(MemoryConnector::synced()));

    let list = alice.get_next_op_id().unwrap();
    let x = alice.get_next_op_id().unwrap();
    let y = alice.get_next_op_id().unwrap();
    alice
        .apply_created_operations(vec![
            Operation::list(list).into(),
            Operation::insert(x, list, None, None, b"x".to_vec()).into(),
            Operation::insert(y, list, Some(x), None, b"y".to_vec()).into(),
        ])
        .await
        .unwrap();
    alice.apply_created_operations(vec![Struct::Delete { target: x }]).await.unwrap();

    // Deliver the batches backwards: the delete is recorded before its
    // target exists and takes effect when the target arrives.
    let mut sent = updates(connector.take_sent());
    sent.reverse();
    for op in sent {
        bob.apply(vec![op]).await.unwrap();
    }

    assert_eq!(bob.pending_count().await, 0);
    assert_eq!(bob.get_state_set().await.unwrap(), alice.get_state_set().await.unwrap());
    assert!(bob.get_operation(&x).await.unwrap().unwrap().deleted);
    let y_op = bob.get_operation(&y).await.unwrap().unwrap();
    assert_eq!(y_op.left, Some(x));
    assert_eq!(y_op.content, b"y".to_vec());
}

// =============================================================================
// Catching up
// =============================================================================

#[tokio::test]
async fn missing_operations_by_state_set() {
    let store = store_on(Arc::new(MemoryConnector::synced()));
    let a = user(1);
    let list = OpId::new(a, 0);
    store
        .apply(vec![
            Operation::list(list).into(),
            Operation::insert(OpId::new(a, 1), list, None, None, b"1".to_vec()).into(),
            Operation::insert(OpId::new(a, 2), list, Some(OpId::new(a, 1)), None, b"2".to_vec()).into(),
        ])
        .await
        .unwrap();

    let everything = store.get_operations(&StateVector::new()).await.unwrap();
    assert_eq!(everything.len(), 3);
    // Local state is not shipped.
    let Struct::Op(list_op) = &everything[0] else {
        panic!("expected an operation");
    };
    assert_eq!(list_op.start, None);

    let mut known = StateVector::new();
    known.set(State { user: a, clock: 2 });
    let missing = store.get_operations(&known).await.unwrap();
    assert_eq!(missing.iter().map(Struct::id).collect::<Vec<_>>(), vec![OpId::new(a, 2)]);

    let up_to_date = store.get_state_set().await.unwrap();
    assert!(store.get_operations(&up_to_date).await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_set_catch_up_applies_before_and_after_arrival() {
    let store = store_on(Arc::new(MemoryConnector::syncing()));
    let a = user(1);
    let list = OpId::new(a, 0);
    let x = OpId::new(a, 1);
    let y = OpId::new(a, 2);
    store
        .apply(vec![
            Operation::list(list).into(),
            Operation::insert(x, list, None, None, b"x".to_vec()).into(),
        ])
        .await
        .unwrap();

    // The peer deleted x, and y which we have not seen yet.
    let remote = vec![DeleteRange { user: a, clock: 1, len: 2, gc: false }];
    assert_eq!(store.apply_delete_set(&remote).await.unwrap(), 2);
    assert!(store.get_operation(&x).await.unwrap().unwrap().deleted);

    // Nothing left to derive.
    assert_eq!(store.apply_delete_set(&remote).await.unwrap(), 0);

    store
        .apply(vec![Operation::insert(y, list, Some(x), None, b"y".to_vec()).into()])
        .await
        .unwrap();
    assert!(store.get_operation(&y).await.unwrap().unwrap().deleted);
    assert_eq!(store.get_state(&a).await.unwrap().clock, 3);
}

// =============================================================================
// Duplicates
// =============================================================================

#[tokio::test]
async fn repeated_delivery_is_a_no_op() {
    let store = store_on(Arc::new(MemoryConnector::syncing()));
    let a = user(1);
    let list = OpId::new(user(9), 0);
    let x = OpId::new(a, 0);
    store.apply(vec![Operation::list(list).into()]).await.unwrap();
    let shared = store.get_type(&list).await.unwrap().unwrap();

    let insert: Struct = Operation::insert(x, list, None, None, b"x".to_vec()).into();
    let delete = Struct::Delete { target: x };
    for _ in 0..3 {
        store.apply(vec![insert.clone(), delete.clone()]).await.unwrap();
    }

    assert_eq!(
        shared.take_events(),
        vec![
            TypeEvent::Insert(Operation::insert(x, list, None, None, b"x".to_vec())),
            TypeEvent::Delete { target: x },
        ]
    );
    assert_eq!(store.get_state(&a).await.unwrap().clock, 1);
    assert_eq!(store.get_delete_set().await.unwrap().len(), 1);
}

// =============================================================================
// Backend failures
// =============================================================================

#[tokio::test]
async fn backend_failure_aborts_the_transaction() {
    let fail = Arc::new(AtomicBool::new(false));
    let backend = FlakyBackend {
        inner: MemoryBackend::new(),
        fail: fail.clone(),
    };
    let store = OperationStore::new(backend, Arc::new(MemoryConnector::synced()), StoreConfig::manual_gc());
    let list = OpId::new(user(9), 0);
    store.apply(vec![Operation::list(list).into()]).await.unwrap();

    fail.store(true, Ordering::SeqCst);
    let x = OpId::new(user(1), 0);
    let result = store.apply(vec![Operation::insert(x, list, None, None, Vec::new()).into()]).await;
    assert!(matches!(result, Err(StoreError::Backend(BackendError::Storage(_)))));
    assert!(store.delete_operation(list).await.is_err());

    // The store is still usable once the backend recovers.
    fail.store(false, Ordering::SeqCst);
    store.delete_operation(list).await.unwrap();
    assert!(store.get_operation(&list).await.unwrap().unwrap().deleted);
}

#[tokio::test]
async fn failed_drain_keeps_everything_buffered() {
    let fail = Arc::new(AtomicBool::new(false));
    let backend = FlakyBackend {
        inner: MemoryBackend::new(),
        fail: fail.clone(),
    };
    let store = OperationStore::new(backend, Arc::new(MemoryConnector::synced()), StoreConfig::manual_gc());
    let list = OpId::new(user(9), 0);
    let x = OpId::new(user(1), 0);
    let y = OpId::new(user(1), 1);
    let z = OpId::new(user(2), 0);
    store.apply(vec![Operation::list(list).into()]).await.unwrap();

    // y waits on z.
    store
        .apply(vec![Operation::insert(y, list, Some(z), None, b"y".to_vec()).into()])
        .await
        .unwrap();
    assert_eq!(store.pending_count().await, 1);

    fail.store(true, Ordering::SeqCst);
    let result = store.apply(vec![Operation::insert(x, list, None, None, b"x".to_vec()).into()]).await;
    assert!(result.is_err());
    assert_eq!(store.pending_count().await, 1);

    fail.store(false, Ordering::SeqCst);
    store
        .apply(vec![Operation::insert(z, list, None, None, b"z".to_vec()).into()])
        .await
        .unwrap();

    assert_eq!(store.pending_count().await, 0);
    assert_eq!(store.get_operation(&y).await.unwrap().unwrap().left, Some(z));
    // The failed insert was kept and retried.
    assert!(store.get_operation(&x).await.unwrap().is_some());
    assert_eq!(store.get_state(&user(1)).await.unwrap().clock, 2);
}

#[tokio::test]
async fn destroyed_backend_rejects_writes() {
    let store = store_on(Arc::new(MemoryConnector::synced()));
    store.destroy().await.unwrap();

    let list = OpId::new(user(9), 0);
    let result = store.apply(vec![Operation::list(list).into()]).await;
    assert!(matches!(result, Err(StoreError::Backend(BackendError::Destroyed))));
}

#[tokio::test]
async fn log_table_shows_the_log() {
    let store = store_on(Arc::new(MemoryConnector::synced()));
    let list = OpId::new(user(9), 0);
    store.apply(vec![Operation::list(list).into()]).await.unwrap();

    let table = store.log_table().await.unwrap();
    assert!(table.contains(&list.to_string()));
}
