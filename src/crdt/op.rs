// model = "claude-opus-4-5"
// created = "2026-01-30"
// modified = "2026-10-18"
// driver = "Isaac Clayton"

//! Operations stored in the log, and the structs that travel between sites.
//!
//! Every stored operation is an [`Operation`]: a node in a doubly-linked
//! sibling list (`left`/`right`) under a container (`parent`). Containers
//! (lists and maps) additionally point at their first and last child with
//! `start`/`end`, and maps name their children through `map`.
//!
//! All cross references are ids, never pointers: the log is an arena
//! addressed by [`OpId`], so removing an operation can never leave a
//! dangling borrow, only a stale id (which the garbage collector repairs).
//!
//! Deletes are not stored. A [`Struct::Delete`] only flips the `deleted`
//! flag of its target and is recorded in the delete set.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use smallvec::SmallVec;

use super::primitives::OpId;

/// The kind of a stored operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// An element of a list, or a value of a map entry.
    Insert,
    /// A sequence container.
    List,
    /// A key/value container.
    Map,
}

impl Kind {
    /// Containers own children and can back a type instance.
    pub fn is_container(&self) -> bool {
        return matches!(self, Kind::List | Kind::Map);
    }
}

/// An operation as stored in the log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OpId,
    pub kind: Kind,

    /// Left sibling under the same parent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<OpId>,
    /// Right sibling under the same parent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<OpId>,
    /// What was to the left when this was inserted. Used to order concurrent
    /// inserts; rewritten by the garbage collector when it points at a
    /// collected operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<OpId>,
    /// The container this operation lives in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<OpId>,
    /// Map key, for inserts that are map values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_sub: Option<String>,

    /// First child (containers only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<OpId>,
    /// Last child (containers only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<OpId>,
    /// Key -> winning child under that key (maps only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<BTreeMap<String, OpId>>,

    /// An embedded operation, e.g. a list stored as a list element.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_content: Option<OpId>,
    /// Opaque payload.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<u8>,

    /// Tombstone flag. Only ever goes false -> true.
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    /// Staged for (or undergoing) garbage collection. Implies `deleted`.
    #[serde(default, skip_serializing_if = "is_false")]
    pub gc: bool,
}

fn is_false(b: &bool) -> bool {
    return !*b;
}

impl Operation {
    fn blank(id: OpId, kind: Kind) -> Operation {
        return Operation {
            id,
            kind,
            left: None,
            right: None,
            origin: None,
            parent: None,
            parent_sub: None,
            start: None,
            end: None,
            map: None,
            op_content: None,
            content: Vec::new(),
            deleted: false,
            gc: false,
        };
    }

    /// A new, empty list container.
    pub fn list(id: OpId) -> Operation {
        return Operation::blank(id, Kind::List);
    }

    /// A new, empty map container.
    pub fn map(id: OpId) -> Operation {
        let mut op = Operation::blank(id, Kind::Map);
        op.map = Some(BTreeMap::new());
        return op;
    }

    /// An insert between `left` and `right` under `parent`.
    ///
    /// The origin defaults to `left`, which is what it is at creation time.
    pub fn insert(
        id: OpId,
        parent: OpId,
        left: Option<OpId>,
        right: Option<OpId>,
        content: Vec<u8>,
    ) -> Operation {
        let mut op = Operation::blank(id, Kind::Insert);
        op.parent = Some(parent);
        op.left = left;
        op.right = right;
        op.origin = left;
        op.content = content;
        return op;
    }

    /// Override the conflict-resolution origin.
    pub fn with_origin(mut self, origin: Option<OpId>) -> Operation {
        self.origin = origin;
        return self;
    }

    /// Store this insert as the value of `key` in a map.
    pub fn with_parent_sub(mut self, key: impl Into<String>) -> Operation {
        self.parent_sub = Some(key.into());
        return self;
    }

    /// Embed another operation (usually a container) in this one.
    pub fn with_op_content(mut self, content: OpId) -> Operation {
        self.op_content = Some(content);
        return self;
    }

    /// The operations that must be in the log before this one can execute.
    pub fn required_ops(&self) -> SmallVec<[OpId; 4]> {
        let mut ids = SmallVec::new();
        match self.kind {
            Kind::Insert => {
                ids.extend(self.left);
                ids.extend(self.right);
                if self.origin.is_some() && self.origin != self.left {
                    ids.extend(self.origin);
                }
                ids.extend(self.parent);
                ids.extend(self.op_content);
            }
            // Containers are either roots or embedded by an insert, which
            // depends on them, not the other way around.
            Kind::List | Kind::Map => {}
        }
        return ids;
    }

    /// The wire form: the same operation with all local state dropped.
    pub fn encode(&self) -> Operation {
        let mut op = self.clone();
        op.deleted = false;
        op.gc = false;
        op.start = None;
        op.end = None;
        if op.kind == Kind::Map {
            op.map = Some(BTreeMap::new());
        }
        return op;
    }
}

/// Anything that can be applied to the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "struct", rename_all = "lowercase")]
pub enum Struct {
    /// Mark `target` deleted.
    Delete { target: OpId },
    /// Add an operation to the log.
    Op(Operation),
}

impl Struct {
    /// Prerequisites for executing this struct.
    pub fn required_ops(&self) -> SmallVec<[OpId; 4]> {
        return match self {
            // A delete is recorded whether or not its target is here yet,
            // and its target may already be collected.
            Struct::Delete { .. } => SmallVec::new(),
            Struct::Op(op) => op.required_ops(),
        };
    }

    /// The wire form of this struct.
    pub fn encode(&self) -> Struct {
        return match self {
            Struct::Delete { target } => Struct::Delete { target: *target },
            Struct::Op(op) => Struct::Op(op.encode()),
        };
    }

    /// The id this struct is about: its own for ops, the target for deletes.
    pub fn id(&self) -> OpId {
        return match self {
            Struct::Delete { target } => *target,
            Struct::Op(op) => op.id,
        };
    }
}

impl From<Operation> for Struct {
    fn from(op: Operation) -> Self {
        return Struct::Op(op);
    }
}

/// Messages handed to the connector.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    /// A batch of freshly created structs.
    Update { ops: Vec<Struct> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyPair;

    #[test]
    fn insert_requires_neighbours_and_parent() {
        let user = KeyPair::generate().key_pub;
        let root = OpId::new(user, 0);
        let left = OpId::new(user, 1);
        let right = OpId::new(user, 2);
        let op = Operation::insert(OpId::new(user, 3), root, Some(left), Some(right), b"x".to_vec());

        // origin == left is not listed twice
        assert_eq!(op.required_ops().as_slice(), &[left, right, root]);
    }

    #[test]
    fn distinct_origin_is_required() {
        let user = KeyPair::generate().key_pub;
        let root = OpId::new(user, 0);
        let origin = OpId::new(user, 1);
        let op = Operation::insert(OpId::new(user, 2), root, None, None, Vec::new())
            .with_origin(Some(origin))
            .with_op_content(OpId::new(user, 9));

        assert_eq!(op.required_ops().as_slice(), &[origin, root, OpId::new(user, 9)]);
    }

    #[test]
    fn containers_require_nothing() {
        let user = KeyPair::generate().key_pub;
        assert!(Operation::list(OpId::new(user, 0)).required_ops().is_empty());
        assert!(Operation::map(OpId::new(user, 1)).required_ops().is_empty());
    }

    #[test]
    fn delete_needs_nothing() {
        let user = KeyPair::generate().key_pub;
        let target = OpId::new(user, 4);
        let delete = Struct::Delete { target };
        assert!(delete.required_ops().is_empty());
        assert_eq!(delete.id(), target);
    }

    #[test]
    fn encode_drops_local_state() {
        let user = KeyPair::generate().key_pub;
        let mut list = Operation::list(OpId::new(user, 0));
        list.start = Some(OpId::new(user, 1));
        list.end = Some(OpId::new(user, 1));
        list.deleted = true;
        list.gc = true;

        let wire = list.encode();
        assert!(wire.start.is_none());
        assert!(wire.end.is_none());
        assert!(!wire.deleted);
        assert!(!wire.gc);
    }

    #[test]
    fn update_message_shape() {
        let user = KeyPair::generate().key_pub;
        let message = Message::Update {
            ops: vec![Struct::Delete { target: OpId::new(user, 0) }],
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "update");
        assert_eq!(json["ops"][0]["struct"], "delete");

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, message);
    }
}
