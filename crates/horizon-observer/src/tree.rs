//! Arena storage for the object records inside one observer.
//!
//! Every plain JSON object nested under an observer root becomes a [`Node`] in
//! a `SlotMap` arena, addressed by a generational [`NodeId`]. A node keeps its
//! keys in insertion order and maps each key to a [`Slot`]:
//!
//! - `Value`: a JSON scalar (or, inside arrays, a nested JSON array)
//! - `Array`: an array field whose elements are `Value` or `Observer` slots
//! - `Node`: a nested object record in the same arena
//! - `Observer`: a nested observer with its own tree
//!
//! Objects inserted into arrays become observers of their own rather than
//! arena nodes, so array elements can be relocated without rewriting paths.

use std::collections::HashMap;

use serde_json::{Map, Value as JsonValue};
use slotmap::{new_key_type, SlotMap};

use crate::observer::Observer;
use crate::path;
use crate::value::Value;

new_key_type! {
    /// Handle of an object record in an observer's arena.
    pub struct NodeId;
}

/// Content stored under one key or array index.
#[derive(Clone, Debug)]
pub(crate) enum Slot {
    Value(JsonValue),
    Array(Vec<Slot>),
    Node(NodeId),
    Observer(Observer),
}

impl Slot {
    /// Convert a value into an array element.
    ///
    /// Plain objects become new observers, mixed arrays are flattened to JSON.
    pub(crate) fn element(value: Value) -> Slot {
        match value {
            Value::Observer(observer) => Slot::Observer(observer),
            Value::Json(JsonValue::Object(map)) => Slot::Observer(Observer::from_map(map)),
            Value::Json(other) => Slot::Value(other),
            array @ Value::Array(_) => Slot::Value(array.to_json()),
        }
    }

    pub(crate) fn as_observer(&self) -> Option<&Observer> {
        match self {
            Slot::Observer(observer) => Some(observer),
            _ => None,
        }
    }

    /// Element identity: observers by pointer, everything else by value.
    pub(crate) fn same(&self, other: &Slot) -> bool {
        match (self, other) {
            (Slot::Observer(a), Slot::Observer(b)) => a.ptr_eq(b),
            (Slot::Value(a), Slot::Value(b)) => a == b,
            (Slot::Array(a), Slot::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same(y))
            }
            (Slot::Node(a), Slot::Node(b)) => a == b,
            _ => false,
        }
    }
}

/// One object record.
#[derive(Debug)]
pub(crate) struct Node {
    /// Path of this record from the observer root.
    pub path: String,
    /// Keys in insertion order.
    pub keys: Vec<String>,
    pub data: HashMap<String, Slot>,
}

impl Node {
    fn new(path: String) -> Self {
        Self {
            path,
            keys: Vec::new(),
            data: HashMap::new(),
        }
    }
}

/// The arena of object records belonging to one observer.
#[derive(Debug)]
pub(crate) struct Tree {
    nodes: SlotMap<NodeId, Node>,
    root: NodeId,
}

impl Tree {
    pub(crate) fn new() -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(Node::new(String::new()));
        Self { nodes, root }
    }

    pub(crate) fn root(&self) -> NodeId {
        self.root
    }

    pub(crate) fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    #[cfg(test)]
    pub(crate) fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Full path of `key` under the record `id`.
    pub(crate) fn child_path(&self, id: NodeId, key: &str) -> Option<String> {
        self.nodes.get(id).map(|node| path::join(&node.path, key))
    }

    pub(crate) fn slot(&self, id: NodeId, key: &str) -> Option<&Slot> {
        self.nodes.get(id)?.data.get(key)
    }

    pub(crate) fn slot_mut(&mut self, id: NodeId, key: &str) -> Option<&mut Slot> {
        self.nodes.get_mut(id)?.data.get_mut(key)
    }

    pub(crate) fn keys(&self, id: NodeId) -> Vec<String> {
        self.nodes.get(id).map(|node| node.keys.clone()).unwrap_or_default()
    }

    /// Store `slot` under `key`, appending the key if it is new.
    ///
    /// Returns the previous slot.
    pub(crate) fn put(&mut self, id: NodeId, key: &str, slot: Slot) -> Option<Slot> {
        let node = self.nodes.get_mut(id)?;
        let previous = node.data.insert(key.to_string(), slot);
        if previous.is_none() {
            node.keys.push(key.to_string());
        }
        previous
    }

    /// Remove `key` from the record and return its slot.
    pub(crate) fn take(&mut self, id: NodeId, key: &str) -> Option<Slot> {
        let node = self.nodes.get_mut(id)?;
        let slot = node.data.remove(key)?;
        node.keys.retain(|k| k != key);
        Some(slot)
    }

    /// Create an empty object record under a vacant `key`.
    pub(crate) fn add_node(&mut self, parent: NodeId, key: &str) -> Option<NodeId> {
        if self.slot(parent, key).is_some() {
            return None;
        }
        let path = self.child_path(parent, key)?;
        let child = self.nodes.insert(Node::new(path));
        self.put(parent, key, Slot::Node(child));
        Some(child)
    }

    /// Free the arena records reachable from `slot`.
    ///
    /// Returns the observers that were held by the released content so the
    /// caller can detach them.
    pub(crate) fn release(&mut self, slot: Slot) -> Vec<Observer> {
        let mut detached = Vec::new();
        let mut pending = vec![slot];
        while let Some(slot) = pending.pop() {
            match slot {
                Slot::Value(_) => {}
                Slot::Observer(observer) => detached.push(observer),
                Slot::Array(items) => pending.extend(items),
                Slot::Node(id) => {
                    if let Some(node) = self.nodes.remove(id) {
                        pending.extend(node.data.into_values());
                    }
                }
            }
        }
        detached
    }

    pub(crate) fn node_json(&self, id: NodeId) -> JsonValue {
        let Some(node) = self.nodes.get(id) else {
            return JsonValue::Null;
        };
        let mut map = Map::new();
        for key in &node.keys {
            if let Some(slot) = node.data.get(key) {
                map.insert(key.clone(), self.slot_json(slot));
            }
        }
        JsonValue::Object(map)
    }

    pub(crate) fn slot_json(&self, slot: &Slot) -> JsonValue {
        match slot {
            Slot::Value(value) => value.clone(),
            Slot::Array(items) => JsonValue::Array(items.iter().map(|s| self.slot_json(s)).collect()),
            Slot::Node(id) => self.node_json(*id),
            Slot::Observer(observer) => observer.json(),
        }
    }

    /// The value reported to listeners for `slot`.
    ///
    /// Arrays holding observers keep them live; everything else is plain JSON.
    pub(crate) fn slot_value(&self, slot: &Slot) -> Value {
        match slot {
            Slot::Observer(observer) => Value::Observer(observer.clone()),
            Slot::Array(items) if items.iter().any(|s| s.as_observer().is_some()) => {
                Value::Array(items.iter().map(|s| self.slot_value(s)).collect())
            }
            other => Value::Json(self.slot_json(other)),
        }
    }
}

/// Human-readable name of a JSON value's kind.
pub(crate) fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
