//! Flat, optionally sorted and indexed collections.
//!
//! [`ObserverList<T>`] holds observers (or plain JSON values) outside the
//! path-addressed tree model. It is used for registries such as "all entities
//! currently selected", where items are looked up by an id field rather than
//! by position.
//!
//! Two optional behaviors can be configured at construction:
//!
//! - **Index field**: items are additionally keyed by the value of a named
//!   field. Lookups, removals and the keys reported by iteration use that
//!   value, and no two items may share it.
//! - **Sorted**: a comparator keeps the backing array ordered; `add` inserts
//!   at the binary-search position.
//!
//! Structural changes emit [`ListEvent`]s under the names `add`, `remove` and
//! `move`. Indexed lists also emit `add[<id>]` for every added item.
//!
//! # Example
//!
//! ```
//! use horizon_observer::{ListKey, Observer, ObserverList};
//! use serde_json::json;
//!
//! let entities = ObserverList::<Observer>::new().with_index("resource_id");
//! let entity = Observer::from_json(json!({ "resource_id": "e1", "name": "Box" })).unwrap();
//!
//! assert_eq!(entities.add(entity.clone()), Some(0));
//! assert!(entities.get("e1").is_some());
//! assert_eq!(entities.index_of(&entity), Some(ListKey::from("e1")));
//! ```

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value as JsonValue;

use crate::events::{EventHandle, Events};
use crate::logging::targets;
use crate::observer::Observer;

/// Items that can be stored in an [`ObserverList`].
pub trait ListItem: Clone + Send + Sync + 'static {
    /// The value of `field`, used as the item's key in indexed lists.
    fn index_value(&self, field: &str) -> Option<String>;

    /// Whether both values denote the same item.
    fn same_item(&self, other: &Self) -> bool;

    /// The item materialized as plain JSON.
    fn to_json(&self) -> JsonValue;
}

fn key_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl ListItem for Observer {
    fn index_value(&self, field: &str) -> Option<String> {
        self.get(field).as_ref().and_then(key_string)
    }

    fn same_item(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }

    fn to_json(&self) -> JsonValue {
        self.json()
    }
}

impl ListItem for JsonValue {
    fn index_value(&self, field: &str) -> Option<String> {
        self.get(field).and_then(key_string)
    }

    fn same_item(&self, other: &Self) -> bool {
        self == other
    }

    fn to_json(&self) -> JsonValue {
        self.clone()
    }
}

/// How an item is addressed: by position, or by index-field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListKey {
    Position(usize),
    Id(String),
}

impl fmt::Display for ListKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListKey::Position(position) => write!(f, "{position}"),
            ListKey::Id(id) => f.write_str(id),
        }
    }
}

impl From<usize> for ListKey {
    fn from(position: usize) -> Self {
        ListKey::Position(position)
    }
}

impl From<&str> for ListKey {
    fn from(id: &str) -> Self {
        ListKey::Id(id.to_string())
    }
}

impl From<String> for ListKey {
    fn from(id: String) -> Self {
        ListKey::Id(id)
    }
}

/// Payload of list events.
#[derive(Debug, Clone)]
pub enum ListEvent<T> {
    /// `add` and `add[<id>]`.
    Add { item: T, key: ListKey, position: usize },
    /// `remove`.
    Remove { item: T, key: ListKey, position: usize },
    /// `move`. `position` is `None` when the item moved to the end.
    Move { item: T, position: Option<usize> },
}

impl<T> ListEvent<T> {
    pub fn name(&self) -> &'static str {
        match self {
            ListEvent::Add { .. } => "add",
            ListEvent::Remove { .. } => "remove",
            ListEvent::Move { .. } => "move",
        }
    }

    pub fn item(&self) -> &T {
        match self {
            ListEvent::Add { item, .. } | ListEvent::Remove { item, .. } | ListEvent::Move { item, .. } => {
                item
            }
        }
    }
}

/// Three-way comparator of `(existing, candidate)`.
pub type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

struct ListState<T> {
    data: Vec<T>,
    indexed: HashMap<String, T>,
}

/// An ordered collection of items with optional sorting and indexing.
pub struct ObserverList<T: ListItem> {
    state: RwLock<ListState<T>>,
    index: Option<String>,
    sorted: Option<Comparator<T>>,
    events: Events<ListEvent<T>>,
}

impl<T: ListItem> Default for ObserverList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ListItem + fmt::Debug> fmt::Debug for ObserverList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverList")
            .field("items", &self.state.read().data)
            .field("index", &self.index)
            .field("sorted", &self.sorted.is_some())
            .finish()
    }
}

impl<T: ListItem> ObserverList<T> {
    /// Create an empty, unsorted, unindexed list.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ListState {
                data: Vec::new(),
                indexed: HashMap::new(),
            }),
            index: None,
            sorted: None,
            events: Events::new(),
        }
    }

    /// Key items by the value of `field`.
    pub fn with_index(mut self, field: impl Into<String>) -> Self {
        self.index = Some(field.into());
        self
    }

    /// Keep items ordered by `comparator`.
    pub fn with_sorted<F>(mut self, comparator: F) -> Self
    where
        F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        self.sorted = Some(Arc::new(comparator));
        self
    }

    /// The configured index field.
    pub fn index_field(&self) -> Option<&str> {
        self.index.as_deref()
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted.is_some()
    }

    pub fn events(&self) -> &Events<ListEvent<T>> {
        &self.events
    }

    /// Subscribe to `add`, `remove`, `move` or `add[<id>]`.
    pub fn on<F>(&self, name: impl Into<String>, listener: F) -> EventHandle<ListEvent<T>>
    where
        F: Fn(&ListEvent<T>) + Send + Sync + 'static,
    {
        self.events.on(name, listener)
    }

    pub fn once<F>(&self, name: impl Into<String>, listener: F) -> EventHandle<ListEvent<T>>
    where
        F: Fn(&ListEvent<T>) + Send + Sync + 'static,
    {
        self.events.once(name, listener)
    }

    pub fn len(&self) -> usize {
        self.state.read().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().data.is_empty()
    }

    /// Look up an item by key.
    ///
    /// Indexed lists resolve [`ListKey::Id`] through the index; other lists
    /// resolve [`ListKey::Position`].
    pub fn get(&self, key: impl Into<ListKey>) -> Option<T> {
        let state = self.state.read();
        match (key.into(), &self.index) {
            (ListKey::Id(id), Some(_)) => state.indexed.get(&id).cloned(),
            (ListKey::Position(position), None) => state.data.get(position).cloned(),
            _ => None,
        }
    }

    /// The item at `position` in the backing array.
    pub fn at(&self, position: usize) -> Option<T> {
        self.state.read().data.get(position).cloned()
    }

    /// Whether the item is present, by index value or by identity.
    pub fn has(&self, item: &T) -> bool {
        let state = self.state.read();
        self.contains(&state, item)
    }

    fn contains(&self, state: &ListState<T>, item: &T) -> bool {
        match &self.index {
            Some(field) => item
                .index_value(field)
                .is_some_and(|id| state.indexed.contains_key(&id)),
            None => state.data.iter().any(|other| other.same_item(item)),
        }
    }

    /// The key of a present item.
    pub fn index_of(&self, item: &T) -> Option<ListKey> {
        let state = self.state.read();
        match &self.index {
            Some(field) => item
                .index_value(field)
                .filter(|id| state.indexed.contains_key(id))
                .map(ListKey::Id),
            None => state
                .data
                .iter()
                .position(|other| other.same_item(item))
                .map(ListKey::Position),
        }
    }

    /// Binary search for an item comparing equal to `value`.
    ///
    /// Uses the configured comparator; unsorted lists return `None`.
    pub fn position(&self, value: &T) -> Option<usize> {
        let comparator = self.sorted.clone()?;
        self.position_by(value, |a, b| comparator(a, b))
    }

    /// Binary search with an explicit comparator.
    pub fn position_by<F>(&self, value: &T, compare: F) -> Option<usize>
    where
        F: Fn(&T, &T) -> Ordering,
    {
        let state = self.state.read();
        let (mut low, mut high) = (0usize, state.data.len());
        while low < high {
            let mid = low + (high - low) / 2;
            match compare(&state.data[mid], value) {
                Ordering::Greater => high = mid,
                Ordering::Less => low = mid + 1,
                Ordering::Equal => return Some(mid),
            }
        }
        None
    }

    /// Insertion point for `value`, or `None` if it sorts after every item.
    ///
    /// An exact match returns the matching position.
    pub fn position_next_closest(&self, value: &T) -> Option<usize> {
        let comparator = self.sorted.clone()?;
        let state = self.state.read();
        next_closest(&state.data, value, comparator.as_ref())
    }

    /// [`position_next_closest`](Self::position_next_closest) with an explicit comparator.
    pub fn position_next_closest_by<F>(&self, value: &T, compare: F) -> Option<usize>
    where
        F: Fn(&T, &T) -> Ordering,
    {
        let state = self.state.read();
        next_closest(&state.data, value, &compare)
    }

    /// Add an item and return its position.
    ///
    /// Returns `None` if the item is already present, or if the list is
    /// indexed and the item carries no index value.
    pub fn add(&self, item: T) -> Option<usize> {
        let (key, position) = {
            let mut state = self.state.write();
            if self.contains(&state, &item) {
                tracing::debug!(target: targets::LIST, "item already in list");
                return None;
            }

            let key = match &self.index {
                Some(field) => {
                    let Some(id) = item.index_value(field) else {
                        tracing::debug!(target: targets::LIST, field = %field, "item has no index value");
                        return None;
                    };
                    state.indexed.insert(id.clone(), item.clone());
                    ListKey::Id(id)
                }
                None => ListKey::Position(state.data.len()),
            };

            let position = match self
                .sorted
                .as_ref()
                .and_then(|cmp| next_closest(&state.data, &item, cmp.as_ref()))
            {
                Some(position) => {
                    state.data.insert(position, item.clone());
                    position
                }
                None => {
                    state.data.push(item.clone());
                    state.data.len() - 1
                }
            };
            (key, position)
        };

        tracing::trace!(target: targets::LIST, key = %key, position, "added item");
        let event = ListEvent::Add { item, key, position };
        self.events.emit("add", &event);
        if let ListEvent::Add {
            key: ListKey::Id(id), ..
        } = &event
        {
            self.events.emit(&format!("add[{id}]"), &event);
        }
        Some(position)
    }

    /// Move an item to `position`, or to the end for `None`.
    pub fn move_item(&self, item: &T, position: Option<usize>) -> bool {
        let moved = {
            let mut state = self.state.write();
            let Some(current) = state.data.iter().position(|other| other.same_item(item)) else {
                return false;
            };
            let moved = state.data.remove(current);
            match position {
                Some(position) if position <= state.data.len() => state.data.insert(position, moved.clone()),
                _ => state.data.push(moved.clone()),
            }
            moved
        };
        self.events.emit(
            "move",
            &ListEvent::Move {
                item: moved,
                position,
            },
        );
        true
    }

    /// Remove an item, by index value or by identity.
    pub fn remove(&self, item: &T) -> bool {
        let removed = {
            let mut state = self.state.write();
            if !self.contains(&state, item) {
                return false;
            }
            let key = match &self.index {
                Some(field) => item.index_value(field).map(ListKey::Id),
                None => None,
            };
            let found = match &key {
                Some(ListKey::Id(id)) => state.indexed.remove(id),
                _ => None,
            };
            let target = found.as_ref().unwrap_or(item);
            state
                .data
                .iter()
                .position(|other| other.same_item(target))
                .map(|position| {
                    let removed = state.data.remove(position);
                    (removed, key.unwrap_or(ListKey::Position(position)), position)
                })
        };
        match removed {
            Some((item, key, position)) => {
                self.emit_remove(item, key, position);
                true
            }
            None => false,
        }
    }

    /// Remove by key: index value for indexed lists, position otherwise.
    pub fn remove_by_key(&self, key: impl Into<ListKey>) -> Option<T> {
        let key = key.into();
        let removed = {
            let mut state = self.state.write();
            match (&key, &self.index) {
                (ListKey::Id(id), Some(_)) => {
                    let item = state.indexed.remove(id)?;
                    let position = state.data.iter().position(|other| other.same_item(&item))?;
                    Some((state.data.remove(position), position))
                }
                (ListKey::Position(position), None) if *position < state.data.len() => {
                    Some((state.data.remove(*position), *position))
                }
                _ => None,
            }
        };
        let (item, position) = removed?;
        self.emit_remove(item.clone(), key, position);
        Some(item)
    }

    /// Remove the item at `position` in the backing array.
    pub fn remove_at(&self, position: usize) -> Option<T> {
        let removed = {
            let mut state = self.state.write();
            if position >= state.data.len() {
                return None;
            }
            let item = state.data.remove(position);
            let key = self.key_for(&item, position);
            if let ListKey::Id(id) = &key {
                state.indexed.remove(id);
            }
            (item, key)
        };
        let (item, key) = removed;
        self.emit_remove(item.clone(), key, position);
        Some(item)
    }

    /// Remove every item matching `predicate`, scanning from the end.
    ///
    /// Returns the number of removed items.
    pub fn remove_by<F>(&self, predicate: F) -> usize
    where
        F: Fn(&T) -> bool,
    {
        let mut count = 0;
        let mut position = self.len();
        while position > 0 {
            position -= 1;
            let Some(item) = self.at(position) else {
                continue;
            };
            if predicate(&item) && self.remove_at(position).is_some() {
                count += 1;
            }
        }
        count
    }

    /// Remove everything, emitting `remove` for each former item from last to first.
    pub fn clear(&self) {
        let items = {
            let mut state = self.state.write();
            state.indexed.clear();
            std::mem::take(&mut state.data)
        };
        for (position, item) in items.into_iter().enumerate().rev() {
            let key = self.key_for(&item, position);
            self.emit_remove(item, key, position);
        }
    }

    /// Call `f` with every item and its key.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&T, ListKey),
    {
        for (position, item) in self.array().iter().enumerate() {
            f(item, self.key_for(item, position));
        }
    }

    /// Every item matching `predicate`, with its key.
    pub fn find<F>(&self, predicate: F) -> Vec<(ListKey, T)>
    where
        F: Fn(&T) -> bool,
    {
        self.array()
            .into_iter()
            .enumerate()
            .filter(|(_, item)| predicate(item))
            .map(|(position, item)| (self.key_for(&item, position), item))
            .collect()
    }

    /// The first item matching `predicate`, with its key.
    pub fn find_one<F>(&self, predicate: F) -> Option<(ListKey, T)>
    where
        F: Fn(&T) -> bool,
    {
        self.array()
            .into_iter()
            .enumerate()
            .find(|(_, item)| predicate(item))
            .map(|(position, item)| (self.key_for(&item, position), item))
    }

    pub fn map<R, F>(&self, f: F) -> Vec<R>
    where
        F: FnMut(&T) -> R,
    {
        self.state.read().data.iter().map(f).collect()
    }

    /// Reorder with the configured comparator. Does not emit events.
    pub fn sort(&self) {
        if let Some(comparator) = self.sorted.clone() {
            self.sort_by(|a, b| comparator(a, b));
        }
    }

    /// Reorder with `compare`. Does not emit events.
    pub fn sort_by<F>(&self, compare: F)
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        self.state.write().data.sort_by(compare);
    }

    /// A shallow copy of the items.
    pub fn array(&self) -> Vec<T> {
        self.state.read().data.clone()
    }

    /// The items as a JSON array, with observers materialized.
    pub fn json(&self) -> JsonValue {
        JsonValue::Array(self.state.read().data.iter().map(ListItem::to_json).collect())
    }

    fn key_for(&self, item: &T, position: usize) -> ListKey {
        self.index
            .as_ref()
            .and_then(|field| item.index_value(field))
            .map(ListKey::Id)
            .unwrap_or(ListKey::Position(position))
    }

    fn emit_remove(&self, item: T, key: ListKey, position: usize) {
        tracing::trace!(target: targets::LIST, key = %key, position, "removed item");
        self.events.emit("remove", &ListEvent::Remove { item, key, position });
    }
}

fn next_closest<T>(data: &[T], value: &T, compare: &dyn Fn(&T, &T) -> Ordering) -> Option<usize> {
    let first = data.first()?;
    if compare(first, value) == Ordering::Equal {
        return Some(0);
    }

    let (mut low, mut high) = (0usize, data.len());
    while low < high {
        let mid = low + (high - low) / 2;
        match compare(&data[mid], value) {
            Ordering::Greater => high = mid,
            Ordering::Less => low = mid + 1,
            Ordering::Equal => return Some(mid),
        }
    }
    (low < data.len()).then_some(low)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn numbers() -> ObserverList<JsonValue> {
        ObserverList::new().with_sorted(|a: &JsonValue, b: &JsonValue| {
            a.as_i64().unwrap_or(0).cmp(&b.as_i64().unwrap_or(0))
        })
    }

    fn entity(id: &str) -> Observer {
        Observer::from_json(json!({"id": id})).unwrap()
    }

    #[test]
    fn test_unsorted_add_and_duplicates() {
        let list = ObserverList::<Observer>::new();
        let a = entity("a");
        assert_eq!(list.add(a.clone()), Some(0));
        assert_eq!(list.add(entity("a")), Some(1));
        assert_eq!(list.add(a.clone()), None);
        assert_eq!(list.len(), 2);
        assert_eq!(list.index_of(&a), Some(ListKey::Position(0)));
    }

    #[test]
    fn test_sorted_add() {
        let list = numbers();
        for n in [5, 1, 3, 9, 7] {
            list.add(json!(n));
        }
        assert_eq!(list.json(), json!([1, 3, 5, 7, 9]));
        assert_eq!(list.add(json!(4)), Some(2));
        assert_eq!(list.add(json!(10)), Some(6));
    }

    #[test]
    fn test_position_search() {
        let list = numbers();
        for n in [1, 3, 5, 7] {
            list.add(json!(n));
        }
        assert_eq!(list.position(&json!(5)), Some(2));
        assert_eq!(list.position(&json!(4)), None);
        assert_eq!(list.position_next_closest(&json!(4)), Some(2));
        assert_eq!(list.position_next_closest(&json!(0)), Some(0));
        assert_eq!(list.position_next_closest(&json!(8)), None);
        assert_eq!(list.position_next_closest(&json!(1)), Some(0));
        assert_eq!(ObserverList::<JsonValue>::new().position(&json!(1)), None);
    }

    #[test]
    fn test_indexed_list() {
        let list = ObserverList::<Observer>::new().with_index("id");
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        list.on("add[b]", move |event| sink.lock().push(event.name()));

        list.add(entity("a"));
        list.add(entity("b"));
        assert_eq!(list.add(entity("b")), None);
        assert_eq!(list.add(Observer::new()), None);

        assert_eq!(*events.lock(), vec!["add"]);
        assert!(list.get("b").is_some());
        assert!(list.get(0).is_none());

        let removed = list.remove_by_key("a").unwrap();
        assert_eq!(removed.get("id"), Some(json!("a")));
        assert!(!list.has(&removed));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_remove_variants() {
        let list = ObserverList::<JsonValue>::new();
        for n in 0..6 {
            list.add(json!(n));
        }
        assert!(list.remove(&json!(2)));
        assert!(!list.remove(&json!(2)));
        assert_eq!(list.remove_by_key(0), Some(json!(0)));
        assert_eq!(list.remove_by_key(10), None);
        assert_eq!(list.remove_by(|v| v.as_i64().is_some_and(|n| n % 2 == 1)), 3);
        assert_eq!(list.json(), json!([4]));
    }

    #[test]
    fn test_clear_emits_in_reverse() {
        let list = ObserverList::<JsonValue>::new();
        for n in 0..3 {
            list.add(json!(n));
        }
        let removed = Arc::new(Mutex::new(Vec::new()));
        let sink = removed.clone();
        list.on("remove", move |event| {
            if let ListEvent::Remove { item, position, .. } = event {
                sink.lock().push((item.clone(), *position));
            }
        });

        list.clear();
        assert!(list.is_empty());
        assert_eq!(
            *removed.lock(),
            vec![(json!(2), 2), (json!(1), 1), (json!(0), 0)]
        );
    }

    #[test]
    fn test_move_item() {
        let list = ObserverList::<JsonValue>::new();
        for n in 0..4 {
            list.add(json!(n));
        }
        let moves = Arc::new(Mutex::new(Vec::new()));
        let sink = moves.clone();
        list.on("move", move |event| {
            if let ListEvent::Move { position, .. } = event {
                sink.lock().push(*position);
            }
        });

        assert!(list.move_item(&json!(0), None));
        assert!(list.move_item(&json!(3), Some(0)));
        assert!(!list.move_item(&json!(9), Some(0)));
        assert_eq!(list.json(), json!([3, 1, 2, 0]));
        assert_eq!(*moves.lock(), vec![None, Some(0)]);
    }

    #[test]
    fn test_find_and_iteration() {
        let list = ObserverList::<Observer>::new().with_index("id");
        list.add(entity("x"));
        list.add(entity("y"));

        let found = list.find(|item| item.get("id") == Some(json!("y")));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, ListKey::from("y"));

        assert!(list.find_one(|_| false).is_none());
        let mut keys = Vec::new();
        list.for_each(|_, key| keys.push(key.to_string()));
        assert_eq!(keys, vec!["x", "y"]);
        assert_eq!(list.map(|item| item.get("id")), vec![Some(json!("x")), Some(json!("y"))]);
        assert_eq!(list.json(), json!([{"id": "x"}, {"id": "y"}]));
    }

    #[test]
    fn test_sort() {
        let list = ObserverList::<JsonValue>::new();
        for n in [3, 1, 2] {
            list.add(json!(n));
        }
        list.sort();
        assert_eq!(list.json(), json!([3, 1, 2]));
        list.sort_by(|a, b| b.as_i64().cmp(&a.as_i64()));
        assert_eq!(list.json(), json!([3, 2, 1]));
    }
}
