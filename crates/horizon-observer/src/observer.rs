//! Path-addressed observable data trees.
//!
//! An [`Observer`] wraps a JSON object and turns every mutation into events.
//! Values are addressed by dot-delimited paths (`"transform.position"`,
//! `"children.2.name"`), and each effective change emits two events through
//! the observer's [`Events`] emitter:
//!
//! - `<path>:<verb>` for listeners interested in one location
//! - `*:<verb>` for listeners interested in every change of that verb
//!
//! where `<verb>` is one of `set`, `unset`, `insert`, `remove` or `move`.
//! Both forms carry the same [`ObserverEvent`] payload. Destroying an
//! observer emits a final `destroy` event.
//!
//! # Nesting
//!
//! Objects inserted into arrays become observers of their own, and any field
//! may hold an observer directly. A nested observer re-emits its wildcard
//! events on its parent with the path rebased, so a listener on the root sees
//! `"children.2.name"` when the third child's `name` changes.
//!
//! # Silencing
//!
//! [`Observer::silence`] suppresses every event of one observer and pauses its
//! history and sync recorders until [`Observer::silence_restore`]. The flag is
//! a single slot: restoring always unsilences, even inside a nested silence.
//!
//! Compound changes (populating an object, diffing an array) report their
//! per-leaf events in a quiet scope. Listeners still see them, but recorders
//! are paused so only the outermost change reaches history.
//!
//! # Example
//!
//! ```
//! use horizon_observer::{Observer, ObserverEvent};
//! use serde_json::json;
//!
//! let observer = Observer::from_json(json!({ "a": 1, "b": [1, 2, 3] })).unwrap();
//! observer.on("a:set", |event| {
//!     if let ObserverEvent::Set { value, value_old, .. } = event {
//!         println!("a changed from {value_old:?} to {value:?}");
//!     }
//! });
//!
//! assert!(observer.set("a", 2));
//! observer.insert("b", 4, None);
//! observer.remove("b", 0);
//! assert_eq!(observer.json(), json!({ "a": 2, "b": [2, 3, 4] }));
//! ```

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::{Map, Value as JsonValue};

use crate::config::{ObserverBuilder, ObserverConfig};
use crate::error::{ObserverError, ObserverResult};
use crate::events::{EventHandle, Events};
use crate::logging::targets;
use crate::path;
use crate::tree::{json_kind, NodeId, Slot, Tree};
use crate::value::Value;

/// The mutation verbs, in the order their propagation listeners are installed.
pub const VERBS: [&str; 5] = ["set", "unset", "insert", "remove", "move"];

/// Name of the lifecycle event emitted by [`Observer::destroy`].
pub const DESTROY: &str = "destroy";

/// Resolver for the live instance of an observer.
pub type LatestFn = Arc<dyn Fn() -> Option<Observer> + Send + Sync>;

/// Something that records observer changes and can be paused.
///
/// An observer pauses its recorders while silenced and during the internal
/// events of compound changes.
pub trait Recorder: Send + Sync {
    /// Whether the recorder currently records.
    fn enabled(&self) -> bool;
    /// Pause or resume recording.
    fn set_enabled(&self, enabled: bool);
}

/// Payload of every observer event.
///
/// The path-specific and wildcard forms of an event carry the same payload;
/// `path` is relative to the observer that emitted it.
#[derive(Debug, Clone, PartialEq)]
pub enum ObserverEvent {
    /// A value was assigned. `value_old` is `None` when the key was absent.
    Set {
        path: String,
        value: Value,
        value_old: Option<JsonValue>,
        remote: Option<String>,
    },
    /// A key was removed.
    Unset {
        path: String,
        value_old: JsonValue,
        remote: Option<String>,
    },
    /// A value was inserted into the array at `path`.
    Insert {
        path: String,
        value: Value,
        index: usize,
        remote: Option<String>,
    },
    /// A value was removed from the array at `path`.
    Remove {
        path: String,
        value: Value,
        index: usize,
        remote: Option<String>,
    },
    /// An array element moved from `index_old` to `index_new`.
    Move {
        path: String,
        value: Value,
        index_new: usize,
        index_old: usize,
        remote: Option<String>,
    },
    /// The observer was destroyed.
    Destroy,
}

impl ObserverEvent {
    /// The event verb (`"set"`, `"unset"`, ...).
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Set { .. } => "set",
            Self::Unset { .. } => "unset",
            Self::Insert { .. } => "insert",
            Self::Remove { .. } => "remove",
            Self::Move { .. } => "move",
            Self::Destroy => DESTROY,
        }
    }

    /// The path the event refers to.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Set { path, .. }
            | Self::Unset { path, .. }
            | Self::Insert { path, .. }
            | Self::Remove { path, .. }
            | Self::Move { path, .. } => Some(path),
            Self::Destroy => None,
        }
    }

    /// The remote tag of the mutation, if any.
    pub fn remote(&self) -> Option<&str> {
        match self {
            Self::Set { remote, .. }
            | Self::Unset { remote, .. }
            | Self::Insert { remote, .. }
            | Self::Remove { remote, .. }
            | Self::Move { remote, .. } => remote.as_deref(),
            Self::Destroy => None,
        }
    }

    fn rebased(&self, prefix: &str) -> Self {
        let mut event = self.clone();
        match &mut event {
            Self::Set { path, .. }
            | Self::Unset { path, .. }
            | Self::Insert { path, .. }
            | Self::Remove { path, .. }
            | Self::Move { path, .. } => *path = path::join(prefix, path),
            Self::Destroy => {}
        }
        event
    }
}

/// Modifiers for a single mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationOptions {
    /// Suppress the path-specific event. The wildcard event is still emitted,
    /// but recorders ignore it.
    pub silent: bool,
    /// Free-form origin tag forwarded to listeners.
    pub remote: Option<String>,
    /// Emit even when the new value equals the old one.
    pub force: bool,
    /// Let inserts add a value already present in the array.
    pub allow_duplicates: bool,
}

impl MutationOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the silent flag.
    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// Tag the mutation with a remote origin.
    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = Some(remote.into());
        self
    }

    /// Set the force flag.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Allow duplicate array values on insert.
    pub fn with_duplicates(mut self, allow: bool) -> Self {
        self.allow_duplicates = allow;
        self
    }

    fn mode(&self) -> EmitMode {
        if self.silent {
            EmitMode::Silent
        } else {
            EmitMode::Normal
        }
    }

    fn nested(&self) -> Self {
        Self {
            force: false,
            ..self.clone()
        }
    }
}

/// How a change is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmitMode {
    /// Path and wildcard events, recorders active.
    Normal,
    /// Path and wildcard events, recorders paused.
    Quiet,
    /// Wildcard event only, recorders paused.
    Silent,
}

/// Recorder states captured by [`Observer::silence`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SilenceState {
    /// Whether the history recorder was enabled.
    pub history: bool,
    /// Whether the sync recorder was enabled.
    pub sync: bool,
}

/// Where an observer sits inside its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentKey {
    /// Stored under an object key.
    Key(String),
    /// Stored at an array index.
    Index(usize),
}

impl fmt::Display for ParentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.write_str(key),
            Self::Index(index) => write!(f, "{index}"),
        }
    }
}

/// The kind of a field reported by [`Observer::for_each`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Array,
    Object,
    Boolean,
    Number,
    String,
    Null,
    /// A type name taken from the observer's schema.
    Named(String),
}

/// One field visited by [`Observer::for_each`].
#[derive(Debug, Clone, PartialEq)]
pub struct ForEachEntry {
    /// Full path of the field.
    pub path: String,
    /// The field's own key.
    pub key: String,
    pub kind: FieldKind,
    /// Snapshot of the field's value.
    pub value: JsonValue,
}

#[derive(Clone)]
struct ParentLink {
    parent: WeakObserver,
    /// Path of the containing field inside the parent.
    path: String,
    key: ParentKey,
}

struct ObserverState {
    tree: Tree,
    silent: bool,
    quiet: bool,
    destroyed: bool,
    history: Option<Arc<dyn Recorder>>,
    sync: Option<Arc<dyn Recorder>>,
    latest: Option<LatestFn>,
    config: ObserverConfig,
}

struct ObserverInner {
    state: Mutex<ObserverState>,
    link: Mutex<Option<ParentLink>>,
    events: Events<ObserverEvent>,
}

/// An observable JSON object.
///
/// `Observer` is a cheap handle; clones refer to the same tree. Equality of
/// nested observers is identity, see [`Observer::ptr_eq`].
#[derive(Clone)]
pub struct Observer {
    inner: Arc<ObserverInner>,
}

/// A non-owning reference to an [`Observer`].
#[derive(Clone, Default)]
pub struct WeakObserver {
    inner: Weak<ObserverInner>,
}

impl WeakObserver {
    /// Upgrade to a strong handle if the observer is still alive.
    pub fn upgrade(&self) -> Option<Observer> {
        self.inner.upgrade().map(|inner| Observer { inner })
    }
}

impl fmt::Debug for WeakObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakObserver")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

/// A mutation target resolved inside this observer's tree.
enum Target {
    /// A key on an object record.
    Key(NodeId, String),
    /// An element of the array stored under a key.
    Element(NodeId, String, usize),
    /// A location inside a plain JSON array element, below the element itself.
    Nested(NodeId, String, usize, Vec<String>),
}

enum Resolved {
    Local(Target),
    /// The path continues inside a nested observer.
    Delegate(Observer, String),
    Missing,
}

enum Lookup {
    Found(Value),
    Delegate(Observer, String),
    Missing,
}

impl Default for Observer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("ptr", &Arc::as_ptr(&self.inner))
            .finish_non_exhaustive()
    }
}

impl Observer {
    /// Create an empty observer.
    pub fn new() -> Self {
        Self::with_config(ObserverConfig::default())
    }

    /// Create an observer from JSON data, which must be an object.
    pub fn from_json(data: JsonValue) -> ObserverResult<Self> {
        match data {
            JsonValue::Object(map) => Ok(Self::from_map(map)),
            other => Err(ObserverError::NotAnObject {
                found: json_kind(&other),
            }),
        }
    }

    /// Create an observer from a JSON object.
    pub fn from_map(data: Map<String, JsonValue>) -> Self {
        let observer = Self::new();
        observer.populate(data);
        observer
    }

    /// Start building an observer with custom configuration.
    pub fn builder() -> ObserverBuilder {
        ObserverBuilder::new()
    }

    pub(crate) fn with_config(config: ObserverConfig) -> Self {
        let observer = Self {
            inner: Arc::new(ObserverInner {
                state: Mutex::new(ObserverState {
                    tree: Tree::new(),
                    silent: false,
                    quiet: false,
                    destroyed: false,
                    history: None,
                    sync: None,
                    latest: None,
                    config,
                }),
                link: Mutex::new(None),
                events: Events::new(),
            }),
        };
        observer.install_propagation();
        observer
    }

    pub(crate) fn populate(&self, data: Map<String, JsonValue>) {
        let root = self.root();
        let opts = MutationOptions::default();
        for (key, value) in data {
            self.set_key(root, &key, Value::Json(value), &opts, EmitMode::Normal);
        }
    }

    fn root(&self) -> NodeId {
        self.inner.state.lock().tree.root()
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    /// The observer's event emitter.
    pub fn events(&self) -> &Events<ObserverEvent> {
        &self.inner.events
    }

    /// Listen to `name`, e.g. `"position:set"` or `"*:insert"`.
    pub fn on<F>(&self, name: impl Into<String>, listener: F) -> EventHandle<ObserverEvent>
    where
        F: Fn(&ObserverEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(name, listener)
    }

    /// Listen to the next emission of `name` only.
    pub fn once<F>(&self, name: impl Into<String>, listener: F) -> EventHandle<ObserverEvent>
    where
        F: Fn(&ObserverEvent) + Send + Sync + 'static,
    {
        self.inner.events.once(name, listener)
    }

    fn emit_change(&self, event: ObserverEvent, mode: EmitMode) {
        {
            let state = self.inner.state.lock();
            if state.silent || state.destroyed {
                return;
            }
        }

        let verb = event.verb();
        tracing::trace!(
            target: targets::OBSERVER,
            path = event.path().unwrap_or_default(),
            verb,
            ?mode,
            "emitting change"
        );

        let _quiet = (mode != EmitMode::Normal).then(|| self.enter_quiet());
        if mode != EmitMode::Silent {
            if let Some(path) = event.path() {
                self.inner.events.emit(&format!("{path}:{verb}"), &event);
            }
        }
        self.inner.events.emit(&format!("*:{verb}"), &event);
    }

    fn enter_quiet(&self) -> QuietScope<'_> {
        let (previous, recorders) = {
            let mut state = self.inner.state.lock();
            let previous = std::mem::replace(&mut state.quiet, true);
            let recorders: Vec<Arc<dyn Recorder>> = [state.history.clone(), state.sync.clone()]
                .into_iter()
                .flatten()
                .collect();
            (previous, recorders)
        };
        let paused: Vec<Arc<dyn Recorder>> = recorders
            .into_iter()
            .filter(|recorder| recorder.enabled())
            .collect();
        for recorder in &paused {
            recorder.set_enabled(false);
        }
        QuietScope {
            observer: self,
            previous,
            paused,
        }
    }

    fn install_propagation(&self) {
        for verb in VERBS {
            let weak = self.downgrade();
            self.inner.events.on(format!("*:{verb}"), move |event| {
                if let Some(observer) = weak.upgrade() {
                    observer.propagate(event);
                }
            });
        }
    }

    fn propagate(&self, event: &ObserverEvent) {
        let Some(link) = self.inner.link.lock().clone() else {
            return;
        };
        let Some(parent) = link.parent.upgrade() else {
            return;
        };
        let prefix = path::join(&link.path, &link.key.to_string());
        let mode = if self.inner.state.lock().quiet {
            EmitMode::Quiet
        } else {
            EmitMode::Normal
        };
        parent.emit_change(event.rebased(&prefix), mode);
    }

    // -------------------------------------------------------------------------
    // Parent links
    // -------------------------------------------------------------------------

    fn attach(&self, parent: &Observer, path: String, key: ParentKey) {
        *self.inner.link.lock() = Some(ParentLink {
            parent: parent.downgrade(),
            path,
            key,
        });
    }

    fn detach_from(&self, parent: &Observer) {
        let mut link = self.inner.link.lock();
        let owned = link
            .as_ref()
            .and_then(|link| link.parent.upgrade())
            .is_some_and(|current| current.ptr_eq(parent));
        if owned {
            *link = None;
        }
    }

    /// Re-number the parent links of every observer in an array field.
    fn relink_array(&self, node: NodeId, key: &str) {
        let (array_path, children) = {
            let state = self.inner.state.lock();
            let Some(array_path) = state.tree.child_path(node, key) else {
                return;
            };
            let Some(Slot::Array(items)) = state.tree.slot(node, key) else {
                return;
            };
            let children: Vec<(usize, Observer)> = items
                .iter()
                .enumerate()
                .filter_map(|(index, slot)| slot.as_observer().map(|o| (index, o.clone())))
                .collect();
            (array_path, children)
        };
        for (index, child) in children {
            child.attach(self, array_path.clone(), ParentKey::Index(index));
        }
    }

    /// The observer this one is nested in, if any.
    pub fn parent(&self) -> Option<Observer> {
        self.inner.link.lock().as_ref()?.parent.upgrade()
    }

    /// Path of the field holding this observer inside its parent.
    pub fn parent_path(&self) -> Option<String> {
        Some(self.inner.link.lock().as_ref()?.path.clone())
    }

    /// Key or current array index of this observer inside its parent.
    pub fn parent_key(&self) -> Option<ParentKey> {
        Some(self.inner.link.lock().as_ref()?.key.clone())
    }

    // -------------------------------------------------------------------------
    // Path resolution
    // -------------------------------------------------------------------------

    fn resolve(&self, segments: &[String]) -> Resolved {
        let state = self.inner.state.lock();
        walk(&state.tree, segments)
    }

    /// Like [`walk`], but creates missing intermediate objects.
    fn resolve_for_set(&self, segments: &[String]) -> Resolved {
        let mut state = self.inner.state.lock();
        let tree = &mut state.tree;
        let Some((last, intermediate)) = segments.split_last() else {
            return Resolved::Missing;
        };

        let mut node = tree.root();
        for segment in intermediate {
            match tree.slot(node, segment) {
                Some(Slot::Node(id)) => node = *id,
                Some(Slot::Observer(_) | Slot::Array(_)) => return walk(tree, segments),
                Some(Slot::Value(_)) => return Resolved::Missing,
                None => match tree.add_node(node, segment) {
                    Some(id) => node = id,
                    None => return Resolved::Missing,
                },
            }
        }
        Resolved::Local(Target::Key(node, last.clone()))
    }

    /// The topmost intermediate key of a local path that does not hold an object.
    ///
    /// Returns the record, the key and the scalar it currently holds.
    fn vivify_point(&self, segments: &[String]) -> Option<(NodeId, String, Option<JsonValue>)> {
        let state = self.inner.state.lock();
        let tree = &state.tree;
        let (_, intermediate) = segments.split_last()?;
        let mut node = tree.root();
        for segment in intermediate {
            match tree.slot(node, segment) {
                Some(Slot::Node(id)) => node = *id,
                Some(Slot::Value(old)) => return Some((node, segment.clone(), Some(old.clone()))),
                None => return Some((node, segment.clone(), None)),
                Some(Slot::Array(_) | Slot::Observer(_)) => return None,
            }
        }
        None
    }

    fn lookup(&self, segments: &[String]) -> Lookup {
        let state = self.inner.state.lock();
        let tree = &state.tree;
        let Some((first, rest)) = segments.split_first() else {
            return Lookup::Missing;
        };
        let Some(mut current) = tree.slot(tree.root(), first) else {
            return Lookup::Missing;
        };
        for (i, segment) in rest.iter().enumerate() {
            let next = match current {
                Slot::Node(id) => tree.slot(*id, segment),
                Slot::Array(items) => segment.parse::<usize>().ok().and_then(|n| items.get(n)),
                Slot::Observer(observer) => {
                    let rest = path::join_segments(&rest[i..]);
                    return Lookup::Delegate(observer.clone(), rest);
                }
                Slot::Value(value) => {
                    return match json_at(value, &rest[i..]) {
                        Some(found) => Lookup::Found(Value::Json(found.clone())),
                        None => Lookup::Missing,
                    };
                }
            };
            let Some(next) = next else {
                return Lookup::Missing;
            };
            current = next;
        }
        Lookup::Found(tree.slot_value(current))
    }

    // -------------------------------------------------------------------------
    // Reading
    // -------------------------------------------------------------------------

    /// The value at `path` as plain JSON.
    pub fn get(&self, path: &str) -> Option<JsonValue> {
        self.get_raw(path).map(|value| value.to_json())
    }

    /// The value at `path`, keeping nested observers live.
    ///
    /// The empty path refers to the observer itself.
    pub fn get_raw(&self, path: &str) -> Option<Value> {
        if path.is_empty() {
            return Some(Value::Observer(self.clone()));
        }
        match self.lookup(&path::split(path)) {
            Lookup::Found(value) => Some(value),
            Lookup::Delegate(observer, rest) => observer.get_raw(&rest),
            Lookup::Missing => None,
        }
    }

    /// The value at `path`, or an error naming the path.
    pub fn try_get(&self, path: &str) -> ObserverResult<JsonValue> {
        self.get(path).ok_or_else(|| ObserverError::path_not_found(path))
    }

    /// The nested observer at `path`.
    pub fn get_observer(&self, path: &str) -> Option<Observer> {
        match self.get_raw(path)? {
            Value::Observer(observer) => Some(observer),
            _ => None,
        }
    }

    /// Whether `path` resolves.
    pub fn has(&self, path: &str) -> bool {
        self.get_raw(path).is_some()
    }

    /// Length of the array at `path`.
    pub fn array_len(&self, path: &str) -> ObserverResult<usize> {
        match self.get_raw(path) {
            Some(Value::Array(items)) => Ok(items.len()),
            Some(Value::Json(JsonValue::Array(items))) => Ok(items.len()),
            Some(_) => Err(ObserverError::not_an_array(path)),
            None => Err(ObserverError::path_not_found(path)),
        }
    }

    /// Deep plain-JSON snapshot of the whole observer.
    pub fn json(&self) -> JsonValue {
        let state = self.inner.state.lock();
        state.tree.node_json(state.tree.root())
    }

    /// Visit every field depth first, in key order.
    ///
    /// Object fields are reported before their own fields. A schema entry for
    /// a path replaces the inferred kind and stops the descent there.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&ForEachEntry),
    {
        let entries = {
            let state = self.inner.state.lock();
            let mut entries = Vec::new();
            collect_entries(&state.tree, &state.config, state.tree.root(), &mut entries);
            entries
        };
        for entry in &entries {
            f(entry);
        }
    }

    // -------------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------------

    /// Set the value at `path`. Returns whether anything changed.
    pub fn set(&self, path: &str, value: impl Into<Value>) -> bool {
        self.set_with(path, value, &MutationOptions::default())
    }

    /// Set the value at `path` with explicit options.
    ///
    /// Missing intermediate objects are created. An intermediate key holding a
    /// scalar is replaced by an object. Either way the change is reported as a
    /// single set of the topmost key that was created or replaced.
    pub fn set_with(&self, path: &str, value: impl Into<Value>, opts: &MutationOptions) -> bool {
        let value = value.into();
        let segments = path::split(path);
        if let Some((node, key, value_old)) = self.vivify_point(&segments) {
            return self.set_vivified(node, &key, &segments, value, value_old, opts);
        }
        match self.resolve_for_set(&segments) {
            Resolved::Local(Target::Key(node, key)) => self.set_key(node, &key, value, opts, opts.mode()),
            Resolved::Local(Target::Element(node, key, index)) => {
                self.set_element(node, &key, index, value, opts)
            }
            Resolved::Local(Target::Nested(node, key, index, rest)) => {
                self.set_nested(node, &key, index, &rest, path, value, opts)
            }
            Resolved::Delegate(observer, rest) => observer.set_with(&rest, value, opts),
            Resolved::Missing => {
                tracing::debug!(target: targets::OBSERVER, path, "set path does not resolve");
                false
            }
        }
    }

    fn set_vivified(
        &self,
        node: NodeId,
        key: &str,
        segments: &[String],
        value: Value,
        value_old: Option<JsonValue>,
        opts: &MutationOptions,
    ) -> bool {
        if let Value::Observer(observer) = &value
            && observer.ptr_eq(self)
        {
            return false;
        }

        let nested = opts.nested();
        if value_old.is_some() {
            self.unset_key(node, key, &nested, EmitMode::Quiet);
        }
        if let Resolved::Local(Target::Key(leaf, leaf_key)) = self.resolve_for_set(segments) {
            self.set_key(leaf, &leaf_key, value, &nested, EmitMode::Quiet);
        }

        let created = {
            let state = self.inner.state.lock();
            let path = state.tree.child_path(node, key);
            let current = state.tree.slot(node, key).map(|slot| state.tree.slot_json(slot));
            path.zip(current)
        };
        let Some((path, current)) = created else {
            return false;
        };
        let event = ObserverEvent::Set {
            path,
            value: Value::Json(current),
            value_old,
            remote: opts.remote.clone(),
        };
        self.emit_change(event, opts.mode());
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn set_nested(
        &self,
        node: NodeId,
        key: &str,
        index: usize,
        rest: &[String],
        path: &str,
        value: Value,
        opts: &MutationOptions,
    ) -> bool {
        let Some((last, parent)) = rest.split_last() else {
            return false;
        };
        let new = value.to_json();
        let replaced = self.edit_nested(node, key, index, parent, |target| match target {
            JsonValue::Array(items) => {
                let slot = items.get_mut(last.parse::<usize>().ok()?)?;
                if *slot == new && !opts.force {
                    return None;
                }
                Some(Some(std::mem::replace(slot, new.clone())))
            }
            JsonValue::Object(map) => {
                if map.get(last) == Some(&new) && !opts.force {
                    return None;
                }
                Some(map.insert(last.clone(), new.clone()))
            }
            _ => None,
        });
        let Some(value_old) = replaced else {
            tracing::debug!(target: targets::OBSERVER, path, "nested set did not apply");
            return false;
        };
        let event = ObserverEvent::Set {
            path: path.to_string(),
            value: Value::Json(new),
            value_old,
            remote: opts.remote.clone(),
        };
        self.emit_change(event, opts.mode());
        true
    }

    /// Edit the JSON at `rest` inside a plain array element of the field `key`.
    ///
    /// The element is only written back when `edit` returns `Some`.
    fn edit_nested<R>(
        &self,
        node: NodeId,
        key: &str,
        index: usize,
        rest: &[String],
        edit: impl FnOnce(&mut JsonValue) -> Option<R>,
    ) -> Option<R> {
        let mut state = self.inner.state.lock();
        let Some(Slot::Array(items)) = state.tree.slot_mut(node, key) else {
            return None;
        };
        let Some(Slot::Value(element)) = items.get_mut(index) else {
            return None;
        };
        let mut edited = element.clone();
        let result = edit(json_at_mut(&mut edited, rest)?)?;
        *element = edited;
        Some(result)
    }

    fn set_key(
        &self,
        node: NodeId,
        key: &str,
        value: Value,
        opts: &MutationOptions,
        mode: EmitMode,
    ) -> bool {
        let (path, existing, old_json) = {
            let state = self.inner.state.lock();
            let Some(path) = state.tree.child_path(node, key) else {
                return false;
            };
            let existing = state.tree.slot(node, key).cloned();
            let old_json = existing.as_ref().map(|slot| state.tree.slot_json(slot));
            (path, existing, old_json)
        };

        let (existing, old_json) = match (existing, old_json) {
            (Some(existing), Some(old_json)) => (existing, old_json),
            _ => return self.prepare(node, key, value, opts, mode, None),
        };

        match (existing, value) {
            (Slot::Array(old_items), value) if value.is_array() => {
                self.set_array(node, key, &path, &old_items, old_json, value, opts, mode)
            }
            (Slot::Node(child), Value::Json(JsonValue::Object(map))) => {
                self.set_object(child, &path, map, old_json, opts, mode)
            }
            (Slot::Observer(child), Value::Json(JsonValue::Object(map))) => {
                if !child.patch_in(map, true, EmitMode::Quiet) && !opts.force {
                    return false;
                }
                let event = ObserverEvent::Set {
                    path,
                    value: Value::Observer(child),
                    value_old: Some(old_json),
                    remote: opts.remote.clone(),
                };
                self.emit_change(event, mode);
                true
            }
            (Slot::Observer(child), Value::Observer(new)) if child.ptr_eq(&new) && !opts.force => {
                false
            }
            (Slot::Value(old), Value::Json(new)) if !new.is_object() && !new.is_array() => {
                if old == new && !opts.force {
                    return false;
                }
                self.inner
                    .state
                    .lock()
                    .tree
                    .put(node, key, Slot::Value(new.clone()));
                let event = ObserverEvent::Set {
                    path,
                    value: Value::Json(new),
                    value_old: Some(old),
                    remote: opts.remote.clone(),
                };
                self.emit_change(event, mode);
                true
            }
            (_, value) => {
                self.unset_key(node, key, opts, EmitMode::Quiet);
                self.prepare(node, key, value, opts, mode, Some(old_json))
            }
        }
    }

    /// Populate a vacant key.
    fn prepare(
        &self,
        node: NodeId,
        key: &str,
        value: Value,
        opts: &MutationOptions,
        mode: EmitMode,
        value_old: Option<JsonValue>,
    ) -> bool {
        let Some((path, parent_path)) = ({
            let state = self.inner.state.lock();
            state
                .tree
                .node(node)
                .map(|record| (path::join(&record.path, key), record.path.clone()))
        }) else {
            return false;
        };

        let value = match value {
            Value::Observer(child) => {
                if child.ptr_eq(self) {
                    tracing::debug!(target: targets::OBSERVER, path, "refusing to nest an observer in itself");
                    return false;
                }
                self.inner
                    .state
                    .lock()
                    .tree
                    .put(node, key, Slot::Observer(child.clone()));
                child.attach(self, parent_path, ParentKey::Key(key.to_string()));
                Value::Observer(child)
            }
            value if value.is_array() => {
                let slots: Vec<Slot> = value
                    .array_items()
                    .unwrap_or_default()
                    .into_iter()
                    .map(Slot::element)
                    .filter(|slot| !slot.as_observer().is_some_and(|o| o.ptr_eq(self)))
                    .collect();
                let value = {
                    let mut state = self.inner.state.lock();
                    let array = Slot::Array(slots.clone());
                    let value = state.tree.slot_value(&array);
                    state.tree.put(node, key, array);
                    value
                };
                self.relink_array(node, key);
                for (index, slot) in slots.iter().enumerate() {
                    if let Slot::Value(element) = slot
                        && !element.is_array()
                    {
                        let event = ObserverEvent::Set {
                            path: path::join(&path, &index.to_string()),
                            value: Value::Json(element.clone()),
                            value_old: None,
                            remote: opts.remote.clone(),
                        };
                        self.emit_change(event, EmitMode::Quiet);
                    }
                }
                value
            }
            Value::Json(JsonValue::Object(map)) => {
                let Some(child) = self.inner.state.lock().tree.add_node(node, key) else {
                    return false;
                };
                for (field, field_value) in map {
                    if field_value.is_object() || field_value.is_array() {
                        self.prepare(
                            child,
                            &field,
                            Value::Json(field_value),
                            opts,
                            EmitMode::Quiet,
                            None,
                        );
                        continue;
                    }
                    self.inner
                        .state
                        .lock()
                        .tree
                        .put(child, &field, Slot::Value(field_value.clone()));
                    let event = ObserverEvent::Set {
                        path: path::join(&path, &field),
                        value: Value::Json(field_value),
                        value_old: None,
                        remote: opts.remote.clone(),
                    };
                    self.emit_change(event, EmitMode::Quiet);
                }
                Value::Json(self.inner.state.lock().tree.node_json(child))
            }
            Value::Json(scalar) => {
                self.inner
                    .state
                    .lock()
                    .tree
                    .put(node, key, Slot::Value(scalar.clone()));
                Value::Json(scalar)
            }
            Value::Array(_) => return false,
        };

        let event = ObserverEvent::Set {
            path,
            value,
            value_old,
            remote: opts.remote.clone(),
        };
        self.emit_change(event, mode);
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn set_array(
        &self,
        node: NodeId,
        key: &str,
        path: &str,
        old_items: &[Slot],
        old_json: JsonValue,
        value: Value,
        opts: &MutationOptions,
        mode: EmitMode,
    ) -> bool {
        let new_items = value.array_items().unwrap_or_default();
        let unchanged = old_items.len() == new_items.len()
            && old_items
                .iter()
                .zip(&new_items)
                .all(|(slot, value)| slot_matches(slot, value));
        if unchanged && !opts.force {
            return false;
        }

        let old_element = |index: usize| old_json.as_array().and_then(|items| items.get(index)).cloned();

        if old_items.len() == new_items.len() {
            for (index, (old, new)) in old_items.iter().zip(new_items).enumerate() {
                if let (Slot::Observer(child), Value::Json(JsonValue::Object(map))) = (old, &new) {
                    child.patch_in(map.clone(), true, EmitMode::Quiet);
                    continue;
                }
                if slot_matches(old, &new) {
                    continue;
                }
                let slot = Slot::element(new);
                if slot.as_observer().is_some_and(|o| o.ptr_eq(self)) {
                    continue;
                }
                let element_value = {
                    let mut state = self.inner.state.lock();
                    let value = state.tree.slot_value(&slot);
                    if let Some(Slot::Array(items)) = state.tree.slot_mut(node, key)
                        && let Some(target) = items.get_mut(index)
                    {
                        *target = slot;
                    }
                    value
                };
                if let Slot::Observer(previous) = old {
                    previous.detach_from(self);
                }
                let event = ObserverEvent::Set {
                    path: path::join(path, &index.to_string()),
                    value: element_value,
                    value_old: old_element(index),
                    remote: opts.remote.clone(),
                };
                self.emit_change(event, EmitMode::Quiet);
            }
            self.relink_array(node, key);
        } else {
            let slots: Vec<Slot> = new_items
                .into_iter()
                .map(Slot::element)
                .filter(|slot| !slot.as_observer().is_some_and(|o| o.ptr_eq(self)))
                .collect();
            let values: Vec<Value> = {
                let mut state = self.inner.state.lock();
                state.tree.put(node, key, Slot::Array(slots.clone()));
                slots.iter().map(|slot| state.tree.slot_value(slot)).collect()
            };
            for previous in old_items.iter().filter_map(Slot::as_observer) {
                previous.detach_from(self);
            }
            self.relink_array(node, key);
            for (index, element_value) in values.into_iter().enumerate() {
                let event = ObserverEvent::Set {
                    path: path::join(path, &index.to_string()),
                    value: element_value,
                    value_old: old_element(index),
                    remote: opts.remote.clone(),
                };
                self.emit_change(event, EmitMode::Quiet);
            }
        }

        let current = {
            let state = self.inner.state.lock();
            state
                .tree
                .slot(node, key)
                .map(|slot| state.tree.slot_value(slot))
        };
        let Some(current) = current else {
            return false;
        };
        let event = ObserverEvent::Set {
            path: path.to_string(),
            value: current,
            value_old: Some(old_json),
            remote: opts.remote.clone(),
        };
        self.emit_change(event, mode);
        true
    }

    fn set_object(
        &self,
        child: NodeId,
        path: &str,
        map: Map<String, JsonValue>,
        old_json: JsonValue,
        opts: &MutationOptions,
        mode: EmitMode,
    ) -> bool {
        let existing_keys = self.inner.state.lock().tree.keys(child);
        let nested = opts.nested();
        let mut changed = false;

        for key in existing_keys.iter().filter(|key| !map.contains_key(key.as_str())) {
            changed |= self.unset_key(child, key, &nested, EmitMode::Quiet);
        }
        for (key, value) in map {
            changed |= self.set_key(child, &key, Value::Json(value), &nested, EmitMode::Quiet);
        }

        if !changed && !opts.force {
            return false;
        }
        let value = Value::Json(self.inner.state.lock().tree.node_json(child));
        let event = ObserverEvent::Set {
            path: path.to_string(),
            value,
            value_old: Some(old_json),
            remote: opts.remote.clone(),
        };
        self.emit_change(event, mode);
        true
    }

    fn set_element(
        &self,
        node: NodeId,
        key: &str,
        index: usize,
        value: Value,
        opts: &MutationOptions,
    ) -> bool {
        let slot = Slot::element(value);
        if slot.as_observer().is_some_and(|o| o.ptr_eq(self)) {
            return false;
        }

        let (array_path, old, old_json, element_value) = {
            let mut state = self.inner.state.lock();
            let Some(array_path) = state.tree.child_path(node, key) else {
                return false;
            };
            let old = match state.tree.slot(node, key) {
                Some(Slot::Array(items)) => items.get(index).cloned(),
                _ => None,
            };
            let Some(old) = old else {
                tracing::debug!(
                    target: targets::OBSERVER,
                    path = %array_path,
                    index,
                    "array index out of range"
                );
                return false;
            };
            if old.same(&slot) && !opts.force {
                return false;
            }
            let old_json = state.tree.slot_json(&old);
            let element_value = state.tree.slot_value(&slot);
            if let Some(Slot::Array(items)) = state.tree.slot_mut(node, key) {
                items[index] = slot.clone();
            }
            (array_path, old, old_json, element_value)
        };

        if let Slot::Observer(previous) = &old
            && !old.same(&slot)
        {
            previous.detach_from(self);
        }
        self.relink_array(node, key);

        let event = ObserverEvent::Set {
            path: path::join(&array_path, &index.to_string()),
            value: element_value,
            value_old: Some(old_json),
            remote: opts.remote.clone(),
        };
        self.emit_change(event, opts.mode());
        true
    }

    /// Apply the fields of `data` to this observer's top level.
    ///
    /// With `remove_missing`, top-level keys absent from `data` are unset.
    /// Returns whether anything changed.
    pub fn patch(&self, data: JsonValue, remove_missing: bool) -> bool {
        match data {
            JsonValue::Object(map) => self.patch_in(map, remove_missing, EmitMode::Normal),
            other => {
                tracing::warn!(
                    target: targets::OBSERVER,
                    kind = json_kind(&other),
                    "patch data is not an object"
                );
                false
            }
        }
    }

    fn patch_in(&self, map: Map<String, JsonValue>, remove_missing: bool, mode: EmitMode) -> bool {
        let root = self.root();
        let opts = MutationOptions::default();
        let mut changed = false;
        let missing: Vec<String> = if remove_missing {
            let keys = self.inner.state.lock().tree.keys(root);
            keys.into_iter().filter(|key| !map.contains_key(key.as_str())).collect()
        } else {
            Vec::new()
        };
        for (key, value) in map {
            changed |= self.set_key(root, &key, Value::Json(value), &opts, mode);
        }
        for key in &missing {
            changed |= self.unset_key(root, key, &opts, mode);
        }
        changed
    }

    /// Remove the key at `path`. Returns whether it existed.
    pub fn unset(&self, path: &str) -> bool {
        self.unset_with(path, &MutationOptions::default())
    }

    /// Remove the key at `path` with explicit options.
    ///
    /// Object values are torn down first: their keys are unset depth first, in
    /// reverse insertion order, before the key itself. Array elements cannot be
    /// unset; use [`remove`](Self::remove).
    pub fn unset_with(&self, path: &str, opts: &MutationOptions) -> bool {
        match self.resolve(&path::split(path)) {
            Resolved::Local(Target::Key(node, key)) => self.unset_key(node, &key, opts, opts.mode()),
            Resolved::Local(Target::Element(..)) => {
                tracing::debug!(target: targets::OBSERVER, path, "cannot unset an array element");
                false
            }
            Resolved::Local(Target::Nested(node, key, index, rest)) => {
                let Some((last, parent)) = rest.split_last() else {
                    return false;
                };
                let removed = self.edit_nested(node, &key, index, parent, |target| match target {
                    JsonValue::Object(map) => map.shift_remove(last),
                    _ => None,
                });
                let Some(value_old) = removed else {
                    return false;
                };
                let event = ObserverEvent::Unset {
                    path: path.to_string(),
                    value_old,
                    remote: opts.remote.clone(),
                };
                self.emit_change(event, opts.mode());
                true
            }
            Resolved::Delegate(observer, rest) => observer.unset_with(&rest, opts),
            Resolved::Missing => false,
        }
    }

    fn unset_key(&self, node: NodeId, key: &str, opts: &MutationOptions, mode: EmitMode) -> bool {
        let (path, old_json, nested) = {
            let state = self.inner.state.lock();
            let Some(path) = state.tree.child_path(node, key) else {
                return false;
            };
            let Some(slot) = state.tree.slot(node, key) else {
                return false;
            };
            let nested = match slot {
                Slot::Node(id) => Some((*id, state.tree.keys(*id))),
                _ => None,
            };
            (path, state.tree.slot_json(slot), nested)
        };

        if let Some((child, keys)) = nested {
            let nested_opts = opts.nested();
            for child_key in keys.iter().rev() {
                self.unset_key(child, child_key, &nested_opts, EmitMode::Quiet);
            }
        }

        let detached = {
            let mut state = self.inner.state.lock();
            match state.tree.take(node, key) {
                Some(slot) => state.tree.release(slot),
                None => Vec::new(),
            }
        };
        for child in detached {
            child.detach_from(self);
        }

        let event = ObserverEvent::Unset {
            path,
            value_old: old_json,
            remote: opts.remote.clone(),
        };
        self.emit_change(event, mode);
        true
    }

    /// Insert `value` into the array at `path`.
    ///
    /// `index` defaults to the end and is clamped to the array length. Plain
    /// objects are wrapped in new observers.
    pub fn insert(&self, path: &str, value: impl Into<Value>, index: Option<usize>) -> bool {
        self.insert_with(path, value, index, &MutationOptions::default())
    }

    /// Insert with explicit options.
    ///
    /// A value already present in the array is rejected unless the path
    /// allows duplicates or `opts.allow_duplicates` is set.
    pub fn insert_with(
        &self,
        path: &str,
        value: impl Into<Value>,
        index: Option<usize>,
        opts: &MutationOptions,
    ) -> bool {
        let value = value.into();
        match self.resolve(&path::split(path)) {
            Resolved::Local(Target::Key(node, key)) => {
                let Some((index, value)) =
                    self.do_insert(node, &key, value, index, opts.allow_duplicates)
                else {
                    return false;
                };
                let event = ObserverEvent::Insert {
                    path: path.to_string(),
                    value,
                    index,
                    remote: opts.remote.clone(),
                };
                self.emit_change(event, opts.mode());
                true
            }
            Resolved::Local(target) => {
                let Some((node, key, element, rest)) = plain_array(target) else {
                    return false;
                };
                let new = value.to_json();
                let allow = opts.allow_duplicates || self.inner.state.lock().config.allows_duplicates(path);
                let inserted = self.edit_nested(node, &key, element, &rest, |target| {
                    let JsonValue::Array(items) = target else {
                        return None;
                    };
                    if !allow && items.contains(&new) {
                        return None;
                    }
                    let position = index.map_or(items.len(), |index| index.min(items.len()));
                    items.insert(position, new.clone());
                    Some(position)
                });
                let Some(index) = inserted else {
                    tracing::debug!(target: targets::OBSERVER, path, "nested insert did not apply");
                    return false;
                };
                let event = ObserverEvent::Insert {
                    path: path.to_string(),
                    value: Value::Json(new),
                    index,
                    remote: opts.remote.clone(),
                };
                self.emit_change(event, opts.mode());
                true
            }
            Resolved::Delegate(observer, rest) => observer.insert_with(&rest, value, index, opts),
            Resolved::Missing => false,
        }
    }

    fn do_insert(
        &self,
        node: NodeId,
        key: &str,
        value: Value,
        index: Option<usize>,
        allow_duplicates: bool,
    ) -> Option<(usize, Value)> {
        let slot = Slot::element(value);
        if slot.as_observer().is_some_and(|o| o.ptr_eq(self)) {
            return None;
        }

        let position = {
            let mut state = self.inner.state.lock();
            let array_path = state.tree.child_path(node, key)?;
            let allow = allow_duplicates || state.config.allows_duplicates(&array_path);
            let Some(Slot::Array(items)) = state.tree.slot_mut(node, key) else {
                tracing::debug!(target: targets::OBSERVER, path = %array_path, "insert target is not an array");
                return None;
            };
            if !allow && items.iter().any(|item| item.same(&slot)) {
                tracing::debug!(target: targets::OBSERVER, path = %array_path, "rejecting duplicate insert");
                return None;
            }
            let position = index.map_or(items.len(), |index| index.min(items.len()));
            items.insert(position, slot.clone());
            position
        };

        self.relink_array(node, key);
        Some((position, element_value(slot)))
    }

    /// Remove the element at `index` from the array at `path`.
    pub fn remove(&self, path: &str, index: usize) -> bool {
        self.remove_with(path, index, &MutationOptions::default())
    }

    /// Remove by index with explicit options.
    ///
    /// A removed observer is detached from this one but otherwise left intact.
    pub fn remove_with(&self, path: &str, index: usize, opts: &MutationOptions) -> bool {
        match self.resolve(&path::split(path)) {
            Resolved::Local(Target::Key(node, key)) => {
                self.remove_at(node, &key, path, index, opts).is_some()
            }
            Resolved::Local(target) => self.remove_nested(target, path, opts, |items| {
                (index < items.len()).then_some(index)
            }),
            Resolved::Delegate(observer, rest) => observer.remove_with(&rest, index, opts),
            Resolved::Missing => false,
        }
    }

    /// Remove by index, reporting why a removal was impossible.
    ///
    /// Returns the removed value.
    pub fn try_remove(&self, path: &str, index: usize, opts: &MutationOptions) -> ObserverResult<Value> {
        if self.is_destroyed() {
            return Err(ObserverError::Destroyed);
        }
        let len = self.array_len(path)?;
        if index >= len {
            return Err(ObserverError::IndexOutOfRange {
                path: path.to_string(),
                index,
                len,
            });
        }
        let removed = self.get_raw(&path::join(path, &index.to_string()));
        match removed {
            Some(value) if self.remove_with(path, index, opts) => Ok(value),
            _ => Err(ObserverError::path_not_found(path)),
        }
    }

    /// Remove the first element equal to `value` from the array at `path`.
    ///
    /// Observers match by identity, everything else by value.
    pub fn remove_value(&self, path: &str, value: impl Into<Value>) -> bool {
        self.remove_value_with(path, value, &MutationOptions::default())
    }

    /// Remove by value with explicit options.
    pub fn remove_value_with(&self, path: &str, value: impl Into<Value>, opts: &MutationOptions) -> bool {
        let value = value.into();
        match self.resolve(&path::split(path)) {
            Resolved::Local(Target::Key(node, key)) => {
                let position = match self.inner.state.lock().tree.slot(node, &key) {
                    Some(Slot::Array(items)) => items.iter().position(|slot| slot_matches(slot, &value)),
                    _ => None,
                };
                match position {
                    Some(index) => self.remove_at(node, &key, path, index, opts).is_some(),
                    None => false,
                }
            }
            Resolved::Local(target) => {
                let value = value.to_json();
                self.remove_nested(target, path, opts, |items| {
                    items.iter().position(|item| *item == value)
                })
            }
            Resolved::Delegate(observer, rest) => observer.remove_value_with(&rest, value, opts),
            Resolved::Missing => false,
        }
    }

    /// Remove from a plain array nested in an array element.
    fn remove_nested(
        &self,
        target: Target,
        path: &str,
        opts: &MutationOptions,
        pick: impl FnOnce(&[JsonValue]) -> Option<usize>,
    ) -> bool {
        let Some((node, key, element, rest)) = plain_array(target) else {
            return false;
        };
        let removed = self.edit_nested(node, &key, element, &rest, |target| {
            let JsonValue::Array(items) = target else {
                return None;
            };
            let index = pick(items)?;
            Some((index, items.remove(index)))
        });
        let Some((index, value)) = removed else {
            tracing::debug!(target: targets::OBSERVER, path, "nothing to remove");
            return false;
        };
        let event = ObserverEvent::Remove {
            path: path.to_string(),
            value: Value::Json(value),
            index,
            remote: opts.remote.clone(),
        };
        self.emit_change(event, opts.mode());
        true
    }

    fn remove_at(
        &self,
        node: NodeId,
        key: &str,
        path: &str,
        index: usize,
        opts: &MutationOptions,
    ) -> Option<Value> {
        let removed = {
            let mut state = self.inner.state.lock();
            match state.tree.slot_mut(node, key) {
                Some(Slot::Array(items)) if index < items.len() => Some(items.remove(index)),
                _ => None,
            }
        };
        let Some(removed) = removed else {
            tracing::debug!(target: targets::OBSERVER, path, index, "nothing to remove");
            return None;
        };
        if let Slot::Observer(child) = &removed {
            child.detach_from(self);
        }
        self.relink_array(node, key);

        let value = element_value(removed);
        let event = ObserverEvent::Remove {
            path: path.to_string(),
            value: value.clone(),
            index,
            remote: opts.remote.clone(),
        };
        self.emit_change(event, opts.mode());
        Some(value)
    }

    /// Move an array element from `from` to `to`. `None` moves it to the end.
    pub fn move_item(&self, path: &str, from: usize, to: Option<usize>) -> bool {
        self.move_item_with(path, from, to, &MutationOptions::default())
    }

    /// Move with explicit options.
    ///
    /// Out-of-range or equal indices leave the array untouched.
    pub fn move_item_with(
        &self,
        path: &str,
        from: usize,
        to: Option<usize>,
        opts: &MutationOptions,
    ) -> bool {
        let (node, key) = match self.resolve(&path::split(path)) {
            Resolved::Local(Target::Key(node, key)) => (node, key),
            Resolved::Local(target) => return self.move_nested(target, path, from, to, opts),
            Resolved::Delegate(observer, rest) => return observer.move_item_with(&rest, from, to, opts),
            Resolved::Missing => return false,
        };

        let moved = {
            let mut state = self.inner.state.lock();
            match state.tree.slot_mut(node, &key) {
                Some(Slot::Array(items)) => {
                    let len = items.len();
                    let to = to.unwrap_or(len.saturating_sub(1));
                    if from >= len || to >= len || from == to {
                        None
                    } else {
                        let slot = items.remove(from);
                        items.insert(to, slot.clone());
                        Some((to, slot))
                    }
                }
                _ => None,
            }
        };
        let Some((to, slot)) = moved else {
            tracing::debug!(target: targets::OBSERVER, path, from, ?to, "move rejected");
            return false;
        };
        self.relink_array(node, &key);

        let event = ObserverEvent::Move {
            path: path.to_string(),
            value: element_value(slot),
            index_new: to,
            index_old: from,
            remote: opts.remote.clone(),
        };
        self.emit_change(event, opts.mode());
        true
    }

    fn move_nested(
        &self,
        target: Target,
        path: &str,
        from: usize,
        to: Option<usize>,
        opts: &MutationOptions,
    ) -> bool {
        let Some((node, key, element, rest)) = plain_array(target) else {
            return false;
        };
        let moved = self.edit_nested(node, &key, element, &rest, |target| {
            let JsonValue::Array(items) = target else {
                return None;
            };
            let len = items.len();
            let to = to.unwrap_or(len.saturating_sub(1));
            if from >= len || to >= len || from == to {
                return None;
            }
            let item = items.remove(from);
            items.insert(to, item.clone());
            Some((to, item))
        });
        let Some((to, item)) = moved else {
            tracing::debug!(target: targets::OBSERVER, path, from, ?to, "move rejected");
            return false;
        };
        let event = ObserverEvent::Move {
            path: path.to_string(),
            value: Value::Json(item),
            index_new: to,
            index_old: from,
            remote: opts.remote.clone(),
        };
        self.emit_change(event, opts.mode());
        true
    }

    // -------------------------------------------------------------------------
    // Silencing, history and lifecycle
    // -------------------------------------------------------------------------

    /// Suppress this observer's events and pause its recorders.
    ///
    /// Pass the returned state to [`silence_restore`](Self::silence_restore).
    pub fn silence(&self) -> SilenceState {
        let (history, sync) = {
            let mut state = self.inner.state.lock();
            state.silent = true;
            (state.history.clone(), state.sync.clone())
        };
        SilenceState {
            history: pause(history.as_deref()),
            sync: pause(sync.as_deref()),
        }
    }

    /// End a silence, resuming the recorders that were enabled before it.
    pub fn silence_restore(&self, saved: SilenceState) {
        let (history, sync) = {
            let mut state = self.inner.state.lock();
            state.silent = false;
            (state.history.clone(), state.sync.clone())
        };
        if saved.history
            && let Some(history) = history
        {
            history.set_enabled(true);
        }
        if saved.sync
            && let Some(sync) = sync
        {
            sync.set_enabled(true);
        }
    }

    /// Whether the observer is currently silenced.
    pub fn is_silenced(&self) -> bool {
        self.inner.state.lock().silent
    }

    /// Attach or clear the history recorder.
    pub fn set_history(&self, history: Option<Arc<dyn Recorder>>) {
        self.inner.state.lock().history = history;
    }

    /// The attached history recorder.
    pub fn history(&self) -> Option<Arc<dyn Recorder>> {
        self.inner.state.lock().history.clone()
    }

    /// Attach or clear the sync recorder.
    pub fn set_sync(&self, sync: Option<Arc<dyn Recorder>>) {
        self.inner.state.lock().sync = sync;
    }

    /// The attached sync recorder.
    pub fn sync(&self) -> Option<Arc<dyn Recorder>> {
        self.inner.state.lock().sync.clone()
    }

    /// The observer's configuration.
    pub fn config(&self) -> ObserverConfig {
        self.inner.state.lock().config.clone()
    }

    /// Install a resolver for the live instance of this observer.
    pub fn set_latest<F>(&self, resolver: F)
    where
        F: Fn() -> Option<Observer> + Send + Sync + 'static,
    {
        self.set_latest_fn(Arc::new(resolver));
    }

    pub(crate) fn set_latest_fn(&self, resolver: LatestFn) {
        self.inner.state.lock().latest = Some(resolver);
    }

    /// The live instance of this observer.
    ///
    /// Without a resolver this is the observer itself. A resolver returning
    /// `None` means the live instance is gone.
    pub fn latest(&self) -> Option<Observer> {
        let resolver = self.inner.state.lock().latest.clone();
        match resolver {
            Some(resolver) => resolver(),
            None => Some(self.clone()),
        }
    }

    /// Emit `destroy` and drop every listener. Later calls do nothing.
    pub fn destroy(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
        }
        tracing::debug!(target: targets::OBSERVER, "destroying observer");
        self.inner.events.emit(DESTROY, &ObserverEvent::Destroy);
        self.inner.events.unbind_all();
    }

    /// Whether [`destroy`](Self::destroy) has been called.
    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().destroyed
    }

    /// Whether both handles refer to the same observer.
    pub fn ptr_eq(&self, other: &Observer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Create a weak reference to this observer.
    pub fn downgrade(&self) -> WeakObserver {
        WeakObserver {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

struct QuietScope<'a> {
    observer: &'a Observer,
    previous: bool,
    paused: Vec<Arc<dyn Recorder>>,
}

impl Drop for QuietScope<'_> {
    fn drop(&mut self) {
        self.observer.inner.state.lock().quiet = self.previous;
        for recorder in &self.paused {
            recorder.set_enabled(true);
        }
    }
}

fn pause(recorder: Option<&dyn Recorder>) -> bool {
    match recorder {
        Some(recorder) if recorder.enabled() => {
            recorder.set_enabled(false);
            true
        }
        _ => false,
    }
}

fn walk(tree: &Tree, segments: &[String]) -> Resolved {
    let Some((last, intermediate)) = segments.split_last() else {
        return Resolved::Missing;
    };
    let mut node = tree.root();
    for (i, segment) in intermediate.iter().enumerate() {
        match tree.slot(node, segment) {
            Some(Slot::Node(id)) => node = *id,
            Some(Slot::Observer(observer)) => {
                return Resolved::Delegate(observer.clone(), path::join_segments(&segments[i + 1..]));
            }
            Some(Slot::Array(items)) => {
                let Some(index) = segments[i + 1].parse::<usize>().ok() else {
                    return Resolved::Missing;
                };
                if i + 1 == intermediate.len() {
                    return Resolved::Local(Target::Element(node, segment.clone(), index));
                }
                return match items.get(index) {
                    Some(Slot::Observer(observer)) => {
                        Resolved::Delegate(observer.clone(), path::join_segments(&segments[i + 2..]))
                    }
                    Some(Slot::Value(_)) => Resolved::Local(Target::Nested(
                        node,
                        segment.clone(),
                        index,
                        segments[i + 2..].to_vec(),
                    )),
                    _ => Resolved::Missing,
                };
            }
            _ => return Resolved::Missing,
        }
    }
    Resolved::Local(Target::Key(node, last.clone()))
}

fn json_at<'a>(value: &'a JsonValue, segments: &[String]) -> Option<&'a JsonValue> {
    segments.iter().try_fold(value, |current, segment| match current {
        JsonValue::Array(items) => items.get(segment.parse::<usize>().ok()?),
        JsonValue::Object(map) => map.get(segment),
        _ => None,
    })
}

/// The array element a target points into, with the path below it.
fn plain_array(target: Target) -> Option<(NodeId, String, usize, Vec<String>)> {
    match target {
        Target::Element(node, key, index) => Some((node, key, index, Vec::new())),
        Target::Nested(node, key, index, rest) => Some((node, key, index, rest)),
        Target::Key(..) => None,
    }
}

fn json_at_mut<'a>(value: &'a mut JsonValue, segments: &[String]) -> Option<&'a mut JsonValue> {
    segments.iter().try_fold(value, |current, segment| match current {
        JsonValue::Array(items) => items.get_mut(segment.parse::<usize>().ok()?),
        JsonValue::Object(map) => map.get_mut(segment),
        _ => None,
    })
}

/// Whether a stored array element equals an incoming value.
fn slot_matches(slot: &Slot, value: &Value) -> bool {
    match (slot, value) {
        (Slot::Observer(a), Value::Observer(b)) => a.ptr_eq(b),
        (Slot::Value(a), Value::Json(b)) => a == b,
        (Slot::Value(a), array @ Value::Array(_)) => *a == array.to_json(),
        _ => false,
    }
}

fn element_value(slot: Slot) -> Value {
    match slot {
        Slot::Observer(observer) => Value::Observer(observer),
        Slot::Value(value) => Value::Json(value),
        Slot::Array(items) => Value::Array(items.into_iter().map(element_value).collect()),
        Slot::Node(_) => Value::Json(JsonValue::Null),
    }
}

fn collect_entries(tree: &Tree, config: &ObserverConfig, node: NodeId, out: &mut Vec<ForEachEntry>) {
    let Some(record) = tree.node(node) else {
        return;
    };
    for key in &record.keys {
        let Some(slot) = record.data.get(key) else {
            continue;
        };
        let path = path::join(&record.path, key);
        let value = tree.slot_json(slot);
        if let Some(name) = config.schema_type(&path) {
            out.push(ForEachEntry {
                path,
                key: key.clone(),
                kind: FieldKind::Named(name.to_string()),
                value,
            });
            continue;
        }
        let kind = match slot {
            Slot::Array(_) => FieldKind::Array,
            Slot::Node(_) | Slot::Observer(_) => FieldKind::Object,
            Slot::Value(JsonValue::Bool(_)) => FieldKind::Boolean,
            Slot::Value(JsonValue::Number(_)) => FieldKind::Number,
            Slot::Value(JsonValue::String(_)) => FieldKind::String,
            Slot::Value(JsonValue::Array(_)) => FieldKind::Array,
            Slot::Value(JsonValue::Object(_)) => FieldKind::Object,
            Slot::Value(JsonValue::Null) => FieldKind::Null,
        };
        out.push(ForEachEntry {
            path,
            key: key.clone(),
            kind,
            value,
        });
        if let Slot::Node(child) = slot {
            collect_entries(tree, config, *child, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(observer: &Observer, name: &str) -> Arc<Mutex<Vec<ObserverEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        observer.on(name, move |event| sink.lock().push(event.clone()));
        events
    }

    fn paths(events: &Arc<Mutex<Vec<ObserverEvent>>>) -> Vec<String> {
        events
            .lock()
            .iter()
            .filter_map(|event| event.path().map(str::to_string))
            .collect()
    }

    #[test]
    fn test_from_json_round_trip() {
        let data = json!({
            "name": "box",
            "enabled": true,
            "position": [0, 1.5, 2],
            "meta": { "tags": ["a", "b"], "owner": null },
            "children": [{ "id": 1 }, { "id": 2 }]
        });
        let observer = Observer::from_json(data.clone()).unwrap();
        assert_eq!(observer.json(), data);
        assert_eq!(observer.json(), observer.json());
    }

    #[test]
    fn test_from_json_rejects_non_objects() {
        let err = Observer::from_json(json!([1])).unwrap_err();
        assert_eq!(err, ObserverError::NotAnObject { found: "array" });
    }

    #[test]
    fn test_get_and_has() {
        let observer = Observer::from_json(json!({"a": {"b": {"c": 3}}, "list": [{"x": 1}, [5, 6]]})).unwrap();

        assert_eq!(observer.get("a.b.c"), Some(json!(3)));
        assert_eq!(observer.get("a.b"), Some(json!({"c": 3})));
        assert_eq!(observer.get("list.0.x"), Some(json!(1)));
        assert_eq!(observer.get("list.1.0"), Some(json!(5)));
        assert_eq!(observer.get("a.missing.c"), None);
        assert!(observer.has("a.b"));
        assert!(!observer.has("a.x"));
        assert!(observer.get_observer("list.0").is_some());
        assert_eq!(observer.try_get("nope"), Err(ObserverError::path_not_found("nope")));
    }

    #[test]
    fn test_set_new_key_emits_once_with_no_old_value() {
        let observer = Observer::new();
        let specific = record(&observer, "x:set");
        let wildcard = record(&observer, "*:set");

        assert!(observer.set("x", 5));

        let expected = ObserverEvent::Set {
            path: "x".into(),
            value: Value::from(5),
            value_old: None,
            remote: None,
        };
        assert_eq!(*specific.lock(), vec![expected.clone()]);
        assert_eq!(*wildcard.lock(), vec![expected]);
    }

    #[test]
    fn test_set_unchanged_scalar_is_noop() {
        let observer = Observer::from_json(json!({"x": 5})).unwrap();
        let wildcard = record(&observer, "*:set");

        assert!(!observer.set("x", 5));
        assert!(wildcard.lock().is_empty());

        assert!(observer.set_with("x", 5, &MutationOptions::new().with_force(true)));
        assert_eq!(wildcard.lock().len(), 1);
    }

    #[test]
    fn test_set_vivifies_intermediate_objects() {
        let observer = Observer::from_json(json!({"a": 1})).unwrap();
        let unsets = record(&observer, "*:unset");

        let sets = record(&observer, "*:set");
        let top = record(&observer, "a:set");

        assert!(observer.set("a.b.c", true));
        assert_eq!(observer.json(), json!({"a": {"b": {"c": true}}}));
        assert_eq!(paths(&unsets), vec!["a"]);
        assert_eq!(paths(&sets), vec!["a.b.c", "a"]);
        match &top.lock()[..] {
            [ObserverEvent::Set { value_old, .. }] => assert_eq!(value_old, &Some(json!(1))),
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn test_set_object_diff() {
        let observer = Observer::from_json(json!({"o": {"keep": 1, "drop": 2, "change": 3}})).unwrap();
        let sets = record(&observer, "*:set");
        let unsets = record(&observer, "*:unset");

        assert!(observer.set("o", json!({"keep": 1, "change": 4, "add": 5})));
        assert_eq!(observer.json(), json!({"o": {"keep": 1, "change": 4, "add": 5}}));
        assert_eq!(paths(&unsets), vec!["o.drop"]);
        assert_eq!(paths(&sets), vec!["o.change", "o.add", "o"]);

        assert!(!observer.set("o", json!({"keep": 1, "change": 4, "add": 5})));
    }

    #[test]
    fn test_set_type_change_reports_old_value() {
        let observer = Observer::from_json(json!({"v": {"a": 1}})).unwrap();
        let sets = record(&observer, "v:set");

        assert!(observer.set("v", 3));
        let events = sets.lock();
        assert_eq!(events.len(), 1);
        match &events[0] {
            ObserverEvent::Set { value_old, .. } => assert_eq!(value_old, &Some(json!({"a": 1}))),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_array_diff_emits_changed_index_only() {
        let observer = Observer::from_json(json!({"b": [1, 2, 3]})).unwrap();
        let sets = record(&observer, "*:set");

        assert!(observer.set("b", json!([1, 9, 3])));
        assert_eq!(paths(&sets), vec!["b.1", "b"]);
        assert!(!observer.set("b", json!([1, 9, 3])));
    }

    #[test]
    fn test_array_rebuild_on_length_change() {
        let observer = Observer::from_json(json!({"b": [{"id": 1}]})).unwrap();
        let first = observer.get_observer("b.0").unwrap();
        let sets = record(&observer, "*:set");

        assert!(observer.set("b", json!([1, 2])));
        assert_eq!(paths(&sets), vec!["b.0", "b.1", "b"]);
        assert!(first.parent().is_none());
        assert_eq!(observer.json(), json!({"b": [1, 2]}));
    }

    #[test]
    fn test_array_diff_patches_nested_observers() {
        let observer = Observer::from_json(json!({"items": [{"id": 1, "name": "a"}]})).unwrap();
        let child = observer.get_observer("items.0").unwrap();
        let sets = record(&observer, "*:set");

        assert!(observer.set("items", json!([{"id": 1, "name": "b"}])));
        assert!(observer.get_observer("items.0").unwrap().ptr_eq(&child));
        assert_eq!(paths(&sets), vec!["items.0.name", "items"]);
    }

    #[test]
    fn test_set_array_element() {
        let observer = Observer::from_json(json!({"b": [1, 2, 3]})).unwrap();
        let sets = record(&observer, "b.2:set");

        assert!(observer.set("b.2", 7));
        assert!(!observer.set("b.5", 7));
        assert_eq!(observer.get("b"), Some(json!([1, 2, 7])));
        assert_eq!(sets.lock().len(), 1);
    }

    #[test]
    fn test_unset_cascades_in_reverse_order() {
        let observer = Observer::from_json(json!({"o": {"a": 1, "b": 2, "c": 3}})).unwrap();
        let unsets = record(&observer, "*:unset");

        assert!(observer.unset("o"));
        assert_eq!(paths(&unsets), vec!["o.c", "o.b", "o.a", "o"]);
        assert!(!observer.has("o"));
        assert!(!observer.unset("o"));
    }

    #[test]
    fn test_unset_array_element_is_rejected() {
        let observer = Observer::from_json(json!({"b": [1]})).unwrap();
        assert!(!observer.unset("b.0"));
        assert_eq!(observer.get("b"), Some(json!([1])));
    }

    #[test]
    fn test_insert_remove_and_duplicates() {
        let observer = Observer::from_json(json!({"b": [1, 2]})).unwrap();
        let inserts = record(&observer, "b:insert");

        assert!(observer.insert("b", 3, None));
        assert!(!observer.insert("b", 3, None));
        assert!(observer.insert_with("b", 3, Some(0), &MutationOptions::new().with_duplicates(true)));
        assert_eq!(observer.get("b"), Some(json!([3, 1, 2, 3])));
        assert_eq!(inserts.lock().len(), 2);

        assert!(observer.remove_value("b", 3));
        assert_eq!(observer.get("b"), Some(json!([1, 2, 3])));
        assert!(!observer.remove("b", 10));
        assert!(!observer.insert("missing", 1, None));
    }

    #[test]
    fn test_paths_with_duplicates() {
        let observer = Observer::builder()
            .data(json!({"tags": ["a"]}))
            .path_with_duplicates("tags")
            .build();
        assert!(observer.insert("tags", "a", None));
        assert_eq!(observer.get("tags"), Some(json!(["a", "a"])));
    }

    #[test]
    fn test_try_remove_errors() {
        let observer = Observer::from_json(json!({"b": [1], "s": 2})).unwrap();
        let opts = MutationOptions::new();

        assert_eq!(observer.try_remove("b", 0, &opts), Ok(Value::from(1)));
        assert!(matches!(
            observer.try_remove("b", 0, &opts),
            Err(ObserverError::IndexOutOfRange { index: 0, len: 0, .. })
        ));
        assert_eq!(observer.try_remove("s", 0, &opts), Err(ObserverError::not_an_array("s")));
        observer.destroy();
        assert_eq!(observer.try_remove("b", 0, &opts), Err(ObserverError::Destroyed));
    }

    #[test]
    fn test_inserted_objects_become_linked_observers() {
        let observer = Observer::from_json(json!({"items": []})).unwrap();
        assert!(observer.insert("items", json!({"id": 1}), None));
        assert!(observer.insert("items", json!({"id": 2}), Some(0)));

        let second = observer.get_observer("items.1").unwrap();
        assert!(second.parent().unwrap().ptr_eq(&observer));
        assert_eq!(second.parent_path().as_deref(), Some("items"));
        assert_eq!(second.parent_key(), Some(ParentKey::Index(1)));
        assert_eq!(second.get("id"), Some(json!(1)));
    }

    #[test]
    fn test_move() {
        let observer = Observer::from_json(json!({"b": [1, 2, 3]})).unwrap();
        let moves = record(&observer, "b:move");

        assert!(observer.move_item("b", 0, None));
        assert_eq!(observer.get("b"), Some(json!([2, 3, 1])));
        assert!(!observer.move_item("b", 1, Some(1)));
        assert!(!observer.move_item("b", 5, Some(0)));

        let events = moves.lock();
        assert_eq!(
            events[0],
            ObserverEvent::Move {
                path: "b".into(),
                value: Value::from(1),
                index_new: 2,
                index_old: 0,
                remote: None,
            }
        );
    }

    #[test]
    fn test_move_keeps_child_indices_in_sync() {
        let observer = Observer::from_json(json!({"items": [{"n": 0}, {"n": 1}]})).unwrap();
        let first = observer.get_observer("items.0").unwrap();
        let sets = record(&observer, "*:set");

        assert!(observer.move_item("items", 0, Some(1)));
        assert_eq!(first.parent_key(), Some(ParentKey::Index(1)));

        first.set("n", 5);
        assert_eq!(paths(&sets), vec!["items.1.n"]);
    }

    #[test]
    fn test_removed_child_stops_propagating() {
        let observer = Observer::from_json(json!({"items": [{"n": 0}]})).unwrap();
        let child = observer.get_observer("items.0").unwrap();
        let sets = record(&observer, "*:set");

        assert!(observer.remove("items", 0));
        assert!(child.parent().is_none());
        child.set("n", 1);
        assert!(sets.lock().is_empty());
        assert_eq!(child.json(), json!({"n": 1}));
    }

    #[test]
    fn test_observer_valued_key_propagates() {
        let root = Observer::new();
        let child = Observer::new();
        assert!(root.set("a.child", &child));
        assert!(!root.set("a.child", &child));
        let sets = record(&root, "*:set");

        child.set("leaf", 1);
        assert_eq!(paths(&sets), vec!["a.child.leaf"]);
        assert_eq!(child.parent_key(), Some(ParentKey::Key("child".into())));
        assert_eq!(root.json(), json!({"a": {"child": {"leaf": 1}}}));
    }

    #[test]
    fn test_nesting_self_is_rejected() {
        let observer = Observer::new();
        assert!(!observer.set("me", &observer));
        assert!(!observer.has("me"));
    }

    #[test]
    fn test_silent_flag_suppresses_path_event() {
        let observer = Observer::new();
        let specific = record(&observer, "x:set");
        let wildcard = record(&observer, "*:set");

        assert!(observer.set_with("x", 1, &MutationOptions::new().with_silent(true)));
        assert!(specific.lock().is_empty());
        assert_eq!(wildcard.lock().len(), 1);
    }

    #[test]
    fn test_silence_suppresses_events() {
        let observer = Observer::new();
        let wildcard = record(&observer, "*:set");

        let state = observer.silence();
        assert!(observer.is_silenced());
        assert!(observer.set("x", 5));
        observer.silence_restore(state);

        assert!(wildcard.lock().is_empty());
        assert_eq!(observer.get("x"), Some(json!(5)));
        assert!(observer.set("x", 6));
        assert_eq!(wildcard.lock().len(), 1);
    }

    #[test]
    fn test_remote_tag_is_forwarded() {
        let observer = Observer::new();
        let wildcard = record(&observer, "*:set");
        observer.set_with("x", 1, &MutationOptions::new().with_remote("peer"));
        assert_eq!(wildcard.lock()[0].remote(), Some("peer"));
    }

    #[test]
    fn test_patch() {
        let observer = Observer::from_json(json!({"a": 1, "b": 2})).unwrap();
        assert!(observer.patch(json!({"a": 3, "c": {"d": 4}}), false));
        assert_eq!(observer.json(), json!({"a": 3, "b": 2, "c": {"d": 4}}));

        assert!(observer.patch(json!({"a": 3}), true));
        assert_eq!(observer.json(), json!({"a": 3}));
        assert!(!observer.patch(json!(5), false));
    }

    #[test]
    fn test_patch_applies_data_before_removing_missing_keys() {
        let observer = Observer::from_json(json!({"a": 1, "b": 2})).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        for verb in ["set", "unset"] {
            let sink = order.clone();
            observer.on(format!("*:{verb}"), move |event: &ObserverEvent| {
                let path = event.path().unwrap_or_default();
                sink.lock().push(format!("{path}:{}", event.verb()));
            });
        }

        assert!(observer.patch(json!({"a": 3}), true));
        assert_eq!(*order.lock(), vec!["a:set", "b:unset"]);
    }

    #[test]
    fn test_for_each() {
        let observer = Observer::builder()
            .data(json!({"a": {"b": 1}, "list": [1], "pos": {"x": 0}, "s": "t"}))
            .schema_type("pos", "vec3")
            .build();

        let mut seen = Vec::new();
        observer.for_each(|entry| seen.push((entry.path.clone(), entry.kind.clone())));
        assert_eq!(
            seen,
            vec![
                ("a".to_string(), FieldKind::Object),
                ("a.b".to_string(), FieldKind::Number),
                ("list".to_string(), FieldKind::Array),
                ("pos".to_string(), FieldKind::Named("vec3".into())),
                ("s".to_string(), FieldKind::String),
            ]
        );
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let observer = Observer::new();
        let destroys = record(&observer, DESTROY);
        let sets = record(&observer, "*:set");

        observer.destroy();
        observer.destroy();
        assert_eq!(*destroys.lock(), vec![ObserverEvent::Destroy]);
        assert!(observer.is_destroyed());
        assert_eq!(observer.events().connection_count(), 0);

        observer.set("x", 1);
        assert!(sets.lock().is_empty());
    }

    #[test]
    fn test_latest_resolver() {
        let observer = Observer::new();
        assert!(observer.latest().unwrap().ptr_eq(&observer));

        let replacement = Observer::new();
        let target = replacement.downgrade();
        observer.set_latest(move || target.upgrade());
        assert!(observer.latest().unwrap().ptr_eq(&replacement));

        drop(replacement);
        assert!(observer.latest().is_none());
    }

    #[test]
    fn test_listener_panic_does_not_abort_mutation() {
        let observer = Observer::new();
        observer.on("x:set", |_| panic!("bad listener"));
        let wildcard = record(&observer, "*:set");

        assert!(observer.set("x", 1));
        assert_eq!(wildcard.lock().len(), 1);
    }
}
