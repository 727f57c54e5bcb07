//! Automatic undo recording for observers.
//!
//! An [`ObserverHistory`] listens to an observer's wildcard events and pushes
//! one [`HistoryAction`] per change into a [`History`]. Each action captures
//! what it needs to invert the change:
//!
//! | Event    | Undo                             | Redo                         |
//! |----------|----------------------------------|------------------------------|
//! | `set`    | set the old value, or unset      | set the new value            |
//! | `unset`  | set the old value                | unset                        |
//! | `insert` | remove at the inserted index     | insert at the same index     |
//! | `remove` | insert at the removed index      | remove at the same index     |
//! | `move`   | move back                        | move again                   |
//!
//! Replays resolve the observer through [`Observer::latest`] and pause its
//! history recorder, so undoing a change is not itself recorded.
//!
//! ```
//! use horizon_observer::{History, Observer, ObserverHistory};
//! use serde_json::json;
//!
//! let observer = Observer::from_json(json!({ "name": "a" })).unwrap();
//! let history = History::new();
//! let _adapter = ObserverHistory::new(&observer, &history);
//!
//! observer.set("name", "b");
//! history.undo();
//! assert_eq!(observer.get("name"), Some(json!("a")));
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use crate::config::HistoryConfig;
use crate::events::EventHandle;
use crate::history::{ActionFn, History, HistoryAction};
use crate::logging::targets;
use crate::observer::{MutationOptions, Observer, ObserverEvent, Recorder, WeakObserver, VERBS};

struct AdapterInner {
    item: Mutex<Option<WeakObserver>>,
    history: Mutex<Option<History>>,
    enabled: AtomicBool,
    combine: AtomicBool,
    prefix: Mutex<String>,
    handles: Mutex<Vec<EventHandle<ObserverEvent>>>,
    /// The recorder handed to the observer.
    installed: Mutex<Option<Weak<dyn Recorder>>>,
}

/// Records an observer's changes into a [`History`].
///
/// `ObserverHistory` is a cheap handle; clones share the same adapter. The
/// observer keeps the adapter alive as its history recorder.
#[derive(Clone)]
pub struct ObserverHistory {
    inner: Arc<AdapterInner>,
}

impl fmt::Debug for ObserverHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverHistory")
            .field("enabled", &self.enabled())
            .field("combine", &self.combine())
            .field("prefix", &self.prefix())
            .finish_non_exhaustive()
    }
}

impl ObserverHistory {
    /// Record changes of `item` into `history` with default settings.
    pub fn new(item: &Observer, history: &History) -> Self {
        Self::with_config(item, history, HistoryConfig::default())
    }

    /// Record changes of `item` into `history`.
    ///
    /// The adapter becomes the observer's history recorder.
    pub fn with_config(item: &Observer, history: &History, config: HistoryConfig) -> Self {
        let adapter = Self {
            inner: Arc::new(AdapterInner {
                item: Mutex::new(Some(item.downgrade())),
                history: Mutex::new(Some(history.clone())),
                enabled: AtomicBool::new(config.enabled),
                combine: AtomicBool::new(config.combine),
                prefix: Mutex::new(config.prefix),
                handles: Mutex::new(Vec::new()),
                installed: Mutex::new(None),
            }),
        };

        let handles: Vec<_> = VERBS
            .iter()
            .map(|verb| {
                let weak: Weak<AdapterInner> = Arc::downgrade(&adapter.inner);
                item.on(format!("*:{verb}"), move |event| {
                    if let Some(inner) = weak.upgrade() {
                        ObserverHistory { inner }.record(event);
                    }
                })
            })
            .collect();
        *adapter.inner.handles.lock() = handles;

        let recorder: Arc<dyn Recorder> = Arc::new(adapter.clone());
        *adapter.inner.installed.lock() = Some(Arc::downgrade(&recorder));
        item.set_history(Some(recorder));
        adapter
    }

    fn record(&self, event: &ObserverEvent) {
        if !self.enabled() {
            return;
        }
        let Some(history) = self.history() else {
            return;
        };
        let Some(item) = self.inner.item.lock().clone() else {
            return;
        };
        let Some(path) = event.path().map(str::to_string) else {
            return;
        };

        let (undo, redo) = match event {
            ObserverEvent::Set {
                value, value_old, ..
            } => {
                let value = value.to_json();
                let value_old = value_old.clone();
                let undo_path = path.clone();
                let redo_path = path.clone();
                (
                    replay(item.clone(), move |target| match &value_old {
                        Some(old) => {
                            target.set(&undo_path, old.clone());
                        }
                        None => {
                            target.unset(&undo_path);
                        }
                    }),
                    replay(item, move |target| {
                        target.set(&redo_path, value.clone());
                    }),
                )
            }
            ObserverEvent::Unset { value_old, .. } => {
                let value_old = value_old.clone();
                let undo_path = path.clone();
                let redo_path = path.clone();
                (
                    replay(item.clone(), move |target| {
                        target.set(&undo_path, value_old.clone());
                    }),
                    replay(item, move |target| {
                        target.unset(&redo_path);
                    }),
                )
            }
            ObserverEvent::Insert { value, index, .. } => {
                let value = value.to_json();
                let index = *index;
                let undo_path = path.clone();
                let redo_path = path.clone();
                (
                    replay(item.clone(), move |target| {
                        target.remove(&undo_path, index);
                    }),
                    replay(item, move |target| {
                        reinsert(target, &redo_path, &value, index);
                    }),
                )
            }
            ObserverEvent::Remove { value, index, .. } => {
                let value = value.to_json();
                let index = *index;
                let undo_path = path.clone();
                let redo_path = path.clone();
                (
                    replay(item.clone(), move |target| {
                        reinsert(target, &undo_path, &value, index);
                    }),
                    replay(item, move |target| {
                        target.remove(&redo_path, index);
                    }),
                )
            }
            ObserverEvent::Move {
                index_new,
                index_old,
                ..
            } => {
                let (index_new, index_old) = (*index_new, *index_old);
                let undo_path = path.clone();
                let redo_path = path.clone();
                (
                    replay(item.clone(), move |target| {
                        target.move_item(&undo_path, index_new, Some(index_old));
                    }),
                    replay(item, move |target| {
                        target.move_item(&redo_path, index_old, Some(index_new));
                    }),
                )
            }
            ObserverEvent::Destroy => return,
        };

        let name = format!("{}{}", self.prefix(), path);
        tracing::trace!(target: targets::OBSERVER_HISTORY, name = %name, verb = event.verb(), "recording change");
        history.add(
            HistoryAction::new(name)
                .undo(move || undo())
                .redo(move || redo())
                .combine(self.combine()),
        );
    }

    /// The observed item, if it is still alive and the adapter is not destroyed.
    pub fn item(&self) -> Option<Observer> {
        self.inner.item.lock().as_ref()?.upgrade()
    }

    /// The history actions are recorded into.
    pub fn history(&self) -> Option<History> {
        self.inner.history.lock().clone()
    }

    /// Replace or detach the history.
    pub fn set_history(&self, history: Option<History>) {
        *self.inner.history.lock() = history;
    }

    /// Whether changes are recorded.
    pub fn enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Start or stop recording.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Whether recorded actions combine with a same-named predecessor.
    pub fn combine(&self) -> bool {
        self.inner.combine.load(Ordering::SeqCst)
    }

    /// Set the combine flag for future actions.
    pub fn set_combine(&self, combine: bool) {
        self.inner.combine.store(combine, Ordering::SeqCst);
    }

    /// The action-name prefix.
    pub fn prefix(&self) -> String {
        self.inner.prefix.lock().clone()
    }

    /// Set the action-name prefix for future actions.
    pub fn set_prefix(&self, prefix: impl Into<String>) {
        *self.inner.prefix.lock() = prefix.into();
    }

    /// Stop listening and forget the item.
    ///
    /// The item's history recorder is cleared if it is still this adapter.
    pub fn destroy(&self) {
        for handle in self.inner.handles.lock().drain(..) {
            handle.unbind();
        }
        let item = self.inner.item.lock().take().and_then(|weak| weak.upgrade());
        let installed = self.inner.installed.lock().take().and_then(|weak| weak.upgrade());
        if let Some(item) = item
            && let Some(ours) = installed
            && item
                .history()
                .is_some_and(|current| std::ptr::addr_eq(Arc::as_ptr(&current), Arc::as_ptr(&ours)))
        {
            item.set_history(None);
        }
    }
}

impl Recorder for ObserverHistory {
    fn enabled(&self) -> bool {
        ObserverHistory::enabled(self)
    }

    fn set_enabled(&self, enabled: bool) {
        ObserverHistory::set_enabled(self, enabled);
    }
}

/// Build a replay step that mutates the live observer with recording paused.
fn replay<F>(item: WeakObserver, apply: F) -> ActionFn
where
    F: Fn(&Observer) + Send + Sync + 'static,
{
    Arc::new(move || {
        let Some(target) = item.upgrade().and_then(|observer| observer.latest()) else {
            tracing::warn!(target: targets::OBSERVER_HISTORY, "observer is gone, skipping replay");
            return;
        };
        let recorder = target.history();
        let was_enabled = recorder.as_ref().is_some_and(|recorder| {
            let enabled = recorder.enabled();
            recorder.set_enabled(false);
            enabled
        });
        apply(&target);
        if was_enabled && let Some(recorder) = recorder {
            recorder.set_enabled(true);
        }
    })
}

fn reinsert(target: &Observer, path: &str, value: &JsonValue, index: usize) {
    let opts = MutationOptions::new().with_duplicates(true);
    target.insert_with(path, value.clone(), Some(index), &opts);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup(data: JsonValue) -> (Observer, History, ObserverHistory) {
        let observer = Observer::from_json(data).unwrap();
        let history = History::new();
        let adapter = ObserverHistory::new(&observer, &history);
        (observer, history, adapter)
    }

    #[test]
    fn test_set_undo_redo() {
        let (observer, history, _adapter) = setup(json!({"a": 1}));

        observer.set("a", 2);
        observer.set("b", 3);
        assert_eq!(history.len(), 2);

        history.undo();
        assert_eq!(observer.json(), json!({"a": 2}));
        history.undo();
        assert_eq!(observer.json(), json!({"a": 1}));
        assert_eq!(history.len(), 2);

        history.redo();
        history.redo();
        assert_eq!(observer.json(), json!({"a": 2, "b": 3}));
    }

    #[test]
    fn test_compound_change_records_one_action() {
        let (observer, history, _adapter) = setup(json!({}));
        observer.set("o", json!({"x": 1, "y": [1, 2]}));
        assert_eq!(history.len(), 1);
        assert_eq!(history.current_action_name().as_deref(), Some("o"));

        history.undo();
        assert_eq!(observer.json(), json!({}));
    }

    #[test]
    fn test_array_operations() {
        let (observer, history, _adapter) = setup(json!({"b": [1, 2, 3]}));

        observer.insert("b", 4, Some(0));
        observer.remove("b", 2);
        observer.move_item("b", 0, None);
        assert_eq!(observer.get("b"), Some(json!([1, 3, 4])));

        history.undo();
        assert_eq!(observer.get("b"), Some(json!([4, 1, 3])));
        history.undo();
        assert_eq!(observer.get("b"), Some(json!([4, 1, 2, 3])));
        history.undo();
        assert_eq!(observer.get("b"), Some(json!([1, 2, 3])));

        history.redo();
        history.redo();
        history.redo();
        assert_eq!(observer.get("b"), Some(json!([1, 3, 4])));
    }

    #[test]
    fn test_replay_is_not_recorded() {
        let (observer, history, adapter) = setup(json!({"a": 1}));
        observer.set("a", 2);
        history.undo();
        history.redo();
        assert_eq!(history.len(), 1);
        assert!(adapter.enabled());
    }

    #[test]
    fn test_disabled_and_silenced_changes_are_skipped() {
        let (observer, history, adapter) = setup(json!({}));

        adapter.set_enabled(false);
        observer.set("a", 1);
        adapter.set_enabled(true);

        let state = observer.silence();
        observer.set("b", 1);
        observer.silence_restore(state);

        observer.set_with("c", 1, &MutationOptions::new().with_silent(true));
        assert!(history.is_empty());
        assert!(adapter.enabled());
    }

    #[test]
    fn test_prefix_and_combine() {
        let observer = Observer::from_json(json!({"x": 0})).unwrap();
        let history = History::new();
        let config = HistoryConfig {
            prefix: "entity.".into(),
            combine: true,
            enabled: true,
        };
        let _adapter = ObserverHistory::with_config(&observer, &history, config);

        observer.set("x", 1);
        observer.set("x", 2);
        observer.set("x", 3);
        assert_eq!(history.len(), 1);
        assert_eq!(history.current_action_name().as_deref(), Some("entity.x"));

        history.undo();
        assert_eq!(observer.get("x"), Some(json!(0)));
        history.redo();
        assert_eq!(observer.get("x"), Some(json!(3)));
    }

    #[test]
    fn test_destroy_stops_recording() {
        let (observer, history, adapter) = setup(json!({}));
        adapter.destroy();
        observer.set("a", 1);
        assert!(history.is_empty());
        assert!(adapter.item().is_none());
        assert!(observer.history().is_none());

        let state = observer.silence();
        assert!(adapter.enabled());
        observer.silence_restore(state);
        assert!(adapter.enabled());
    }

    #[test]
    fn test_destroy_keeps_a_replacement_recorder() {
        let observer = Observer::new();
        let history = History::new();
        let first = ObserverHistory::new(&observer, &history);
        let second = ObserverHistory::new(&observer, &history);

        first.destroy();
        assert!(observer.history().is_some());
        observer.set("a", 1);
        assert_eq!(history.len(), 1);

        second.destroy();
        assert!(observer.history().is_none());
    }

    #[test]
    fn test_replay_uses_latest_instance() {
        let original = Observer::from_json(json!({"v": 1})).unwrap();
        let history = History::new();
        let _adapter = ObserverHistory::new(&original, &history);
        original.set("v", 2);

        let replacement = Observer::from_json(json!({"v": 2})).unwrap();
        let live = replacement.downgrade();
        original.set_latest(move || live.upgrade());

        history.undo();
        assert_eq!(replacement.get("v"), Some(json!(1)));
        assert_eq!(original.get("v"), Some(json!(2)));

        drop(replacement);
        assert!(history.redo());
        assert_eq!(original.get("v"), Some(json!(2)));
    }
}
