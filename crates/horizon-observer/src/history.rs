//! Linear undo/redo history.
//!
//! [`History`] keeps a list of named [`HistoryAction`]s and a cursor counting
//! how many of them are applied. Adding an action while some are undone
//! discards the undone ones. An action flagged `combine` that carries the same
//! name as the action under the cursor is merged into it: the earlier undo is
//! kept and the redo is replaced.
//!
//! Undo and redo closures run outside the history lock. A closure that panics
//! is logged and leaves the cursor where it was.
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicI32, Ordering};
//! use horizon_observer::{History, HistoryAction};
//!
//! let value = Arc::new(AtomicI32::new(1));
//! let history = History::new();
//!
//! let (undo, redo) = (value.clone(), value.clone());
//! value.store(2, Ordering::SeqCst);
//! history.add(
//!     HistoryAction::new("value")
//!         .undo(move || undo.store(1, Ordering::SeqCst))
//!         .redo(move || redo.store(2, Ordering::SeqCst)),
//! );
//!
//! history.undo();
//! assert_eq!(value.load(Ordering::SeqCst), 1);
//! history.redo();
//! assert_eq!(value.load(Ordering::SeqCst), 2);
//! ```

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{HistoryError, HistoryResult};
use crate::events::{panic_message, EventHandle, Events};
use crate::logging::targets;

/// An undo or redo step.
pub type ActionFn = Arc<dyn Fn() + Send + Sync>;

/// Event names emitted by [`History`].
pub mod event_names {
    /// An action was added or combined.
    pub const ADD: &str = "add";
    /// An action was undone.
    pub const UNDO: &str = "undo";
    /// An action was redone.
    pub const REDO: &str = "redo";
    /// The undo availability changed.
    pub const CAN_UNDO: &str = "can_undo";
    /// The redo availability changed.
    pub const CAN_REDO: &str = "can_redo";
}

/// Payload of [`History`] events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEvent {
    Add { name: String },
    Undo { name: String },
    Redo { name: String },
    CanUndo(bool),
    CanRedo(bool),
}

impl HistoryEvent {
    /// The name the event is emitted under.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Add { .. } => event_names::ADD,
            Self::Undo { .. } => event_names::UNDO,
            Self::Redo { .. } => event_names::REDO,
            Self::CanUndo(_) => event_names::CAN_UNDO,
            Self::CanRedo(_) => event_names::CAN_REDO,
        }
    }
}

/// One undoable step.
#[derive(Clone, Default)]
pub struct HistoryAction {
    name: String,
    undo: Option<ActionFn>,
    redo: Option<ActionFn>,
    combine: bool,
}

impl HistoryAction {
    /// Start an action called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the undo step.
    pub fn undo<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.undo = Some(Arc::new(f));
        self
    }

    /// Set the redo step.
    pub fn redo<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.redo = Some(Arc::new(f));
        self
    }

    /// Merge into a preceding action of the same name.
    pub fn combine(mut self, combine: bool) -> Self {
        self.combine = combine;
        self
    }

    /// The action name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn validate(self) -> HistoryResult<StoredAction> {
        if self.name.is_empty() {
            return Err(HistoryError::MissingName);
        }
        let Some(undo) = self.undo else {
            return Err(HistoryError::MissingUndo { name: self.name });
        };
        let Some(redo) = self.redo else {
            return Err(HistoryError::MissingRedo { name: self.name });
        };
        Ok(StoredAction {
            name: self.name,
            undo,
            redo,
        })
    }
}

impl fmt::Debug for HistoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryAction")
            .field("name", &self.name)
            .field("undo", &self.undo.is_some())
            .field("redo", &self.redo.is_some())
            .field("combine", &self.combine)
            .finish()
    }
}

struct StoredAction {
    name: String,
    undo: ActionFn,
    redo: ActionFn,
}

struct HistoryState {
    actions: Vec<StoredAction>,
    /// Number of applied actions.
    index: usize,
    can_undo: bool,
    can_redo: bool,
}

impl HistoryState {
    /// Refresh the availability flags, returning the ones that changed.
    fn refresh(&mut self) -> Vec<HistoryEvent> {
        let mut changed = Vec::new();
        let can_undo = self.index > 0;
        let can_redo = self.index < self.actions.len();
        if can_undo != self.can_undo {
            self.can_undo = can_undo;
            changed.push(HistoryEvent::CanUndo(can_undo));
        }
        if can_redo != self.can_redo {
            self.can_redo = can_redo;
            changed.push(HistoryEvent::CanRedo(can_redo));
        }
        changed
    }
}

struct HistoryInner {
    state: Mutex<HistoryState>,
    events: Events<HistoryEvent>,
}

/// A linear undo/redo stack.
///
/// `History` is a cheap handle; clones share the same stack.
#[derive(Clone)]
pub struct History {
    inner: Arc<HistoryInner>,
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("History")
            .field("len", &state.actions.len())
            .field("index", &state.index)
            .finish()
    }
}

impl History {
    /// Create an empty history.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HistoryInner {
                state: Mutex::new(HistoryState {
                    actions: Vec::new(),
                    index: 0,
                    can_undo: false,
                    can_redo: false,
                }),
                events: Events::new(),
            }),
        }
    }

    /// The history's event emitter.
    pub fn events(&self) -> &Events<HistoryEvent> {
        &self.inner.events
    }

    /// Listen to one of the [`event_names`].
    pub fn on<F>(&self, name: impl Into<String>, listener: F) -> EventHandle<HistoryEvent>
    where
        F: Fn(&HistoryEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(name, listener)
    }

    fn emit_all(&self, events: impl IntoIterator<Item = HistoryEvent>) {
        for event in events {
            self.inner.events.emit(event.name(), &event);
        }
    }

    /// Add an action, logging and returning `false` if it is malformed.
    pub fn add(&self, action: HistoryAction) -> bool {
        match self.try_add(action) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(target: targets::HISTORY, error = %err, "rejected history action");
                false
            }
        }
    }

    /// Add an action.
    ///
    /// Undone actions are discarded first. A combinable action with the same
    /// name as the current one replaces its redo step instead of being pushed.
    pub fn try_add(&self, action: HistoryAction) -> HistoryResult<()> {
        let combine = action.combine;
        let action = action.validate()?;
        let name = action.name.clone();

        let changed = {
            let mut state = self.inner.state.lock();
            let index = state.index;
            state.actions.truncate(index);

            let merged = match state.actions.last_mut() {
                Some(current) if combine && current.name == action.name => {
                    current.redo = action.redo.clone();
                    true
                }
                _ => false,
            };
            if !merged {
                state.actions.push(action);
                state.index = state.actions.len();
            }
            tracing::trace!(target: targets::HISTORY, name = %name, merged, len = state.actions.len(), "added action");
            state.refresh()
        };

        self.emit_all(std::iter::once(HistoryEvent::Add { name }).chain(changed));
        Ok(())
    }

    /// Undo the current action. Returns whether an action was undone.
    pub fn undo(&self) -> bool {
        match self.try_undo() {
            Ok(undone) => undone,
            Err(err) => {
                tracing::error!(target: targets::HISTORY, error = %err, "undo failed");
                false
            }
        }
    }

    /// Undo the current action, reporting a panicking undo step.
    pub fn try_undo(&self) -> HistoryResult<bool> {
        let (name, undo) = {
            let state = self.inner.state.lock();
            let Some(action) = state.index.checked_sub(1).and_then(|i| state.actions.get(i)) else {
                return Ok(false);
            };
            (action.name.clone(), action.undo.clone())
        };

        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| undo())) {
            return Err(HistoryError::UndoFailed {
                name,
                message: panic_message(panic.as_ref()),
            });
        }

        let changed = {
            let mut state = self.inner.state.lock();
            state.index = state.index.saturating_sub(1);
            state.refresh()
        };
        tracing::trace!(target: targets::HISTORY, name = %name, "undid action");
        self.emit_all(std::iter::once(HistoryEvent::Undo { name }).chain(changed));
        Ok(true)
    }

    /// Redo the next action. Returns whether an action was redone.
    pub fn redo(&self) -> bool {
        match self.try_redo() {
            Ok(redone) => redone,
            Err(err) => {
                tracing::error!(target: targets::HISTORY, error = %err, "redo failed");
                false
            }
        }
    }

    /// Redo the next action, reporting a panicking redo step.
    pub fn try_redo(&self) -> HistoryResult<bool> {
        let (name, redo) = {
            let state = self.inner.state.lock();
            let Some(action) = state.actions.get(state.index) else {
                return Ok(false);
            };
            (action.name.clone(), action.redo.clone())
        };

        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| redo())) {
            return Err(HistoryError::RedoFailed {
                name,
                message: panic_message(panic.as_ref()),
            });
        }

        let changed = {
            let mut state = self.inner.state.lock();
            state.index = (state.index + 1).min(state.actions.len());
            state.refresh()
        };
        tracing::trace!(target: targets::HISTORY, name = %name, "redid action");
        self.emit_all(std::iter::once(HistoryEvent::Redo { name }).chain(changed));
        Ok(true)
    }

    /// Drop every action.
    pub fn clear(&self) {
        let changed = {
            let mut state = self.inner.state.lock();
            if state.actions.is_empty() {
                return;
            }
            state.actions.clear();
            state.index = 0;
            state.refresh()
        };
        self.emit_all(changed);
    }

    /// Whether there is an action to undo.
    pub fn can_undo(&self) -> bool {
        self.inner.state.lock().can_undo
    }

    /// Whether there is an action to redo.
    pub fn can_redo(&self) -> bool {
        self.inner.state.lock().can_redo
    }

    /// Number of stored actions, applied or not.
    pub fn len(&self) -> usize {
        self.inner.state.lock().actions.len()
    }

    /// Whether no actions are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Name of the action an undo would revert.
    pub fn current_action_name(&self) -> Option<String> {
        let state = self.inner.state.lock();
        let index = state.index.checked_sub(1)?;
        state.actions.get(index).map(|action| action.name.clone())
    }
}
